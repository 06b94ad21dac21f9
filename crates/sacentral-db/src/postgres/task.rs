use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use sacentral_core::models::{
    MlPipeline, MlRawResult, RuleTemplateSnapshot, SaPipeline, SubPipelineStatus, SummaryResult,
    Task, TaskKind,
};

use super::{parse_column, to_u32, PgStore};
use crate::store::{AnalysisBinding, TaskStore};

const TASK_COLUMNS: &str = "id, trigger, code_id, target_object_name, target_object_key, kind, \
     sa_status, sa_progress, sa_started_at, sa_ended_at, sa_result_ids, sa_weakness_count, \
     ml_status, ml_progress, ml_started_at, ml_ended_at, ml_raw_result, \
     rule_snapshot, summary, merge_claimed, weakness_count, audit_count, created_at, updated_at";

fn progress(value: i16, column: &str) -> Result<u8, sqlx::Error> {
    u8::try_from(value)
        .map_err(|e| sqlx::Error::Decode(format!("Invalid {}: {}", column, e).into()))
}

fn task_from_row(row: &PgRow) -> Result<Task, sqlx::Error> {
    let kind: Option<String> = row.try_get("kind")?;
    let kind = kind
        .map(|k| parse_column::<TaskKind>(k, "kind"))
        .transpose()?;
    let rule_snapshot: Option<Json<RuleTemplateSnapshot>> = row.try_get("rule_snapshot")?;
    let ml_raw_result: Option<Json<MlRawResult>> = row.try_get("ml_raw_result")?;
    let summary: Json<SummaryResult> = row.try_get("summary")?;

    Ok(Task {
        id: row.try_get("id")?,
        trigger: row.try_get("trigger")?,
        code_id: row.try_get("code_id")?,
        target_object_name: row.try_get("target_object_name")?,
        target_object_key: row.try_get("target_object_key")?,
        kind,
        sa: SaPipeline {
            status: parse_column(row.try_get("sa_status")?, "sa_status")?,
            progress: progress(row.try_get("sa_progress")?, "sa_progress")?,
            started_at: row.try_get("sa_started_at")?,
            ended_at: row.try_get("sa_ended_at")?,
            result_ids: row.try_get("sa_result_ids")?,
            weakness_count: to_u32(row.try_get("sa_weakness_count")?, "sa_weakness_count")?,
        },
        ml: MlPipeline {
            status: parse_column(row.try_get("ml_status")?, "ml_status")?,
            progress: progress(row.try_get("ml_progress")?, "ml_progress")?,
            started_at: row.try_get("ml_started_at")?,
            ended_at: row.try_get("ml_ended_at")?,
            raw_result: ml_raw_result.map(|j| j.0),
        },
        rule_snapshot: rule_snapshot.map(|j| j.0),
        summary: summary.0,
        merge_claimed: row.try_get("merge_claimed")?,
        weakness_count: to_u32(row.try_get("weakness_count")?, "weakness_count")?,
        audit_count: to_u32(row.try_get("audit_count")?, "audit_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl PgStore {
    pub(super) async fn insert_task(&self, conn: &mut PgConnection, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, trigger, code_id, target_object_name, target_object_key, kind,
                sa_status, sa_progress, ml_status, ml_progress, summary,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(task.id)
        .bind(&task.trigger)
        .bind(task.code_id)
        .bind(&task.target_object_name)
        .bind(&task.target_object_key)
        .bind(task.kind.map(|k| k.to_string()))
        .bind(task.sa.status.to_string())
        .bind(task.sa.progress as i16)
        .bind(task.ml.status.to_string())
        .bind(task.ml.progress as i16)
        .bind(Json(&task.summary))
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(conn)
        .await
        .context("Failed to create task")?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get task")?;

        row.as_ref()
            .map(task_from_row)
            .transpose()
            .context("Failed to decode task")
    }

    async fn set_compiled_target(
        &self,
        id: Uuid,
        object_name: &str,
        object_key: &str,
        sa_progress: Option<u8>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET target_object_name = $2,
                target_object_key = $3,
                sa_progress = COALESCE($4, sa_progress),
                updated_at = NOW()
            WHERE id = $1
              AND (target_object_key IS NULL OR target_object_key = $3)
            "#,
        )
        .bind(id)
        .bind(object_name)
        .bind(object_key)
        .bind(sa_progress.map(i16::from))
        .execute(&self.pool)
        .await
        .context("Failed to set compiled target")?;
        Ok(result.rows_affected() == 1)
    }

    async fn bind_analysis(&self, id: Uuid, binding: &AnalysisBinding) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET kind = $2,
                rule_snapshot = $3,
                sa_status = $4, sa_progress = $5, sa_started_at = $6,
                ml_status = $7, ml_progress = $8, ml_started_at = $9,
                updated_at = NOW()
            WHERE id = $1 AND rule_snapshot IS NULL
            "#,
        )
        .bind(id)
        .bind(binding.kind.to_string())
        .bind(Json(&binding.snapshot))
        .bind(binding.sa.status.to_string())
        .bind(binding.sa.progress as i16)
        .bind(binding.sa.started_at)
        .bind(binding.ml.status.to_string())
        .bind(binding.ml.progress as i16)
        .bind(binding.ml.started_at)
        .execute(&self.pool)
        .await
        .context("Failed to bind analysis to task")?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition_sa(
        &self,
        id: Uuid,
        from: SubPipelineStatus,
        next: &SaPipeline,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET sa_status = $3,
                sa_progress = $4,
                sa_started_at = $5,
                sa_ended_at = $6,
                sa_result_ids = $7,
                sa_weakness_count = $8,
                weakness_count = $8,
                updated_at = NOW()
            WHERE id = $1 AND sa_status = $2
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(next.status.to_string())
        .bind(next.progress as i16)
        .bind(next.started_at)
        .bind(next.ended_at)
        .bind(&next.result_ids)
        .bind(next.weakness_count as i32)
        .execute(&self.pool)
        .await
        .context("Failed to update SA sub-pipeline")?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition_ml(
        &self,
        id: Uuid,
        from: SubPipelineStatus,
        next: &MlPipeline,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET ml_status = $3,
                ml_progress = $4,
                ml_started_at = $5,
                ml_ended_at = $6,
                ml_raw_result = $7,
                updated_at = NOW()
            WHERE id = $1 AND ml_status = $2
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(next.status.to_string())
        .bind(next.progress as i16)
        .bind(next.started_at)
        .bind(next.ended_at)
        .bind(next.raw_result.as_ref().map(Json))
        .execute(&self.pool)
        .await
        .context("Failed to update ML sub-pipeline")?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_merge(
        &self,
        id: Uuid,
        summary: &SummaryResult,
        weakness_count: u32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET merge_claimed = TRUE, summary = $2, weakness_count = $3, updated_at = NOW()
            WHERE id = $1
              AND merge_claimed = FALSE
              AND sa_status = 'success'
              AND ml_status = 'success'
            "#,
        )
        .bind(id)
        .bind(Json(summary))
        .bind(weakness_count as i32)
        .execute(&self.pool)
        .await
        .context("Failed to claim merge")?;

        Ok(result.rows_affected() == 1)
    }

    async fn store_summary(
        &self,
        id: Uuid,
        summary: &SummaryResult,
        weakness_count: u32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET summary = $2, weakness_count = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(summary))
        .bind(weakness_count as i32)
        .execute(&self.pool)
        .await
        .context("Failed to store merge summary")?;
        Ok(())
    }

    async fn set_audit_count(&self, id: Uuid, audit_count: u32) -> Result<()> {
        sqlx::query("UPDATE tasks SET audit_count = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(audit_count as i32)
            .execute(&self.pool)
            .await
            .context("Failed to update audit count")?;
        Ok(())
    }
}
