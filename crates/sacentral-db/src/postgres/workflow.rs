use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use sacentral_core::models::{EngineLimits, Task, Workflow, WorkflowStatus, WorkflowType};

use super::{parse_column, to_u32, PgStore};
use crate::store::WorkflowStore;
use crate::transaction::TransactionGuard;

const WORKFLOW_COLUMNS: &str = "id, workflow_type, status, steps, progress, task_id, code_id, \
     rule_template_id, trigger, timeout_minutes, max_memory_gb, timeline, created_at, updated_at";

fn workflow_from_row(row: &PgRow) -> Result<Workflow, sqlx::Error> {
    let code: i16 = row.try_get("workflow_type")?;
    let workflow_type = WorkflowType::from_code(code).ok_or_else(|| {
        sqlx::Error::Decode(format!("Unrecognized workflow type code {}", code).into())
    })?;
    Ok(Workflow {
        id: row.try_get("id")?,
        workflow_type,
        status: parse_column(row.try_get("status")?, "status")?,
        steps: to_u32(row.try_get("steps")?, "steps")?,
        progress: to_u32(row.try_get("progress")?, "progress")?,
        task_id: row.try_get("task_id")?,
        code_id: row.try_get("code_id")?,
        rule_template_id: row.try_get("rule_template_id")?,
        trigger: row.try_get("trigger")?,
        limits: EngineLimits {
            timeout_minutes: to_u32(row.try_get("timeout_minutes")?, "timeout_minutes")?,
            max_memory_gb: to_u32(row.try_get("max_memory_gb")?, "max_memory_gb")?,
        },
        timeline: row.try_get("timeline")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn create_workflow(&self, workflow: &Workflow, task: &Task) -> Result<()> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        self.insert_task(tx.conn()?, task).await?;

        sqlx::query(
            r#"
            INSERT INTO workflows (
                id, workflow_type, status, steps, progress, task_id, code_id,
                rule_template_id, trigger, timeout_minutes, max_memory_gb, timeline,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.workflow_type.code())
        .bind(workflow.status.to_string())
        .bind(workflow.steps as i32)
        .bind(workflow.progress as i32)
        .bind(workflow.task_id)
        .bind(workflow.code_id)
        .bind(workflow.rule_template_id)
        .bind(&workflow.trigger)
        .bind(workflow.limits.timeout_minutes as i32)
        .bind(workflow.limits.max_memory_gb as i32)
        .bind(&workflow.timeline)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(tx.conn()?)
        .await
        .context("Failed to create workflow")?;

        tx.commit().await?;

        tracing::debug!(
            workflow_id = %workflow.id,
            task_id = %task.id,
            workflow_type = %workflow.workflow_type,
            "Workflow created"
        );
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM workflows WHERE id = $1",
            WORKFLOW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get workflow")?;

        row.as_ref()
            .map(workflow_from_row)
            .transpose()
            .context("Failed to decode workflow")
    }

    async fn advance_workflow(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Workflow>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE workflows
            SET progress = progress + 1,
                timeline = array_append(timeline, $2),
                updated_at = $2
            WHERE id = $1 AND status = 'running' AND progress < steps
            RETURNING {}
            "#,
            WORKFLOW_COLUMNS
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to advance workflow")?;

        row.as_ref()
            .map(workflow_from_row)
            .transpose()
            .context("Failed to decode workflow")
    }

    async fn finish_workflow(&self, id: Uuid, status: WorkflowStatus) -> Result<bool> {
        if !WorkflowStatus::Running.can_transition_to(status) {
            return Ok(false);
        }
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to finish workflow")?;

        Ok(result.rows_affected() == 1)
    }
}
