use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

use sacentral_core::models::{
    Audit, DetectedResult, PathUnit, RuleLevel, SaResult, SaResultWithFindings,
};

use super::PgStore;
use crate::store::ResultStore;
use crate::transaction::TransactionGuard;

fn sa_result_from_row(row: &PgRow) -> Result<SaResult, sqlx::Error> {
    let level: i16 = row.try_get("rule_level")?;
    let rule_level = u8::try_from(level)
        .map_err(|e| e.to_string())
        .and_then(RuleLevel::try_from)
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    Ok(SaResult {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        rule_id: row.try_get("rule_id")?,
        rule_name: row.try_get("rule_name")?,
        rule_cwe: row.try_get("rule_cwe")?,
        rule_category: row.try_get("rule_category")?,
        rule_level,
        detected_result_ids: row.try_get("detected_result_ids")?,
    })
}

fn detected_result_from_row(row: &PgRow) -> Result<DetectedResult, sqlx::Error> {
    let path: Json<Vec<PathUnit>> = row.try_get("path")?;
    let audit: Option<Json<Audit>> = row.try_get("audit")?;
    Ok(DetectedResult {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        source_sig: row.try_get("source_sig")?,
        sink_sig: row.try_get("sink_sig")?,
        path: path.0,
        facade: row.try_get("facade")?,
        audit: audit.map(|a| a.0),
    })
}

#[async_trait]
impl ResultStore for PgStore {
    async fn insert_sa_results(
        &self,
        task_id: Uuid,
        results: &[SaResultWithFindings],
    ) -> Result<()> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let offset: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM sa_results WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_one(tx.conn()?)
        .await
        .context("Failed to read SA result position")?;

        for (index, group) in results.iter().enumerate() {
            let result = &group.result;
            sqlx::query(
                r#"
                INSERT INTO sa_results (
                    id, task_id, position, rule_id, rule_name, rule_cwe,
                    rule_category, rule_level, detected_result_ids
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(result.id)
            .bind(task_id)
            .bind(offset + index as i32)
            .bind(&result.rule_id)
            .bind(&result.rule_name)
            .bind(&result.rule_cwe)
            .bind(&result.rule_category)
            .bind(u8::from(result.rule_level) as i16)
            .bind(&result.detected_result_ids)
            .execute(tx.conn()?)
            .await
            .context("Failed to insert SA result")?;

            for (position, finding) in group.detected_results.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO detected_results (
                        id, task_id, sa_result_id, position, source_sig, sink_sig,
                        path, facade, audit
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(finding.id)
                .bind(task_id)
                .bind(result.id)
                .bind(position as i32)
                .bind(&finding.source_sig)
                .bind(&finding.sink_sig)
                .bind(Json(&finding.path))
                .bind(&finding.facade)
                .bind(finding.audit.as_ref().map(Json))
                .execute(tx.conn()?)
                .await
                .context("Failed to insert detected result")?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_sa_results(&self, task_id: Uuid, result_ids: &[Uuid]) -> Result<()> {
        sqlx::query("DELETE FROM sa_results WHERE task_id = $1 AND id = ANY($2)")
            .bind(task_id)
            .bind(result_ids)
            .execute(&self.pool)
            .await
            .context("Failed to delete SA results")?;
        Ok(())
    }

    async fn list_sa_results(&self, task_id: Uuid) -> Result<Vec<SaResultWithFindings>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, rule_id, rule_name, rule_cwe, rule_category,
                   rule_level, detected_result_ids
            FROM sa_results
            WHERE task_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list SA results")?;

        let results = rows
            .iter()
            .map(sa_result_from_row)
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to decode SA result")?;

        let finding_rows = sqlx::query(
            r#"
            SELECT id, task_id, source_sig, sink_sig, path, facade, audit
            FROM detected_results
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list detected results")?;

        let mut findings: HashMap<Uuid, DetectedResult> = finding_rows
            .iter()
            .map(|row| detected_result_from_row(row).map(|d| (d.id, d)))
            .collect::<Result<_, _>>()
            .context("Failed to decode detected result")?;

        Ok(results
            .into_iter()
            .map(|result| {
                let detected_results = result
                    .detected_result_ids
                    .iter()
                    .filter_map(|id| findings.remove(id))
                    .collect();
                SaResultWithFindings {
                    result,
                    detected_results,
                }
            })
            .collect())
    }

    async fn get_detected_result(&self, id: Uuid) -> Result<Option<DetectedResult>> {
        let row = sqlx::query(
            r#"
            SELECT id, task_id, source_sig, sink_sig, path, facade, audit
            FROM detected_results
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get detected result")?;

        row.as_ref()
            .map(detected_result_from_row)
            .transpose()
            .context("Failed to decode detected result")
    }

    async fn set_audit(&self, id: Uuid, audit: &Audit) -> Result<bool> {
        let result = sqlx::query("UPDATE detected_results SET audit = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(audit))
            .execute(&self.pool)
            .await
            .context("Failed to set audit")?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_audited(&self, task_id: Uuid) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM detected_results WHERE task_id = $1 AND audit IS NOT NULL",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count audited findings")?;
        Ok(count as u32)
    }
}
