use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use sacentral_core::models::{Rule, RuleLevel, RuleTemplate};

use super::PgStore;
use crate::store::RuleCatalog;

fn rule_from_row(row: &PgRow) -> Result<Rule, sqlx::Error> {
    let level: i16 = row.try_get("level")?;
    let level = u8::try_from(level)
        .map_err(|e| e.to_string())
        .and_then(RuleLevel::try_from)
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    Ok(Rule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        cwe: row.try_get("cwe")?,
        category: row.try_get("category")?,
        level,
        source: row.try_get("source")?,
        sink: row.try_get("sink")?,
        enabled: row.try_get("enabled")?,
        deleted: row.try_get("deleted")?,
    })
}

fn template_from_row(row: &PgRow) -> Result<RuleTemplate, sqlx::Error> {
    Ok(RuleTemplate {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        rule_ids: row.try_get("rule_ids")?,
        enabled: row.try_get("enabled")?,
        is_default: row.try_get("is_default")?,
    })
}

const TEMPLATE_SELECT: &str = r#"
    SELECT t.id, t.name, t.enabled, t.is_default,
           COALESCE(
               ARRAY(SELECT r.rule_id FROM rule_template_rules r
                     WHERE r.template_id = t.id ORDER BY r.position),
               '{}'
           ) AS rule_ids
    FROM rule_templates t
"#;

#[async_trait]
impl RuleCatalog for PgStore {
    async fn get_template(&self, id: Uuid) -> Result<Option<RuleTemplate>> {
        let row = sqlx::query(&format!("{} WHERE t.id = $1", TEMPLATE_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get rule template")?;

        row.as_ref()
            .map(template_from_row)
            .transpose()
            .context("Failed to decode rule template")
    }

    async fn default_template(&self) -> Result<Option<RuleTemplate>> {
        let row = sqlx::query(&format!(
            "{} WHERE t.is_default AND t.enabled ORDER BY t.created_at ASC LIMIT 1",
            TEMPLATE_SELECT
        ))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get default rule template")?;

        row.as_ref()
            .map(template_from_row)
            .transpose()
            .context("Failed to decode rule template")
    }

    async fn active_rules(&self, template_id: Uuid) -> Result<Vec<Rule>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name, r.cwe, r.category, r.level, r.source, r.sink,
                   r.enabled, r.deleted
            FROM rule_template_rules tr
            JOIN rules r ON r.id = tr.rule_id
            WHERE tr.template_id = $1 AND r.enabled AND NOT r.deleted
            ORDER BY tr.position ASC
            "#,
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load active rules")?;

        rows.iter()
            .map(rule_from_row)
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to decode rule")
    }
}
