use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use sacentral_core::models::{CodeData, StoredFile};

use super::PgStore;
use crate::store::FileRepository;
use crate::transaction::TransactionGuard;

fn file_from_row(row: &PgRow) -> Result<StoredFile, sqlx::Error> {
    let size: i64 = row.try_get("size")?;
    Ok(StoredFile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        size: size.max(0) as u64,
        md5: row.try_get("md5")?,
        object_key: row.try_get("object_key")?,
        folder: row.try_get("folder")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn insert_file(conn: &mut PgConnection, file: &StoredFile) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO stored_files (id, name, size, md5, object_key, folder, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(file.id)
    .bind(&file.name)
    .bind(file.size as i64)
    .bind(&file.md5)
    .bind(&file.object_key)
    .bind(&file.folder)
    .bind(file.created_at)
    .execute(conn)
    .await
    .context("Failed to insert stored file")?;
    Ok(())
}

#[async_trait]
impl FileRepository for PgStore {
    async fn get_code(&self, id: Uuid) -> Result<Option<CodeData>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_name, source_file_id, compiled_file_id, created_at
            FROM code_data
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get code data")?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(CodeData {
            id: row.try_get("id")?,
            source_name: row.try_get("source_name")?,
            source_file_id: row.try_get("source_file_id")?,
            compiled_file_id: row.try_get("compiled_file_id")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<StoredFile>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, size, md5, object_key, folder, created_at
            FROM stored_files
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get stored file")?;

        row.as_ref()
            .map(file_from_row)
            .transpose()
            .context("Failed to decode stored file")
    }

    async fn create_code(&self, code: &CodeData, source: &StoredFile) -> Result<()> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;
        insert_file(tx.conn()?, source).await?;
        sqlx::query(
            r#"
            INSERT INTO code_data (id, source_name, source_file_id, compiled_file_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(code.id)
        .bind(&code.source_name)
        .bind(code.source_file_id)
        .bind(code.compiled_file_id)
        .bind(code.created_at)
        .execute(tx.conn()?)
        .await
        .context("Failed to create code data")?;
        tx.commit().await
    }

    async fn register_compiled(&self, code_id: Uuid, file: &StoredFile) -> Result<bool> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        // Row lock serializes concurrent registrations for the same code.
        let row = sqlx::query(
            r#"
            SELECT f.object_key
            FROM code_data c
            LEFT JOIN stored_files f ON f.id = c.compiled_file_id
            WHERE c.id = $1
            FOR UPDATE OF c
            "#,
        )
        .bind(code_id)
        .fetch_optional(tx.conn()?)
        .await
        .context("Failed to lock code data")?;

        let Some(row) = row else {
            tx.rollback().await?;
            anyhow::bail!("Code {} not found", code_id);
        };
        let current_key: Option<String> = row.try_get("object_key")?;
        if current_key.as_deref() == Some(file.object_key.as_str()) {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_file(tx.conn()?, file).await?;
        sqlx::query("UPDATE code_data SET compiled_file_id = $2 WHERE id = $1")
            .bind(code_id)
            .bind(file.id)
            .execute(tx.conn()?)
            .await
            .context("Failed to attach compiled file")?;
        tx.commit().await?;
        Ok(true)
    }
}
