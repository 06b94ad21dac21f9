//! PostgreSQL store
//!
//! Nested records (rule snapshots, ML raw results, merge summaries, finding
//! paths and audits) are stored as JSONB; statuses are stored as text.

mod file;
mod result;
mod rule;
mod task;
mod workflow;

use sqlx::PgPool;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_column<T>(value: String, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    value.parse().map_err(|e: anyhow::Error| {
        sqlx::Error::Decode(format!("Failed to parse {}: {}", column, e).into())
    })
}

fn to_u32(value: i32, column: &str) -> Result<u32, sqlx::Error> {
    u32::try_from(value)
        .map_err(|e| sqlx::Error::Decode(format!("Negative {}: {}", column, e).into()))
}
