//! Postgres-backed stores.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | Mapped to | Scenario |
//! |------------|----------------------|-----------|----------|
//! | Database (unique violation) | `23505` | `SqlFailure::UniqueViolation` | Duplicate normalized SKU |
//! | Database (other) | Any other | `SqlFailure::Other` | Constraint or server errors |
//! | PoolClosed | N/A | `SqlFailure::Other` | Connection pool was closed |
//! | Other | N/A | `SqlFailure::Other` | Network errors, decode errors, etc. |

mod jobs;
mod products;
mod webhooks;

use sqlx::PgPool;
use tracing::info;

pub use jobs::PostgresJobStore;
pub use products::PostgresProductRepository;
pub use webhooks::PostgresWebhookStore;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Create tables and indexes if they do not exist yet.
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    info!("database schema applied");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SqlFailure {
    UniqueViolation(String),
    Other(String),
}

impl SqlFailure {
    pub(crate) fn into_message(self) -> String {
        match self {
            SqlFailure::UniqueViolation(msg) | SqlFailure::Other(msg) => msg,
        }
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SqlFailure {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if code.as_ref() == "23505" => SqlFailure::UniqueViolation(msg),
                _ => SqlFailure::Other(msg),
            }
        }
        sqlx::Error::PoolClosed => SqlFailure::Other(format!("connection pool closed in {}", operation)),
        _ => SqlFailure::Other(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Counters are `u64` in the domain and `BIGINT` in the database.
pub(crate) fn to_db_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_db_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}
