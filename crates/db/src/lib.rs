//! PostgreSQL persistence for the preservation core.
//!
//! - [`models`]: `FromRow` row structs and their conversion to domain types.
//! - [`repositories`]: zero-sized repositories taking `&PgPool`.
//! - [`stores`]: adapters implementing the `ark_core::ports` traits.

use ark_core::error::StoreError;
use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;
pub mod stores;

pub type DbPool = sqlx::PgPool;

/// Default pool size when `DATABASE_MAX_CONNECTIONS` is not set.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to confirm the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Map a sqlx error onto the port error type.
///
/// PostgreSQL unique violations (code 23505) on `uq_`-prefixed constraints
/// become [`StoreError::Duplicate`]; everything else is a backend failure.
pub fn store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let constraint = db_err.constraint().unwrap_or("unknown");
            if constraint.starts_with("uq_") {
                return StoreError::Duplicate(constraint.to_string());
            }
        }
    }
    tracing::error!(error = %err, "Database error");
    StoreError::backend(err)
}
