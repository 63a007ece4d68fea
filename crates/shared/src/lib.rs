//! Shared infrastructure for the coda workspace
//!
//! Owns database pool construction and the embedded migrations so the API
//! server, the worker, and integration tests all connect the same way.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create the main connection pool used for request handling.
///
/// Sized for a pooled (PgBouncer-style) connection string; keep
/// `max_connections` modest so several instances can share the database.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Create a pool suitable for running migrations.
///
/// Migrations need longer statement timeouts and must go through a direct
/// (non-pooled) connection string, since transaction poolers don't support
/// the prepared statements sqlx's migrator uses.
pub async fn create_migration_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run all embedded migrations against the given pool.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations complete");
    Ok(())
}
