//! Database module

pub mod queries;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Run database migrations.
///
/// Applied versions unknown to this binary are reported but left alone; they
/// usually mean an older worker is running against a newer schema.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    let migrator = sqlx::migrate!("./migrations");

    let compiled_versions: Vec<i64> = migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| m.version)
        .collect();

    let applied_versions = get_applied_versions(pool).await?;
    for version in applied_versions.iter().filter(|v| !compiled_versions.contains(v)) {
        warn!("Database has migration version {} that this worker does not know", version);
    }

    migrator.run(pool).await.context("migration failed")?;

    info!("Database migrations complete ({} known)", compiled_versions.len());
    Ok(())
}

async fn get_applied_versions(pool: &PgPool) -> Result<Vec<i64>> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')"
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(vec![]);
    }

    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT version FROM _sqlx_migrations ORDER BY version"
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(v,)| v).collect())
}
