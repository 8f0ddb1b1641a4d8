//! Runtime configuration queries

use anyhow::Result;
use sqlx::PgPool;

use crate::types::RuntimeConfigEntry;

/// Enabled entries among `keys`
pub async fn get_enabled_entries(pool: &PgPool, keys: &[&str]) -> Result<Vec<RuntimeConfigEntry>> {
    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    let entries = sqlx::query_as::<_, RuntimeConfigEntry>(
        r#"
        SELECT key, value, enabled
        FROM runtime_config
        WHERE enabled = TRUE AND key = ANY($1)
        "#,
    )
    .bind(keys)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}
