//! Audit log queries

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::NewAuditLog;

/// Append an audit entry
pub async fn insert_audit_log(pool: &PgPool, entry: &NewAuditLog) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, action, actor, entity_type, entity_id, summary, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.action.as_str())
    .bind(&entry.actor)
    .bind(&entry.entity_type)
    .bind(entry.entity_id)
    .bind(&entry.summary)
    .bind(entry.created_at)
    .execute(pool)
    .await?;

    Ok(())
}
