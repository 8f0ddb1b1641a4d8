//! Webhook ledger queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{NewWebhookEvent, WebhookEvent};

const EVENT_COLUMNS: &str = r#"
    id, provider, event_type, message_id, phone, payload,
    processed, error, processed_at, created_at
"#;

/// Find a ledger row for the tuple, preferring the processed one
pub async fn find_event(
    pool: &PgPool,
    provider: &str,
    event_type: &str,
    message_id: &str,
    processed_only: bool,
) -> Result<Option<WebhookEvent>> {
    let query = format!(
        r#"
        SELECT {}
        FROM webhook_events
        WHERE provider = $1 AND event_type = $2 AND message_id = $3
          AND ($4 = FALSE OR processed = TRUE)
        ORDER BY processed DESC, created_at DESC
        LIMIT 1
        "#,
        EVENT_COLUMNS
    );
    let event = sqlx::query_as::<_, WebhookEvent>(&query)
        .bind(provider)
        .bind(event_type)
        .bind(message_id)
        .bind(processed_only)
        .fetch_optional(pool)
        .await?;

    Ok(event)
}

/// Insert a ledger row
pub async fn insert_event(pool: &PgPool, event: &NewWebhookEvent) -> Result<WebhookEvent> {
    let query = format!(
        r#"
        INSERT INTO webhook_events (
            id, provider, event_type, message_id, phone, payload,
            processed, error, processed_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
        RETURNING {}
        "#,
        EVENT_COLUMNS
    );
    let row = sqlx::query_as::<_, WebhookEvent>(&query)
        .bind(Uuid::new_v4())
        .bind(&event.provider)
        .bind(&event.event_type)
        .bind(&event.message_id)
        .bind(&event.phone)
        .bind(&event.payload)
        .bind(event.processed)
        .bind(&event.error)
        .bind(event.processed_at)
        .fetch_one(pool)
        .await?;

    Ok(row)
}

/// Mark a row processed. Returns `false` when the partial unique index says
/// another row of the same tuple already won.
pub async fn mark_processed(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE webhook_events SET processed = TRUE, error = NULL, processed_at = $2 WHERE id = $1",
    )
    .bind(id)
    .bind(at)
    .execute(pool)
    .await;

    match result {
        Ok(done) => Ok(done.rows_affected() > 0),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Record a failed attempt without touching a processed row
pub async fn mark_failed(pool: &PgPool, id: Uuid, error: &str, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE webhook_events
        SET error = $2, processed_at = $3
        WHERE id = $1 AND processed = FALSE
        "#,
    )
    .bind(id)
    .bind(error)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(())
}
