//! Conversation and message database queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{
    Conversation, InboundMessageRecord, Message, MessageDirection, MessageStatus, NewMessage,
    OutboundMessageRecord, PROVIDER_WHATSAPP,
};

const MESSAGE_COLUMNS: &str = r#"
    id, conversation_id, body, direction, created_at,
    status, provider, provider_message_id, template_name, metadata
"#;

/// Get a conversation by ID
pub async fn get_conversation(pool: &PgPool, id: Uuid) -> Result<Option<Conversation>> {
    let conversation = sqlx::query_as::<_, Conversation>(
        "SELECT id, lead_id, last_message, created_at, updated_at FROM conversations WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(conversation)
}

/// Get the conversation of a lead
pub async fn get_conversation_by_lead(pool: &PgPool, lead_id: Uuid) -> Result<Option<Conversation>> {
    let conversation = sqlx::query_as::<_, Conversation>(
        "SELECT id, lead_id, last_message, created_at, updated_at FROM conversations WHERE lead_id = $1",
    )
    .bind(lead_id)
    .fetch_optional(pool)
    .await?;

    Ok(conversation)
}

/// Create the lead's conversation, or refresh last message / updated_at
pub async fn upsert_conversation(
    pool: &PgPool,
    lead_id: Uuid,
    last_message: &str,
    at: DateTime<Utc>,
) -> Result<Conversation> {
    let conversation = sqlx::query_as::<_, Conversation>(
        r#"
        INSERT INTO conversations (id, lead_id, last_message, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $4)
        ON CONFLICT (lead_id) DO UPDATE
            SET last_message = EXCLUDED.last_message,
                updated_at = EXCLUDED.updated_at
        RETURNING id, lead_id, last_message, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(lead_id)
    .bind(last_message)
    .bind(at)
    .fetch_one(pool)
    .await?;

    Ok(conversation)
}

/// Refresh the denormalized fields of a conversation
pub async fn touch_conversation(
    pool: &PgPool,
    id: Uuid,
    last_message: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE conversations SET last_message = $2, updated_at = $3 WHERE id = $1")
        .bind(id)
        .bind(last_message)
        .bind(at)
        .execute(pool)
        .await?;

    Ok(())
}

/// Minimal insert: only the columns every deployment has
pub async fn insert_message(pool: &PgPool, message: &NewMessage) -> Result<Message> {
    let (id, conversation_id, body, created_at): (Uuid, Uuid, String, DateTime<Utc>) =
        sqlx::query_as(
            r#"
            INSERT INTO messages (id, conversation_id, body, direction, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, conversation_id, body, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.conversation_id)
        .bind(&message.body)
        .bind(message.direction.as_str())
        .bind(message.created_at)
        .fetch_one(pool)
        .await?;

    Ok(Message {
        id,
        conversation_id,
        body,
        direction: message.direction,
        created_at,
        status: None,
        provider: None,
        provider_message_id: None,
        template_name: None,
        metadata: None,
    })
}

/// Outbound insert with delivery metadata
pub async fn insert_outbound_message(pool: &PgPool, record: &OutboundMessageRecord) -> Result<Message> {
    let query = format!(
        r#"
        INSERT INTO messages (
            id, conversation_id, body, direction, created_at,
            status, provider, provider_message_id, template_name, metadata
        )
        VALUES ($1, $2, $3, 'outbound', $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        MESSAGE_COLUMNS
    );
    let message = sqlx::query_as::<_, Message>(&query)
        .bind(Uuid::new_v4())
        .bind(record.conversation_id)
        .bind(&record.body)
        .bind(record.created_at)
        .bind(record.status.as_str())
        .bind(&record.provider)
        .bind(&record.provider_message_id)
        .bind(&record.template_name)
        .bind(record.metadata())
        .fetch_one(pool)
        .await?;

    Ok(message)
}

/// Inbound insert; the partial unique index rejects a replayed provider id
pub async fn insert_inbound_message(pool: &PgPool, record: &InboundMessageRecord) -> Result<Message> {
    let query = format!(
        r#"
        INSERT INTO messages (
            id, conversation_id, body, direction, created_at,
            status, provider, provider_message_id
        )
        VALUES ($1, $2, $3, 'inbound', $4, $5, $6, $7)
        ON CONFLICT (provider_message_id)
            WHERE direction = 'inbound' AND provider_message_id IS NOT NULL
            DO NOTHING
        RETURNING {}
        "#,
        MESSAGE_COLUMNS
    );
    let inserted = sqlx::query_as::<_, Message>(&query)
        .bind(Uuid::new_v4())
        .bind(record.conversation_id)
        .bind(&record.body)
        .bind(record.created_at)
        .bind(MessageStatus::Received.as_str())
        .bind(PROVIDER_WHATSAPP)
        .bind(&record.provider_message_id)
        .fetch_optional(pool)
        .await?;

    if let Some(message) = inserted {
        return Ok(message);
    }

    // Stored by an earlier attempt whose ledger row was never marked processed
    let query = format!(
        "SELECT {} FROM messages WHERE direction = 'inbound' AND provider_message_id = $1",
        MESSAGE_COLUMNS
    );
    let existing = sqlx::query_as::<_, Message>(&query)
        .bind(&record.provider_message_id)
        .fetch_one(pool)
        .await?;

    Ok(existing)
}

/// Most recent message of a conversation in one direction
pub async fn latest_message(
    pool: &PgPool,
    conversation_id: Uuid,
    direction: MessageDirection,
) -> Result<Option<Message>> {
    let query = format!(
        r#"
        SELECT {}
        FROM messages
        WHERE conversation_id = $1 AND direction = $2
        ORDER BY created_at DESC
        LIMIT 1
        "#,
        MESSAGE_COLUMNS
    );
    let message = sqlx::query_as::<_, Message>(&query)
        .bind(conversation_id)
        .bind(direction.as_str())
        .fetch_optional(pool)
        .await?;

    Ok(message)
}

/// Whether any message in `direction` was created strictly after `after`
pub async fn has_message_after(
    pool: &PgPool,
    conversation_id: Uuid,
    direction: MessageDirection,
    after: DateTime<Utc>,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM messages
            WHERE conversation_id = $1 AND direction = $2 AND created_at > $3
        )
        "#,
    )
    .bind(conversation_id)
    .bind(direction.as_str())
    .bind(after)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}
