//! Webhook ledger and inbound message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const PROVIDER_WHATSAPP: &str = "whatsapp";
pub const EVENT_MESSAGE_RECEIVED: &str = "message_received";
pub const EVENT_MESSAGE_OUTBOUND: &str = "message_outbound";

/// Row of the `webhook_events` dedup ledger
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: String,
    pub event_type: String,
    pub message_id: Option<String>,
    pub phone: Option<String>,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a ledger row
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub provider: String,
    pub event_type: String,
    pub message_id: Option<String>,
    pub phone: Option<String>,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Lightweight envelope logged for every webhook delivery
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub provider: String,
    pub object: String,
    pub entry_count: usize,
    pub received_at: DateTime<Utc>,
    #[serde(skip)]
    pub payload: serde_json::Value,
}

/// Normalized inbound message extracted from a webhook payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub message_id: String,
    pub from: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub contact_name: Option<String>,
}

/// Counters returned by one webhook processing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSummary {
    pub incoming_count: usize,
    pub processed_count: usize,
    pub failed_count: usize,
    pub duplicate_count: usize,
}
