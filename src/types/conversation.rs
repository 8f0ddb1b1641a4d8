//! Conversation and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::template::DeliveryMode;

/// Message direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl TryFrom<String> for MessageDirection {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(format!("unknown message direction '{}'", other)),
        }
    }
}

/// Delivery status recorded on messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Conversation entity (one per lead)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Message entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub body: String,
    #[sqlx(try_from = "String")]
    pub direction: MessageDirection,
    pub created_at: DateTime<Utc>,
    pub status: Option<String>,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
    pub template_name: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Minimal message insert: the columns every deployment has
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub body: String,
    pub direction: MessageDirection,
    pub created_at: DateTime<Utc>,
}

/// Inbound insert keyed by the provider message id
#[derive(Debug, Clone)]
pub struct InboundMessageRecord {
    pub conversation_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub provider_message_id: String,
}

/// Rich outbound insert carrying delivery metadata
#[derive(Debug, Clone)]
pub struct OutboundMessageRecord {
    pub conversation_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub provider: String,
    pub provider_message_id: Option<String>,
    pub template_name: Option<String>,
    pub send_mode: DeliveryMode,
    pub provider_payload: serde_json::Value,
    pub provider_error: Option<String>,
}

impl OutboundMessageRecord {
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "send_mode": self.send_mode.as_str(),
            "provider_payload": self.provider_payload,
            "provider_error": self.provider_error,
        })
    }

    /// Downgrade to the minimal insert
    pub fn minimal(&self) -> NewMessage {
        NewMessage {
            conversation_id: self.conversation_id,
            body: self.body.clone(),
            direction: MessageDirection::Outbound,
            created_at: self.created_at,
        }
    }
}
