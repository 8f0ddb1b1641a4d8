//! Audit trail types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actor name recorded for automation side effects
pub const AUTOMATION_ACTOR: &str = "Automation";

/// Actor name for outbound sends (callers are not authenticated here)
pub const MESSAGING_ACTOR: &str = "WhatsApp";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    LeadStatusChange,
    LeadCreated,
    TaskCreated,
    TaskStatusChange,
    MessageSent,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadStatusChange => "lead_status_change",
            Self::LeadCreated => "lead_created",
            Self::TaskCreated => "task_created",
            Self::TaskStatusChange => "task_status_change",
            Self::MessageSent => "message_sent",
        }
    }
}

/// Insert payload for the audit log
#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub action: AuditAction,
    pub actor: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl NewAuditLog {
    pub fn automation(
        action: AuditAction,
        entity_type: &str,
        entity_id: Uuid,
        summary: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self::by(AUTOMATION_ACTOR, action, entity_type, entity_id, summary, at)
    }

    pub fn by(
        actor: &str,
        action: AuditAction,
        entity_type: &str,
        entity_id: Uuid,
        summary: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            actor: actor.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            summary: summary.into(),
            created_at: at,
        }
    }
}
