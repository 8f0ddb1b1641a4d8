//! Lead types for the sales pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lead lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    FollowingUp,
    Called,
    Sold,
    NotInterested,
    ClosedByTime,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::FollowingUp => "following_up",
            Self::Called => "called",
            Self::Sold => "sold",
            Self::NotInterested => "not_interested",
            Self::ClosedByTime => "closed_by_time",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "new" => Some(Self::New),
            "contacted" => Some(Self::Contacted),
            "following_up" => Some(Self::FollowingUp),
            "called" => Some(Self::Called),
            "sold" => Some(Self::Sold),
            "not_interested" => Some(Self::NotInterested),
            "closed_by_time" => Some(Self::ClosedByTime),
            _ => None,
        }
    }

    /// Automations never move a lead out of (or back into) these statuses.
    pub fn is_terminal_for_automations(&self) -> bool {
        matches!(self, Self::Sold | Self::ClosedByTime)
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for LeadStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown lead status '{}'", value))
    }
}

/// Lead entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub name: Option<String>,
    pub phone: String,
    pub phone_normalized: String,
    pub country: String,
    #[sqlx(try_from = "String")]
    pub status: LeadStatus,
    pub status_changed_at: DateTime<Utc>,
    pub admin_id: Uuid,
    pub agent_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Display name, falling back to a generic label
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Lead")
    }
}

/// Insert payload for a lead
#[derive(Debug, Clone)]
pub struct NewLead {
    pub name: Option<String>,
    pub phone: String,
    pub country: String,
    pub status: LeadStatus,
    pub admin_id: Uuid,
    pub agent_id: Uuid,
}

/// One row of the append-only status ledger
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LeadStatusHistory {
    pub id: Uuid,
    pub lead_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: LeadStatus,
    pub changed_at: DateTime<Utc>,
    pub user_id: Uuid,
}

/// Keep only the digits of a phone number
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_strips_formatting() {
        assert_eq!(normalize_phone("+593 99-123 4567"), "593991234567");
        assert_eq!(normalize_phone("(57) 300.111.2222"), "573001112222");
        assert_eq!(normalize_phone("abc"), "");
    }

    #[test]
    fn test_lead_status_parse_accepts_dashes_and_case() {
        assert_eq!(LeadStatus::parse("Following-Up"), Some(LeadStatus::FollowingUp));
        assert_eq!(LeadStatus::parse(" closed_by_time "), Some(LeadStatus::ClosedByTime));
        assert_eq!(LeadStatus::parse("archived"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(LeadStatus::Sold.is_terminal_for_automations());
        assert!(LeadStatus::ClosedByTime.is_terminal_for_automations());
        assert!(!LeadStatus::NotInterested.is_terminal_for_automations());
        assert!(!LeadStatus::New.is_terminal_for_automations());
    }

    #[test]
    fn test_lead_status_serializes_snake_case() {
        let json = serde_json::to_string(&LeadStatus::NotInterested).unwrap();
        assert_eq!(json, "\"not_interested\"");
    }
}
