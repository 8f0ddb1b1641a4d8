//! Runtime configuration reader
//!
//! Operational parameters live in the `runtime_config` table as loosely typed
//! JSON values. This module is the only place that sees those values: each
//! consumer declares its keys and defaults, and gets back a typed struct.
//! A missing, disabled or malformed entry silently falls back to the default,
//! and a failing store read falls back to all defaults.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::store::CrmStore;
use crate::types::{LeadStatus, SendMode};

/// Raw values for a set of keys, with typed accessors
#[derive(Debug, Clone, Default)]
pub struct RuntimeValues {
    values: HashMap<String, Value>,
}

impl RuntimeValues {
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Load the enabled entries among `keys`. Never fails.
    pub async fn load(store: &dyn CrmStore, keys: &[&str]) -> Self {
        match store.runtime_config_entries(keys).await {
            Ok(entries) => Self::from_pairs(entries.into_iter().map(|e| (e.key, e.value))),
            Err(e) => {
                warn!("Runtime config unavailable, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Literal booleans or the strings "true"/"false" (any case)
    pub fn bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// Finite numbers or numeric strings
    pub fn number(&self, key: &str, default: f64) -> f64 {
        let parsed = match self.values.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed.filter(|n| n.is_finite()).unwrap_or(default)
    }

    /// Non-blank strings, trimmed
    pub fn string(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => default.to_string(),
        }
    }

    /// Arrays of strings; blanks and non-strings dropped, empty result falls back
    pub fn string_list(&self, key: &str, default: &[&str]) -> Vec<String> {
        let parsed: Vec<String> = match self.values.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if parsed.is_empty() {
            default.iter().map(|s| s.to_string()).collect()
        } else {
            parsed
        }
    }

    pub fn send_mode(&self, key: &str, default: SendMode) -> SendMode {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .and_then(SendMode::parse)
            .unwrap_or(default)
    }

    /// Status list; unknown names are dropped, empty result falls back
    pub fn lead_statuses(&self, key: &str, default: &[LeadStatus]) -> Vec<LeadStatus> {
        let defaults: Vec<&str> = default.iter().map(LeadStatus::as_str).collect();
        let parsed: Vec<LeadStatus> = self
            .string_list(key, &defaults)
            .iter()
            .filter_map(|s| LeadStatus::parse(s))
            .collect();
        if parsed.is_empty() {
            default.to_vec()
        } else {
            parsed
        }
    }

    pub fn lead_status(&self, key: &str, default: LeadStatus) -> LeadStatus {
        LeadStatus::parse(&self.string(key, default.as_str())).unwrap_or(default)
    }
}

// ============================================================================
// Outbound messaging
// ============================================================================

pub const KEY_GRAPH_API_VERSION: &str = "graph_api_version";
pub const KEY_DEFAULT_MODE: &str = "outbound_default_mode";
pub const KEY_WINDOW_HOURS: &str = "outbound_conversation_window_hours";
pub const KEY_ALLOW_TEXT_OUTSIDE_WINDOW: &str = "outbound_allow_text_outside_window";
pub const KEY_REQUIRE_TEMPLATE_OUTSIDE_WINDOW: &str = "outbound_require_template_outside_window";
pub const KEY_DEFAULT_TEMPLATE_LANGUAGE: &str = "outbound_default_template_language";
pub const KEY_DRY_RUN: &str = "outbound_dry_run";

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRuntimeConfig {
    pub graph_api_version: String,
    pub default_send_mode: SendMode,
    pub conversation_window_hours: f64,
    pub allow_text_outside_window: bool,
    pub require_template_outside_window: bool,
    pub default_template_language: String,
    pub dry_run: bool,
}

impl OutboundRuntimeConfig {
    /// Defaults; the API version comes from process configuration
    pub fn defaults(graph_api_version: &str) -> Self {
        Self {
            graph_api_version: graph_api_version.to_string(),
            default_send_mode: SendMode::Auto,
            conversation_window_hours: 24.0,
            allow_text_outside_window: false,
            require_template_outside_window: true,
            default_template_language: "es".to_string(),
            dry_run: false,
        }
    }

    pub fn from_values(values: &RuntimeValues, graph_api_version: &str) -> Self {
        let d = Self::defaults(graph_api_version);
        Self {
            graph_api_version: values.string(KEY_GRAPH_API_VERSION, &d.graph_api_version),
            default_send_mode: values.send_mode(KEY_DEFAULT_MODE, d.default_send_mode),
            conversation_window_hours: values.number(KEY_WINDOW_HOURS, d.conversation_window_hours),
            allow_text_outside_window: values
                .bool(KEY_ALLOW_TEXT_OUTSIDE_WINDOW, d.allow_text_outside_window),
            require_template_outside_window: values
                .bool(KEY_REQUIRE_TEMPLATE_OUTSIDE_WINDOW, d.require_template_outside_window),
            default_template_language: values
                .string(KEY_DEFAULT_TEMPLATE_LANGUAGE, &d.default_template_language),
            dry_run: values.bool(KEY_DRY_RUN, d.dry_run),
        }
    }

    pub async fn load(store: &dyn CrmStore, graph_api_version: &str) -> Self {
        let values = RuntimeValues::load(
            store,
            &[
                KEY_GRAPH_API_VERSION,
                KEY_DEFAULT_MODE,
                KEY_WINDOW_HOURS,
                KEY_ALLOW_TEXT_OUTSIDE_WINDOW,
                KEY_REQUIRE_TEMPLATE_OUTSIDE_WINDOW,
                KEY_DEFAULT_TEMPLATE_LANGUAGE,
                KEY_DRY_RUN,
            ],
        )
        .await;
        Self::from_values(&values, graph_api_version)
    }
}

// ============================================================================
// No-response automation
// ============================================================================

pub const KEY_NO_RESPONSE_ENABLED: &str = "automations_no_response_enabled";
pub const KEY_NO_RESPONSE_MINUTES: &str = "automations_no_response_minutes";
pub const KEY_NO_RESPONSE_STATUSES: &str = "automations_no_response_statuses";
pub const KEY_NO_RESPONSE_TASK_TYPE: &str = "automations_no_response_task_type";
pub const KEY_NO_RESPONSE_TASK_TITLE: &str = "automations_no_response_task_title";

#[derive(Debug, Clone, PartialEq)]
pub struct NoResponseConfig {
    pub enabled: bool,
    pub minutes: f64,
    pub statuses: Vec<LeadStatus>,
    pub task_type: String,
    pub task_title: String,
}

impl Default for NoResponseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minutes: 10.0,
            statuses: vec![LeadStatus::Contacted, LeadStatus::FollowingUp],
            task_type: "auto_follow_up".to_string(),
            task_title: "Automatic follow-up: no response".to_string(),
        }
    }
}

impl NoResponseConfig {
    pub fn from_values(values: &RuntimeValues) -> Self {
        let d = Self::default();
        Self {
            enabled: values.bool(KEY_NO_RESPONSE_ENABLED, d.enabled),
            minutes: values.number(KEY_NO_RESPONSE_MINUTES, d.minutes).max(1.0),
            statuses: values.lead_statuses(KEY_NO_RESPONSE_STATUSES, &d.statuses),
            task_type: values.string(KEY_NO_RESPONSE_TASK_TYPE, &d.task_type),
            task_title: values.string(KEY_NO_RESPONSE_TASK_TITLE, &d.task_title),
        }
    }

    pub async fn load(store: &dyn CrmStore) -> Self {
        let values = RuntimeValues::load(
            store,
            &[
                KEY_NO_RESPONSE_ENABLED,
                KEY_NO_RESPONSE_MINUTES,
                KEY_NO_RESPONSE_STATUSES,
                KEY_NO_RESPONSE_TASK_TYPE,
                KEY_NO_RESPONSE_TASK_TITLE,
            ],
        )
        .await;
        Self::from_values(&values)
    }
}

// ============================================================================
// SLA close automation
// ============================================================================

pub const KEY_SLA_ENABLED: &str = "automations_sla_close_enabled";
pub const KEY_SLA_DAYS: &str = "automations_sla_close_days";
pub const KEY_SLA_STATUSES: &str = "automations_sla_close_statuses";
pub const KEY_SLA_TARGET_STATUS: &str = "automations_sla_close_target_status";

#[derive(Debug, Clone, PartialEq)]
pub struct SlaCloseConfig {
    pub enabled: bool,
    pub days: f64,
    /// Source statuses; never contains a terminal status
    pub statuses: Vec<LeadStatus>,
    pub target_status: LeadStatus,
}

impl Default for SlaCloseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            days: 5.0,
            statuses: vec![
                LeadStatus::New,
                LeadStatus::Contacted,
                LeadStatus::FollowingUp,
                LeadStatus::Called,
            ],
            target_status: LeadStatus::ClosedByTime,
        }
    }
}

impl SlaCloseConfig {
    pub fn from_values(values: &RuntimeValues) -> Self {
        let d = Self::default();
        let target_status = values.lead_status(KEY_SLA_TARGET_STATUS, d.target_status);
        let mut statuses: Vec<LeadStatus> = values
            .lead_statuses(KEY_SLA_STATUSES, &d.statuses)
            .into_iter()
            .filter(|s| !s.is_terminal_for_automations() && *s != target_status)
            .collect();
        if statuses.is_empty() {
            warn!("SLA close statuses only named terminal statuses, using defaults");
            statuses = d.statuses.clone();
        }
        Self {
            enabled: values.bool(KEY_SLA_ENABLED, d.enabled),
            days: values.number(KEY_SLA_DAYS, d.days).max(1.0),
            statuses,
            target_status,
        }
    }

    pub async fn load(store: &dyn CrmStore) -> Self {
        let values = RuntimeValues::load(
            store,
            &[KEY_SLA_ENABLED, KEY_SLA_DAYS, KEY_SLA_STATUSES, KEY_SLA_TARGET_STATUS],
        )
        .await;
        Self::from_values(&values)
    }
}
