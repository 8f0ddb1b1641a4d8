//! Message template types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Requested send mode (caller, template hint or runtime default)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    #[default]
    Auto,
    Text,
    Template,
}

impl SendMode {
    /// Exact match only; anything else is "not a send mode"
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "text" => Some(Self::Text),
            "template" => Some(Self::Template),
            _ => None,
        }
    }

    /// The concrete delivery form, if this mode is not `Auto`
    pub fn explicit(&self) -> Option<DeliveryMode> {
        match self {
            Self::Auto => None,
            Self::Text => Some(DeliveryMode::Text),
            Self::Template => Some(DeliveryMode::Template),
        }
    }
}

/// Resolved delivery form of an outbound message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Text,
    Template,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Template => "template",
        }
    }
}

/// Admin-edited message template
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    pub id: Uuid,
    pub name: String,
    pub preview: String,
    pub body: String,
    pub send_mode: Option<String>,
    pub provider_template_name: Option<String>,
    pub provider_language_code: Option<String>,
    pub variable_defaults: Option<serde_json::Value>,
}

impl MessageTemplate {
    pub fn send_mode_hint(&self) -> Option<SendMode> {
        self.send_mode.as_deref().and_then(SendMode::parse)
    }

    /// Provider-registered name, ignoring blanks
    pub fn provider_template_name(&self) -> Option<&str> {
        self.provider_template_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    /// String-valued defaults only; other JSON values are ignored
    pub fn default_variables(&self) -> HashMap<String, String> {
        let Some(serde_json::Value::Object(map)) = &self.variable_defaults else {
            return HashMap::new();
        };
        map.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(defaults: serde_json::Value) -> MessageTemplate {
        MessageTemplate {
            id: Uuid::new_v4(),
            name: "welcome".into(),
            preview: "Welcome".into(),
            body: "Hola {{nombre}}".into(),
            send_mode: Some("template".into()),
            provider_template_name: Some("  ".into()),
            provider_language_code: None,
            variable_defaults: Some(defaults),
        }
    }

    #[test]
    fn test_default_variables_keep_only_strings() {
        let t = template(json!({"agente": "Equipo", "count": 3, "flag": true}));
        let vars = t.default_variables();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("agente").map(String::as_str), Some("Equipo"));
    }

    #[test]
    fn test_blank_provider_template_name_is_absent() {
        let t = template(json!({}));
        assert!(t.provider_template_name().is_none());
        assert_eq!(t.send_mode_hint(), Some(SendMode::Template));
    }

    #[test]
    fn test_send_mode_parse_is_strict() {
        assert_eq!(SendMode::parse("auto"), Some(SendMode::Auto));
        assert_eq!(SendMode::parse("TEXT"), None);
        assert_eq!(SendMode::Text.explicit(), Some(DeliveryMode::Text));
        assert_eq!(SendMode::Auto.explicit(), None);
    }
}
