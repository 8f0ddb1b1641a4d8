//! Template variable resolution and placeholder interpolation
//!
//! Placeholders are `{{key}}` or `[[key]]`, whitespace around the key allowed,
//! keys matched case-insensitively. Unknown keys are left in the text as-is.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::types::{LeadStatus, MessageTemplate};

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([^{}\[\]]+?)\s*\}\}|\[\[\s*([^{}\[\]]+?)\s*\]\]")
        .expect("placeholder regex is valid")
});

/// Lead data available to templates
#[derive(Debug, Clone)]
pub struct VariableContext {
    pub lead_name: String,
    /// Digits only
    pub phone: String,
    pub country: String,
    pub status: LeadStatus,
    pub now: DateTime<Utc>,
}

/// Greeting name for leads created without a profile name
pub const FALLBACK_LEAD_NAME: &str = "cliente";

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Merge base variables, template defaults and caller overrides (later wins)
pub fn build_variables(
    context: &VariableContext,
    template: Option<&MessageTemplate>,
    custom: &HashMap<String, String>,
) -> HashMap<String, String> {
    let first_name = context
        .lead_name
        .split_whitespace()
        .next()
        .unwrap_or(&context.lead_name)
        .to_string();

    let mut vars: HashMap<String, String> = HashMap::from([
        ("nombre".to_string(), context.lead_name.clone()),
        ("first_name".to_string(), first_name),
        ("telefono".to_string(), context.phone.clone()),
        ("pais".to_string(), context.country.clone()),
        ("estado".to_string(), context.status.as_str().to_string()),
        ("fecha".to_string(), context.now.format("%Y-%m-%d").to_string()),
    ]);

    if let Some(template) = template {
        for (key, value) in template.default_variables() {
            vars.insert(normalize_key(&key), value);
        }
    }

    for (key, value) in custom {
        vars.insert(normalize_key(key), value.clone());
    }

    vars
}

/// Replace every known placeholder; unknown ones stay verbatim
pub fn interpolate(text: &str, vars: &HashMap<String, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures| {
            let key = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| normalize_key(m.as_str()))
                .unwrap_or_default();
            match vars.get(&key) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Distinct placeholder keys in first-occurrence order
pub fn extract_placeholder_keys(text: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(text) {
        let Some(m) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let key = normalize_key(m.as_str());
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}
