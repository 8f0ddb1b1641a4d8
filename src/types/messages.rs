//! HTTP request/response envelopes

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Error body returned by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable reason code, when the endpoint defines one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            reason: None,
        }
    }

    pub fn with_reason(message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            reason: Some(reason.into()),
        }
    }
}

/// `POST /send` body. Every field is optional at the wire level so that
/// missing values produce a validation error instead of a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: Option<String>,
    pub body: Option<String>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub custom_variables: Option<HashMap<String, String>>,
    /// `auto` | `text` | `template`; anything else is ignored
    pub force_mode: Option<String>,
}
