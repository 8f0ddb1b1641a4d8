//! WhatsApp delivery abstraction.
//!
//! `WhatsAppProvider` is the seam to the messaging provider:
//! - `GraphApiProvider` calls the Cloud API (production)
//! - `FakeWhatsAppProvider` records requests and answers with scripted results (tests)
//!
//! Sends never return `Err`: transport and provider failures come back as a
//! failed `ProviderResult` so the caller can persist the attempt.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// What to deliver
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    Text {
        body: String,
    },
    Template {
        name: String,
        language_code: String,
        /// Positional body parameters
        parameters: Vec<String>,
    },
}

/// Outcome of one provider call
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub success: bool,
    pub provider_message_id: Option<String>,
    /// Raw provider response (or a synthetic one)
    pub payload: Value,
    pub error: Option<String>,
}

impl ProviderResult {
    pub fn failure(error: impl Into<String>, payload: Value) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            payload,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait WhatsAppProvider: Send + Sync {
    async fn send(&self, api_version: &str, to: &str, payload: &OutboundPayload) -> ProviderResult;
}

/// Request body for the Cloud API `messages` endpoint
pub fn request_body(to: &str, payload: &OutboundPayload) -> Value {
    match payload {
        OutboundPayload::Text { body } => json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": body },
        }),
        OutboundPayload::Template {
            name,
            language_code,
            parameters,
        } => {
            let mut template = json!({
                "name": name,
                "language": { "code": language_code },
            });
            if !parameters.is_empty() {
                let params: Vec<Value> = parameters
                    .iter()
                    .map(|p| json!({ "type": "text", "text": p }))
                    .collect();
                template["components"] = json!([{ "type": "body", "parameters": params }]);
            }
            json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "template",
                "template": template,
            })
        }
    }
}

/// Human-readable error from a provider error response
pub fn extract_error(response: &Value) -> String {
    let error = response.get("error");
    error
        .and_then(|e| e.get("error_user_msg"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            error
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
        })
        .unwrap_or("WhatsApp API request failed")
        .to_string()
}

pub fn extract_message_id(response: &Value) -> Option<String> {
    response
        .get("messages")
        .and_then(|m| m.get(0))
        .and_then(|m| m.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

// =============================================================================
// GraphApiProvider: live Cloud API
// =============================================================================

pub struct GraphApiProvider {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    phone_number_id: String,
}

impl GraphApiProvider {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        phone_number_id: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            phone_number_id: phone_number_id.into(),
        })
    }

    fn endpoint(&self, api_version: &str) -> String {
        format!("{}/{}/{}/messages", self.base_url, api_version, self.phone_number_id)
    }
}

#[async_trait]
impl WhatsAppProvider for GraphApiProvider {
    async fn send(&self, api_version: &str, to: &str, payload: &OutboundPayload) -> ProviderResult {
        let body = request_body(to, payload);

        let response = match self
            .client
            .post(self.endpoint(api_version))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("WhatsApp request failed: {}", e);
                return ProviderResult::failure(
                    format!("WhatsApp request failed: {}", e),
                    json!({ "transport_error": e.to_string() }),
                );
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let parsed: Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text }));

        if !status.is_success() {
            let error = extract_error(&parsed);
            warn!(status = %status, "WhatsApp API error: {}", error);
            return ProviderResult::failure(error, parsed);
        }

        let provider_message_id = extract_message_id(&parsed);
        debug!(to = %to, provider_message_id = ?provider_message_id, "WhatsApp message accepted");
        ProviderResult {
            success: true,
            provider_message_id,
            payload: parsed,
            error: None,
        }
    }
}

// =============================================================================
// FakeWhatsAppProvider: records sends (tests)
// =============================================================================

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSend {
    pub api_version: String,
    pub to: String,
    pub payload: OutboundPayload,
}

/// Records every send. Succeeds with sequential ids unless told to fail.
#[cfg(test)]
#[derive(Default)]
pub struct FakeWhatsAppProvider {
    sent: parking_lot::Mutex<Vec<RecordedSend>>,
    fail_with: parking_lot::Mutex<Option<String>>,
}

#[cfg(test)]
impl FakeWhatsAppProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: impl Into<String>) -> Self {
        let provider = Self::default();
        *provider.fail_with.lock() = Some(error.into());
        provider
    }

    pub fn sent(&self) -> Vec<RecordedSend> {
        self.sent.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl WhatsAppProvider for FakeWhatsAppProvider {
    async fn send(&self, api_version: &str, to: &str, payload: &OutboundPayload) -> ProviderResult {
        let count = {
            let mut sent = self.sent.lock();
            sent.push(RecordedSend {
                api_version: api_version.to_string(),
                to: to.to_string(),
                payload: payload.clone(),
            });
            sent.len()
        };

        if let Some(error) = self.fail_with.lock().clone() {
            return ProviderResult::failure(error.clone(), json!({ "error": { "message": error } }));
        }

        let id = format!("wamid.fake-{}", count);
        ProviderResult {
            success: true,
            provider_message_id: Some(id.clone()),
            payload: json!({ "messages": [{ "id": id }] }),
            error: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_request_body() {
        let body = request_body(
            "593991234567",
            &OutboundPayload::Text {
                body: "Hola".into(),
            },
        );
        assert_eq!(body["messaging_product"], "whatsapp");
        assert_eq!(body["type"], "text");
        assert_eq!(body["text"]["preview_url"], false);
        assert_eq!(body["text"]["body"], "Hola");
    }

    #[test]
    fn template_request_body_with_parameters() {
        let body = request_body(
            "573001112222",
            &OutboundPayload::Template {
                name: "seguimiento".into(),
                language_code: "es".into(),
                parameters: vec!["Ana".into(), "".into()],
            },
        );
        assert_eq!(body["type"], "template");
        assert_eq!(body["template"]["name"], "seguimiento");
        assert_eq!(body["template"]["language"]["code"], "es");
        let params = body["template"]["components"][0]["parameters"]
            .as_array()
            .unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0]["text"], "Ana");
        assert_eq!(body["template"]["components"][0]["type"], "body");
    }

    #[test]
    fn template_request_body_without_parameters_omits_components() {
        let body = request_body(
            "573001112222",
            &OutboundPayload::Template {
                name: "hello_world".into(),
                language_code: "en_US".into(),
                parameters: vec![],
            },
        );
        assert!(body["template"].get("components").is_none());
    }

    #[test]
    fn error_text_preference() {
        let user_msg = json!({"error": {"message": "(#131047) Re-engagement", "error_user_msg": "Outside window"}});
        assert_eq!(extract_error(&user_msg), "Outside window");

        let message = json!({"error": {"message": "Invalid parameter"}});
        assert_eq!(extract_error(&message), "Invalid parameter");

        assert_eq!(extract_error(&json!({"raw": "<html>"})), "WhatsApp API request failed");
    }

    #[test]
    fn message_id_from_first_entry() {
        let resp = json!({"messages": [{"id": "wamid.ABC"}, {"id": "wamid.DEF"}]});
        assert_eq!(extract_message_id(&resp).as_deref(), Some("wamid.ABC"));
        assert_eq!(extract_message_id(&json!({"messages": []})), None);
    }

    #[tokio::test]
    async fn fake_provider_records_and_fails_on_request() {
        let ok = FakeWhatsAppProvider::new();
        let result = ok
            .send("v22.0", "1", &OutboundPayload::Text { body: "x".into() })
            .await;
        assert!(result.success);
        assert_eq!(result.provider_message_id.as_deref(), Some("wamid.fake-1"));
        assert_eq!(ok.sent().len(), 1);

        let failing = FakeWhatsAppProvider::failing("Outside window");
        let result = failing
            .send("v22.0", "1", &OutboundPayload::Text { body: "x".into() })
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Outside window"));
        assert_eq!(failing.sent().len(), 1);
    }
}
