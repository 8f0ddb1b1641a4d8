//! Inbound webhook parsing and idempotent processing
//!
//! Parsing is total: any unexpected shape yields an empty result, never an
//! error. Processing is keyed by the provider message id in the
//! `webhook_events` ledger, so redelivered payloads are counted as duplicates.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lead_provisioning::{LeadDefaults, LeadProvisioner};
use crate::error::ServiceResult;
use crate::store::CrmStore;
use crate::types::{
    IncomingMessage, InboundMessageRecord, NewWebhookEvent, WebhookEnvelope, WebhookSummary,
    EVENT_MESSAGE_RECEIVED, PROVIDER_WHATSAPP,
};

// ============================================================================
// Parsing
// ============================================================================

pub fn parse_envelope(payload: Value, received_at: DateTime<Utc>) -> WebhookEnvelope {
    let object = match payload.get("object") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "unknown".to_string(),
        Some(other) => other.to_string(),
    };
    let entry_count = payload
        .get("entry")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    WebhookEnvelope {
        provider: PROVIDER_WHATSAPP.to_string(),
        object,
        entry_count,
        received_at,
        payload,
    }
}

fn array<'a>(value: Option<&'a Value>, key: &str) -> &'a [Value] {
    value
        .and_then(|v| v.get(key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_str)
}

/// wa_id -> profile name from the `contacts` list next to the messages
fn contact_names(value: Option<&Value>) -> HashMap<&str, &str> {
    array(value, "contacts")
        .iter()
        .filter_map(|c| {
            let wa_id = str_at(c, &["wa_id"]).filter(|s| !s.is_empty())?;
            let name = str_at(c, &["profile", "name"]).filter(|s| !s.is_empty())?;
            Some((wa_id, name))
        })
        .collect()
}

/// Best-effort text for any message kind
pub fn message_text(message: &Value) -> String {
    let kind = str_at(message, &["type"]).unwrap_or("text");

    match kind {
        "text" => {
            if let Some(body) = str_at(message, &["text", "body"]) {
                return body.trim().to_string();
            }
        }
        "button" => {
            if let Some(text) = str_at(message, &["button", "text"]) {
                return format!("[button] {}", text);
            }
        }
        "interactive" => {
            let title = str_at(message, &["interactive", "button_reply", "title"])
                .filter(|t| !t.is_empty())
                .or_else(|| {
                    str_at(message, &["interactive", "list_reply", "title"]).filter(|t| !t.is_empty())
                });
            if let Some(title) = title {
                return format!("[interactive] {}", title);
            }
        }
        "image" | "video" | "document" => {
            if let Some(caption) = str_at(message, &[kind, "caption"]) {
                return format!("[{}] {}", kind, caption);
            }
        }
        _ => {}
    }

    format!("[{}] Non-text message received", kind)
}

fn message_timestamp(message: &Value, received_at: DateTime<Utc>) -> DateTime<Utc> {
    let seconds = match message.get("timestamp") {
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    };
    seconds
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or(received_at)
}

/// Walk entry -> changes -> value -> messages
pub fn extract_incoming_messages(payload: &Value, received_at: DateTime<Utc>) -> Vec<IncomingMessage> {
    let mut out = Vec::new();

    for entry in array(Some(payload), "entry") {
        for change in array(Some(entry), "changes") {
            let value = change.get("value").filter(|v| v.is_object());
            let names = contact_names(value);

            for message in array(value, "messages") {
                let from = str_at(message, &["from"]).unwrap_or_default();
                let text = message_text(message);
                if from.is_empty() || text.is_empty() {
                    continue;
                }

                let message_id = str_at(message, &["id"])
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string());

                out.push(IncomingMessage {
                    message_id,
                    from: from.to_string(),
                    text,
                    timestamp: message_timestamp(message, received_at),
                    contact_name: names.get(from).map(|n| n.to_string()),
                });
            }
        }
    }

    out
}

// ============================================================================
// Processing
// ============================================================================

enum Outcome {
    Processed,
    Duplicate,
    Failed,
}

pub struct WebhookProcessor {
    store: Arc<dyn CrmStore>,
    lead_defaults: LeadDefaults,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn CrmStore>, lead_defaults: LeadDefaults) -> Self {
        Self {
            store,
            lead_defaults,
        }
    }

    /// Process every inbound message of a delivery. Per-message failures are
    /// recorded in the ledger and counted, never returned.
    pub async fn process(&self, payload: &Value, received_at: DateTime<Utc>) -> WebhookSummary {
        let incoming = extract_incoming_messages(payload, received_at);
        let mut summary = WebhookSummary {
            incoming_count: incoming.len(),
            ..Default::default()
        };

        for message in &incoming {
            match self.process_one(payload, message).await {
                Outcome::Processed => summary.processed_count += 1,
                Outcome::Duplicate => summary.duplicate_count += 1,
                Outcome::Failed => summary.failed_count += 1,
            }
        }

        info!(
            incoming = summary.incoming_count,
            processed = summary.processed_count,
            duplicates = summary.duplicate_count,
            failed = summary.failed_count,
            "Webhook processed"
        );
        summary
    }

    async fn already_processed(&self, message_id: &str) -> bool {
        match self
            .store
            .find_webhook_event(PROVIDER_WHATSAPP, EVENT_MESSAGE_RECEIVED, message_id, true)
            .await
        {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(message_id = %message_id, "Ledger lookup failed: {}", e);
                false
            }
        }
    }

    /// Reuse an earlier unprocessed attempt, otherwise record a new one
    async fn ledger_entry(&self, payload: &Value, message: &IncomingMessage) -> anyhow::Result<Uuid> {
        if let Some(existing) = self
            .store
            .find_webhook_event(PROVIDER_WHATSAPP, EVENT_MESSAGE_RECEIVED, &message.message_id, false)
            .await?
        {
            return Ok(existing.id);
        }

        let event = self
            .store
            .insert_webhook_event(&NewWebhookEvent {
                provider: PROVIDER_WHATSAPP.to_string(),
                event_type: EVENT_MESSAGE_RECEIVED.to_string(),
                message_id: Some(message.message_id.clone()),
                phone: Some(message.from.clone()),
                payload: payload.clone(),
                processed: false,
                error: None,
                processed_at: None,
            })
            .await?;
        Ok(event.id)
    }

    async fn apply(&self, message: &IncomingMessage) -> ServiceResult<()> {
        let provisioner = LeadProvisioner::new(self.store.as_ref(), &self.lead_defaults);

        let lead = provisioner
            .resolve_or_create_lead(&message.from, message.contact_name.as_deref(), message.timestamp)
            .await?;
        let conversation = provisioner
            .resolve_or_create_conversation(lead.id, &message.text, message.timestamp)
            .await?;

        self.store
            .insert_inbound_message(&InboundMessageRecord {
                conversation_id: conversation.id,
                body: message.text.clone(),
                created_at: message.timestamp,
                provider_message_id: message.message_id.clone(),
            })
            .await?;

        debug!(
            lead_id = %lead.id,
            conversation_id = %conversation.id,
            message_id = %message.message_id,
            "Inbound message stored"
        );
        Ok(())
    }

    async fn process_one(&self, payload: &Value, message: &IncomingMessage) -> Outcome {
        if self.already_processed(&message.message_id).await {
            debug!(message_id = %message.message_id, "Duplicate webhook message skipped");
            return Outcome::Duplicate;
        }

        let event_id = match self.ledger_entry(payload, message).await {
            Ok(id) => id,
            Err(e) => {
                warn!(message_id = %message.message_id, "Failed to record webhook event: {}", e);
                return Outcome::Failed;
            }
        };

        let now = Utc::now();
        match self.apply(message).await {
            Ok(()) => match self.store.mark_webhook_event_processed(event_id, now).await {
                Ok(true) => Outcome::Processed,
                Ok(false) => {
                    debug!(message_id = %message.message_id, "Concurrent delivery already processed");
                    Outcome::Duplicate
                }
                Err(e) => {
                    warn!(event_id = %event_id, "Failed to mark webhook event processed: {}", e);
                    Outcome::Failed
                }
            },
            Err(e) => {
                // A concurrent delivery of the same message may have won the race
                if self.already_processed(&message.message_id).await {
                    return Outcome::Duplicate;
                }
                warn!(
                    message_id = %message.message_id,
                    from = %message.from,
                    "Inbound message processing failed: {}",
                    e
                );
                if let Err(mark_err) = self
                    .store
                    .mark_webhook_event_failed(event_id, &e.to_string(), now)
                    .await
                {
                    warn!(event_id = %event_id, "Failed to mark webhook event failed: {}", mark_err);
                }
                Outcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{LeadStatus, MessageDirection, Role};
    use serde_json::json;

    fn payload(messages: Value) -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "contacts": [{ "wa_id": "593991234567", "profile": { "name": "Ana Torres" } }],
                        "messages": messages
                    }
                }]
            }]
        })
    }

    fn text_message(id: &str, body: &str) -> Value {
        json!({
            "from": "593991234567",
            "id": id,
            "timestamp": "1767268800",
            "type": "text",
            "text": { "body": body }
        })
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let ec = store.add_country("Ecuador", "EC");
        store.add_profile(Role::Admin, Some(ec.id), Utc::now());
        store.add_profile(Role::Agent, Some(ec.id), Utc::now());
        store
    }

    #[test]
    fn test_envelope_of_malformed_payloads() {
        let env = parse_envelope(json!("nope"), Utc::now());
        assert_eq!(env.object, "unknown");
        assert_eq!(env.entry_count, 0);

        let env = parse_envelope(payload(json!([])), Utc::now());
        assert_eq!(env.object, "whatsapp_business_account");
        assert_eq!(env.entry_count, 1);
    }

    #[test]
    fn test_extract_handles_every_nesting_defect() {
        let now = Utc::now();
        for bad in [
            json!(null),
            json!({"entry": "x"}),
            json!({"entry": [1, {"changes": {}}]}),
            json!({"entry": [{"changes": [{"value": []}]}]}),
            json!({"entry": [{"changes": [{"value": {"messages": [7, {"type": "text"}]}}]}]}),
        ] {
            assert!(extract_incoming_messages(&bad, now).is_empty(), "{}", bad);
        }
    }

    #[test]
    fn test_extract_text_message_with_contact_and_timestamp() {
        let now = Utc::now();
        let msgs = extract_incoming_messages(&payload(json!([text_message("wamid.1", "  Hola ")])), now);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].message_id, "wamid.1");
        assert_eq!(msgs[0].text, "Hola");
        assert_eq!(msgs[0].contact_name.as_deref(), Some("Ana Torres"));
        assert_eq!(msgs[0].timestamp.timestamp(), 1_767_268_800);
    }

    #[test]
    fn test_missing_id_and_bad_timestamp_fall_back() {
        let now = Utc::now();
        let msg = json!({"from": "573001112222", "timestamp": "soon", "type": "text", "text": {"body": "Hi"}});
        let msgs = extract_incoming_messages(&payload(json!([msg])), now);
        assert_eq!(msgs.len(), 1);
        assert!(Uuid::parse_str(&msgs[0].message_id).is_ok());
        assert_eq!(msgs[0].timestamp, now);
        assert_eq!(msgs[0].contact_name, None);
    }

    #[test]
    fn test_message_text_by_kind() {
        assert_eq!(
            message_text(&json!({"type": "button", "button": {"text": "Sí, quiero"}})),
            "[button] Sí, quiero"
        );
        assert_eq!(
            message_text(&json!({"type": "interactive", "interactive": {"list_reply": {"title": "Plan B"}}})),
            "[interactive] Plan B"
        );
        assert_eq!(
            message_text(&json!({"type": "image", "image": {"caption": "recibo"}})),
            "[image] recibo"
        );
        assert_eq!(
            message_text(&json!({"type": "audio", "audio": {}})),
            "[audio] Non-text message received"
        );
        assert_eq!(
            message_text(&json!({"type": "video", "video": {}})),
            "[video] Non-text message received"
        );
    }

    #[test]
    fn test_empty_text_body_is_skipped() {
        let msgs = extract_incoming_messages(&payload(json!([text_message("wamid.1", "   ")])), Utc::now());
        assert!(msgs.is_empty());
    }

    #[tokio::test]
    async fn test_replayed_delivery_is_processed_once() {
        let store = seeded_store();
        let processor = WebhookProcessor::new(store.clone(), LeadDefaults::default());
        let body = payload(json!([text_message("wamid.HBg", "Hola")]));

        let first = processor.process(&body, Utc::now()).await;
        assert_eq!(first.processed_count, 1);
        assert_eq!(first.duplicate_count, 0);

        let second = processor.process(&body, Utc::now()).await;
        assert_eq!(second.incoming_count, 1);
        assert_eq!(second.processed_count, 0);
        assert_eq!(second.duplicate_count, 1);
        assert_eq!(second.failed_count, 0);

        let inbound: Vec<_> = store
            .messages()
            .into_iter()
            .filter(|m| m.direction == MessageDirection::Inbound)
            .collect();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].provider_message_id.as_deref(), Some("wamid.HBg"));

        let processed: Vec<_> = store.webhook_events().into_iter().filter(|e| e.processed).collect();
        assert_eq!(processed.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_phone_creates_lead_and_conversation() {
        let store = seeded_store();
        let processor = WebhookProcessor::new(store.clone(), LeadDefaults::default());

        processor
            .process(&payload(json!([text_message("wamid.1", "Hola")])), Utc::now())
            .await;

        let leads = store.leads();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].country, "Ecuador");
        assert_eq!(leads[0].status, LeadStatus::New);
        assert_eq!(leads[0].name.as_deref(), Some("Ana Torres"));

        let conversations = store.conversations();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].lead_id, leads[0].id);
        assert_eq!(conversations[0].last_message.as_deref(), Some("Hola"));
    }

    #[tokio::test]
    async fn test_failed_message_is_recorded_and_retried_on_redelivery() {
        // No countries or defaults: lead creation is refused
        let store = Arc::new(MemoryStore::new());
        let processor = WebhookProcessor::new(store.clone(), LeadDefaults::default());
        let body = payload(json!([text_message("wamid.X", "Hola")]));

        let summary = processor.process(&body, Utc::now()).await;
        assert_eq!(summary.failed_count, 1);

        let events = store.webhook_events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].processed);
        assert!(events[0].error.as_deref().unwrap_or_default().contains("configuration error"));

        // Operator fixes the setup, provider redelivers
        let ec = store.add_country("Ecuador", "EC");
        store.add_profile(Role::Admin, Some(ec.id), Utc::now());
        store.add_profile(Role::Agent, Some(ec.id), Utc::now());

        let summary = processor.process(&body, Utc::now()).await;
        assert_eq!(summary.processed_count, 1);

        let events = store.webhook_events();
        assert_eq!(events.len(), 1, "earlier attempt row is reused");
        assert!(events[0].processed);
    }

    #[tokio::test]
    async fn test_stored_but_unmarked_message_settles_on_redelivery() {
        let store = seeded_store();
        let processor = WebhookProcessor::new(store.clone(), LeadDefaults::default());
        let body = payload(json!([text_message("wamid.Stuck", "Hola")]));
        let message = extract_incoming_messages(&body, Utc::now()).remove(0);

        // Earlier attempt stored the message, then failed before marking the ledger row
        processor.ledger_entry(&body, &message).await.unwrap();
        processor.apply(&message).await.unwrap();
        assert!(!store.webhook_events()[0].processed);

        let summary = processor.process(&body, Utc::now()).await;
        assert_eq!(summary.processed_count, 1);
        assert_eq!(summary.failed_count, 0);

        let events = store.webhook_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].processed);
        let inbound = store
            .messages()
            .into_iter()
            .filter(|m| m.direction == MessageDirection::Inbound)
            .count();
        assert_eq!(inbound, 1);

        let again = processor.process(&body, Utc::now()).await;
        assert_eq!(again.duplicate_count, 1);
    }
}
