//! POST /send: outbound WhatsApp message

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use super::{error_response, AppState};
use crate::error::ServiceError;
use crate::services::outbound::SendRequest;
use crate::types::{ErrorResponse, SendMessageRequest, SendMode};

pub async fn send_message(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: SendMessageRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!("Invalid send request: {}", e);
            return error_response(StatusCode::BAD_REQUEST, ErrorResponse::new("Invalid JSON payload"));
        }
    };

    let request = SendRequest {
        conversation_id: request.conversation_id.unwrap_or_default(),
        body: request.body.unwrap_or_default(),
        template_id: request.template_id,
        custom_variables: request.custom_variables.unwrap_or_default(),
        force_mode: request.force_mode.as_deref().and_then(SendMode::parse),
    };

    match state.outbound.send(request).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "message": outcome.message, "meta": outcome.meta })),
        )
            .into_response(),
        Err(ServiceError::Validation(msg)) => {
            error_response(StatusCode::BAD_REQUEST, ErrorResponse::new(msg))
        }
        Err(e) => {
            error!(code = e.code(), "Send failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, ErrorResponse::new(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, call, config};
    use super::*;
    use crate::services::whatsapp_provider::{FakeWhatsAppProvider, OutboundPayload, WhatsAppProvider};
    use crate::store::{CrmStore, MemoryStore};
    use crate::types::{MessageDirection, Role};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_fields_are_400() {
        let app = app(&config(), Arc::new(MemoryStore::new()), None);

        let (status, body) = call(&app, post_json("/send", json!({"body": "Hola"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("conversationId"));

        let (status, _) = call(
            &app,
            Request::post("/send").body(Body::from("nope")).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_502() {
        let provider: Arc<dyn WhatsAppProvider> = Arc::new(FakeWhatsAppProvider::new());
        let app = app(&config(), Arc::new(MemoryStore::new()), Some(provider));

        let (status, body) = call(
            &app,
            post_json(
                "/send",
                json!({"conversationId": uuid::Uuid::new_v4().to_string(), "body": "Hola"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_inbound_then_reply_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        let ec = store.add_country("Ecuador", "EC");
        store.add_profile(Role::Admin, Some(ec.id), Utc::now());
        store.add_profile(Role::Agent, Some(ec.id), Utc::now());

        let fake = Arc::new(FakeWhatsAppProvider::new());
        let provider: Arc<dyn WhatsAppProvider> = fake.clone();
        let app = app(&config(), store.clone(), Some(provider));

        // Inbound "Hola" from an unknown Ecuadorian number
        let inbound = json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "contacts": [{"wa_id": "593991234567", "profile": {"name": "María José"}}],
                "messages": [{"from": "593991234567", "id": "wamid.E2E",
                              "timestamp": Utc::now().timestamp().to_string(),
                              "type": "text", "text": {"body": "Hola"}}]
            }}]}]
        });
        let (status, resp) = call(&app, post_json("/webhook", inbound)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["summary"]["processedCount"], 1);

        let leads = store.leads();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].country, "Ecuador");
        assert_eq!(leads[0].status.as_str(), "new");
        let conversations = store.conversations();
        assert_eq!(conversations.len(), 1);
        let messages = store.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].direction, MessageDirection::Inbound);
        assert_eq!(messages[0].body, "Hola");

        // Agent replies with a forced text message
        let (status, resp) = call(
            &app,
            post_json(
                "/send",
                json!({
                    "conversationId": conversations[0].id.to_string(),
                    "body": "Hola {{first_name}}",
                    "forceMode": "text"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", resp);
        assert_eq!(resp["ok"], true);
        assert_eq!(resp["meta"]["mode"], "text");
        assert_eq!(resp["message"]["body"], "Hola María");

        let outbound: Vec<_> = store
            .messages()
            .into_iter()
            .filter(|m| m.direction == MessageDirection::Outbound)
            .collect();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].body, "Hola María");
        assert_eq!(
            fake.sent()[0].payload,
            OutboundPayload::Text {
                body: "Hola María".into()
            }
        );
    }

    #[tokio::test]
    async fn test_provider_failure_is_502_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let lead = store
            .create_lead(
                &crate::types::NewLead {
                    name: Some("Ana".into()),
                    phone: "573001112222".into(),
                    country: "Colombia".into(),
                    status: crate::types::LeadStatus::Contacted,
                    admin_id: uuid::Uuid::new_v4(),
                    agent_id: uuid::Uuid::new_v4(),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let conversation = store.upsert_conversation(lead.id, "", Utc::now()).await.unwrap();
        let provider: Arc<dyn WhatsAppProvider> =
            Arc::new(FakeWhatsAppProvider::failing("Message failed to send"));
        let app = app(&config(), store.clone(), Some(provider));

        let (status, body) = call(
            &app,
            post_json(
                "/send",
                json!({"conversationId": conversation.id.to_string(), "body": "Hola", "forceMode": "text"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Message failed to send");
        assert_eq!(store.messages().len(), 1);
    }
}
