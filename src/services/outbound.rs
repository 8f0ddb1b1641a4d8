//! Outbound WhatsApp delivery
//!
//! One `send` call is one logical delivery attempt:
//! resolve context -> build variables -> decide mode -> call provider ->
//! persist message, conversation, ledger and audit -> report.
//! Persistence runs whether or not the provider accepted the message, so a
//! failed send is always visible in the conversation history.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::runtime_config::OutboundRuntimeConfig;
use super::send_mode::{decide_send_mode, SendModeInputs};
use super::template_vars::{
    build_variables, extract_placeholder_keys, interpolate, VariableContext, FALLBACK_LEAD_NAME,
};
use super::whatsapp_provider::{OutboundPayload, ProviderResult, WhatsAppProvider};
use crate::error::{ServiceError, ServiceResult};
use crate::store::CrmStore;
use crate::types::{
    AuditAction, DeliveryMode, Lead, Message, MessageDirection, MessageStatus, MessageTemplate,
    NewAuditLog, NewWebhookEvent, OutboundMessageRecord, SendMode, EVENT_MESSAGE_OUTBOUND,
    MESSAGING_ACTOR, PROVIDER_WHATSAPP,
};

/// A send request after wire decoding
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub conversation_id: String,
    pub body: String,
    pub template_id: Option<String>,
    pub custom_variables: HashMap<String, String>,
    pub force_mode: Option<SendMode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMeta {
    pub mode: DeliveryMode,
    pub provider_message_id: Option<String>,
    pub dry_run: bool,
    pub resolved_body: String,
    pub used_template_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub message: Message,
    pub meta: SendMeta,
}

/// What the decision needs to know about the conversation
struct ConversationContext {
    conversation_id: Uuid,
    lead: Lead,
    last_inbound_at: Option<DateTime<Utc>>,
}

pub struct OutboundService {
    store: Arc<dyn CrmStore>,
    /// `None` when WhatsApp credentials are not configured
    provider: Option<Arc<dyn WhatsAppProvider>>,
    graph_api_version: String,
}

impl OutboundService {
    pub fn new(
        store: Arc<dyn CrmStore>,
        provider: Option<Arc<dyn WhatsAppProvider>>,
        graph_api_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            graph_api_version: graph_api_version.into(),
        }
    }

    async fn conversation_context(&self, conversation_id: &str) -> ServiceResult<ConversationContext> {
        let not_found = || ServiceError::NotFound(format!("conversation {} not found", conversation_id));

        let id = Uuid::parse_str(conversation_id).map_err(|_| not_found())?;
        let conversation = self.store.get_conversation(id).await?.ok_or_else(not_found)?;

        let lead = self
            .store
            .get_lead(conversation.lead_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("lead for conversation {} not found", id)))?;
        if lead.phone_normalized.is_empty() {
            return Err(ServiceError::NotFound(format!("lead {} has no phone number", lead.id)));
        }

        let last_inbound_at = self
            .store
            .latest_message(id, MessageDirection::Inbound)
            .await?
            .map(|m| m.created_at);

        Ok(ConversationContext {
            conversation_id: id,
            lead,
            last_inbound_at,
        })
    }

    /// Unknown or malformed ids mean "no template"
    async fn template(&self, template_id: Option<&str>) -> ServiceResult<Option<MessageTemplate>> {
        let Some(raw) = template_id.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let Ok(id) = Uuid::parse_str(raw) else {
            debug!(template_id = %raw, "Template id is not a UUID, sending without template");
            return Ok(None);
        };
        let template = self.store.get_template(id).await?;
        if template.is_none() {
            debug!(template_id = %id, "Template not found, sending without template");
        }
        Ok(template)
    }

    pub async fn send(&self, request: SendRequest) -> ServiceResult<SendOutcome> {
        let conversation_id = request.conversation_id.trim();
        let body = request.body.trim();
        if conversation_id.is_empty() || body.is_empty() {
            return Err(ServiceError::Validation(
                "conversationId and body are required".to_string(),
            ));
        }

        let runtime = OutboundRuntimeConfig::load(self.store.as_ref(), &self.graph_api_version).await;
        let provider = match (&self.provider, runtime.dry_run) {
            (Some(p), _) => Some(p.clone()),
            (None, true) => None,
            (None, false) => {
                return Err(ServiceError::Config(
                    "WHATSAPP_ACCESS_TOKEN or WHATSAPP_PHONE_NUMBER_ID is not set".to_string(),
                ))
            }
        };

        let context = self.conversation_context(conversation_id).await?;
        let template = self.template(request.template_id.as_deref()).await?;

        let now = Utc::now();
        let variables = build_variables(
            &VariableContext {
                lead_name: context
                    .lead
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(FALLBACK_LEAD_NAME)
                    .to_string(),
                phone: context.lead.phone_normalized.clone(),
                country: context.lead.country.clone(),
                status: context.lead.status,
                now,
            },
            template.as_ref(),
            &request.custom_variables,
        );
        let resolved_body = interpolate(body, &variables);

        let provider_template_name = template
            .as_ref()
            .and_then(MessageTemplate::provider_template_name)
            .map(str::to_string);
        let mode = decide_send_mode(
            &SendModeInputs {
                forced: request.force_mode,
                template_hint: template.as_ref().and_then(MessageTemplate::send_mode_hint),
                has_provider_template: provider_template_name.is_some(),
                last_inbound_at: context.last_inbound_at,
                now,
            },
            &runtime,
        );

        let payload = match mode {
            DeliveryMode::Text => OutboundPayload::Text {
                body: resolved_body.clone(),
            },
            DeliveryMode::Template => {
                let (Some(template), Some(name)) = (template.as_ref(), provider_template_name.clone())
                else {
                    return Err(ServiceError::Config(
                        "template delivery requires a template with provider_template_name".to_string(),
                    ));
                };
                let source = if template.body.trim().is_empty() {
                    body
                } else {
                    template.body.as_str()
                };
                let parameters = extract_placeholder_keys(source)
                    .iter()
                    .map(|k| variables.get(k).cloned().unwrap_or_default())
                    .collect();
                let language_code = template
                    .provider_language_code
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .unwrap_or(&runtime.default_template_language)
                    .to_string();
                OutboundPayload::Template {
                    name,
                    language_code,
                    parameters,
                }
            }
        };

        debug!(
            conversation_id = %context.conversation_id,
            lead_id = %context.lead.id,
            mode = mode.as_str(),
            dry_run = runtime.dry_run,
            "Sending WhatsApp message"
        );

        let result = match provider.filter(|_| !runtime.dry_run) {
            Some(provider) => {
                provider
                    .send(&runtime.graph_api_version, &context.lead.phone_normalized, &payload)
                    .await
            }
            None => ProviderResult {
                success: true,
                provider_message_id: Some(format!("dryrun-{}", Uuid::new_v4())),
                payload: json!({ "dryRun": true, "mode": mode.as_str() }),
                error: None,
            },
        };

        let message = self
            .persist(&context, &resolved_body, mode, provider_template_name, &result, now)
            .await;

        if !result.success {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "WhatsApp delivery failed".to_string());
            warn!(conversation_id = %context.conversation_id, "WhatsApp delivery failed: {}", error);
            return Err(ServiceError::Delivery(error));
        }
        let message = message?;

        info!(
            conversation_id = %context.conversation_id,
            message_id = %message.id,
            mode = mode.as_str(),
            "WhatsApp message sent"
        );

        Ok(SendOutcome {
            message,
            meta: SendMeta {
                mode,
                provider_message_id: result.provider_message_id,
                dry_run: runtime.dry_run,
                resolved_body,
                used_template_id: template.map(|t| t.id),
            },
        })
    }

    /// Record the attempt. Only the message insert is reported back; the
    /// other writes are logged on failure.
    async fn persist(
        &self,
        context: &ConversationContext,
        resolved_body: &str,
        mode: DeliveryMode,
        template_name: Option<String>,
        result: &ProviderResult,
        at: DateTime<Utc>,
    ) -> ServiceResult<Message> {
        let record = OutboundMessageRecord {
            conversation_id: context.conversation_id,
            body: resolved_body.to_string(),
            created_at: at,
            status: if result.success { MessageStatus::Sent } else { MessageStatus::Failed },
            provider: PROVIDER_WHATSAPP.to_string(),
            provider_message_id: result.provider_message_id.clone(),
            template_name,
            send_mode: mode,
            provider_payload: result.payload.clone(),
            provider_error: result.error.clone(),
        };

        let message = match self.store.insert_outbound_message(&record).await {
            Ok(m) => Ok(m),
            Err(e) => {
                warn!(
                    conversation_id = %context.conversation_id,
                    "Rich message insert rejected, falling back to minimal row: {}", e
                );
                self.store
                    .insert_message(&record.minimal())
                    .await
                    .map_err(ServiceError::from)
            }
        };

        if let Err(e) = self
            .store
            .touch_conversation(context.conversation_id, resolved_body, at)
            .await
        {
            warn!(conversation_id = %context.conversation_id, "Failed to update conversation: {}", e);
        }

        let ledger = NewWebhookEvent {
            provider: PROVIDER_WHATSAPP.to_string(),
            event_type: EVENT_MESSAGE_OUTBOUND.to_string(),
            message_id: result.provider_message_id.clone(),
            phone: Some(context.lead.phone_normalized.clone()),
            payload: json!({
                "conversationId": context.conversation_id,
                "leadId": context.lead.id,
                "sendMode": mode.as_str(),
                "providerPayload": result.payload,
                "providerSuccess": result.success,
                "providerError": result.error,
            }),
            processed: result.success,
            error: result.error.clone(),
            processed_at: Some(at),
        };
        if let Err(e) = self.store.insert_webhook_event(&ledger).await {
            warn!(conversation_id = %context.conversation_id, "Failed to write delivery log: {}", e);
        }

        if result.success {
            let audit = NewAuditLog::by(
                MESSAGING_ACTOR,
                AuditAction::MessageSent,
                "conversation",
                context.conversation_id,
                format!(
                    "WhatsApp {} message sent to lead {}",
                    mode.as_str(),
                    context.lead.display_name()
                ),
                at,
            );
            if let Err(e) = self.store.insert_audit_log(&audit).await {
                warn!(conversation_id = %context.conversation_id, "Failed to write audit log: {}", e);
            }
        }

        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::runtime_config::{KEY_DRY_RUN, KEY_DEFAULT_MODE};
    use crate::services::whatsapp_provider::FakeWhatsAppProvider;
    use crate::store::MemoryStore;
    use crate::types::{InboundMessageRecord, LeadStatus, NewLead};
    use chrono::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        conversation_id: Uuid,
    }

    async fn fixture(last_inbound_hours_ago: Option<i64>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let lead = store
            .create_lead(
                &NewLead {
                    name: Some("Ana Torres".into()),
                    phone: "+593 99 123 4567".into(),
                    country: "Ecuador".into(),
                    status: LeadStatus::Contacted,
                    admin_id: Uuid::new_v4(),
                    agent_id: Uuid::new_v4(),
                },
                now,
            )
            .await
            .unwrap();
        let conversation = store.upsert_conversation(lead.id, "Hola", now).await.unwrap();
        if let Some(hours) = last_inbound_hours_ago {
            store
                .insert_inbound_message(&InboundMessageRecord {
                    conversation_id: conversation.id,
                    body: "Hola".into(),
                    created_at: now - Duration::hours(hours),
                    provider_message_id: "wamid.in".into(),
                })
                .await
                .unwrap();
        }
        Fixture {
            store,
            conversation_id: conversation.id,
        }
    }

    fn template(provider_name: Option<&str>) -> MessageTemplate {
        MessageTemplate {
            id: Uuid::new_v4(),
            name: "seguimiento".into(),
            preview: "Seguimiento".into(),
            body: "Hola {{first_name}}, soy {{agente}} de [[pais]]".into(),
            send_mode: Some("auto".into()),
            provider_template_name: provider_name.map(str::to_string),
            provider_language_code: None,
            variable_defaults: Some(json!({"agente": "Equipo"})),
        }
    }

    fn service(store: &Arc<MemoryStore>, provider: Option<Arc<FakeWhatsAppProvider>>) -> OutboundService {
        OutboundService::new(
            store.clone(),
            provider.map(|p| p as Arc<dyn WhatsAppProvider>),
            "v22.0",
        )
    }

    fn request(f: &Fixture, body: &str) -> SendRequest {
        SendRequest {
            conversation_id: f.conversation_id.to_string(),
            body: body.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_text_inside_window() {
        let f = fixture(Some(1)).await;
        let provider = Arc::new(FakeWhatsAppProvider::new());
        let svc = service(&f.store, Some(provider.clone()));

        let outcome = svc.send(request(&f, "Hola {{first_name}}")).await.unwrap();

        assert_eq!(outcome.meta.mode, DeliveryMode::Text);
        assert_eq!(outcome.meta.resolved_body, "Hola Ana");
        assert_eq!(outcome.message.body, "Hola Ana");
        assert_eq!(outcome.message.status.as_deref(), Some("sent"));

        let sent = provider.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "593991234567");
        assert_eq!(sent[0].api_version, "v22.0");

        let conversation = f.store.conversations().pop().unwrap();
        assert_eq!(conversation.last_message.as_deref(), Some("Hola Ana"));

        let audit = f.store.audit_logs();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::MessageSent);
    }

    #[tokio::test]
    async fn test_nameless_lead_is_greeted_as_cliente() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let lead = store
            .create_lead(
                &NewLead {
                    name: Some("   ".into()),
                    phone: "573001112222".into(),
                    country: "Colombia".into(),
                    status: LeadStatus::New,
                    admin_id: Uuid::new_v4(),
                    agent_id: Uuid::new_v4(),
                },
                now,
            )
            .await
            .unwrap();
        let conversation = store.upsert_conversation(lead.id, "", now).await.unwrap();
        let provider = Arc::new(FakeWhatsAppProvider::new());
        let svc = service(&store, Some(provider.clone()));

        let outcome = svc
            .send(SendRequest {
                conversation_id: conversation.id.to_string(),
                body: "Hola {{nombre}} / {{first_name}}!".into(),
                force_mode: Some(SendMode::Text),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(outcome.meta.resolved_body, "Hola cliente / cliente!");
        assert_eq!(
            provider.sent()[0].payload,
            OutboundPayload::Text {
                body: "Hola cliente / cliente!".into()
            }
        );
    }

    #[tokio::test]
    async fn test_template_outside_window_uses_ordered_parameters() {
        let f = fixture(Some(25)).await;
        let tpl = template(Some("seguimiento_v2"));
        f.store.add_template(tpl.clone());
        let provider = Arc::new(FakeWhatsAppProvider::new());
        let svc = service(&f.store, Some(provider.clone()));

        let mut req = request(&f, "Hola {{first_name}}");
        req.template_id = Some(tpl.id.to_string());
        req.custom_variables = HashMap::from([("Agente".to_string(), "Laura".to_string())]);
        let outcome = svc.send(req).await.unwrap();

        assert_eq!(outcome.meta.mode, DeliveryMode::Template);
        assert_eq!(outcome.meta.used_template_id, Some(tpl.id));
        assert_eq!(
            provider.sent()[0].payload,
            OutboundPayload::Template {
                name: "seguimiento_v2".into(),
                language_code: "es".into(),
                parameters: vec!["Ana".into(), "Laura".into(), "Ecuador".into()],
            }
        );
        assert_eq!(outcome.message.template_name.as_deref(), Some("seguimiento_v2"));
    }

    #[tokio::test]
    async fn test_template_mode_without_provider_name_is_config_error() {
        let f = fixture(None).await;
        let provider = Arc::new(FakeWhatsAppProvider::new());
        let svc = service(&f.store, Some(provider.clone()));

        let err = svc.send(request(&f, "Hola")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
        assert!(provider.sent().is_empty());
        assert!(f.store.messages().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_is_persisted_before_error() {
        let f = fixture(Some(1)).await;
        let provider = Arc::new(FakeWhatsAppProvider::failing("Re-engagement message"));
        let svc = service(&f.store, Some(provider));

        let err = svc.send(request(&f, "Hola")).await.unwrap_err();
        match err {
            ServiceError::Delivery(msg) => assert_eq!(msg, "Re-engagement message"),
            other => panic!("unexpected error: {:?}", other),
        }

        let outbound: Vec<_> = f
            .store
            .messages()
            .into_iter()
            .filter(|m| m.direction == MessageDirection::Outbound)
            .collect();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].status.as_deref(), Some("failed"));

        let ledger: Vec<_> = f
            .store
            .webhook_events()
            .into_iter()
            .filter(|e| e.event_type == EVENT_MESSAGE_OUTBOUND)
            .collect();
        assert_eq!(ledger.len(), 1);
        assert!(!ledger[0].processed);
        assert_eq!(ledger[0].error.as_deref(), Some("Re-engagement message"));
        assert!(f.store.audit_logs().is_empty());
    }

    #[tokio::test]
    async fn test_rich_insert_falls_back_to_minimal_row() {
        let f = fixture(Some(1)).await;
        f.store.reject_rich_messages(true);
        let svc = service(&f.store, Some(Arc::new(FakeWhatsAppProvider::new())));

        let outcome = svc.send(request(&f, "Hola")).await.unwrap();
        assert_eq!(outcome.message.body, "Hola");
        assert!(outcome.message.status.is_none());
        assert_eq!(outcome.meta.provider_message_id.as_deref(), Some("wamid.fake-1"));
    }

    #[tokio::test]
    async fn test_dry_run_without_credentials() {
        let f = fixture(None).await;
        f.store.set_runtime_config(KEY_DRY_RUN, json!(true), true);
        f.store.set_runtime_config(KEY_DEFAULT_MODE, json!("text"), true);
        let svc = service(&f.store, None);

        let outcome = svc.send(request(&f, "Hola")).await.unwrap();
        assert!(outcome.meta.dry_run);
        assert!(outcome
            .meta
            .provider_message_id
            .as_deref()
            .unwrap_or_default()
            .starts_with("dryrun-"));
    }

    #[tokio::test]
    async fn test_live_send_without_credentials_is_config_error() {
        let f = fixture(Some(1)).await;
        let svc = service(&f.store, None);
        let err = svc.send(request(&f, "Hola")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[tokio::test]
    async fn test_validation_and_not_found() {
        let f = fixture(Some(1)).await;
        let svc = service(&f.store, Some(Arc::new(FakeWhatsAppProvider::new())));

        let err = svc.send(request(&f, "   ")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let mut req = request(&f, "Hola");
        req.conversation_id = Uuid::new_v4().to_string();
        assert!(matches!(svc.send(req).await.unwrap_err(), ServiceError::NotFound(_)));

        let mut req = request(&f, "Hola");
        req.conversation_id = "not-a-uuid".into();
        assert!(matches!(svc.send(req).await.unwrap_err(), ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_template_id_is_ignored() {
        let f = fixture(Some(1)).await;
        let svc = service(&f.store, Some(Arc::new(FakeWhatsAppProvider::new())));
        let mut req = request(&f, "Hola");
        req.template_id = Some(Uuid::new_v4().to_string());

        let outcome = svc.send(req).await.unwrap();
        assert_eq!(outcome.meta.used_template_id, None);
        assert_eq!(outcome.meta.mode, DeliveryMode::Text);
    }
}
