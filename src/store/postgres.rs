//! Postgres-backed store delegating to `db::queries`

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::CrmStore;
use crate::db::queries;
use crate::types::{
    Conversation, Country, InboundMessageRecord, Lead, LeadStatus, Message, MessageDirection,
    MessageTemplate, NewAuditLog, NewLead, NewMessage, NewTask, NewWebhookEvent,
    OutboundMessageRecord, Profile, Role, RuntimeConfigEntry, Task, TaskStatus, WebhookEvent,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CrmStore for PgStore {
    async fn runtime_config_entries(&self, keys: &[&str]) -> Result<Vec<RuntimeConfigEntry>> {
        queries::runtime_config::get_enabled_entries(&self.pool, keys).await
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>> {
        queries::lead::get_lead(&self.pool, id).await
    }

    async fn find_lead_by_phone(&self, phone_normalized: &str) -> Result<Option<Lead>> {
        queries::lead::find_lead_by_phone(&self.pool, phone_normalized).await
    }

    async fn create_lead(&self, lead: &NewLead, at: DateTime<Utc>) -> Result<Lead> {
        queries::lead::create_lead(&self.pool, lead, at).await
    }

    async fn list_leads_by_status(&self, statuses: &[LeadStatus]) -> Result<Vec<Lead>> {
        queries::lead::list_leads_by_status(&self.pool, statuses).await
    }

    async fn transition_lead_status(
        &self,
        lead_id: Uuid,
        expected: &[LeadStatus],
        target: LeadStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Lead>> {
        queries::lead::transition_lead_status(&self.pool, lead_id, expected, target, at).await
    }

    async fn insert_lead_status_history(
        &self,
        lead_id: Uuid,
        status: LeadStatus,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        queries::lead::insert_status_history(&self.pool, lead_id, status, user_id, at).await
    }

    async fn find_country_by_code(&self, code: &str) -> Result<Option<Country>> {
        queries::country::find_country_by_code(&self.pool, code).await
    }

    async fn earliest_profile(&self, role: Role, country_id: Uuid) -> Result<Option<Profile>> {
        queries::country::earliest_profile(&self.pool, role, country_id).await
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        queries::conversation::get_conversation(&self.pool, id).await
    }

    async fn get_conversation_by_lead(&self, lead_id: Uuid) -> Result<Option<Conversation>> {
        queries::conversation::get_conversation_by_lead(&self.pool, lead_id).await
    }

    async fn upsert_conversation(
        &self,
        lead_id: Uuid,
        last_message: &str,
        at: DateTime<Utc>,
    ) -> Result<Conversation> {
        queries::conversation::upsert_conversation(&self.pool, lead_id, last_message, at).await
    }

    async fn touch_conversation(&self, id: Uuid, last_message: &str, at: DateTime<Utc>) -> Result<()> {
        queries::conversation::touch_conversation(&self.pool, id, last_message, at).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        queries::conversation::insert_message(&self.pool, message).await
    }

    async fn insert_outbound_message(&self, record: &OutboundMessageRecord) -> Result<Message> {
        queries::conversation::insert_outbound_message(&self.pool, record).await
    }

    async fn insert_inbound_message(&self, record: &InboundMessageRecord) -> Result<Message> {
        queries::conversation::insert_inbound_message(&self.pool, record).await
    }

    async fn latest_message(
        &self,
        conversation_id: Uuid,
        direction: MessageDirection,
    ) -> Result<Option<Message>> {
        queries::conversation::latest_message(&self.pool, conversation_id, direction).await
    }

    async fn has_message_after(
        &self,
        conversation_id: Uuid,
        direction: MessageDirection,
        after: DateTime<Utc>,
    ) -> Result<bool> {
        queries::conversation::has_message_after(&self.pool, conversation_id, direction, after).await
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<MessageTemplate>> {
        queries::template::get_template(&self.pool, id).await
    }

    async fn has_pending_task(&self, lead_id: Uuid) -> Result<bool> {
        queries::task::has_pending_task(&self.pool, lead_id).await
    }

    async fn create_task(&self, task: &NewTask, at: DateTime<Utc>) -> Result<Option<Task>> {
        queries::task::create_task(&self.pool, task, at).await
    }

    async fn cancel_pending_tasks(&self, lead_id: Uuid) -> Result<Vec<Task>> {
        queries::task::cancel_pending_tasks(&self.pool, lead_id).await
    }

    async fn insert_task_history(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        user_id: Uuid,
        comment: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        queries::task::insert_task_history(&self.pool, task_id, status, user_id, comment, at).await
    }

    async fn find_webhook_event(
        &self,
        provider: &str,
        event_type: &str,
        message_id: &str,
        processed_only: bool,
    ) -> Result<Option<WebhookEvent>> {
        queries::webhook_event::find_event(&self.pool, provider, event_type, message_id, processed_only)
            .await
    }

    async fn insert_webhook_event(&self, event: &NewWebhookEvent) -> Result<WebhookEvent> {
        queries::webhook_event::insert_event(&self.pool, event).await
    }

    async fn mark_webhook_event_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        queries::webhook_event::mark_processed(&self.pool, id, at).await
    }

    async fn mark_webhook_event_failed(&self, id: Uuid, error: &str, at: DateTime<Utc>) -> Result<()> {
        queries::webhook_event::mark_failed(&self.pool, id, error, at).await
    }

    async fn insert_audit_log(&self, entry: &NewAuditLog) -> Result<()> {
        queries::audit::insert_audit_log(&self.pool, entry).await
    }
}
