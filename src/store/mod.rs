//! Persistence abstraction for the messaging and automation core
//!
//! `CrmStore` is the seam between the services and the relational store:
//! - `PgStore` runs the sqlx queries in `db::queries` (production)
//! - `MemoryStore` keeps everything in process (local runs, tests)
//!
//! Configuration via STORE_BACKEND env variable ("postgres" | "memory").
//!
//! Every mutation is a single guarded statement. Both implementations enforce
//! the same uniqueness rules so the services can rely on them:
//! - one lead per normalized phone
//! - one conversation per lead
//! - one pending task per (lead, task type)
//! - one processed ledger row per (provider, event type, message id)
//! - one inbound message per provider message id

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{
    Conversation, Country, InboundMessageRecord, Lead, LeadStatus, Message, MessageDirection,
    MessageTemplate, NewAuditLog, NewLead, NewMessage, NewTask, NewWebhookEvent,
    OutboundMessageRecord, Profile, Role, RuntimeConfigEntry, Task, TaskStatus, WebhookEvent,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CrmStore: Send + Sync {
    // ---- runtime configuration ----

    /// Enabled rows among `keys`
    async fn runtime_config_entries(&self, keys: &[&str]) -> Result<Vec<RuntimeConfigEntry>>;

    // ---- leads ----

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>>;

    /// Lookup by digits-only phone
    async fn find_lead_by_phone(&self, phone_normalized: &str) -> Result<Option<Lead>>;

    /// Fails if a lead with the same normalized phone exists
    async fn create_lead(&self, lead: &NewLead, at: DateTime<Utc>) -> Result<Lead>;

    async fn list_leads_by_status(&self, statuses: &[LeadStatus]) -> Result<Vec<Lead>>;

    /// Conditional update: only succeeds while the lead is still in one of
    /// `expected`. Returns `None` when the guard did not match.
    async fn transition_lead_status(
        &self,
        lead_id: Uuid,
        expected: &[LeadStatus],
        target: LeadStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Lead>>;

    async fn insert_lead_status_history(
        &self,
        lead_id: Uuid,
        status: LeadStatus,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()>;

    // ---- countries & profiles ----

    async fn find_country_by_code(&self, code: &str) -> Result<Option<Country>>;

    /// Earliest-created profile with `role` scoped to `country_id`
    async fn earliest_profile(&self, role: Role, country_id: Uuid) -> Result<Option<Profile>>;

    // ---- conversations ----

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;

    async fn get_conversation_by_lead(&self, lead_id: Uuid) -> Result<Option<Conversation>>;

    /// Create the lead's conversation or refresh its denormalized fields
    async fn upsert_conversation(
        &self,
        lead_id: Uuid,
        last_message: &str,
        at: DateTime<Utc>,
    ) -> Result<Conversation>;

    async fn touch_conversation(&self, id: Uuid, last_message: &str, at: DateTime<Utc>) -> Result<()>;

    // ---- messages ----

    /// Insert using only the columns every schema has
    async fn insert_message(&self, message: &NewMessage) -> Result<Message>;

    /// Insert with delivery metadata columns
    async fn insert_outbound_message(&self, record: &OutboundMessageRecord) -> Result<Message>;

    /// Idempotent on the provider message id: a redelivery returns the stored row
    async fn insert_inbound_message(&self, record: &InboundMessageRecord) -> Result<Message>;

    async fn latest_message(
        &self,
        conversation_id: Uuid,
        direction: MessageDirection,
    ) -> Result<Option<Message>>;

    async fn has_message_after(
        &self,
        conversation_id: Uuid,
        direction: MessageDirection,
        after: DateTime<Utc>,
    ) -> Result<bool>;

    // ---- templates ----

    async fn get_template(&self, id: Uuid) -> Result<Option<MessageTemplate>>;

    // ---- tasks ----

    async fn has_pending_task(&self, lead_id: Uuid) -> Result<bool>;

    /// Returns `None` when a pending task of the same type already exists
    async fn create_task(&self, task: &NewTask, at: DateTime<Utc>) -> Result<Option<Task>>;

    /// Cancel every pending task of the lead, returning the canceled rows
    async fn cancel_pending_tasks(&self, lead_id: Uuid) -> Result<Vec<Task>>;

    async fn insert_task_history(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        user_id: Uuid,
        comment: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    // ---- webhook ledger ----

    async fn find_webhook_event(
        &self,
        provider: &str,
        event_type: &str,
        message_id: &str,
        processed_only: bool,
    ) -> Result<Option<WebhookEvent>>;

    async fn insert_webhook_event(&self, event: &NewWebhookEvent) -> Result<WebhookEvent>;

    /// Returns `false` when another row of the same tuple is already processed
    async fn mark_webhook_event_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Never downgrades a processed row
    async fn mark_webhook_event_failed(&self, id: Uuid, error: &str, at: DateTime<Utc>) -> Result<()>;

    // ---- audit ----

    async fn insert_audit_log(&self, entry: &NewAuditLog) -> Result<()>;
}
