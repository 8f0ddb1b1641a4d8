//! In-process store
//!
//! Mirrors the Postgres schema constraints so services behave identically
//! against both backends. Used with STORE_BACKEND=memory and by the tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::CrmStore;
use crate::types::{
    normalize_phone, Conversation, Country, InboundMessageRecord, Lead, LeadStatus,
    LeadStatusHistory, Message, MessageDirection, MessageStatus, MessageTemplate, NewAuditLog,
    NewLead, NewMessage, NewTask, NewWebhookEvent, OutboundMessageRecord, Profile, Role,
    RuntimeConfigEntry, Task, TaskHistory, TaskStatus, WebhookEvent, PROVIDER_WHATSAPP,
};

#[derive(Default)]
struct State {
    runtime_config: Vec<RuntimeConfigEntry>,
    leads: Vec<Lead>,
    lead_history: Vec<LeadStatusHistory>,
    countries: Vec<Country>,
    profiles: Vec<Profile>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    templates: Vec<MessageTemplate>,
    tasks: Vec<Task>,
    task_history: Vec<TaskHistory>,
    webhook_events: Vec<WebhookEvent>,
    audit_logs: Vec<NewAuditLog>,
    reject_rich_messages: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_country(&self, name: &str, code: &str) -> Country {
        let country = Country {
            id: Uuid::new_v4(),
            name: name.to_string(),
            code: code.to_string(),
        };
        self.state.lock().countries.push(country.clone());
        country
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Upsert a runtime configuration entry
    pub fn set_runtime_config(&self, key: &str, value: serde_json::Value, enabled: bool) {
        let mut state = self.state.lock();
        state.runtime_config.retain(|e| e.key != key);
        state.runtime_config.push(RuntimeConfigEntry {
            key: key.to_string(),
            value,
            enabled,
        });
    }

    pub fn add_profile(&self, role: Role, country_id: Option<Uuid>, created_at: DateTime<Utc>) -> Profile {
        let profile = Profile {
            id: Uuid::new_v4(),
            email: None,
            role,
            country_id,
            created_at,
        };
        self.state.lock().profiles.push(profile.clone());
        profile
    }

    pub fn add_template(&self, template: MessageTemplate) {
        self.state.lock().templates.push(template);
    }

    /// Simulate a deployment whose `messages` table lacks the metadata columns
    pub fn reject_rich_messages(&self, reject: bool) {
        self.state.lock().reject_rich_messages = reject;
    }

    /// Out-of-band status change, as done by an agent in the UI
    pub fn set_lead_status(&self, lead_id: Uuid, status: LeadStatus) {
        let mut state = self.state.lock();
        if let Some(lead) = state.leads.iter_mut().find(|l| l.id == lead_id) {
            lead.status = status;
        }
    }

    pub fn set_lead_created_at(&self, lead_id: Uuid, created_at: DateTime<Utc>) {
        let mut state = self.state.lock();
        if let Some(lead) = state.leads.iter_mut().find(|l| l.id == lead_id) {
            lead.created_at = created_at;
        }
    }

    pub fn leads(&self) -> Vec<Lead> {
        self.state.lock().leads.clone()
    }

    pub fn lead_history(&self) -> Vec<LeadStatusHistory> {
        self.state.lock().lead_history.clone()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().conversations.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().tasks.clone()
    }

    pub fn task_history(&self) -> Vec<TaskHistory> {
        self.state.lock().task_history.clone()
    }

    pub fn webhook_events(&self) -> Vec<WebhookEvent> {
        self.state.lock().webhook_events.clone()
    }

    pub fn audit_logs(&self) -> Vec<NewAuditLog> {
        self.state.lock().audit_logs.clone()
    }
}

#[async_trait]
impl CrmStore for MemoryStore {
    async fn runtime_config_entries(&self, keys: &[&str]) -> Result<Vec<RuntimeConfigEntry>> {
        let state = self.state.lock();
        Ok(state
            .runtime_config
            .iter()
            .filter(|e| e.enabled && keys.contains(&e.key.as_str()))
            .cloned()
            .collect())
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>> {
        Ok(self.state.lock().leads.iter().find(|l| l.id == id).cloned())
    }

    async fn find_lead_by_phone(&self, phone_normalized: &str) -> Result<Option<Lead>> {
        Ok(self
            .state
            .lock()
            .leads
            .iter()
            .find(|l| l.phone_normalized == phone_normalized)
            .cloned())
    }

    async fn create_lead(&self, lead: &NewLead, at: DateTime<Utc>) -> Result<Lead> {
        let mut state = self.state.lock();
        let phone_normalized = normalize_phone(&lead.phone);
        if state.leads.iter().any(|l| l.phone_normalized == phone_normalized) {
            bail!("duplicate key value violates unique constraint \"leads_phone_normalized_key\"");
        }
        let created = Lead {
            id: Uuid::new_v4(),
            name: lead.name.clone(),
            phone: lead.phone.clone(),
            phone_normalized,
            country: lead.country.clone(),
            status: lead.status,
            status_changed_at: at,
            admin_id: lead.admin_id,
            agent_id: lead.agent_id,
            created_at: at,
            updated_at: at,
        };
        state.leads.push(created.clone());
        Ok(created)
    }

    async fn list_leads_by_status(&self, statuses: &[LeadStatus]) -> Result<Vec<Lead>> {
        Ok(self
            .state
            .lock()
            .leads
            .iter()
            .filter(|l| statuses.contains(&l.status))
            .cloned()
            .collect())
    }

    async fn transition_lead_status(
        &self,
        lead_id: Uuid,
        expected: &[LeadStatus],
        target: LeadStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Lead>> {
        let mut state = self.state.lock();
        let Some(lead) = state
            .leads
            .iter_mut()
            .find(|l| l.id == lead_id && expected.contains(&l.status))
        else {
            return Ok(None);
        };
        lead.status = target;
        lead.status_changed_at = at;
        lead.updated_at = at;
        Ok(Some(lead.clone()))
    }

    async fn insert_lead_status_history(
        &self,
        lead_id: Uuid,
        status: LeadStatus,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.state.lock().lead_history.push(LeadStatusHistory {
            id: Uuid::new_v4(),
            lead_id,
            status,
            changed_at: at,
            user_id,
        });
        Ok(())
    }

    async fn find_country_by_code(&self, code: &str) -> Result<Option<Country>> {
        Ok(self
            .state
            .lock()
            .countries
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn earliest_profile(&self, role: Role, country_id: Uuid) -> Result<Option<Profile>> {
        Ok(self
            .state
            .lock()
            .profiles
            .iter()
            .filter(|p| p.role == role && p.country_id == Some(country_id))
            .min_by_key(|p| p.created_at)
            .cloned())
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.state.lock().conversations.iter().find(|c| c.id == id).cloned())
    }

    async fn get_conversation_by_lead(&self, lead_id: Uuid) -> Result<Option<Conversation>> {
        Ok(self
            .state
            .lock()
            .conversations
            .iter()
            .find(|c| c.lead_id == lead_id)
            .cloned())
    }

    async fn upsert_conversation(
        &self,
        lead_id: Uuid,
        last_message: &str,
        at: DateTime<Utc>,
    ) -> Result<Conversation> {
        let mut state = self.state.lock();
        if let Some(existing) = state.conversations.iter_mut().find(|c| c.lead_id == lead_id) {
            existing.last_message = Some(last_message.to_string());
            existing.updated_at = at;
            return Ok(existing.clone());
        }
        let conversation = Conversation {
            id: Uuid::new_v4(),
            lead_id,
            last_message: Some(last_message.to_string()),
            created_at: at,
            updated_at: at,
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn touch_conversation(&self, id: Uuid, last_message: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(existing) = state.conversations.iter_mut().find(|c| c.id == id) {
            existing.last_message = Some(last_message.to_string());
            existing.updated_at = at;
        }
        Ok(())
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        let row = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            body: message.body.clone(),
            direction: message.direction,
            created_at: message.created_at,
            status: None,
            provider: None,
            provider_message_id: None,
            template_name: None,
            metadata: None,
        };
        self.state.lock().messages.push(row.clone());
        Ok(row)
    }

    async fn insert_outbound_message(&self, record: &OutboundMessageRecord) -> Result<Message> {
        let mut state = self.state.lock();
        if state.reject_rich_messages {
            bail!("column \"provider_message_id\" of relation \"messages\" does not exist");
        }
        let row = Message {
            id: Uuid::new_v4(),
            conversation_id: record.conversation_id,
            body: record.body.clone(),
            direction: MessageDirection::Outbound,
            created_at: record.created_at,
            status: Some(record.status.as_str().to_string()),
            provider: Some(record.provider.clone()),
            provider_message_id: record.provider_message_id.clone(),
            template_name: record.template_name.clone(),
            metadata: Some(record.metadata()),
        };
        state.messages.push(row.clone());
        Ok(row)
    }

    async fn insert_inbound_message(&self, record: &InboundMessageRecord) -> Result<Message> {
        let mut state = self.state.lock();
        let existing = state.messages.iter().find(|m| {
            m.direction == MessageDirection::Inbound
                && m.provider_message_id.as_deref() == Some(record.provider_message_id.as_str())
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }
        let row = Message {
            id: Uuid::new_v4(),
            conversation_id: record.conversation_id,
            body: record.body.clone(),
            direction: MessageDirection::Inbound,
            created_at: record.created_at,
            status: Some(MessageStatus::Received.as_str().to_string()),
            provider: Some(PROVIDER_WHATSAPP.to_string()),
            provider_message_id: Some(record.provider_message_id.clone()),
            template_name: None,
            metadata: None,
        };
        state.messages.push(row.clone());
        Ok(row)
    }

    async fn latest_message(
        &self,
        conversation_id: Uuid,
        direction: MessageDirection,
    ) -> Result<Option<Message>> {
        Ok(self
            .state
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.direction == direction)
            .max_by_key(|m| m.created_at)
            .cloned())
    }

    async fn has_message_after(
        &self,
        conversation_id: Uuid,
        direction: MessageDirection,
        after: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.state.lock().messages.iter().any(|m| {
            m.conversation_id == conversation_id && m.direction == direction && m.created_at > after
        }))
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<MessageTemplate>> {
        Ok(self.state.lock().templates.iter().find(|t| t.id == id).cloned())
    }

    async fn has_pending_task(&self, lead_id: Uuid) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .tasks
            .iter()
            .any(|t| t.lead_id == lead_id && t.status == TaskStatus::Pending))
    }

    async fn create_task(&self, task: &NewTask, at: DateTime<Utc>) -> Result<Option<Task>> {
        let mut state = self.state.lock();
        let conflict = state.tasks.iter().any(|t| {
            t.lead_id == task.lead_id && t.task_type == task.task_type && t.status == TaskStatus::Pending
        });
        if conflict {
            return Ok(None);
        }
        let row = Task {
            id: Uuid::new_v4(),
            lead_id: task.lead_id,
            agent_id: task.agent_id,
            title: task.title.clone(),
            task_type: task.task_type.clone(),
            description: task.description.clone(),
            scheduled_at: task.scheduled_at,
            status: TaskStatus::Pending,
            created_at: at,
            completed_at: None,
        };
        state.tasks.push(row.clone());
        Ok(Some(row))
    }

    async fn cancel_pending_tasks(&self, lead_id: Uuid) -> Result<Vec<Task>> {
        let mut state = self.state.lock();
        let mut canceled = Vec::new();
        for task in state
            .tasks
            .iter_mut()
            .filter(|t| t.lead_id == lead_id && t.status == TaskStatus::Pending)
        {
            task.status = TaskStatus::Canceled;
            task.completed_at = None;
            canceled.push(task.clone());
        }
        Ok(canceled)
    }

    async fn insert_task_history(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        user_id: Uuid,
        comment: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.state.lock().task_history.push(TaskHistory {
            id: Uuid::new_v4(),
            task_id,
            status,
            changed_at: at,
            user_id,
            comment: comment.map(str::to_string),
        });
        Ok(())
    }

    async fn find_webhook_event(
        &self,
        provider: &str,
        event_type: &str,
        message_id: &str,
        processed_only: bool,
    ) -> Result<Option<WebhookEvent>> {
        let state = self.state.lock();
        let matches = |e: &&WebhookEvent| {
            e.provider == provider
                && e.event_type == event_type
                && e.message_id.as_deref() == Some(message_id)
                && (!processed_only || e.processed)
        };
        // Prefer the processed row when several attempts exist
        Ok(state
            .webhook_events
            .iter()
            .filter(matches)
            .max_by_key(|e| (e.processed, e.created_at))
            .cloned())
    }

    async fn insert_webhook_event(&self, event: &NewWebhookEvent) -> Result<WebhookEvent> {
        let mut state = self.state.lock();
        if event.processed {
            if let Some(message_id) = event.message_id.as_deref() {
                let taken = state.webhook_events.iter().any(|e| {
                    e.processed
                        && e.provider == event.provider
                        && e.event_type == event.event_type
                        && e.message_id.as_deref() == Some(message_id)
                });
                if taken {
                    bail!("duplicate key value violates unique constraint \"webhook_events_processed_key\"");
                }
            }
        }
        let row = WebhookEvent {
            id: Uuid::new_v4(),
            provider: event.provider.clone(),
            event_type: event.event_type.clone(),
            message_id: event.message_id.clone(),
            phone: event.phone.clone(),
            payload: event.payload.clone(),
            processed: event.processed,
            error: event.error.clone(),
            processed_at: event.processed_at,
            created_at: Utc::now(),
        };
        state.webhook_events.push(row.clone());
        Ok(row)
    }

    async fn mark_webhook_event_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(target) = state.webhook_events.iter().find(|e| e.id == id).cloned() else {
            return Ok(false);
        };
        let taken = state.webhook_events.iter().any(|e| {
            e.id != id
                && e.processed
                && e.provider == target.provider
                && e.event_type == target.event_type
                && e.message_id.is_some()
                && e.message_id == target.message_id
        });
        if taken {
            return Ok(false);
        }
        if let Some(row) = state.webhook_events.iter_mut().find(|e| e.id == id) {
            row.processed = true;
            row.error = None;
            row.processed_at = Some(at);
        }
        Ok(true)
    }

    async fn mark_webhook_event_failed(&self, id: Uuid, error: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(row) = state
            .webhook_events
            .iter_mut()
            .find(|e| e.id == id && !e.processed)
        {
            row.error = Some(error.to_string());
            row.processed_at = Some(at);
        }
        Ok(())
    }

    async fn insert_audit_log(&self, entry: &NewAuditLog) -> Result<()> {
        self.state.lock().audit_logs.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_lead(phone: &str) -> NewLead {
        NewLead {
            name: Some("Ana".into()),
            phone: phone.into(),
            country: "Ecuador".into(),
            status: LeadStatus::New,
            admin_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_create_lead_rejects_duplicate_normalized_phone() {
        let store = MemoryStore::new();
        store.create_lead(&new_lead("+593 99 123 4567"), Utc::now()).await.unwrap();
        let err = store.create_lead(&new_lead("593991234567"), Utc::now()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_transition_guard_requires_expected_status() {
        let store = MemoryStore::new();
        let lead = store.create_lead(&new_lead("573001112222"), Utc::now()).await.unwrap();

        let moved = store
            .transition_lead_status(lead.id, &[LeadStatus::Contacted], LeadStatus::ClosedByTime, Utc::now())
            .await
            .unwrap();
        assert!(moved.is_none());

        let moved = store
            .transition_lead_status(lead.id, &[LeadStatus::New], LeadStatus::ClosedByTime, Utc::now())
            .await
            .unwrap();
        assert_eq!(moved.unwrap().status, LeadStatus::ClosedByTime);
    }

    #[tokio::test]
    async fn test_create_task_is_unique_per_pending_type() {
        let store = MemoryStore::new();
        let task = NewTask {
            lead_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            title: "Follow up".into(),
            task_type: "auto_follow_up".into(),
            description: None,
            scheduled_at: Utc::now(),
        };
        assert!(store.create_task(&task, Utc::now()).await.unwrap().is_some());
        assert!(store.create_task(&task, Utc::now()).await.unwrap().is_none());

        store.cancel_pending_tasks(task.lead_id).await.unwrap();
        assert!(store.create_task(&task, Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_only_one_ledger_row_per_tuple_can_be_processed() {
        let store = MemoryStore::new();
        let event = NewWebhookEvent {
            provider: "whatsapp".into(),
            event_type: "message_received".into(),
            message_id: Some("wamid.1".into()),
            phone: None,
            payload: serde_json::json!({}),
            processed: false,
            error: None,
            processed_at: None,
        };
        let first = store.insert_webhook_event(&event).await.unwrap();
        let second = store.insert_webhook_event(&event).await.unwrap();

        assert!(store.mark_webhook_event_processed(first.id, Utc::now()).await.unwrap());
        assert!(!store.mark_webhook_event_processed(second.id, Utc::now()).await.unwrap());

        // a late failure must not downgrade the processed row
        store.mark_webhook_event_failed(first.id, "boom", Utc::now()).await.unwrap();
        let found = store
            .find_webhook_event("whatsapp", "message_received", "wamid.1", true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
        assert!(found.error.is_none());
    }
}
