//! No-response follow-up automation
//!
//! Creates a follow-up task for leads whose last outbound message went
//! unanswered for longer than the configured threshold.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ServiceResult;
use crate::services::runtime_config::NoResponseConfig;
use crate::store::CrmStore;
use crate::types::{
    AuditAction, Lead, LeadStatus, MessageDirection, NewAuditLog, NewTask, TaskStatus,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoResponseSummary {
    pub enabled: bool,
    pub evaluated_leads: usize,
    pub created_tasks: usize,
    pub skipped_leads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub minutes: f64,
    pub statuses: Vec<LeadStatus>,
}

/// Render 10.0 as "10", keep fractions otherwise
pub(crate) fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

pub async fn run(store: &dyn CrmStore, now: DateTime<Utc>) -> ServiceResult<NoResponseSummary> {
    let config = NoResponseConfig::load(store).await;
    if !config.enabled {
        debug!("No-response automation disabled");
        return Ok(NoResponseSummary {
            enabled: false,
            reason: Some("automation_disabled".to_string()),
            minutes: config.minutes,
            statuses: config.statuses,
            ..Default::default()
        });
    }

    let leads = store.list_leads_by_status(&config.statuses).await?;
    let mut created_tasks = 0;
    let mut skipped_leads = 0;

    for lead in &leads {
        if follow_up_lead(store, lead, &config, now).await? {
            created_tasks += 1;
        } else {
            skipped_leads += 1;
        }
    }

    info!(
        evaluated = leads.len(),
        created = created_tasks,
        skipped = skipped_leads,
        "No-response automation finished"
    );

    Ok(NoResponseSummary {
        enabled: true,
        evaluated_leads: leads.len(),
        created_tasks,
        skipped_leads,
        reason: None,
        minutes: config.minutes,
        statuses: config.statuses,
    })
}

/// Returns whether a task was created
async fn follow_up_lead(
    store: &dyn CrmStore,
    lead: &Lead,
    config: &NoResponseConfig,
    now: DateTime<Utc>,
) -> ServiceResult<bool> {
    let Some(conversation) = store.get_conversation_by_lead(lead.id).await? else {
        return Ok(false);
    };

    let Some(last_outbound) = store
        .latest_message(conversation.id, MessageDirection::Outbound)
        .await?
    else {
        return Ok(false);
    };

    let threshold = Duration::milliseconds((config.minutes * 60_000.0) as i64);
    if now - last_outbound.created_at < threshold {
        return Ok(false);
    }

    if store
        .has_message_after(conversation.id, MessageDirection::Inbound, last_outbound.created_at)
        .await?
    {
        return Ok(false);
    }

    if store.has_pending_task(lead.id).await? {
        debug!(lead_id = %lead.id, "Lead already has a pending task");
        return Ok(false);
    }

    let minutes = format_amount(config.minutes);
    let new_task = NewTask {
        lead_id: lead.id,
        agent_id: lead.agent_id,
        title: format!("{} ({})", config.task_title, lead.display_name()),
        task_type: config.task_type.clone(),
        description: Some(format!(
            "Lead did not respond {} minutes after the last outbound message ({}).",
            minutes,
            last_outbound.created_at.format("%Y-%m-%d %H:%M UTC")
        )),
        scheduled_at: now,
    };

    let Some(task) = store.create_task(&new_task, now).await? else {
        debug!(lead_id = %lead.id, task_type = %config.task_type, "Pending task of this type already exists");
        return Ok(false);
    };

    if let Err(e) = store
        .insert_task_history(
            task.id,
            TaskStatus::Pending,
            lead.agent_id,
            Some(&format!("Created automatically: no response after {} min", minutes)),
            now,
        )
        .await
    {
        warn!(task_id = %task.id, "Failed to write task history: {}", e);
    }

    let audit = NewAuditLog::automation(
        AuditAction::TaskCreated,
        "task",
        task.id,
        format!("No-response follow-up task for lead {}", lead.id),
        now,
    );
    if let Err(e) = store.insert_audit_log(&audit).await {
        warn!(task_id = %task.id, "Failed to write audit log: {}", e);
    }

    info!(lead_id = %lead.id, task_id = %task.id, "No-response follow-up task created");
    Ok(true)
}
