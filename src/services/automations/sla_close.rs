//! SLA auto-close automation
//!
//! Leads that stay in an open status longer than the SLA are moved to the
//! close status. The transition is a guarded update, so a lead whose status
//! changed since the sweep listed it is left alone.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::no_response::format_amount;
use crate::error::ServiceResult;
use crate::services::runtime_config::SlaCloseConfig;
use crate::store::CrmStore;
use crate::types::{AuditAction, Lead, LeadStatus, NewAuditLog, TaskStatus};

pub const CANCEL_COMMENT: &str = "Canceled automatically by SLA close";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaCloseSummary {
    pub enabled: bool,
    pub evaluated_leads: usize,
    pub closed_leads: usize,
    pub canceled_tasks: usize,
    pub skipped_leads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub days: f64,
    pub statuses: Vec<LeadStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_status: Option<LeadStatus>,
}

pub async fn run(store: &dyn CrmStore, now: DateTime<Utc>) -> ServiceResult<SlaCloseSummary> {
    let config = SlaCloseConfig::load(store).await;
    if !config.enabled {
        debug!("SLA close automation disabled");
        return Ok(SlaCloseSummary {
            enabled: false,
            reason: Some("automation_disabled".to_string()),
            days: config.days,
            statuses: config.statuses,
            target_status: Some(config.target_status),
            ..Default::default()
        });
    }

    let leads = store.list_leads_by_status(&config.statuses).await?;
    let deadline = Duration::milliseconds((config.days * 86_400_000.0) as i64);

    let mut closed_leads = 0;
    let mut canceled_tasks = 0;
    let mut skipped_leads = 0;

    for lead in &leads {
        if now - lead.created_at < deadline {
            skipped_leads += 1;
            continue;
        }
        match close_lead(store, lead, &config, now).await? {
            Some(canceled) => {
                closed_leads += 1;
                canceled_tasks += canceled;
            }
            None => skipped_leads += 1,
        }
    }

    info!(
        evaluated = leads.len(),
        closed = closed_leads,
        canceled_tasks = canceled_tasks,
        skipped = skipped_leads,
        "SLA close automation finished"
    );

    Ok(SlaCloseSummary {
        enabled: true,
        evaluated_leads: leads.len(),
        closed_leads,
        canceled_tasks,
        skipped_leads,
        reason: None,
        days: config.days,
        statuses: config.statuses,
        target_status: Some(config.target_status),
    })
}

/// Close one lead. `None` when the guard did not match (status changed
/// concurrently); otherwise the number of canceled tasks.
pub async fn close_lead(
    store: &dyn CrmStore,
    lead: &Lead,
    config: &SlaCloseConfig,
    now: DateTime<Utc>,
) -> ServiceResult<Option<usize>> {
    let Some(closed) = store
        .transition_lead_status(lead.id, &config.statuses, config.target_status, now)
        .await?
    else {
        debug!(lead_id = %lead.id, "Lead status changed during sweep, not closing");
        return Ok(None);
    };

    if let Err(e) = store
        .insert_lead_status_history(closed.id, config.target_status, closed.agent_id, now)
        .await
    {
        warn!(lead_id = %closed.id, "Failed to write lead status history: {}", e);
    }

    let audit = NewAuditLog::automation(
        AuditAction::LeadStatusChange,
        "lead",
        closed.id,
        format!(
            "Lead closed automatically by SLA ({} days): {} -> {}",
            format_amount(config.days),
            lead.status,
            config.target_status
        ),
        now,
    );
    if let Err(e) = store.insert_audit_log(&audit).await {
        warn!(lead_id = %closed.id, "Failed to write audit log: {}", e);
    }

    let canceled = store.cancel_pending_tasks(closed.id).await?;
    for task in &canceled {
        if let Err(e) = store
            .insert_task_history(task.id, TaskStatus::Canceled, closed.agent_id, Some(CANCEL_COMMENT), now)
            .await
        {
            warn!(task_id = %task.id, "Failed to write task history: {}", e);
        }
    }

    info!(lead_id = %closed.id, canceled_tasks = canceled.len(), "Lead closed by SLA");
    Ok(Some(canceled.len()))
}
