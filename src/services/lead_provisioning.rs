//! Lead auto-provisioning for inbound messages from unknown phones
//!
//! Country comes from the calling-code prefix (longest code first), the
//! default assignees from the earliest admin/agent profiles of that country,
//! falling back to the configured pair. A lead that cannot be assigned is
//! never created.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::store::CrmStore;
use crate::types::{normalize_phone, Conversation, Lead, LeadStatus, NewLead, Role};

/// Calling code -> ISO country code
pub const CALLING_CODES: &[(&str, &str)] = &[
    ("57", "CO"),
    ("52", "MX"),
    ("56", "CL"),
    ("51", "PE"),
    ("54", "AR"),
    ("58", "VE"),
    ("593", "EC"),
    ("591", "BO"),
    ("595", "PY"),
    ("598", "UY"),
    ("55", "BR"),
];

/// Longest matching calling code wins
pub fn detect_country_code(phone: &str) -> Option<&'static str> {
    let normalized = normalize_phone(phone);
    CALLING_CODES
        .iter()
        .filter(|(calling, _)| normalized.starts_with(calling))
        .max_by_key(|(calling, _)| calling.len())
        .map(|(_, iso)| *iso)
}

/// Fallback assignment for leads whose country cannot be resolved.
/// Placeholder ids are already filtered out (`None`) by the config layer.
#[derive(Debug, Clone)]
pub struct LeadDefaults {
    pub country: String,
    pub admin_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
}

impl Default for LeadDefaults {
    fn default() -> Self {
        Self {
            country: crate::defaults::DEFAULT_LEAD_COUNTRY.to_string(),
            admin_id: None,
            agent_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Assignment {
    country: String,
    admin_id: Uuid,
    agent_id: Uuid,
}

pub struct LeadProvisioner<'a> {
    store: &'a dyn CrmStore,
    defaults: &'a LeadDefaults,
}

impl<'a> LeadProvisioner<'a> {
    pub fn new(store: &'a dyn CrmStore, defaults: &'a LeadDefaults) -> Self {
        Self { store, defaults }
    }

    async fn resolve_assignment(&self, phone: &str) -> ServiceResult<Assignment> {
        let country = match detect_country_code(phone) {
            Some(iso) => {
                let found = self.store.find_country_by_code(iso).await?;
                if found.is_none() {
                    warn!(iso = %iso, "Calling code matched but country is not configured");
                }
                found
            }
            None => None,
        };

        let Some(country) = country else {
            return match (self.defaults.admin_id, self.defaults.agent_id) {
                (Some(admin_id), Some(agent_id)) => Ok(Assignment {
                    country: self.defaults.country.clone(),
                    admin_id,
                    agent_id,
                }),
                _ => Err(ServiceError::Config(
                    "no country detected from calling code and WHATSAPP_DEFAULT_ADMIN_ID/WHATSAPP_DEFAULT_AGENT_ID are not set"
                        .to_string(),
                )),
            };
        };

        let admin = self.store.earliest_profile(Role::Admin, country.id).await?;
        let agent = self.store.earliest_profile(Role::Agent, country.id).await?;

        let admin_id = admin.map(|p| p.id).or(self.defaults.admin_id);
        let agent_id = agent.map(|p| p.id).or(self.defaults.agent_id);

        match (admin_id, agent_id) {
            (Some(admin_id), Some(agent_id)) => Ok(Assignment {
                country: country.name,
                admin_id,
                agent_id,
            }),
            _ => Err(ServiceError::Config(format!(
                "country {} has no admin/agent profile and no default assignees are configured",
                country.code
            ))),
        }
    }

    /// Find the lead for `phone`, creating it when unknown
    pub async fn resolve_or_create_lead(
        &self,
        phone: &str,
        display_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> ServiceResult<Lead> {
        let normalized = normalize_phone(phone);
        if normalized.is_empty() {
            return Err(ServiceError::Validation(format!(
                "phone '{}' has no digits",
                phone
            )));
        }

        if let Some(lead) = self.store.find_lead_by_phone(&normalized).await? {
            return Ok(lead);
        }

        let assignment = self.resolve_assignment(&normalized).await?;
        let new_lead = NewLead {
            name: display_name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            phone: phone.to_string(),
            country: assignment.country.clone(),
            status: LeadStatus::New,
            admin_id: assignment.admin_id,
            agent_id: assignment.agent_id,
        };

        let lead = match self.store.create_lead(&new_lead, at).await {
            Ok(lead) => lead,
            Err(e) => {
                // Lost a race against a concurrent delivery for the same phone
                if let Some(existing) = self.store.find_lead_by_phone(&normalized).await? {
                    debug!(lead_id = %existing.id, "Lead created concurrently, reusing it");
                    return Ok(existing);
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .store
            .insert_lead_status_history(lead.id, LeadStatus::New, assignment.agent_id, at)
            .await
        {
            warn!(lead_id = %lead.id, "Failed to write lead status history: {}", e);
        }

        info!(
            lead_id = %lead.id,
            country = %lead.country,
            agent_id = %lead.agent_id,
            "Lead auto-created from inbound message"
        );
        Ok(lead)
    }

    /// The lead's conversation with its denormalized fields refreshed
    pub async fn resolve_or_create_conversation(
        &self,
        lead_id: Uuid,
        last_message: &str,
        at: DateTime<Utc>,
    ) -> ServiceResult<Conversation> {
        Ok(self.store.upsert_conversation(lead_id, last_message, at).await?)
    }
}
