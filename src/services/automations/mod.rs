//! Time-driven lead and task automations
//!
//! Both sweeps are stateless between runs and guarded per side effect, so a
//! scheduler may retry or overlap invocations.

pub mod no_response;
pub mod sla_close;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::error::{ServiceError, ServiceResult};
use crate::store::CrmStore;

pub use no_response::NoResponseSummary;
pub use sla_close::SlaCloseSummary;

/// Which sweep(s) to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AutomationTarget {
    NoResponse,
    SlaClose,
    All,
}

impl AutomationTarget {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "no-response" => Some(Self::NoResponse),
            "sla-close" => Some(Self::SlaClose),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoResponse => "no-response",
            Self::SlaClose => "sla-close",
            Self::All => "all",
        }
    }
}

impl std::str::FromStr for AutomationTarget {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            ServiceError::Validation(format!(
                "unknown automation target '{}' (expected no-response, sla-close or all)",
                s
            ))
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_response: Option<NoResponseSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_close: Option<SlaCloseSummary>,
}

pub struct AutomationRunner {
    store: Arc<dyn CrmStore>,
}

impl AutomationRunner {
    pub fn new(store: Arc<dyn CrmStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, target: AutomationTarget) -> ServiceResult<AutomationReport> {
        let now = Utc::now();
        let store = self.store.as_ref();

        let report = match target {
            AutomationTarget::NoResponse => AutomationReport {
                no_response: Some(no_response::run(store, now).await?),
                sla_close: None,
            },
            AutomationTarget::SlaClose => AutomationReport {
                no_response: None,
                sla_close: Some(sla_close::run(store, now).await?),
            },
            AutomationTarget::All => {
                let (nr, sla) =
                    tokio::try_join!(no_response::run(store, now), sla_close::run(store, now))?;
                AutomationReport {
                    no_response: Some(nr),
                    sla_close: Some(sla),
                }
            }
        };
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_target_parse() {
        assert_eq!(AutomationTarget::parse("no-response"), Some(AutomationTarget::NoResponse));
        assert_eq!(AutomationTarget::parse("SLA_CLOSE"), Some(AutomationTarget::SlaClose));
        assert_eq!(AutomationTarget::parse(" all "), Some(AutomationTarget::All));
        assert_eq!(AutomationTarget::parse("everything"), None);
        assert!("nope".parse::<AutomationTarget>().is_err());
    }

    #[tokio::test]
    async fn test_run_all_reports_both() {
        let runner = AutomationRunner::new(Arc::new(MemoryStore::new()));
        let report = runner.run(AutomationTarget::All).await.unwrap();
        assert!(report.no_response.is_some());
        assert!(report.sla_close.is_some());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["noResponse"]["createdTasks"], 0);
        assert_eq!(json["slaClose"]["targetStatus"], "closed_by_time");
    }

    #[tokio::test]
    async fn test_run_single_target() {
        let runner = AutomationRunner::new(Arc::new(MemoryStore::new()));
        let report = runner.run(AutomationTarget::SlaClose).await.unwrap();
        assert!(report.no_response.is_none());
        assert!(report.sla_close.is_some());
    }
}
