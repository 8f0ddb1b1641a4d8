//! Configuration management

use anyhow::{self, Context, Result};
use uuid::Uuid;

use crate::defaults;
use crate::services::lead_provisioning::LeadDefaults;

/// Persistence backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { database_url: String },
    Memory,
}

/// WhatsApp Cloud API credentials
#[derive(Debug, Clone)]
pub struct WhatsAppCredentials {
    pub access_token: String,
    pub phone_number_id: String,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreBackend,

    /// HTTP listen address
    pub bind_addr: String,

    /// Both credentials, or `None` (dry-run only)
    pub whatsapp: Option<WhatsAppCredentials>,

    pub graph_api_version: String,
    pub graph_base_url: String,

    /// Webhook signature key; unsigned deliveries are accepted when unset
    pub app_secret: Option<String>,

    /// Subscription handshake token
    pub webhook_verify_token: Option<String>,

    pub lead_defaults: LeadDefaults,

    /// `/automations/run` token; the endpoint is open when unset
    pub automation_token: Option<String>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an assignee id; placeholder ids count as unset
fn assignee_id(key: &str) -> Result<Option<Uuid>> {
    let Some(raw) = env_opt(key) else {
        return Ok(None);
    };
    let id = Uuid::parse_str(&raw).with_context(|| format!("{} must be a UUID", key))?;
    if defaults::is_placeholder_id(&id) {
        tracing::warn!("{} is a placeholder id, treating it as unset", key);
        return Ok(None);
    }
    Ok(Some(id))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let store = match env_opt("STORE_BACKEND").as_deref().unwrap_or("postgres") {
            "postgres" => StoreBackend::Postgres {
                database_url: env_opt("DATABASE_URL")
                    .context("DATABASE_URL must be set when STORE_BACKEND=postgres")?,
            },
            "memory" => StoreBackend::Memory,
            other => anyhow::bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{}'", other),
        };

        let bind_addr = env_opt("BIND_ADDR").unwrap_or_else(|| defaults::DEFAULT_BIND_ADDR.to_string());

        let whatsapp = match (env_opt("WHATSAPP_ACCESS_TOKEN"), env_opt("WHATSAPP_PHONE_NUMBER_ID")) {
            (Some(access_token), Some(phone_number_id)) => Some(WhatsAppCredentials {
                access_token,
                phone_number_id,
            }),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    "Only one of WHATSAPP_ACCESS_TOKEN / WHATSAPP_PHONE_NUMBER_ID is set, live sends are disabled"
                );
                None
            }
        };

        let graph_api_version = env_opt("WHATSAPP_GRAPH_API_VERSION")
            .unwrap_or_else(|| defaults::DEFAULT_GRAPH_API_VERSION.to_string());
        let graph_base_url = env_opt("WHATSAPP_GRAPH_BASE_URL")
            .unwrap_or_else(|| defaults::DEFAULT_GRAPH_BASE_URL.to_string());

        let lead_defaults = LeadDefaults {
            country: env_opt("WHATSAPP_DEFAULT_LEAD_COUNTRY")
                .unwrap_or_else(|| defaults::DEFAULT_LEAD_COUNTRY.to_string()),
            admin_id: assignee_id("WHATSAPP_DEFAULT_ADMIN_ID")?,
            agent_id: assignee_id("WHATSAPP_DEFAULT_AGENT_ID")?,
        };

        Ok(Self {
            store,
            bind_addr,
            whatsapp,
            graph_api_version,
            graph_base_url,
            app_secret: env_opt("WHATSAPP_APP_SECRET"),
            webhook_verify_token: env_opt("WHATSAPP_WEBHOOK_VERIFY_TOKEN"),
            lead_defaults,
            automation_token: env_opt("CRON_SECRET").or_else(|| env_opt("AUTOMATIONS_RUN_TOKEN")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_assignees_are_unset() {
        std::env::set_var("TEST_ASSIGNEE_PLACEHOLDER", "00000000-0000-0000-0000-000000000002");
        assert_eq!(assignee_id("TEST_ASSIGNEE_PLACEHOLDER").unwrap(), None);
        std::env::remove_var("TEST_ASSIGNEE_PLACEHOLDER");
    }

    #[test]
    fn test_real_assignee_is_kept() {
        let id = Uuid::new_v4();
        std::env::set_var("TEST_ASSIGNEE_REAL", id.to_string());
        assert_eq!(assignee_id("TEST_ASSIGNEE_REAL").unwrap(), Some(id));
        std::env::remove_var("TEST_ASSIGNEE_REAL");
    }

    #[test]
    fn test_malformed_assignee_is_an_error() {
        std::env::set_var("TEST_ASSIGNEE_BAD", "admin");
        assert!(assignee_id("TEST_ASSIGNEE_BAD").is_err());
        std::env::remove_var("TEST_ASSIGNEE_BAD");
    }

    #[test]
    fn test_blank_env_is_none() {
        std::env::set_var("TEST_BLANK_VALUE", "   ");
        assert_eq!(env_opt("TEST_BLANK_VALUE"), None);
        std::env::remove_var("TEST_BLANK_VALUE");
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_memory_backend_needs_no_database() {
        std::env::set_var("STORE_BACKEND", "memory");
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("WHATSAPP_ACCESS_TOKEN");

        let config = Config::from_env().unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert!(config.whatsapp.is_none());
        assert_eq!(config.graph_api_version, "v22.0");

        std::env::remove_var("STORE_BACKEND");
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_cron_secret_takes_precedence() {
        std::env::set_var("STORE_BACKEND", "memory");
        std::env::set_var("CRON_SECRET", "cron");
        std::env::set_var("AUTOMATIONS_RUN_TOKEN", "legacy");

        let config = Config::from_env().unwrap();
        assert_eq!(config.automation_token.as_deref(), Some("cron"));

        std::env::remove_var("CRON_SECRET");
        let config = Config::from_env().unwrap();
        assert_eq!(config.automation_token.as_deref(), Some("legacy"));

        std::env::remove_var("AUTOMATIONS_RUN_TOKEN");
        std::env::remove_var("STORE_BACKEND");
    }
}
