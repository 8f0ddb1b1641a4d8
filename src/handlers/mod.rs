//! HTTP handlers

pub mod automations;
pub mod ping;
pub mod send;
pub mod webhook;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::services::automations::AutomationRunner;
use crate::services::outbound::OutboundService;
use crate::services::webhook::WebhookProcessor;
use crate::services::whatsapp_provider::WhatsAppProvider;
use crate::store::CrmStore;
use crate::types::ErrorResponse;

/// Shared state for every handler
pub struct AppState {
    pub outbound: OutboundService,
    pub webhook: WebhookProcessor,
    pub automations: AutomationRunner,
    pub app_secret: Option<String>,
    pub webhook_verify_token: Option<String>,
    pub automation_token: Option<String>,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn CrmStore>,
        provider: Option<Arc<dyn WhatsAppProvider>>,
    ) -> Self {
        Self {
            outbound: OutboundService::new(store.clone(), provider, config.graph_api_version.clone()),
            webhook: WebhookProcessor::new(store.clone(), config.lead_defaults.clone()),
            automations: AutomationRunner::new(store),
            app_secret: config.app_secret.clone(),
            webhook_verify_token: config.webhook_verify_token.clone(),
            automation_token: config.automation_token.clone(),
        }
    }
}

/// JSON error body with status
pub(crate) fn error_response(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping::ping))
        .route("/webhook", get(webhook::verify).post(webhook::receive))
        .route("/send", post(send::send_message))
        .route("/automations/run", get(automations::run).post(automations::run))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl+C
pub async fn serve(config: &Config, state: Arc<AppState>) -> Result<()> {
    if state.app_secret.is_none() {
        warn!("WHATSAPP_APP_SECRET is not set, webhook deliveries are accepted unsigned");
    }
    if state.automation_token.is_none() {
        warn!("CRON_SECRET / AUTOMATIONS_RUN_TOKEN is not set, /automations/run is open");
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::StoreBackend;
    use crate::services::lead_provisioning::LeadDefaults;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    pub fn config() -> Config {
        Config {
            store: StoreBackend::Memory,
            bind_addr: "127.0.0.1:0".into(),
            whatsapp: None,
            graph_api_version: "v22.0".into(),
            graph_base_url: "http://localhost".into(),
            app_secret: None,
            webhook_verify_token: None,
            lead_defaults: LeadDefaults::default(),
            automation_token: None,
        }
    }

    pub fn app(
        config: &Config,
        store: Arc<MemoryStore>,
        provider: Option<Arc<dyn WhatsAppProvider>>,
    ) -> Router {
        router(Arc::new(AppState::new(config, store, provider)))
    }

    pub async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }
}
