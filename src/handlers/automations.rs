//! GET|POST /automations/run: scheduler entry point for the sweeps

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use super::{error_response, AppState};
use crate::services::automations::{AutomationReport, AutomationTarget};
use crate::types::ErrorResponse;

pub const TOKEN_HEADER: &str = "x-automation-token";

/// Token from `x-automation-token`, else `Authorization: Bearer <token>`
fn presented_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = auth.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Compare fixed-size digests so timing does not leak the token length or prefix
fn tokens_match(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn is_authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    match expected {
        None => {
            warn!("Automation run without a configured token");
            true
        }
        Some(expected) => presented_token(headers)
            .map(|t| tokens_match(&t, expected))
            .unwrap_or(false),
    }
}

fn result_value(target: AutomationTarget, report: AutomationReport) -> Value {
    match target {
        AutomationTarget::NoResponse => json!(report.no_response),
        AutomationTarget::SlaClose => json!(report.sla_close),
        AutomationTarget::All => json!(report),
    }
}

pub async fn run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !is_authorized(&headers, state.automation_token.as_deref()) {
        warn!("Automation run rejected: bad or missing token");
        return error_response(StatusCode::UNAUTHORIZED, ErrorResponse::new("Unauthorized"));
    }

    let raw_target = params.get("target").map(String::as_str).unwrap_or("all");
    let target: AutomationTarget = match raw_target.parse() {
        Ok(t) => t,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, ErrorResponse::new(e.to_string())),
    };

    info!(target = target.as_str(), "Running automations");
    match state.automations.run(target).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "target": target.as_str(),
                "result": result_value(target, report),
            })),
        )
            .into_response(),
        Err(e) => {
            error!(target = target.as_str(), "Automation run failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, call, config};
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_presented_token_sources() {
        assert_eq!(presented_token(&headers(&[(TOKEN_HEADER, "abc")])).as_deref(), Some("abc"));
        assert_eq!(
            presented_token(&headers(&[("authorization", "Bearer abc")])).as_deref(),
            Some("abc")
        );
        assert_eq!(
            presented_token(&headers(&[("authorization", "bearer  abc ")])).as_deref(),
            Some("abc")
        );
        assert_eq!(presented_token(&headers(&[("authorization", "Basic abc")])), None);
        assert_eq!(presented_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cre", "s3cret"));
        assert!(!tokens_match("", "s3cret"));
    }

    #[test]
    fn test_open_when_no_token_configured() {
        assert!(is_authorized(&HeaderMap::new(), None));
        assert!(!is_authorized(&HeaderMap::new(), Some("t")));
    }

    #[tokio::test]
    async fn test_run_requires_token() {
        let mut cfg = config();
        cfg.automation_token = Some("cron".into());
        let app = app(&cfg, Arc::new(MemoryStore::new()), None);

        let (status, body) = call(
            &app,
            Request::post("/automations/run").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");

        let (status, body) = call(
            &app,
            Request::get("/automations/run")
                .header("authorization", "Bearer cron")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target"], "all");
        assert!(body["result"]["noResponse"].is_object());
        assert!(body["result"]["slaClose"].is_object());
    }

    #[tokio::test]
    async fn test_single_target_and_unknown_target() {
        let app = app(&config(), Arc::new(MemoryStore::new()), None);

        let (status, body) = call(
            &app,
            Request::post("/automations/run?target=no-response")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target"], "no-response");
        assert_eq!(body["result"]["evaluatedLeads"], 0);

        let (status, _) = call(
            &app,
            Request::post("/automations/run?target=weekly")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
