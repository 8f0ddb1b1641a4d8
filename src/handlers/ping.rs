//! Ping handler for health checks

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct PongResponse {
    message: String,
    timestamp: String,
}

pub async fn ping() -> Json<PongResponse> {
    Json(PongResponse {
        message: "Pong".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
