//! Runtime configuration rows (`runtime_config` table)

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Loosely typed key/value entry edited from the settings screens.
/// Never passed beyond `services::runtime_config`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfigEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub enabled: bool,
}
