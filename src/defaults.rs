use uuid::Uuid;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_GRAPH_API_VERSION: &str = "v22.0";
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_LEAD_COUNTRY: &str = "Undefined";
pub const DEFAULT_LOGS_DIR: &str = "./logs";

/// Sample values shipped in `.env` templates; never real profiles
pub const PLACEHOLDER_ADMIN_ID: Uuid = Uuid::from_u128(1);
pub const PLACEHOLDER_AGENT_ID: Uuid = Uuid::from_u128(2);

pub fn is_placeholder_id(id: &Uuid) -> bool {
    *id == PLACEHOLDER_ADMIN_ID || *id == PLACEHOLDER_AGENT_ID
}
