//! Country and profile types used for lead assignment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row in the `countries` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub id: Uuid,
    pub name: String,
    /// ISO 3166-1 alpha-2
    pub code: String,
}

/// Profile roles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Superadmin,
    Admin,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Superadmin => "superadmin",
            Self::Admin => "admin",
            Self::Agent => "agent",
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "superadmin" => Ok(Self::Superadmin),
            "admin" => Ok(Self::Admin),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// User profile with role and country scope
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub email: Option<String>,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub country_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
