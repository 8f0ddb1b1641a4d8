//! Database queries for the `countries` and `profiles` tables.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{Country, Profile, Role};

/// Find a country by its ISO code
pub async fn find_country_by_code(pool: &PgPool, code: &str) -> Result<Option<Country>> {
    let country = sqlx::query_as::<_, Country>(
        r#"SELECT id, name, code FROM countries WHERE upper(code) = upper($1)"#,
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;

    Ok(country)
}

/// Earliest-created profile with `role` in the given country
pub async fn earliest_profile(pool: &PgPool, role: Role, country_id: Uuid) -> Result<Option<Profile>> {
    let profile = sqlx::query_as::<_, Profile>(
        r#"
        SELECT id, email, role, country_id, created_at
        FROM profiles
        WHERE role = $1 AND country_id = $2
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .bind(role.as_str())
    .bind(country_id)
    .fetch_optional(pool)
    .await?;

    Ok(profile)
}
