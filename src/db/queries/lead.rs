//! Lead database queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{normalize_phone, Lead, LeadStatus, NewLead};

const LEAD_COLUMNS: &str = r#"
    id, name, phone, phone_normalized, country, status,
    status_changed_at, admin_id, agent_id, created_at, updated_at
"#;

fn status_strings(statuses: &[LeadStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Get a lead by ID
pub async fn get_lead(pool: &PgPool, id: Uuid) -> Result<Option<Lead>> {
    let query = format!("SELECT {} FROM leads WHERE id = $1", LEAD_COLUMNS);
    let lead = sqlx::query_as::<_, Lead>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(lead)
}

/// Find a lead by its digits-only phone (unique index)
pub async fn find_lead_by_phone(pool: &PgPool, phone_normalized: &str) -> Result<Option<Lead>> {
    let query = format!(
        "SELECT {} FROM leads WHERE phone_normalized = $1",
        LEAD_COLUMNS
    );
    let lead = sqlx::query_as::<_, Lead>(&query)
        .bind(phone_normalized)
        .fetch_optional(pool)
        .await?;

    Ok(lead)
}

/// Create a new lead
pub async fn create_lead(pool: &PgPool, lead: &NewLead, at: DateTime<Utc>) -> Result<Lead> {
    let query = format!(
        r#"
        INSERT INTO leads (
            id, name, phone, phone_normalized, country, status,
            status_changed_at, admin_id, agent_id, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $7, $7)
        RETURNING {}
        "#,
        LEAD_COLUMNS
    );
    let created = sqlx::query_as::<_, Lead>(&query)
        .bind(Uuid::new_v4())
        .bind(&lead.name)
        .bind(&lead.phone)
        .bind(normalize_phone(&lead.phone))
        .bind(&lead.country)
        .bind(lead.status.as_str())
        .bind(at)
        .bind(lead.admin_id)
        .bind(lead.agent_id)
        .fetch_one(pool)
        .await?;

    Ok(created)
}

/// List leads currently in any of `statuses`
pub async fn list_leads_by_status(pool: &PgPool, statuses: &[LeadStatus]) -> Result<Vec<Lead>> {
    let query = format!(
        "SELECT {} FROM leads WHERE status = ANY($1) ORDER BY created_at",
        LEAD_COLUMNS
    );
    let leads = sqlx::query_as::<_, Lead>(&query)
        .bind(status_strings(statuses))
        .fetch_all(pool)
        .await?;

    Ok(leads)
}

/// Move a lead to `target` only while it is still in one of `expected`
pub async fn transition_lead_status(
    pool: &PgPool,
    lead_id: Uuid,
    expected: &[LeadStatus],
    target: LeadStatus,
    at: DateTime<Utc>,
) -> Result<Option<Lead>> {
    let query = format!(
        r#"
        UPDATE leads
        SET status = $3, status_changed_at = $4, updated_at = $4
        WHERE id = $1 AND status = ANY($2)
        RETURNING {}
        "#,
        LEAD_COLUMNS
    );
    let lead = sqlx::query_as::<_, Lead>(&query)
        .bind(lead_id)
        .bind(status_strings(expected))
        .bind(target.as_str())
        .bind(at)
        .fetch_optional(pool)
        .await?;

    Ok(lead)
}

/// Append to the lead status ledger
pub async fn insert_status_history(
    pool: &PgPool,
    lead_id: Uuid,
    status: LeadStatus,
    user_id: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO lead_status_history (id, lead_id, status, changed_at, user_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(lead_id)
    .bind(status.as_str())
    .bind(at)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}
