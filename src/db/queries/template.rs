//! Message template queries (read-only for the worker)

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::MessageTemplate;

/// Get a template by ID
pub async fn get_template(pool: &PgPool, id: Uuid) -> Result<Option<MessageTemplate>> {
    let template = sqlx::query_as::<_, MessageTemplate>(
        r#"
        SELECT
            id, name, preview, body, send_mode,
            provider_template_name, provider_language_code, variable_defaults
        FROM message_templates
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(template)
}
