//! Task database queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{NewTask, Task, TaskStatus};

const TASK_COLUMNS: &str = r#"
    id, lead_id, agent_id, title, task_type, description,
    scheduled_at, status, created_at, completed_at
"#;

/// Whether the lead has any pending task
pub async fn has_pending_task(pool: &PgPool, lead_id: Uuid) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM tasks WHERE lead_id = $1 AND status = 'pending')",
    )
    .bind(lead_id)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

/// Create a pending task. Returns `None` if the lead already has a pending
/// task of the same type (partial unique index).
pub async fn create_task(pool: &PgPool, task: &NewTask, at: DateTime<Utc>) -> Result<Option<Task>> {
    let query = format!(
        r#"
        INSERT INTO tasks (
            id, lead_id, agent_id, title, task_type, description,
            scheduled_at, status, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8)
        ON CONFLICT (lead_id, task_type) WHERE status = 'pending' DO NOTHING
        RETURNING {}
        "#,
        TASK_COLUMNS
    );
    let created = sqlx::query_as::<_, Task>(&query)
        .bind(Uuid::new_v4())
        .bind(task.lead_id)
        .bind(task.agent_id)
        .bind(&task.title)
        .bind(&task.task_type)
        .bind(&task.description)
        .bind(task.scheduled_at)
        .bind(at)
        .fetch_optional(pool)
        .await?;

    Ok(created)
}

/// Cancel all pending tasks of a lead
pub async fn cancel_pending_tasks(pool: &PgPool, lead_id: Uuid) -> Result<Vec<Task>> {
    let query = format!(
        r#"
        UPDATE tasks
        SET status = 'canceled', completed_at = NULL
        WHERE lead_id = $1 AND status = 'pending'
        RETURNING {}
        "#,
        TASK_COLUMNS
    );
    let canceled = sqlx::query_as::<_, Task>(&query)
        .bind(lead_id)
        .fetch_all(pool)
        .await?;

    Ok(canceled)
}

/// Append to the task history
pub async fn insert_task_history(
    pool: &PgPool,
    task_id: Uuid,
    status: TaskStatus,
    user_id: Uuid,
    comment: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO task_history (id, task_id, status, changed_at, user_id, comment)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(task_id)
    .bind(status.as_str())
    .bind(at)
    .bind(user_id)
    .bind(comment)
    .execute(pool)
    .await?;

    Ok(())
}
