//! Task types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Task status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Overdue,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Overdue => "overdue",
            Self::Canceled => "canceled",
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "overdue" => Ok(Self::Overdue),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// Task entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub agent_id: Uuid,
    pub title: String,
    pub task_type: String,
    pub description: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Insert payload for a task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub lead_id: Uuid,
    pub agent_id: Uuid,
    pub title: String,
    pub task_type: String,
    pub description: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

/// One row of the append-only task history
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TaskHistory {
    pub id: Uuid,
    pub task_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub changed_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub comment: Option<String>,
}
