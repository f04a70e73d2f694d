use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::Loggable;
use crate::utils::parse_uuid;

/// A notification record consumed by the external delivery layer
/// (email/socket). The workflow only guarantees the record exists.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub target_user_id: Uuid,
    #[schema(example = "CORRECTION_REQUIREMENT_COMMITTED")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    /// Correlation ids and step context for the delivery layer
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_row(row: &SqliteRow) -> Result<Self, AppError> {
        let metadata: Option<String> = row.try_get("metadata")?;
        Ok(Notification {
            id: parse_uuid(row.try_get("id")?, "notifications.id")?,
            tenant_id: parse_uuid(row.try_get("tenant_id")?, "notifications.tenant_id")?,
            target_user_id: parse_uuid(
                row.try_get("target_user_id")?,
                "notifications.target_user_id",
            )?,
            notification_type: row.try_get("notification_type")?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            link: row.try_get("link")?,
            metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
            is_read: row.try_get("is_read")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl Loggable for Notification {
    fn entity_type() -> &'static str {
        "notification"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn tenant_id(&self) -> Option<Uuid> {
        Some(self.tenant_id)
    }
}
