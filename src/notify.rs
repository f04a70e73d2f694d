//! Notification dispatch.
//!
//! The workflow engine resolves who should hear about a transition and hands
//! off here; actual delivery (email, socket push) is an external collaborator
//! consuming the notification rows. Dispatch is best-effort relative to the
//! workflow: a failed insert is recorded in the report and logged, never
//! propagated into the state transition.

use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::resolver::resolve_recipients;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, EventBus};
use crate::models::notification::Notification;
use crate::utils::utc_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Success,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RecipientOutcome {
    pub user_id: Uuid,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-recipient result report surfaced to operators alongside the workflow
/// response. The acting user never sees dispatch failures as request errors.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DispatchReport {
    pub status: DispatchStatus,
    pub outcomes: Vec<RecipientOutcome>,
}

impl DispatchReport {
    fn from_outcomes(outcomes: Vec<RecipientOutcome>) -> Self {
        let delivered = outcomes.iter().filter(|o| o.delivered).count();
        let status = if outcomes.is_empty() || delivered == 0 {
            DispatchStatus::Failed
        } else if delivered == outcomes.len() {
            DispatchStatus::Success
        } else {
            DispatchStatus::PartialSuccess
        };
        Self { status, outcomes }
    }
}

/// Create one notification record.
#[allow(clippy::too_many_arguments)]
pub async fn notify(
    pool: &SqlitePool,
    event_bus: &EventBus,
    tenant_id: Uuid,
    target_user_id: Uuid,
    notification_type: &str,
    title: &str,
    message: &str,
    link: Option<&str>,
    metadata: Option<&Value>,
) -> AppResult<Notification> {
    let id = Uuid::new_v4();
    let now = utc_now();
    let metadata_text = metadata
        .map(|m| serde_json::to_string(m))
        .transpose()
        .map_err(|e| AppError::internal(format!("unserializable notification metadata: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO notifications (id, tenant_id, target_user_id, notification_type, title, message, link, metadata, is_read, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(tenant_id.to_string())
    .bind(target_user_id.to_string())
    .bind(notification_type)
    .bind(title)
    .bind(message)
    .bind(link)
    .bind(&metadata_text)
    .bind(now)
    .execute(pool)
    .await?;

    let notification = Notification {
        id,
        tenant_id,
        target_user_id,
        notification_type: notification_type.to_string(),
        title: title.to_string(),
        message: message.to_string(),
        link: link.map(String::from),
        metadata: metadata.cloned(),
        is_read: false,
        created_at: now,
    };

    log_activity(event_bus, "created", None, &notification);

    Ok(notification)
}

/// Notify every holder of a role within a tenant, best-effort.
///
/// Never returns Err: recipient-resolution failure or per-recipient insert
/// failure both end up in the report, and the caller's state transition
/// proceeds regardless.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_to_role(
    pool: &SqlitePool,
    event_bus: &EventBus,
    tenant_id: Uuid,
    role_name: &str,
    notification_type: &str,
    title: &str,
    message: &str,
    link: Option<&str>,
    metadata: Option<&Value>,
) -> DispatchReport {
    let recipients = match resolve_recipients(pool, tenant_id, role_name).await {
        Ok(recipients) => recipients,
        Err(err) => {
            tracing::error!(tenant_id = %tenant_id, role = %role_name, error = %err, "recipient resolution failed");
            return DispatchReport::from_outcomes(Vec::new());
        }
    };

    if recipients.is_empty() {
        tracing::warn!(tenant_id = %tenant_id, role = %role_name, "no recipients hold role");
    }

    let mut outcomes = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let result = notify(
            pool,
            event_bus,
            tenant_id,
            recipient.user_id,
            notification_type,
            title,
            message,
            link,
            metadata,
        )
        .await;

        match result {
            Ok(_) => outcomes.push(RecipientOutcome {
                user_id: recipient.user_id,
                delivered: true,
                error: None,
            }),
            Err(err) => {
                tracing::error!(user_id = %recipient.user_id, error = %err, "notification insert failed");
                outcomes.push(RecipientOutcome {
                    user_id: recipient.user_id,
                    delivered: false,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    DispatchReport::from_outcomes(outcomes)
}

/// Mark a notification read by its recipient.
pub async fn mark_read(pool: &SqlitePool, notification_id: Uuid, user_id: Uuid) -> AppResult<()> {
    let affected = sqlx::query(
        "UPDATE notifications SET is_read = 1 WHERE id = ? AND target_user_id = ?",
    )
    .bind(notification_id.to_string())
    .bind(user_id.to_string())
    .execute(pool)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(AppError::not_found("notification not found"));
    }
    Ok(())
}
