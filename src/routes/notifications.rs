//! Notification inbox endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::catalog::{actions, modules};
use crate::authz::resolver::require_permission;
use crate::errors::AppError;
use crate::jwt::AuthUser;
use crate::models::notification::Notification;
use crate::notify::mark_read;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/:notification_id/read", put(mark_notification_read))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct NotificationFilter {
    /// When true, only unread notifications are returned
    #[serde(default)]
    pub unread_only: bool,
}

/// List the caller's own notifications, newest first
#[utoipa::path(
    get,
    path = "/notifications",
    tag = "Notifications",
    params(NotificationFilter),
    responses((status = 200, description = "Own notifications", body = Vec<Notification>)),
    security(("bearerAuth" = []))
)]
async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(filter): Query<NotificationFilter>,
) -> Result<Json<Vec<Notification>>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::NOTIFICATION, actions::READ)
        .await?;

    let sql = if filter.unread_only {
        "SELECT id, tenant_id, target_user_id, notification_type, title, message, link, metadata, is_read, created_at FROM notifications WHERE target_user_id = ? AND is_read = 0 ORDER BY created_at DESC"
    } else {
        "SELECT id, tenant_id, target_user_id, notification_type, title, message, link, metadata, is_read, created_at FROM notifications WHERE target_user_id = ? ORDER BY created_at DESC"
    };

    let rows = sqlx::query(sql)
        .bind(auth.user_id.to_string())
        .fetch_all(&state.pool)
        .await?;

    rows.iter().map(Notification::from_row).collect::<Result<Vec<_>, _>>().map(Json)
}

/// Mark one of the caller's notifications as read
#[utoipa::path(
    put,
    path = "/notifications/{notification_id}/read",
    tag = "Notifications",
    params(("notification_id" = Uuid, Path, description = "Notification ID")),
    responses(
        (status = 204, description = "Marked read"),
        (status = 404, description = "Not the caller's notification"),
    ),
    security(("bearerAuth" = []))
)]
async fn mark_notification_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(notification_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    mark_read(&state.pool, notification_id, auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
