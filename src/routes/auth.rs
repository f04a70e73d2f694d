//! Authentication endpoints.
//!
//! Registration binds the new user into the tenant owning the supplied
//! domain, with the default STAFF role. The issued token carries both the
//! user id and the tenant id; every downstream permission and isolation
//! check starts from that pair.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use sqlx::Row;

use crate::app::AppState;
use crate::authz::role_names;
use crate::errors::AppError;
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::user::{AuthResponse, DbUser, LoginRequest, RegisterRequest, User};
use crate::provisioning::create_user;
use crate::utils::{parse_uuid, verify_password};

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 404, description = "Unknown tenant domain"),
        (status = 409, description = "Email already in use"),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let tenant_row = sqlx::query("SELECT id FROM tenants WHERE domain = ? AND status = 'ACTIVE'")
        .bind(&req.tenant_domain)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("no active tenant for that domain"))?;
    let tenant_id = parse_uuid(tenant_row.try_get("id")?, "tenants.id")?;

    let user = create_user(
        &state.pool,
        tenant_id,
        &req.name,
        &req.email,
        &req.password,
        Some(role_names::STAFF),
    )
    .await?;

    log_activity(&state.event_bus, "created", Some(user.id), &user);

    let token = state.jwt.encode(user.id, tenant_id)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let row = sqlx::query(
        "SELECT id, tenant_id, name, email, password_hash, created_at, updated_at, deleted_at FROM users WHERE email = ? AND deleted_at IS NULL",
    )
    .bind(&req.email)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    let db_user = DbUser::from_row(&row)?;
    if !verify_password(&req.password, &db_user.password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let token = state.jwt.encode(db_user.id, db_user.tenant_id)?;
    Ok(Json(AuthResponse {
        token,
        user: db_user.into(),
    }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Missing or invalid token"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<Json<User>, AppError> {
    let row = sqlx::query(
        "SELECT id, tenant_id, name, email, password_hash, created_at, updated_at, deleted_at FROM users WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(auth.user_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))?;

    Ok(Json(DbUser::from_row(&row)?.into()))
}
