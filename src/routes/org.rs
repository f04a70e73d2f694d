//! Organizational structure endpoints: campuses, departments, users.
//!
//! Department/HOD wiring is where role bindings meet org structure, so these
//! handlers lean on the tenant guard for every cross-entity reference.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::catalog::{actions, modules};
use crate::authz::guard::{validate_same_tenant, TenantRefs};
use crate::authz::resolver::require_permission;
use crate::errors::AppError;
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::department::{Campus, Department, DepartmentCreateRequest};
use crate::models::user::User;
use crate::provisioning::{create_user, reassign_hod};
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/campuses", get(list_campuses).post(create_campus))
        .route("/departments", get(list_departments).post(create_department))
        .route("/departments/:department_id/hod", put(put_department_hod))
        .route("/users", get(list_users).post(create_tenant_user))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CampusCreateRequest {
    #[schema(example = "Main Campus")]
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReassignHodRequest {
    pub hod_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserCreateRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    /// Name of a tenant role to bind globally at creation, e.g. "AUDITOR"
    pub role_name: Option<String>,
}

#[utoipa::path(
    get,
    path = "/org/campuses",
    tag = "Org",
    responses((status = 200, description = "Tenant campuses", body = Vec<Campus>)),
    security(("bearerAuth" = []))
)]
async fn list_campuses(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Campus>>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::DEPARTMENT, actions::READ)
        .await?;

    let rows = sqlx::query(
        "SELECT id, tenant_id, name, created_at, updated_at FROM campuses WHERE tenant_id = ? ORDER BY name",
    )
    .bind(auth.tenant_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    rows.iter().map(Campus::from_row).collect::<Result<Vec<_>, _>>().map(Json)
}

#[utoipa::path(
    post,
    path = "/org/campuses",
    tag = "Org",
    request_body = CampusCreateRequest,
    responses((status = 201, description = "Campus created", body = Campus)),
    security(("bearerAuth" = []))
)]
async fn create_campus(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CampusCreateRequest>,
) -> Result<(StatusCode, Json<Campus>), AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::DEPARTMENT, actions::MANAGE)
        .await?;

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO campuses (id, tenant_id, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(auth.tenant_id.to_string())
    .bind(&req.name)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let campus = Campus {
        id,
        tenant_id: auth.tenant_id,
        name: req.name,
        created_at: now,
        updated_at: now,
    };
    Ok((StatusCode::CREATED, Json(campus)))
}

#[utoipa::path(
    get,
    path = "/org/departments",
    tag = "Org",
    responses((status = 200, description = "Tenant departments", body = Vec<Department>)),
    security(("bearerAuth" = []))
)]
async fn list_departments(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Department>>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::DEPARTMENT, actions::READ)
        .await?;

    let rows = sqlx::query(
        "SELECT id, tenant_id, name, code, campus_id, hod_id, created_at, updated_at FROM departments WHERE tenant_id = ? ORDER BY code",
    )
    .bind(auth.tenant_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    rows.iter().map(Department::from_row).collect::<Result<Vec<_>, _>>().map(Json)
}

#[utoipa::path(
    post,
    path = "/org/departments",
    tag = "Org",
    request_body = DepartmentCreateRequest,
    responses(
        (status = 201, description = "Department created", body = Department),
        (status = 403, description = "Campus belongs to another tenant"),
        (status = 409, description = "Department code already used in tenant"),
    ),
    security(("bearerAuth" = []))
)]
async fn create_department(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<DepartmentCreateRequest>,
) -> Result<(StatusCode, Json<Department>), AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::DEPARTMENT, actions::MANAGE)
        .await?;

    if let Some(campus_id) = req.campus_id {
        let refs = TenantRefs::new().campus(campus_id);
        validate_same_tenant(&state.pool, &state.event_bus, auth.tenant_id, &refs).await?;
    }

    let taken: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM departments WHERE tenant_id = ? AND code = ?")
            .bind(auth.tenant_id.to_string())
            .bind(&req.code)
            .fetch_one(&state.pool)
            .await?;
    if taken > 0 {
        return Err(AppError::conflict(format!("department code already used: {}", req.code)));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO departments (id, tenant_id, name, code, campus_id, hod_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, NULL, ?, ?)",
    )
    .bind(id.to_string())
    .bind(auth.tenant_id.to_string())
    .bind(&req.name)
    .bind(&req.code)
    .bind(req.campus_id.map(|c| c.to_string()))
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let department = Department {
        id,
        tenant_id: auth.tenant_id,
        name: req.name,
        code: req.code,
        campus_id: req.campus_id,
        hod_id: None,
        created_at: now,
        updated_at: now,
    };

    log_activity(&state.event_bus, "created", Some(auth.user_id), &department);

    Ok((StatusCode::CREATED, Json(department)))
}

/// Assign or swap the department's Head of Department.
#[utoipa::path(
    put,
    path = "/org/departments/{department_id}/hod",
    tag = "Org",
    params(("department_id" = Uuid, Path, description = "Department ID")),
    request_body = ReassignHodRequest,
    responses(
        (status = 200, description = "HOD reassigned", body = Department),
        (status = 403, description = "Department or user crosses the tenant boundary"),
    ),
    security(("bearerAuth" = []))
)]
async fn put_department_hod(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(department_id): Path<Uuid>,
    Json(req): Json<ReassignHodRequest>,
) -> Result<Json<Department>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::DEPARTMENT, actions::MANAGE)
        .await?;

    let department = reassign_hod(
        &state.pool,
        &state.event_bus,
        auth.tenant_id,
        department_id,
        req.hod_id,
    )
    .await?;

    log_activity(&state.event_bus, "updated", Some(auth.user_id), &department);

    Ok(Json(department))
}

#[utoipa::path(
    get,
    path = "/org/users",
    tag = "Org",
    responses((status = 200, description = "Tenant users", body = Vec<User>)),
    security(("bearerAuth" = []))
)]
async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<User>>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::USER, actions::READ)
        .await?;

    let rows = sqlx::query(
        "SELECT id, tenant_id, name, email, password_hash, created_at, updated_at, deleted_at FROM users WHERE tenant_id = ? AND deleted_at IS NULL ORDER BY name",
    )
    .bind(auth.tenant_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let users = rows
        .iter()
        .map(|r| crate::models::user::DbUser::from_row(r).map(User::from))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(users))
}

/// Create a user in the caller's tenant, optionally pre-bound to a role.
#[utoipa::path(
    post,
    path = "/org/users",
    tag = "Org",
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Email already in use"),
    ),
    security(("bearerAuth" = []))
)]
async fn create_tenant_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UserCreateRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::USER, actions::MANAGE)
        .await?;

    let user = create_user(
        &state.pool,
        auth.tenant_id,
        &req.name,
        &req.email,
        &req.password,
        req.role_name.as_deref(),
    )
    .await?;

    log_activity(&state.event_bus, "created", Some(auth.user_id), &user);

    Ok((StatusCode::CREATED, Json(user)))
}
