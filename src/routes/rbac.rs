//! RBAC admin endpoints.
//!
//! Roles, catalog permissions, role grants and user bindings. Every
//! modification is permission-checked against the caller's own resolved set,
//! cross-checked by the tenant guard, and logged at Critical severity.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::catalog::{actions, modules};
use crate::authz::guard::{validate_same_tenant, TenantRefs};
use crate::authz::resolver::{load_bindings, require_permission, resolve_permissions, RoleBinding};
use crate::errors::AppError;
use crate::events::{log_activity, log_activity_diff};
use crate::jwt::AuthUser;
use crate::models::rbac::{
    AssignPermissionToRoleRequest, AssignRoleRequest, EffectivePermissions, Permission, Role,
    RoleCreateRequest, RolePermission, UserDepartmentRole, UserRole,
};
use crate::provisioning::ensure_role_permission;
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/permissions", get(list_permissions))
        .route("/roles", get(list_roles).post(create_role))
        .route(
            "/roles/:role_id/permissions",
            get(list_role_permissions).post(assign_permission_to_role),
        )
        .route(
            "/roles/:role_id/permissions/:permission_id",
            delete(revoke_permission_from_role),
        )
        .route("/users/:user_id/roles", get(list_user_roles).post(assign_role_to_user))
        .route("/users/:user_id/roles/:role_id", delete(revoke_role_from_user))
        .route("/users/:user_id/effective-permissions", get(get_effective_permissions))
}

/// List the global permission catalog
#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses((status = 200, description = "Catalog permissions", body = Vec<Permission>)),
    security(("bearerAuth" = []))
)]
async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Permission>>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::ROLE, actions::READ)
        .await?;

    let rows = sqlx::query(
        "SELECT id, module, action, description, created_at, updated_at FROM permissions ORDER BY module, action",
    )
    .fetch_all(&state.pool)
    .await?;

    rows.iter().map(Permission::from_row).collect::<Result<Vec<_>, _>>().map(Json)
}

/// List the caller's tenant's roles
#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    responses((status = 200, description = "Tenant roles", body = Vec<Role>)),
    security(("bearerAuth" = []))
)]
async fn list_roles(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Role>>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::ROLE, actions::READ)
        .await?;

    let rows = sqlx::query(
        "SELECT id, tenant_id, name, description, is_default, is_removable, created_at, updated_at FROM roles WHERE tenant_id = ? ORDER BY name",
    )
    .bind(auth.tenant_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    rows.iter().map(Role::from_row).collect::<Result<Vec<_>, _>>().map(Json)
}

/// Create a tenant-scoped role
#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists in tenant"),
    ),
    security(("bearerAuth" = []))
)]
async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<RoleCreateRequest>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::ROLE, actions::MANAGE)
        .await?;

    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE tenant_id = ? AND name = ?")
        .bind(auth.tenant_id.to_string())
        .bind(&req.name)
        .fetch_one(&state.pool)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict(format!("role already exists: {}", req.name)));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO roles (id, tenant_id, name, description, is_default, is_removable, created_at, updated_at) VALUES (?, ?, ?, ?, 0, 1, ?, ?)",
    )
    .bind(id.to_string())
    .bind(auth.tenant_id.to_string())
    .bind(&req.name)
    .bind(&req.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let role = Role {
        id,
        tenant_id: auth.tenant_id,
        name: req.name,
        description: req.description,
        is_default: false,
        is_removable: true,
        created_at: now,
        updated_at: now,
    };

    log_activity(&state.event_bus, "created", Some(auth.user_id), &role);

    Ok((StatusCode::CREATED, Json(role)))
}

/// List a role's permission grants, explicit denies included
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses((status = 200, description = "Role permission grants", body = Vec<RolePermission>)),
    security(("bearerAuth" = []))
)]
async fn list_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Vec<RolePermission>>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::ROLE, actions::READ)
        .await?;
    let refs = TenantRefs::new().role(role_id);
    validate_same_tenant(&state.pool, &state.event_bus, auth.tenant_id, &refs).await?;

    let rows = sqlx::query(
        "SELECT role_id, permission_id, allowed, created_at FROM role_permissions WHERE role_id = ?",
    )
    .bind(role_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let mut grants = Vec::with_capacity(rows.len());
    for row in &rows {
        use sqlx::Row;
        grants.push(RolePermission {
            role_id: crate::utils::parse_uuid(row.try_get("role_id")?, "role_permissions.role_id")?,
            permission_id: crate::utils::parse_uuid(
                row.try_get("permission_id")?,
                "role_permissions.permission_id",
            )?,
            allowed: row.try_get("allowed")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(Json(grants))
}

/// Grant (or explicitly deny) a catalog permission on a role
#[utoipa::path(
    post,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    request_body = AssignPermissionToRoleRequest,
    responses(
        (status = 200, description = "Grant recorded"),
        (status = 403, description = "Role belongs to another tenant"),
        (status = 404, description = "Permission not in the catalog"),
    ),
    security(("bearerAuth" = []))
)]
async fn assign_permission_to_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
    Json(req): Json<AssignPermissionToRoleRequest>,
) -> Result<Json<RolePermission>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::ROLE, actions::MANAGE)
        .await?;
    let refs = TenantRefs::new().role(role_id);
    validate_same_tenant(&state.pool, &state.event_bus, auth.tenant_id, &refs).await?;

    // The catalog is closed: only permissions synced from it exist in storage
    let known: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM permissions WHERE id = ?")
        .bind(req.permission_id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if known == 0 {
        return Err(AppError::not_found("permission not in the catalog"));
    }

    ensure_role_permission(&state.pool, role_id, req.permission_id, req.allowed).await?;

    let grant = RolePermission {
        role_id,
        permission_id: req.permission_id,
        allowed: req.allowed,
        created_at: utc_now(),
    };
    log_activity(&state.event_bus, "assigned", Some(auth.user_id), &grant);

    Ok(Json(grant))
}

/// Remove a grant from a role entirely
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses(
        (status = 204, description = "Grant removed"),
        (status = 404, description = "No such grant"),
    ),
    security(("bearerAuth" = []))
)]
async fn revoke_permission_from_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::ROLE, actions::MANAGE)
        .await?;
    let refs = TenantRefs::new().role(role_id);
    validate_same_tenant(&state.pool, &state.event_bus, auth.tenant_id, &refs).await?;

    let affected = sqlx::query(
        "DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?",
    )
    .bind(role_id.to_string())
    .bind(permission_id.to_string())
    .execute(&state.pool)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(AppError::not_found("no such grant"));
    }

    let grant = RolePermission {
        role_id,
        permission_id,
        allowed: true,
        created_at: utc_now(),
    };
    log_activity(&state.event_bus, "revoked", Some(auth.user_id), &grant);

    Ok(StatusCode::NO_CONTENT)
}

/// One of a user's role bindings, with its scope
#[derive(Debug, Serialize, ToSchema)]
struct UserRoleBindingView {
    role_id: Uuid,
    /// None for a global binding
    department_id: Option<Uuid>,
}

/// List a user's role bindings through both mechanisms
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses((status = 200, description = "Role bindings")),
    security(("bearerAuth" = []))
)]
async fn list_user_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<UserRoleBindingView>>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::ROLE, actions::READ)
        .await?;
    let refs = TenantRefs::new().user(user_id);
    validate_same_tenant(&state.pool, &state.event_bus, auth.tenant_id, &refs).await?;

    let bindings = load_bindings(&state.pool, user_id, auth.tenant_id).await?;
    let views = bindings
        .into_iter()
        .map(|b| match b {
            RoleBinding::Global { role_id } => UserRoleBindingView {
                role_id,
                department_id: None,
            },
            RoleBinding::Scoped {
                role_id,
                department_id,
            } => UserRoleBindingView {
                role_id,
                department_id: Some(department_id),
            },
        })
        .collect();
    Ok(Json(views))
}

/// Bind a role to a user, globally or scoped to a department
#[utoipa::path(
    post,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User ID")),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role bound"),
        (status = 403, description = "A referenced entity crosses the tenant boundary"),
    ),
    security(("bearerAuth" = []))
)]
async fn assign_role_to_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<StatusCode, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::ROLE, actions::MANAGE)
        .await?;

    // All referenced entities checked together so the caller sees every
    // offending reference at once
    let mut refs = TenantRefs::new().user(user_id).role(req.role_id);
    if let Some(department_id) = req.department_id {
        refs = refs.department(department_id);
    }
    validate_same_tenant(&state.pool, &state.event_bus, auth.tenant_id, &refs).await?;

    let now = utc_now();
    match req.department_id {
        None => {
            sqlx::query(
                "INSERT OR IGNORE INTO user_roles (user_id, role_id, is_default, created_at) VALUES (?, ?, 0, ?)",
            )
            .bind(user_id.to_string())
            .bind(req.role_id.to_string())
            .bind(now)
            .execute(&state.pool)
            .await?;

            let binding = UserRole {
                user_id,
                role_id: req.role_id,
                is_default: false,
                created_at: now,
            };
            log_activity(&state.event_bus, "assigned", Some(auth.user_id), &binding);
        }
        Some(department_id) => {
            sqlx::query(
                "INSERT OR IGNORE INTO user_department_roles (user_id, department_id, role_id, is_primary_department, is_primary_role, is_default, created_at) VALUES (?, ?, ?, 0, 0, 0, ?)",
            )
            .bind(user_id.to_string())
            .bind(department_id.to_string())
            .bind(req.role_id.to_string())
            .bind(now)
            .execute(&state.pool)
            .await?;

            let binding = UserDepartmentRole {
                user_id,
                department_id,
                role_id: req.role_id,
                is_primary_department: false,
                is_primary_role: false,
                is_default: false,
                created_at: now,
            };
            log_activity(&state.event_bus, "assigned", Some(auth.user_id), &binding);
        }
    }

    Ok(StatusCode::CREATED)
}

/// Remove a user's bindings to a role, both global and scoped
#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/roles/{role_id}",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Bindings removed"),
        (status = 404, description = "User holds no such binding"),
    ),
    security(("bearerAuth" = []))
)]
async fn revoke_role_from_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::ROLE, actions::MANAGE)
        .await?;
    let refs = TenantRefs::new().user(user_id).role(role_id);
    validate_same_tenant(&state.pool, &state.event_bus, auth.tenant_id, &refs).await?;

    let global = sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?
        .rows_affected();
    let scoped = sqlx::query("DELETE FROM user_department_roles WHERE user_id = ? AND role_id = ?")
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?
        .rows_affected();

    if global + scoped == 0 {
        return Err(AppError::not_found("user holds no such binding"));
    }

    let binding = UserRole {
        user_id,
        role_id,
        is_default: false,
        created_at: utc_now(),
    };
    log_activity_diff(&state.event_bus, "revoked", Some(auth.user_id), &binding, None);

    Ok(StatusCode::NO_CONTENT)
}

/// Compute a user's effective permission set
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/effective-permissions",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses((status = 200, description = "Effective permissions", body = EffectivePermissions)),
    security(("bearerAuth" = []))
)]
async fn get_effective_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<EffectivePermissions>, AppError> {
    // Users may always inspect their own set
    if user_id != auth.user_id {
        require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::ROLE, actions::READ)
            .await?;
    }

    let permissions = resolve_permissions(&state.pool, user_id, auth.tenant_id).await?;

    let bindings = load_bindings(&state.pool, user_id, auth.tenant_id).await?;
    let mut roles = Vec::new();
    for binding in &bindings {
        let name: String = sqlx::query_scalar("SELECT name FROM roles WHERE id = ?")
            .bind(binding.role_id().to_string())
            .fetch_one(&state.pool)
            .await?;
        if !roles.contains(&name) {
            roles.push(name);
        }
    }
    roles.sort();

    Ok(Json(EffectivePermissions {
        user_id,
        tenant_id: auth.tenant_id,
        roles,
        permissions: permissions.into_iter().collect(),
    }))
}
