//! Effective-permission resolution.
//!
//! A user's permissions are the union over every role binding, global and
//! department-scoped alike, of the role's `allowed = true` permission rows,
//! minus any permission carrying an explicit `allowed = false` row on any
//! bound role. Explicit deny always wins over allow.
//!
//! Department scoping constrains where a role applies organizationally; it
//! does not narrow the permission check itself. The department id is kept on
//! the binding so a scoped check can be introduced without reshaping storage.

use std::collections::BTreeSet;

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::utils::parse_uuid;

/// One role binding, either mechanism. The resolver folds over both variants
/// uniformly; nothing downstream is allowed to query the two binding tables
/// separately (recipient resolution once dropped globally-bound holders by
/// reading only the scoped table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleBinding {
    Global { role_id: Uuid },
    Scoped { role_id: Uuid, department_id: Uuid },
}

impl RoleBinding {
    pub fn role_id(&self) -> Uuid {
        match self {
            RoleBinding::Global { role_id } => *role_id,
            RoleBinding::Scoped { role_id, .. } => *role_id,
        }
    }
}

/// Verify the user exists and belongs to the claimed tenant.
async fn ensure_user_in_tenant(pool: &SqlitePool, user_id: Uuid, tenant_id: Uuid) -> AppResult<()> {
    let row = sqlx::query("SELECT tenant_id FROM users WHERE id = ? AND deleted_at IS NULL")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    let actual = parse_uuid(row.try_get("tenant_id")?, "users.tenant_id")?;
    if actual != tenant_id {
        return Err(AppError::tenant_mismatch(format!(
            "user {user_id} belongs to tenant {actual}, not {tenant_id}"
        )));
    }
    Ok(())
}

/// Load every role binding the user holds within the tenant. Roles from other
/// tenants are filtered out at the join; a binding that crosses tenants can
/// only exist if it predates the isolation guard, and it must never grant.
pub async fn load_bindings(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<Vec<RoleBinding>> {
    let mut bindings = Vec::new();

    let global_rows = sqlx::query(
        r#"
        SELECT ur.role_id
        FROM user_roles ur
        INNER JOIN roles r ON r.id = ur.role_id
        WHERE ur.user_id = ? AND r.tenant_id = ?
        "#,
    )
    .bind(user_id.to_string())
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await?;

    for row in &global_rows {
        bindings.push(RoleBinding::Global {
            role_id: parse_uuid(row.try_get("role_id")?, "user_roles.role_id")?,
        });
    }

    let scoped_rows = sqlx::query(
        r#"
        SELECT udr.role_id, udr.department_id
        FROM user_department_roles udr
        INNER JOIN roles r ON r.id = udr.role_id
        WHERE udr.user_id = ? AND r.tenant_id = ?
        "#,
    )
    .bind(user_id.to_string())
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await?;

    for row in &scoped_rows {
        bindings.push(RoleBinding::Scoped {
            role_id: parse_uuid(row.try_get("role_id")?, "user_department_roles.role_id")?,
            department_id: parse_uuid(
                row.try_get("department_id")?,
                "user_department_roles.department_id",
            )?,
        });
    }

    Ok(bindings)
}

/// Compute the effective `module:action` set for a user.
///
/// Pure read; fails with `NotFound` for a missing user and `TenantMismatch`
/// when the claimed tenant is not the user's own.
pub async fn resolve_permissions(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<BTreeSet<String>> {
    ensure_user_in_tenant(pool, user_id, tenant_id).await?;

    let bindings = load_bindings(pool, user_id, tenant_id).await?;
    let role_ids: BTreeSet<Uuid> = bindings.iter().map(|b| b.role_id()).collect();

    let mut allowed: BTreeSet<String> = BTreeSet::new();
    let mut denied: BTreeSet<String> = BTreeSet::new();

    for role_id in &role_ids {
        let rows = sqlx::query(
            r#"
            SELECT p.module, p.action, rp.allowed
            FROM role_permissions rp
            INNER JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ?
            "#,
        )
        .bind(role_id.to_string())
        .fetch_all(pool)
        .await?;

        for row in &rows {
            let module: String = row.try_get("module")?;
            let action: String = row.try_get("action")?;
            let is_allowed: bool = row.try_get("allowed")?;
            let key = format!("{module}:{action}");
            if is_allowed {
                allowed.insert(key);
            } else {
                denied.insert(key);
            }
        }
    }

    // Explicit deny on any bound role overrides allows from every other role
    Ok(allowed.difference(&denied).cloned().collect())
}

/// Thin membership wrapper over `resolve_permissions`.
pub async fn has_permission(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
    module: &str,
    action: &str,
) -> AppResult<bool> {
    let permissions = resolve_permissions(pool, user_id, tenant_id).await?;
    let key = format!("{module}:{action}");
    let granted = permissions.contains(&key);
    if !granted {
        tracing::debug!(user_id = %user_id, tenant_id = %tenant_id, permission = %key, "permission denied");
    }
    Ok(granted)
}

/// Resolve-or-reject helper for route handlers.
pub async fn require_permission(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
    module: &str,
    action: &str,
) -> AppResult<()> {
    if has_permission(pool, user_id, tenant_id, module, action).await? {
        Ok(())
    } else {
        Err(AppError::permission_denied(format!("{module}:{action}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
}

/// Every user holding the named role within the tenant, through either
/// binding mechanism, deduplicated.
pub async fn resolve_recipients(
    pool: &SqlitePool,
    tenant_id: Uuid,
    role_name: &str,
) -> AppResult<Vec<Recipient>> {
    let rows = sqlx::query(
        r#"
        SELECT u.id AS id, u.name AS name, u.email AS email
        FROM users u
        INNER JOIN user_roles ur ON ur.user_id = u.id
        INNER JOIN roles r ON r.id = ur.role_id
        WHERE r.tenant_id = ? AND r.name = ? AND u.tenant_id = ? AND u.deleted_at IS NULL
        UNION
        SELECT u.id AS id, u.name AS name, u.email AS email
        FROM users u
        INNER JOIN user_department_roles udr ON udr.user_id = u.id
        INNER JOIN roles r ON r.id = udr.role_id
        WHERE r.tenant_id = ? AND r.name = ? AND u.tenant_id = ? AND u.deleted_at IS NULL
        ORDER BY name
        "#,
    )
    .bind(tenant_id.to_string())
    .bind(role_name)
    .bind(tenant_id.to_string())
    .bind(tenant_id.to_string())
    .bind(role_name)
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut recipients = Vec::with_capacity(rows.len());
    for row in &rows {
        recipients.push(Recipient {
            user_id: parse_uuid(row.try_get("id")?, "users.id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
        });
    }
    Ok(recipients)
}
