//! Role/permission provisioning.
//!
//! Idempotent upserts keyed on natural identity: (module, action) for the
//! global catalog, (role_id, permission_id) for grants, (tenant_id, name) for
//! roles. Tenant onboarding and catalog evolution both run through here, so a
//! re-run never duplicates rows and an updated `allowed` flag sticks.

use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::authz::catalog::{self, CATALOG};
use crate::authz::guard::{validate_same_tenant, TenantRefs};
use crate::authz::role_names;
use crate::errors::{AppError, AppResult};
use crate::events::EventBus;
use crate::models::department::Department;
use crate::models::rbac::{Permission, Role};
use crate::models::tenant::Tenant;
use crate::models::user::{DbUser, User};
use crate::utils::{hash_password, utc_now};

/// Idempotent upsert of one catalog permission, keyed on (module, action).
pub async fn ensure_permission(
    pool: &SqlitePool,
    module: &str,
    action: &str,
    description: &str,
) -> AppResult<Permission> {
    let now = utc_now();
    sqlx::query(
        r#"
        INSERT INTO permissions (id, module, action, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (module, action)
        DO UPDATE SET description = excluded.description, updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(module)
    .bind(action)
    .bind(description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let row = sqlx::query(
        "SELECT id, module, action, description, created_at, updated_at FROM permissions WHERE module = ? AND action = ?",
    )
    .bind(module)
    .bind(action)
    .fetch_one(pool)
    .await?;

    Permission::from_row(&row)
}

/// Idempotent upsert of a role-permission grant; an existing pair gets its
/// `allowed` flag updated rather than a duplicate row.
pub async fn ensure_role_permission(
    pool: &SqlitePool,
    role_id: Uuid,
    permission_id: Uuid,
    allowed: bool,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, permission_id, allowed, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (role_id, permission_id)
        DO UPDATE SET allowed = excluded.allowed
        "#,
    )
    .bind(role_id.to_string())
    .bind(permission_id.to_string())
    .bind(allowed)
    .bind(utc_now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Upsert the full static catalog. Run at startup and whenever a release
/// ships new `(module, action)` pairs.
pub async fn sync_catalog(pool: &SqlitePool) -> AppResult<usize> {
    for entry in CATALOG {
        ensure_permission(pool, entry.module, entry.action, entry.description).await?;
    }
    Ok(CATALOG.len())
}

/// Startup check that storage holds no permission outside the static catalog.
/// A stray row means a migration or manual edit introduced a pair no code
/// path will ever grant meaningfully; refuse to boot rather than resolve
/// against it.
pub async fn verify_catalog(pool: &SqlitePool) -> AppResult<()> {
    let rows = sqlx::query("SELECT module, action FROM permissions")
        .fetch_all(pool)
        .await?;

    for row in &rows {
        let module: String = row.try_get("module")?;
        let action: String = row.try_get("action")?;
        if !catalog::is_known(&module, &action) {
            return Err(AppError::configuration(format!(
                "stored permission {module}:{action} is not in the catalog"
            )));
        }
    }
    Ok(())
}

/// Default roles seeded for every tenant, with their catalog grants.
/// SYSTEM_ADMIN receives the entire catalog.
const DEFAULT_ROLE_GRANTS: &[(&str, &str, &[&str])] = &[
    (role_names::SYSTEM_ADMIN, "Tenant administrator", &[]),
    (
        role_names::MR,
        "Management Representative",
        &[
            "auditProgram:create",
            "auditProgram:read",
            "auditProgram:commit",
            "audit:create",
            "audit:read",
            "auditFinding:read",
            "correctiveAction:followUp",
            "document:read",
            "document:apply",
            "notification:read",
        ],
    ),
    (
        role_names::HOD,
        "Head of Department",
        &[
            "auditFinding:read",
            "auditFinding:review",
            "correctiveAction:submit",
            "department:read",
            "document:read",
            "notification:read",
        ],
    ),
    (
        role_names::AUDITOR,
        "Internal auditor",
        &[
            "audit:read",
            "auditFinding:create",
            "auditFinding:read",
            "auditFinding:categorize",
            "correctiveAction:commit",
            "correctiveAction:review",
            "correctiveAction:verify",
            "notification:read",
        ],
    ),
    (
        role_names::PRINCIPAL,
        "Principal",
        &[
            "auditProgram:read",
            "auditProgram:approve",
            "auditFinding:read",
            "document:read",
            "notification:read",
        ],
    ),
    (
        role_names::STAFF,
        "General staff",
        &["auditFinding:read", "document:read", "notification:read"],
    ),
];

async fn ensure_role_tx(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: Uuid,
    name: &str,
    description: &str,
    is_removable: bool,
) -> AppResult<Role> {
    let now = utc_now();
    sqlx::query(
        r#"
        INSERT INTO roles (id, tenant_id, name, description, is_default, is_removable, created_at, updated_at)
        VALUES (?, ?, ?, ?, 1, ?, ?, ?)
        ON CONFLICT (tenant_id, name)
        DO UPDATE SET description = excluded.description, updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(tenant_id.to_string())
    .bind(name)
    .bind(description)
    .bind(is_removable)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    let row = sqlx::query(
        "SELECT id, tenant_id, name, description, is_default, is_removable, created_at, updated_at FROM roles WHERE tenant_id = ? AND name = ?",
    )
    .bind(tenant_id.to_string())
    .bind(name)
    .fetch_one(&mut **tx)
    .await?;

    Role::from_row(&row)
}

async fn permission_id_tx(
    tx: &mut Transaction<'_, Sqlite>,
    module: &str,
    action: &str,
) -> AppResult<Uuid> {
    let row = sqlx::query("SELECT id FROM permissions WHERE module = ? AND action = ?")
        .bind(module)
        .bind(action)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| {
            AppError::internal(format!("catalog permission {module}:{action} not synced"))
        })?;
    crate::utils::parse_uuid(row.try_get("id")?, "permissions.id")
}

/// Create a tenant with its default role set in a single transaction.
/// Safe to re-run for an existing domain only insofar as it fails with a
/// conflict; partial tenants are never observable.
pub async fn provision_tenant(pool: &SqlitePool, name: &str, domain: &str) -> AppResult<Tenant> {
    sync_catalog(pool).await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM tenants WHERE domain = ?")
        .bind(domain)
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Err(AppError::conflict(format!("tenant domain already exists: {domain}")));
    }

    let tenant_id = Uuid::new_v4();
    let now = utc_now();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO tenants (id, name, domain, status, created_at, updated_at) VALUES (?, ?, ?, 'ACTIVE', ?, ?)",
    )
    .bind(tenant_id.to_string())
    .bind(name)
    .bind(domain)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (role_name, description, grants) in DEFAULT_ROLE_GRANTS {
        let role = ensure_role_tx(&mut tx, tenant_id, role_name, description, false).await?;

        if *role_name == role_names::SYSTEM_ADMIN {
            for entry in CATALOG {
                let permission_id = permission_id_tx(&mut tx, entry.module, entry.action).await?;
                grant_tx(&mut tx, role.id, permission_id).await?;
            }
            continue;
        }

        for key in *grants {
            let parsed = catalog::PermissionKey::parse(key)?;
            let permission_id = permission_id_tx(&mut tx, &parsed.module, &parsed.action).await?;
            grant_tx(&mut tx, role.id, permission_id).await?;
        }
    }

    tx.commit().await?;

    tracing::info!(tenant_id = %tenant_id, domain = %domain, "tenant provisioned");

    let row = sqlx::query(
        "SELECT id, name, domain, status, created_at, updated_at FROM tenants WHERE id = ?",
    )
    .bind(tenant_id.to_string())
    .fetch_one(pool)
    .await?;
    Tenant::from_row(&row)
}

async fn grant_tx(
    tx: &mut Transaction<'_, Sqlite>,
    role_id: Uuid,
    permission_id: Uuid,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, permission_id, allowed, created_at)
        VALUES (?, ?, 1, ?)
        ON CONFLICT (role_id, permission_id) DO UPDATE SET allowed = excluded.allowed
        "#,
    )
    .bind(role_id.to_string())
    .bind(permission_id.to_string())
    .bind(utc_now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Create a user in a tenant, optionally bound to one of the tenant's roles
/// by name. User creation plus binding is one transaction.
pub async fn create_user(
    pool: &SqlitePool,
    tenant_id: Uuid,
    name: &str,
    email: &str,
    password: &str,
    role_name: Option<&str>,
) -> AppResult<User> {
    let taken: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ? AND deleted_at IS NULL")
            .bind(email)
            .fetch_one(pool)
            .await?;
    if taken > 0 {
        return Err(AppError::conflict("email already in use"));
    }

    let password_hash = hash_password(password)?;
    let user_id = Uuid::new_v4();
    let now = utc_now();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, tenant_id, name, email, password_hash, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(tenant_id.to_string())
    .bind(name)
    .bind(email)
    .bind(&password_hash)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if let Some(role_name) = role_name {
        // role is looked up by (tenant, name), so the binding cannot cross tenants
        let row = sqlx::query("SELECT id FROM roles WHERE tenant_id = ? AND name = ?")
            .bind(tenant_id.to_string())
            .bind(role_name)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("role {role_name} not found in tenant {tenant_id}"))
            })?;
        let role_id = crate::utils::parse_uuid(row.try_get("id")?, "roles.id")?;

        sqlx::query(
            "INSERT OR IGNORE INTO user_roles (user_id, role_id, is_default, created_at) VALUES (?, ?, 1, ?)",
        )
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let row = sqlx::query(
        "SELECT id, tenant_id, name, email, password_hash, created_at, updated_at, deleted_at FROM users WHERE id = ?",
    )
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(DbUser::from_row(&row)?.into())
}

/// Swap a department's HOD atomically: the previous holder loses the scoped
/// HOD binding in the same transaction that grants the new one, so a
/// half-applied swap is never observable.
pub async fn reassign_hod(
    pool: &SqlitePool,
    event_bus: &EventBus,
    tenant_id: Uuid,
    department_id: Uuid,
    new_hod_id: Uuid,
) -> AppResult<Department> {
    let refs = TenantRefs::new().department(department_id).user(new_hod_id);
    validate_same_tenant(pool, event_bus, tenant_id, &refs).await?;

    let hod_role = sqlx::query("SELECT id FROM roles WHERE tenant_id = ? AND name = ?")
        .bind(tenant_id.to_string())
        .bind(role_names::HOD)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("HOD role not provisioned for tenant"))?;
    let hod_role_id = crate::utils::parse_uuid(hod_role.try_get("id")?, "roles.id")?;

    let now = utc_now();
    let mut tx = pool.begin().await?;

    let dept_row = sqlx::query("SELECT hod_id FROM departments WHERE id = ?")
        .bind(department_id.to_string())
        .fetch_one(&mut *tx)
        .await?;
    let previous: Option<String> = dept_row.try_get("hod_id")?;

    if let Some(previous) = previous {
        sqlx::query(
            "DELETE FROM user_department_roles WHERE user_id = ? AND department_id = ? AND role_id = ?",
        )
        .bind(&previous)
        .bind(department_id.to_string())
        .bind(hod_role_id.to_string())
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE departments SET hod_id = ?, updated_at = ? WHERE id = ?")
        .bind(new_hod_id.to_string())
        .bind(now)
        .bind(department_id.to_string())
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO user_department_roles (user_id, department_id, role_id, is_primary_department, is_primary_role, is_default, created_at)
        VALUES (?, ?, ?, 1, 1, 0, ?)
        ON CONFLICT (user_id, department_id, role_id) DO NOTHING
        "#,
    )
    .bind(new_hod_id.to_string())
    .bind(department_id.to_string())
    .bind(hod_role_id.to_string())
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let row = sqlx::query(
        "SELECT id, tenant_id, name, code, campus_id, hod_id, created_at, updated_at FROM departments WHERE id = ?",
    )
    .bind(department_id.to_string())
    .fetch_one(pool)
    .await?;
    Department::from_row(&row)
}
