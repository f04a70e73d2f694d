#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;
use uuid::Uuid;

use auditflow::events::{init_event_bus, EventBus};
use auditflow::provisioning;
use auditflow::utils::parse_uuid;

/// Temp-file SQLite pool with all migrations applied. The TempDir must stay
/// alive for the pool's lifetime.
pub async fn setup_pool() -> Result<(TempDir, SqlitePool)> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    Ok((dir, pool))
}

pub fn test_bus() -> EventBus {
    init_event_bus().0
}

pub async fn provision(pool: &SqlitePool, domain: &str) -> Result<Uuid> {
    let tenant = provisioning::provision_tenant(pool, domain, domain).await?;
    Ok(tenant.id)
}

pub async fn create_user_with_role(
    pool: &SqlitePool,
    tenant_id: Uuid,
    email: &str,
    role: Option<&str>,
) -> Result<Uuid> {
    let user = provisioning::create_user(pool, tenant_id, email, email, "password123", role).await?;
    Ok(user.id)
}

pub async fn role_id(pool: &SqlitePool, tenant_id: Uuid, name: &str) -> Result<Uuid> {
    let row = sqlx::query("SELECT id FROM roles WHERE tenant_id = ? AND name = ?")
        .bind(tenant_id.to_string())
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(parse_uuid(row.try_get("id")?, "roles.id")?)
}

pub async fn permission_id(pool: &SqlitePool, module: &str, action: &str) -> Result<Uuid> {
    let row = sqlx::query("SELECT id FROM permissions WHERE module = ? AND action = ?")
        .bind(module)
        .bind(action)
        .fetch_one(pool)
        .await?;
    Ok(parse_uuid(row.try_get("id")?, "permissions.id")?)
}

pub async fn create_department(pool: &SqlitePool, tenant_id: Uuid, code: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = auditflow::utils::utc_now();
    sqlx::query(
        "INSERT INTO departments (id, tenant_id, name, code, campus_id, hod_id, created_at, updated_at) VALUES (?, ?, ?, ?, NULL, NULL, ?, ?)",
    )
    .bind(id.to_string())
    .bind(tenant_id.to_string())
    .bind(format!("Department {code}"))
    .bind(code)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn create_finding(
    pool: &SqlitePool,
    tenant_id: Uuid,
    department_id: Uuid,
    created_by: Uuid,
    title: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = auditflow::utils::utc_now();
    sqlx::query(
        r#"
        INSERT INTO audit_findings (id, tenant_id, department_id, audit_program_id, title, description, category, status, created_by, created_at, updated_at)
        VALUES (?, ?, ?, NULL, ?, NULL, NULL, 'PENDING', ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(tenant_id.to_string())
    .bind(department_id.to_string())
    .bind(title)
    .bind(created_by.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn bind_global(pool: &SqlitePool, user_id: Uuid, role: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO user_roles (user_id, role_id, is_default, created_at) VALUES (?, ?, 0, ?)",
    )
    .bind(user_id.to_string())
    .bind(role.to_string())
    .bind(auditflow::utils::utc_now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn bind_scoped(
    pool: &SqlitePool,
    user_id: Uuid,
    department_id: Uuid,
    role: Uuid,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO user_department_roles (user_id, department_id, role_id, is_primary_department, is_primary_role, is_default, created_at) VALUES (?, ?, ?, 0, 0, 0, ?)",
    )
    .bind(user_id.to_string())
    .bind(department_id.to_string())
    .bind(role.to_string())
    .bind(auditflow::utils::utc_now())
    .execute(pool)
    .await?;
    Ok(())
}
