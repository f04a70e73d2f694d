mod common;

use anyhow::Result;

use auditflow::authz::role_names;
use auditflow::authz::CATALOG;
use auditflow::errors::AppError;
use auditflow::provisioning::{
    ensure_permission, ensure_role_permission, provision_tenant, sync_catalog, verify_catalog,
};
use auditflow::utils::utc_now;

use common::*;

#[tokio::test]
async fn catalog_sync_is_idempotent() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;

    let first = sync_catalog(&pool).await?;
    let second = sync_catalog(&pool).await?;
    assert_eq!(first, second);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM permissions").fetch_one(&pool).await?;
    assert_eq!(count as usize, CATALOG.len());
    verify_catalog(&pool).await?;
    Ok(())
}

#[tokio::test]
async fn ensure_permission_updates_in_place() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;

    let v1 = ensure_permission(&pool, "auditFinding", "read", "old text").await?;
    let v2 = ensure_permission(&pool, "auditFinding", "read", "new text").await?;

    assert_eq!(v1.id, v2.id, "upsert must not mint a new id");
    assert_eq!(v2.description.as_deref(), Some("new text"));
    Ok(())
}

#[tokio::test]
async fn ensure_role_permission_flips_allowed_without_duplicating() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let tenant = provision(&pool, "alpha.example").await?;
    let staff = role_id(&pool, tenant, role_names::STAFF).await?;
    let perm = permission_id(&pool, "auditFinding", "read").await?;

    ensure_role_permission(&pool, staff, perm, false).await?;
    ensure_role_permission(&pool, staff, perm, true).await?;

    let rows = sqlx::query("SELECT allowed FROM role_permissions WHERE role_id = ? AND permission_id = ?")
        .bind(staff.to_string())
        .bind(perm.to_string())
        .fetch_all(&pool)
        .await?;
    assert_eq!(rows.len(), 1);
    use sqlx::Row;
    let allowed: bool = rows[0].try_get("allowed")?;
    assert!(allowed);
    Ok(())
}

#[tokio::test]
async fn provisioning_seeds_default_roles_with_grants() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let tenant = provision(&pool, "alpha.example").await?;

    for name in [
        role_names::SYSTEM_ADMIN,
        role_names::MR,
        role_names::HOD,
        role_names::AUDITOR,
        role_names::PRINCIPAL,
        role_names::STAFF,
    ] {
        role_id(&pool, tenant, name).await?;
    }

    // SYSTEM_ADMIN holds the entire catalog
    let admin = role_id(&pool, tenant, role_names::SYSTEM_ADMIN).await?;
    let grants: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM role_permissions WHERE role_id = ? AND allowed = 1")
        .bind(admin.to_string())
        .fetch_one(&pool)
        .await?;
    assert_eq!(grants as usize, CATALOG.len());
    Ok(())
}

#[tokio::test]
async fn duplicate_domain_is_a_conflict() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    provision(&pool, "alpha.example").await?;

    let err = provision_tenant(&pool, "Second", "alpha.example").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");

    // the failed attempt left no partial tenant behind
    let tenants: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM tenants WHERE domain = 'alpha.example'")
        .fetch_one(&pool)
        .await?;
    assert_eq!(tenants, 1);
    Ok(())
}

#[tokio::test]
async fn verify_catalog_rejects_stray_permissions() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    sync_catalog(&pool).await?;

    let now = utc_now();
    sqlx::query(
        "INSERT INTO permissions (id, module, action, description, created_at, updated_at) VALUES (?, 'teleporter', 'engage', NULL, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(now)
    .bind(now)
    .execute(&pool)
    .await?;

    let err = verify_catalog(&pool).await.unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let tenant = provision(&pool, "alpha.example").await?;
    create_user_with_role(&pool, tenant, "dup@alpha.example", None).await?;

    let err = create_user_with_role(&pool, tenant, "dup@alpha.example", None).await.unwrap_err();
    let app_err = err.downcast::<AppError>()?;
    assert!(matches!(app_err, AppError::Conflict(_)), "got {app_err:?}");
    Ok(())
}

#[tokio::test]
async fn hod_reassignment_swaps_the_scoped_binding() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let tenant = provision(&pool, "alpha.example").await?;
    let department = create_department(&pool, tenant, "MECH").await?;
    let first = create_user_with_role(&pool, tenant, "first@alpha.example", None).await?;
    let second = create_user_with_role(&pool, tenant, "second@alpha.example", None).await?;
    let hod_role = role_id(&pool, tenant, role_names::HOD).await?;

    let dept = auditflow::provisioning::reassign_hod(&pool, &bus, tenant, department, first).await?;
    assert_eq!(dept.hod_id, Some(first));

    let dept = auditflow::provisioning::reassign_hod(&pool, &bus, tenant, department, second).await?;
    assert_eq!(dept.hod_id, Some(second));

    // the previous holder's scoped binding is gone, the new holder's exists
    let first_bindings: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM user_department_roles WHERE user_id = ? AND department_id = ? AND role_id = ?",
    )
    .bind(first.to_string())
    .bind(department.to_string())
    .bind(hod_role.to_string())
    .fetch_one(&pool)
    .await?;
    assert_eq!(first_bindings, 0);

    let second_bindings: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM user_department_roles WHERE user_id = ? AND department_id = ? AND role_id = ?",
    )
    .bind(second.to_string())
    .bind(department.to_string())
    .bind(hod_role.to_string())
    .fetch_one(&pool)
    .await?;
    assert_eq!(second_bindings, 1);
    Ok(())
}

#[tokio::test]
async fn hod_reassignment_rejects_cross_tenant_user() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let tenant_a = provision(&pool, "alpha.example").await?;
    let tenant_b = provision(&pool, "beta.example").await?;
    let department_a = create_department(&pool, tenant_a, "MECH").await?;
    let outsider = create_user_with_role(&pool, tenant_b, "out@beta.example", None).await?;

    let err = auditflow::provisioning::reassign_hod(&pool, &bus, tenant_a, department_a, outsider)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CrossTenantViolation(_)), "got {err:?}");
    Ok(())
}
