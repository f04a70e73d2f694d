mod common;

use anyhow::Result;
use uuid::Uuid;

use auditflow::authz::resolver::{has_permission, resolve_permissions};
use auditflow::authz::role_names;
use auditflow::errors::AppError;
use auditflow::provisioning::ensure_role_permission;
use auditflow::utils::utc_now;

use common::*;

#[tokio::test]
async fn mr_role_grants_audit_program_commit() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let tenant = provision(&pool, "alpha.example").await?;
    let mr = create_user_with_role(&pool, tenant, "mr@alpha.example", Some(role_names::MR)).await?;

    assert!(has_permission(&pool, mr, tenant, "auditProgram", "commit").await?);
    assert!(has_permission(&pool, mr, tenant, "auditProgram", "read").await?);
    assert!(!has_permission(&pool, mr, tenant, "role", "manage").await?);
    Ok(())
}

#[tokio::test]
async fn explicit_deny_overrides_allow_from_another_role() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let tenant = provision(&pool, "alpha.example").await?;
    let mr = create_user_with_role(&pool, tenant, "mr@alpha.example", Some(role_names::MR)).await?;

    // second role carrying an explicit deny on the same permission
    let deny_role = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO roles (id, tenant_id, name, description, is_default, is_removable, created_at, updated_at) VALUES (?, ?, 'COMMIT_DENIED', NULL, 0, 1, ?, ?)",
    )
    .bind(deny_role.to_string())
    .bind(tenant.to_string())
    .bind(now)
    .bind(now)
    .execute(&pool)
    .await?;
    let commit = permission_id(&pool, "auditProgram", "commit").await?;
    ensure_role_permission(&pool, deny_role, commit, false).await?;
    bind_global(&pool, mr, deny_role).await?;

    assert!(
        !has_permission(&pool, mr, tenant, "auditProgram", "commit").await?,
        "deny on any bound role must override the MR allow"
    );
    // unrelated permissions are untouched
    assert!(has_permission(&pool, mr, tenant, "auditProgram", "read").await?);

    // dropping the deny binding restores the allow
    sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
        .bind(mr.to_string())
        .bind(deny_role.to_string())
        .execute(&pool)
        .await?;
    assert!(has_permission(&pool, mr, tenant, "auditProgram", "commit").await?);
    Ok(())
}

#[tokio::test]
async fn removing_the_grant_revokes_the_permission() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let tenant = provision(&pool, "alpha.example").await?;
    let mr = create_user_with_role(&pool, tenant, "mr@alpha.example", Some(role_names::MR)).await?;

    let mr_role = role_id(&pool, tenant, role_names::MR).await?;
    let commit = permission_id(&pool, "auditProgram", "commit").await?;
    sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
        .bind(mr_role.to_string())
        .bind(commit.to_string())
        .execute(&pool)
        .await?;

    let permissions = resolve_permissions(&pool, mr, tenant).await?;
    assert!(!permissions.contains("auditProgram:commit"));
    assert!(permissions.contains("auditProgram:read"));
    Ok(())
}

#[tokio::test]
async fn scoped_binding_contributes_to_the_permission_set() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let tenant = provision(&pool, "alpha.example").await?;
    let user = create_user_with_role(&pool, tenant, "hod@alpha.example", None).await?;
    let department = create_department(&pool, tenant, "MECH").await?;
    let hod_role = role_id(&pool, tenant, role_names::HOD).await?;

    bind_scoped(&pool, user, department, hod_role).await?;

    let permissions = resolve_permissions(&pool, user, tenant).await?;
    assert!(permissions.contains("correctiveAction:submit"));
    Ok(())
}

#[tokio::test]
async fn resolution_rejects_wrong_tenant_and_unknown_user() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let tenant_a = provision(&pool, "alpha.example").await?;
    let tenant_b = provision(&pool, "beta.example").await?;
    let user = create_user_with_role(&pool, tenant_a, "a@alpha.example", Some(role_names::STAFF)).await?;

    let err = resolve_permissions(&pool, user, tenant_b).await.unwrap_err();
    assert!(matches!(err, AppError::TenantMismatch(_)), "got {err:?}");

    let err = resolve_permissions(&pool, Uuid::new_v4(), tenant_a).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn roles_from_another_tenant_never_grant() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let tenant_a = provision(&pool, "alpha.example").await?;
    let tenant_b = provision(&pool, "beta.example").await?;
    let user = create_user_with_role(&pool, tenant_a, "a@alpha.example", None).await?;

    // simulate a pre-guard legacy binding crossing tenants
    let foreign_role = role_id(&pool, tenant_b, role_names::SYSTEM_ADMIN).await?;
    bind_global(&pool, user, foreign_role).await?;

    let permissions = resolve_permissions(&pool, user, tenant_a).await?;
    assert!(permissions.is_empty(), "foreign-tenant role must be filtered out: {permissions:?}");
    Ok(())
}
