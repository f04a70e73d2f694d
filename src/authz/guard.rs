//! Tenant isolation guard.
//!
//! Every write that links two tenant-scoped entities goes through
//! `validate_same_tenant` before the write transaction opens. The guard loads
//! each referenced entity's tenant and collects every violation, so a batch
//! assignment gets a complete error list rather than failing on the first
//! offending reference.

use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult, TenantViolation};
use crate::events::{log_security_event, EventBus};
use crate::utils::parse_uuid;

/// References to check against a single expected tenant.
#[derive(Debug, Clone, Default)]
pub struct TenantRefs {
    pub role_ids: Vec<Uuid>,
    pub user_ids: Vec<Uuid>,
    pub department_ids: Vec<Uuid>,
    pub campus_ids: Vec<Uuid>,
    pub audit_program_ids: Vec<Uuid>,
    pub finding_ids: Vec<Uuid>,
}

impl TenantRefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, id: Uuid) -> Self {
        self.role_ids.push(id);
        self
    }

    pub fn roles(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.role_ids.extend(ids);
        self
    }

    pub fn user(mut self, id: Uuid) -> Self {
        self.user_ids.push(id);
        self
    }

    pub fn department(mut self, id: Uuid) -> Self {
        self.department_ids.push(id);
        self
    }

    pub fn campus(mut self, id: Uuid) -> Self {
        self.campus_ids.push(id);
        self
    }

    pub fn audit_program(mut self, id: Uuid) -> Self {
        self.audit_program_ids.push(id);
        self
    }

    pub fn finding(mut self, id: Uuid) -> Self {
        self.finding_ids.push(id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.role_ids.is_empty()
            && self.user_ids.is_empty()
            && self.department_ids.is_empty()
            && self.campus_ids.is_empty()
            && self.audit_program_ids.is_empty()
            && self.finding_ids.is_empty()
    }
}

async fn check_entities(
    pool: &SqlitePool,
    tenant_id: Uuid,
    entity_type: &'static str,
    table: &str,
    ids: &[Uuid],
    violations: &mut Vec<TenantViolation>,
) -> AppResult<()> {
    for id in ids {
        // table names come from a fixed internal list, never caller input
        let sql = format!("SELECT tenant_id FROM {table} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?;

        match row {
            None => violations.push(TenantViolation {
                entity_type,
                entity_id: *id,
                actual_tenant_id: None,
            }),
            Some(row) => {
                let actual = parse_uuid(row.try_get("tenant_id")?, "tenant_id")?;
                if actual != tenant_id {
                    violations.push(TenantViolation {
                        entity_type,
                        entity_id: *id,
                        actual_tenant_id: Some(actual),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Reject any reference that crosses the tenant boundary.
///
/// Missing entities count as violations: an unknown id must never pass a
/// tenant check. On violation the full list is returned in the error and a
/// Critical security-log entry is emitted.
pub async fn validate_same_tenant(
    pool: &SqlitePool,
    event_bus: &EventBus,
    tenant_id: Uuid,
    refs: &TenantRefs,
) -> AppResult<()> {
    if refs.is_empty() {
        return Ok(());
    }

    let mut violations = Vec::new();
    check_entities(pool, tenant_id, "role", "roles", &refs.role_ids, &mut violations).await?;
    check_entities(pool, tenant_id, "user", "users", &refs.user_ids, &mut violations).await?;
    check_entities(
        pool,
        tenant_id,
        "department",
        "departments",
        &refs.department_ids,
        &mut violations,
    )
    .await?;
    check_entities(pool, tenant_id, "campus", "campuses", &refs.campus_ids, &mut violations).await?;
    check_entities(
        pool,
        tenant_id,
        "audit_program",
        "audit_programs",
        &refs.audit_program_ids,
        &mut violations,
    )
    .await?;
    check_entities(
        pool,
        tenant_id,
        "finding",
        "audit_findings",
        &refs.finding_ids,
        &mut violations,
    )
    .await?;

    if violations.is_empty() {
        return Ok(());
    }

    tracing::warn!(
        tenant_id = %tenant_id,
        count = violations.len(),
        "cross-tenant references rejected"
    );
    log_security_event(
        event_bus,
        "security.cross_tenant_violation",
        None,
        Some(tenant_id),
        json!({
            "count": violations.len(),
            "violations": violations,
        }),
    );

    Err(AppError::CrossTenantViolation(violations))
}
