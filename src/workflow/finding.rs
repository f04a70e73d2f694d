//! Audit finding acceptance workflow: PENDING -> {ACCEPTED | REFUSED} ->
//! UNDER_REVIEW, plus the corrective-action eligibility rule.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_diff, EventBus};
use crate::models::finding::{AuditFinding, FindingCategory, FindingStatus};
use crate::utils::utc_now;

pub async fn get_finding(pool: &SqlitePool, finding_id: Uuid) -> AppResult<AuditFinding> {
    let row = sqlx::query(
        "SELECT id, tenant_id, department_id, audit_program_id, title, description, category, status, created_by, created_at, updated_at FROM audit_findings WHERE id = ?",
    )
    .bind(finding_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("finding not found"))?;

    AuditFinding::from_row(&row)
}

/// Apply an acceptance-workflow transition, rejecting illegal ones.
pub async fn set_status(
    pool: &SqlitePool,
    event_bus: &EventBus,
    finding_id: Uuid,
    next: FindingStatus,
    actor_id: Uuid,
) -> AppResult<AuditFinding> {
    let before = get_finding(pool, finding_id).await?;

    if !before.status.can_transition_to(next) {
        return Err(AppError::bad_request(format!(
            "illegal finding status transition {} -> {}",
            before.status.as_str(),
            next.as_str()
        )));
    }

    sqlx::query("UPDATE audit_findings SET status = ?, updated_at = ? WHERE id = ?")
        .bind(next.as_str())
        .bind(utc_now())
        .bind(finding_id.to_string())
        .execute(pool)
        .await?;

    let after = get_finding(pool, finding_id).await?;
    log_activity_diff(event_bus, "status_changed", Some(actor_id), &after, Some(&before));
    Ok(after)
}

/// A finding may enter the corrective-action workflow iff it is categorized
/// as a non-conformity, its status is ACCEPTED or REFUSED, and the
/// NonConformity record exists. REFUSED is included deliberately: refusal by
/// a department head does not remove the underlying obligation.
pub async fn corrective_action_eligible(pool: &SqlitePool, finding_id: Uuid) -> AppResult<bool> {
    let finding = get_finding(pool, finding_id).await?;

    if finding.category != Some(FindingCategory::NonConformity) {
        return Ok(false);
    }
    if !matches!(finding.status, FindingStatus::Accepted | FindingStatus::Refused) {
        return Ok(false);
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM non_conformities WHERE finding_id = ?")
        .bind(finding_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}
