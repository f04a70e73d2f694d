//! Finding categorization: UNCATEGORIZED -> {COMPLIANCE | IMPROVEMENT |
//! NON_CONFORMITY}, mutable, idempotent per category.
//!
//! Each classification table carries UNIQUE(finding_id), so revisiting a
//! category returns the record created on the first visit and concurrent
//! categorization cannot duplicate rows. Records of a superseded category are
//! retained; the read path filters by the finding's current category.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, EventBus};
use crate::models::finding::{AuditFinding, ClassificationRecord, FindingCategory};
use crate::utils::utc_now;
use crate::workflow::finding::get_finding;

fn table_for(category: FindingCategory) -> &'static str {
    match category {
        FindingCategory::Compliance => "compliance_records",
        FindingCategory::Improvement => "improvement_opportunities",
        FindingCategory::NonConformity => "non_conformities",
    }
}

async fn fetch_record(
    pool: &SqlitePool,
    finding_id: Uuid,
    category: FindingCategory,
) -> AppResult<Option<ClassificationRecord>> {
    let sql = format!(
        "SELECT id, finding_id, title, description, created_by, created_at FROM {} WHERE finding_id = ?",
        table_for(category)
    );
    let row = sqlx::query(&sql)
        .bind(finding_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| ClassificationRecord::from_row(&r, category)).transpose()
}

/// Categorize a finding, creating the category's classification record iff it
/// does not already exist. Calling twice with the same category returns the
/// same record; switching categories back and forth never duplicates.
pub async fn categorize(
    pool: &SqlitePool,
    event_bus: &EventBus,
    finding_id: Uuid,
    category: FindingCategory,
    actor_id: Uuid,
) -> AppResult<ClassificationRecord> {
    let finding = get_finding(pool, finding_id).await?;

    // INSERT OR IGNORE rides the UNIQUE(finding_id) constraint: under a
    // concurrent race the second writer observes the first writer's record.
    let now = utc_now();
    match category {
        FindingCategory::NonConformity => {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO non_conformities (id, finding_id, title, description, nc_type, severity, status, created_by, created_at)
                VALUES (?, ?, ?, ?, NULL, NULL, 'OPEN', ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(finding_id.to_string())
            .bind(&finding.title)
            .bind(&finding.description)
            .bind(finding.created_by.to_string())
            .bind(now)
            .execute(pool)
            .await?;
        }
        _ => {
            let sql = format!(
                "INSERT OR IGNORE INTO {} (id, finding_id, title, description, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?)",
                table_for(category)
            );
            sqlx::query(&sql)
                .bind(Uuid::new_v4().to_string())
                .bind(finding_id.to_string())
                .bind(&finding.title)
                .bind(&finding.description)
                .bind(finding.created_by.to_string())
                .bind(now)
                .execute(pool)
                .await?;
        }
    }

    sqlx::query("UPDATE audit_findings SET category = ?, updated_at = ? WHERE id = ?")
        .bind(category.as_str())
        .bind(now)
        .bind(finding_id.to_string())
        .execute(pool)
        .await?;

    let record = fetch_record(pool, finding_id, category)
        .await?
        .ok_or_else(|| AppError::internal("classification record vanished after upsert"))?;

    let after = get_finding(pool, finding_id).await?;
    log_activity(event_bus, "categorized", Some(actor_id), &after);

    Ok(record)
}

/// The finding's current classification record: exactly the one matching its
/// stored category. A categorized finding with no record is data-integrity
/// drift and surfaces as an error rather than a silent None.
pub async fn current_classification(
    pool: &SqlitePool,
    finding_id: Uuid,
) -> AppResult<Option<ClassificationRecord>> {
    let finding = get_finding(pool, finding_id).await?;

    let Some(category) = finding.category else {
        return Ok(None);
    };

    match fetch_record(pool, finding_id, category).await? {
        Some(record) => Ok(Some(record)),
        None => Err(AppError::MissingClassification(format!(
            "finding {} is categorized {} but has no record",
            finding_id,
            category.as_str()
        ))),
    }
}

/// Consistency-check repair: a categorized finding whose record is absent is
/// re-categorized idempotently, recreating the missing record. Returns the
/// record now current, or None for an uncategorized finding.
pub async fn repair_classification(
    pool: &SqlitePool,
    event_bus: &EventBus,
    finding_id: Uuid,
    actor_id: Uuid,
) -> AppResult<Option<ClassificationRecord>> {
    match current_classification(pool, finding_id).await {
        Ok(record) => Ok(record),
        Err(AppError::MissingClassification(detail)) => {
            tracing::warn!(finding_id = %finding_id, %detail, "repairing missing classification record");
            let finding: AuditFinding = get_finding(pool, finding_id).await?;
            let category = finding
                .category
                .ok_or_else(|| AppError::internal("category cleared during repair"))?;
            let record = categorize(pool, event_bus, finding_id, category, actor_id).await?;
            Ok(Some(record))
        }
        Err(other) => Err(other),
    }
}

/// Id of the non-conformity record behind a NON_CONFORMITY finding.
pub async fn non_conformity_id(pool: &SqlitePool, finding_id: Uuid) -> AppResult<Uuid> {
    let row = sqlx::query("SELECT id FROM non_conformities WHERE finding_id = ?")
        .bind(finding_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::MissingClassification(format!(
                "finding {finding_id} has no non-conformity record"
            ))
        })?;
    crate::utils::parse_uuid(row.try_get("id")?, "non_conformities.id")
}
