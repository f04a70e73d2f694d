mod common;

use anyhow::Result;

use auditflow::errors::AppError;
use auditflow::models::finding::FindingCategory;
use auditflow::workflow::categorize::{categorize, current_classification, repair_classification};
use auditflow::workflow::finding::get_finding;

use common::*;

#[tokio::test]
async fn categorizing_twice_returns_the_same_record() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let tenant = provision(&pool, "alpha.example").await?;
    let auditor = create_user_with_role(&pool, tenant, "aud@alpha.example", None).await?;
    let department = create_department(&pool, tenant, "MECH").await?;
    let finding = create_finding(&pool, tenant, department, auditor, "Missing calibration log").await?;

    let first = categorize(&pool, &bus, finding, FindingCategory::NonConformity, auditor).await?;
    let second = categorize(&pool, &bus, finding, FindingCategory::NonConformity, auditor).await?;

    assert_eq!(first.id, second.id);
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM non_conformities WHERE finding_id = ?")
        .bind(finding.to_string())
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 1);
    Ok(())
}

#[tokio::test]
async fn switching_category_retains_the_superseded_record() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let tenant = provision(&pool, "alpha.example").await?;
    let auditor = create_user_with_role(&pool, tenant, "aud@alpha.example", None).await?;
    let department = create_department(&pool, tenant, "MECH").await?;
    let finding = create_finding(&pool, tenant, department, auditor, "Outdated SOP in use").await?;

    let nc = categorize(&pool, &bus, finding, FindingCategory::NonConformity, auditor).await?;
    let improvement = categorize(&pool, &bus, finding, FindingCategory::Improvement, auditor).await?;
    assert_ne!(nc.id, improvement.id);

    // the finding now reads as IMPROVEMENT, but the NC record survives
    let found = get_finding(&pool, finding).await?;
    assert_eq!(found.category, Some(FindingCategory::Improvement));
    let nc_count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM non_conformities WHERE finding_id = ?")
        .bind(finding.to_string())
        .fetch_one(&pool)
        .await?;
    assert_eq!(nc_count, 1);

    // the read path surfaces only the current category's record
    let current = current_classification(&pool, finding).await?.expect("categorized");
    assert_eq!(current.id, improvement.id);
    assert_eq!(current.category, FindingCategory::Improvement);

    // switching back reuses the original NC record
    let nc_again = categorize(&pool, &bus, finding, FindingCategory::NonConformity, auditor).await?;
    assert_eq!(nc_again.id, nc.id);
    Ok(())
}

#[tokio::test]
async fn uncategorized_finding_has_no_classification() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let tenant = provision(&pool, "alpha.example").await?;
    let auditor = create_user_with_role(&pool, tenant, "aud@alpha.example", None).await?;
    let department = create_department(&pool, tenant, "MECH").await?;
    let finding = create_finding(&pool, tenant, department, auditor, "Observation").await?;

    assert!(current_classification(&pool, finding).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn missing_record_surfaces_as_error_and_repairs() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let tenant = provision(&pool, "alpha.example").await?;
    let auditor = create_user_with_role(&pool, tenant, "aud@alpha.example", None).await?;
    let department = create_department(&pool, tenant, "MECH").await?;
    let finding = create_finding(&pool, tenant, department, auditor, "Records drifted").await?;

    categorize(&pool, &bus, finding, FindingCategory::Compliance, auditor).await?;

    // simulate data-integrity drift: the record disappears under the category
    sqlx::query("DELETE FROM compliance_records WHERE finding_id = ?")
        .bind(finding.to_string())
        .execute(&pool)
        .await?;

    let err = current_classification(&pool, finding).await.unwrap_err();
    assert!(matches!(err, AppError::MissingClassification(_)), "got {err:?}");

    let repaired = repair_classification(&pool, &bus, finding, auditor).await?.expect("repaired");
    assert_eq!(repaired.category, FindingCategory::Compliance);
    assert!(current_classification(&pool, finding).await?.is_some());
    Ok(())
}
