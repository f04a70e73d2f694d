mod common;

use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use auditflow::authz::role_names;
use auditflow::errors::AppError;
use auditflow::events::EventBus;
use auditflow::models::corrective::{CorrectiveActionStatus, FollowUpStatus, ReviewResponse};
use auditflow::models::finding::{FindingCategory, FindingStatus};
use auditflow::notify::DispatchStatus;
use auditflow::workflow::categorize::categorize;
use auditflow::workflow::corrective::{
    commit_correction_requirement, record_follow_up, review_appropriateness,
    submit_proposed_action, verify_effectiveness,
};
use auditflow::workflow::finding::{corrective_action_eligible, set_status};

use common::*;

struct Fixture {
    auditor: Uuid,
    finding: Uuid,
}

/// An accepted non-conformity finding with an HOD, an auditor and an MR in
/// place, so every step has recipients to notify.
async fn accepted_nc(pool: &SqlitePool, bus: &EventBus) -> Result<Fixture> {
    let tenant = provision(pool, "alpha.example").await?;
    let auditor =
        create_user_with_role(pool, tenant, "aud@alpha.example", Some(role_names::AUDITOR)).await?;
    create_user_with_role(pool, tenant, "hod@alpha.example", Some(role_names::HOD)).await?;
    create_user_with_role(pool, tenant, "mr@alpha.example", Some(role_names::MR)).await?;
    let department = create_department(pool, tenant, "MECH").await?;
    let finding = create_finding(pool, tenant, department, auditor, "Calibration lapsed").await?;

    categorize(pool, bus, finding, FindingCategory::NonConformity, auditor).await?;
    set_status(pool, bus, finding, FindingStatus::Accepted, auditor).await?;

    Ok(Fixture { auditor, finding })
}

#[tokio::test]
async fn eligibility_requires_category_and_status() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let tenant = provision(&pool, "alpha.example").await?;
    let auditor = create_user_with_role(&pool, tenant, "aud@alpha.example", None).await?;
    let department = create_department(&pool, tenant, "MECH").await?;
    let finding = create_finding(&pool, tenant, department, auditor, "NC pending").await?;

    // uncategorized and pending
    assert!(!corrective_action_eligible(&pool, finding).await?);

    // categorized NC but still pending
    categorize(&pool, &bus, finding, FindingCategory::NonConformity, auditor).await?;
    assert!(!corrective_action_eligible(&pool, finding).await?);

    // accepted unlocks it
    set_status(&pool, &bus, finding, FindingStatus::Accepted, auditor).await?;
    assert!(corrective_action_eligible(&pool, finding).await?);

    // an improvement finding is never eligible, whatever its status
    let improvement = create_finding(&pool, tenant, department, auditor, "OFI").await?;
    categorize(&pool, &bus, improvement, FindingCategory::Improvement, auditor).await?;
    set_status(&pool, &bus, improvement, FindingStatus::Accepted, auditor).await?;
    assert!(!corrective_action_eligible(&pool, improvement).await?);
    Ok(())
}

#[tokio::test]
async fn refused_non_conformity_is_still_eligible() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let tenant = provision(&pool, "alpha.example").await?;
    let auditor = create_user_with_role(&pool, tenant, "aud@alpha.example", None).await?;
    create_user_with_role(&pool, tenant, "hod@alpha.example", Some(role_names::HOD)).await?;
    let department = create_department(&pool, tenant, "MECH").await?;
    let finding = create_finding(&pool, tenant, department, auditor, "Refused NC").await?;

    categorize(&pool, &bus, finding, FindingCategory::NonConformity, auditor).await?;
    set_status(&pool, &bus, finding, FindingStatus::Refused, auditor).await?;

    // refusal by the department does not remove the remediation obligation
    assert!(corrective_action_eligible(&pool, finding).await?);
    let result = commit_correction_requirement(&pool, &bus, finding, auditor, "Fix it").await?;
    assert_eq!(result.corrective_action.status, CorrectiveActionStatus::InProgress);
    Ok(())
}

#[tokio::test]
async fn commit_rejects_ineligible_findings() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let tenant = provision(&pool, "alpha.example").await?;
    let auditor = create_user_with_role(&pool, tenant, "aud@alpha.example", None).await?;
    let department = create_department(&pool, tenant, "MECH").await?;
    let finding = create_finding(&pool, tenant, department, auditor, "Still pending").await?;
    categorize(&pool, &bus, finding, FindingCategory::NonConformity, auditor).await?;

    let err = commit_correction_requirement(&pool, &bus, finding, auditor, "Too early")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn full_five_step_walkthrough() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let fx = accepted_nc(&pool, &bus).await?;

    // step 1: requirement committed, workflow opens, HOD notified
    let step1 =
        commit_correction_requirement(&pool, &bus, fx.finding, fx.auditor, "Back-fill the log")
            .await?;
    assert_eq!(step1.corrective_action.status, CorrectiveActionStatus::InProgress);
    let dispatch = step1.dispatch.expect("dispatch report");
    assert_eq!(dispatch.status, DispatchStatus::Success);
    assert_eq!(dispatch.outcomes.len(), 1);

    // step 2: proposal submitted
    let step2 =
        submit_proposed_action(&pool, &bus, fx.finding, fx.auditor, "Monthly checklist").await?;
    assert!(step2.corrective_action.proposed_action.is_some());
    assert_eq!(step2.corrective_action.status, CorrectiveActionStatus::InProgress);

    // step 3: NO without a comment is rejected
    let err = review_appropriateness(&pool, &bus, fx.finding, fx.auditor, ReviewResponse::No, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");

    // NO with a comment sticks, and the auditee may resubmit
    review_appropriateness(
        &pool,
        &bus,
        fx.finding,
        fx.auditor,
        ReviewResponse::No,
        Some("Too vague".into()),
    )
    .await?;
    submit_proposed_action(&pool, &bus, fx.finding, fx.auditor, "Checklist with owner and dates")
        .await?;
    let step3 = review_appropriateness(
        &pool,
        &bus,
        fx.finding,
        fx.auditor,
        ReviewResponse::Yes,
        None,
    )
    .await?;
    assert_eq!(step3.corrective_action.status, CorrectiveActionStatus::InProgress);

    // step 4: partial completion keeps it in progress, MR notified
    let step4 = record_follow_up(
        &pool,
        &bus,
        fx.finding,
        fx.auditor,
        FollowUpStatus::ActionPartiallyCompleted,
        None,
    )
    .await?;
    assert_eq!(step4.corrective_action.status, CorrectiveActionStatus::InProgress);

    let step4b = record_follow_up(
        &pool,
        &bus,
        fx.finding,
        fx.auditor,
        FollowUpStatus::ActionFullyCompleted,
        None,
    )
    .await?;
    assert_eq!(step4b.corrective_action.status, CorrectiveActionStatus::Completed);

    // step 5: verified effective
    let step5 = verify_effectiveness(
        &pool,
        &bus,
        fx.finding,
        fx.auditor,
        ReviewResponse::Yes,
        None,
    )
    .await?;
    assert_eq!(step5.corrective_action.status, CorrectiveActionStatus::Verified);
    assert!(step5.corrective_action.status.is_resolved());
    Ok(())
}

#[tokio::test]
async fn no_action_taken_reopens_the_workflow() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let fx = accepted_nc(&pool, &bus).await?;

    commit_correction_requirement(&pool, &bus, fx.finding, fx.auditor, "Fix").await?;
    let step = record_follow_up(
        &pool,
        &bus,
        fx.finding,
        fx.auditor,
        FollowUpStatus::NoActionTaken,
        Some("Nothing happened".into()),
    )
    .await?;
    assert_eq!(step.corrective_action.status, CorrectiveActionStatus::Open);
    Ok(())
}

#[tokio::test]
async fn failed_verification_never_closes() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let fx = accepted_nc(&pool, &bus).await?;

    commit_correction_requirement(&pool, &bus, fx.finding, fx.auditor, "Fix").await?;
    record_follow_up(
        &pool,
        &bus,
        fx.finding,
        fx.auditor,
        FollowUpStatus::ActionFullyCompleted,
        None,
    )
    .await?;

    let step = verify_effectiveness(
        &pool,
        &bus,
        fx.finding,
        fx.auditor,
        ReviewResponse::No,
        Some("Recurred within a month".into()),
    )
    .await?;
    assert_eq!(step.corrective_action.status, CorrectiveActionStatus::InProgress);
    assert!(!step.corrective_action.status.is_resolved());
    Ok(())
}

#[tokio::test]
async fn steps_require_their_predecessor() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let fx = accepted_nc(&pool, &bus).await?;

    commit_correction_requirement(&pool, &bus, fx.finding, fx.auditor, "Fix").await?;

    // review with no proposal on file
    let err = review_appropriateness(&pool, &bus, fx.finding, fx.auditor, ReviewResponse::Yes, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");

    // verification with no follow-up on file
    let err = verify_effectiveness(&pool, &bus, fx.finding, fx.auditor, ReviewResponse::Yes, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn dispatch_failure_does_not_roll_back_the_step() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let bus = test_bus();
    let tenant = provision(&pool, "alpha.example").await?;
    // deliberately nobody holds HOD, so step-1 dispatch has zero recipients
    let auditor = create_user_with_role(&pool, tenant, "aud@alpha.example", None).await?;
    let department = create_department(&pool, tenant, "MECH").await?;
    let finding = create_finding(&pool, tenant, department, auditor, "Nobody to tell").await?;
    categorize(&pool, &bus, finding, FindingCategory::NonConformity, auditor).await?;
    set_status(&pool, &bus, finding, FindingStatus::Accepted, auditor).await?;

    let result = commit_correction_requirement(&pool, &bus, finding, auditor, "Fix").await?;
    assert_eq!(result.dispatch.expect("report").status, DispatchStatus::Failed);
    // the state transition committed regardless
    assert_eq!(result.corrective_action.status, CorrectiveActionStatus::InProgress);
    assert!(result.corrective_action.correction_requirement.is_some());
    Ok(())
}
