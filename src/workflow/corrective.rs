//! The five-step corrective-action workflow.
//!
//! Steps are independently settable but logically sequential:
//! correction requirement -> proposed action -> appropriateness review ->
//! follow-up -> effectiveness verification. Status moves per step mapping;
//! CLOSED/VERIFIED is the only resolved predicate.
//!
//! Every recipient-bearing transition resolves its audience through the
//! authorization resolver (both binding mechanisms) and dispatches
//! best-effort: the state change commits whether or not notification rows
//! could be written, and the outcome is surfaced in the dispatch report.

use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::role_names;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_diff, EventBus};
use crate::models::corrective::{
    ActionEffectiveness, AppropriatenessReview, CorrectionRequirement, CorrectiveAction,
    CorrectiveActionStatus, FollowUpAction, FollowUpStatus, ProposedAction, ReviewResponse,
};
use crate::models::finding::AuditFinding;
use crate::notify::{dispatch_to_role, DispatchReport};
use crate::utils::utc_now;
use crate::workflow::categorize::non_conformity_id;
use crate::workflow::finding::{corrective_action_eligible, get_finding};

/// Result of one workflow step: the committed state plus the best-effort
/// notification outcome.
#[derive(Debug, Serialize, ToSchema)]
pub struct StepResult {
    pub corrective_action: CorrectiveAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchReport>,
}

async fn fetch_corrective_action(
    pool: &SqlitePool,
    nc_id: Uuid,
) -> AppResult<Option<CorrectiveAction>> {
    let row = sqlx::query(
        "SELECT id, non_conformity_id, status, correction_requirement, proposed_action, appropriateness_review, follow_up_action, action_effectiveness, created_at, updated_at FROM corrective_actions WHERE non_conformity_id = ?",
    )
    .bind(nc_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| CorrectiveAction::from_row(&r)).transpose()
}

/// The corrective action for a finding, or NotFound when the workflow has not
/// been initiated.
pub async fn get_for_finding(pool: &SqlitePool, finding_id: Uuid) -> AppResult<CorrectiveAction> {
    let nc_id = non_conformity_id(pool, finding_id).await?;
    fetch_corrective_action(pool, nc_id)
        .await?
        .ok_or_else(|| AppError::not_found("corrective action not initiated"))
}

async fn ensure_corrective_action(pool: &SqlitePool, nc_id: Uuid) -> AppResult<CorrectiveAction> {
    // UNIQUE(non_conformity_id) makes the create idempotent under races
    sqlx::query(
        "INSERT OR IGNORE INTO corrective_actions (id, non_conformity_id, status, created_at, updated_at) VALUES (?, ?, 'OPEN', ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(nc_id.to_string())
    .bind(utc_now())
    .bind(utc_now())
    .execute(pool)
    .await?;

    fetch_corrective_action(pool, nc_id)
        .await?
        .ok_or_else(|| AppError::internal("corrective action vanished after upsert"))
}

fn to_json<T: Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string(value).map_err(|e| AppError::internal(format!("step serialization: {e}")))
}

async fn update_step(
    pool: &SqlitePool,
    ca_id: Uuid,
    column: &str,
    payload: String,
    status: Option<CorrectiveActionStatus>,
) -> AppResult<()> {
    // column names come from the fixed step list below, never caller input
    let sql = match status {
        Some(_) => format!("UPDATE corrective_actions SET {column} = ?, status = ?, updated_at = ? WHERE id = ?"),
        None => format!("UPDATE corrective_actions SET {column} = ?, updated_at = ? WHERE id = ?"),
    };

    let mut query = sqlx::query(&sql).bind(payload);
    if let Some(status) = status {
        query = query.bind(status.as_str());
    }
    query
        .bind(utc_now())
        .bind(ca_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_step(
    pool: &SqlitePool,
    event_bus: &EventBus,
    finding: &AuditFinding,
    ca: &CorrectiveAction,
    role: &str,
    notification_type: &str,
    title: &str,
    message: &str,
) -> DispatchReport {
    let link = format!("/findings/{}/corrective-action", finding.id);
    let metadata = json!({
        "finding_id": finding.id,
        "non_conformity_id": ca.non_conformity_id,
        "corrective_action_id": ca.id,
        "department_id": finding.department_id,
    });
    dispatch_to_role(
        pool,
        event_bus,
        finding.tenant_id,
        role,
        notification_type,
        title,
        message,
        Some(&link),
        Some(&metadata),
    )
    .await
}

/// Step 1: the auditor commits the correction requirement. Initiates the
/// workflow (eligibility gate), moves status to IN_PROGRESS, notifies the
/// department's HOD role.
pub async fn commit_correction_requirement(
    pool: &SqlitePool,
    event_bus: &EventBus,
    finding_id: Uuid,
    actor_id: Uuid,
    text: &str,
) -> AppResult<StepResult> {
    if !corrective_action_eligible(pool, finding_id).await? {
        return Err(AppError::bad_request(
            "finding is not eligible for the corrective-action workflow",
        ));
    }

    let finding = get_finding(pool, finding_id).await?;
    let nc_id = non_conformity_id(pool, finding_id).await?;
    let before = ensure_corrective_action(pool, nc_id).await?;

    let step = CorrectionRequirement {
        text: text.to_string(),
        committed_by: actor_id,
        committed_at: utc_now(),
    };
    update_step(
        pool,
        before.id,
        "correction_requirement",
        to_json(&step)?,
        Some(CorrectiveActionStatus::InProgress),
    )
    .await?;

    let after = ensure_corrective_action(pool, nc_id).await?;
    log_activity_diff(event_bus, "updated", Some(actor_id), &after, Some(&before));

    let dispatch = dispatch_step(
        pool,
        event_bus,
        &finding,
        &after,
        role_names::HOD,
        "CORRECTION_REQUIREMENT_COMMITTED",
        "Correction requirement committed",
        &format!("A correction requirement was committed for finding \"{}\"", finding.title),
    )
    .await;

    Ok(StepResult {
        corrective_action: after,
        dispatch: Some(dispatch),
    })
}

/// Step 2: the auditee (HOD) submits the proposed action. No status change;
/// notifies the auditor role. Re-submission after a NO review is allowed.
pub async fn submit_proposed_action(
    pool: &SqlitePool,
    event_bus: &EventBus,
    finding_id: Uuid,
    actor_id: Uuid,
    text: &str,
) -> AppResult<StepResult> {
    let finding = get_finding(pool, finding_id).await?;
    let before = get_for_finding(pool, finding_id).await?;

    let step = ProposedAction {
        text: text.to_string(),
        submitted_by: actor_id,
        submitted_at: utc_now(),
    };
    update_step(pool, before.id, "proposed_action", to_json(&step)?, None).await?;

    let after = get_for_finding(pool, finding_id).await?;
    log_activity_diff(event_bus, "updated", Some(actor_id), &after, Some(&before));

    let dispatch = dispatch_step(
        pool,
        event_bus,
        &finding,
        &after,
        role_names::AUDITOR,
        "PROPOSED_ACTION_SUBMITTED",
        "Corrective action proposed",
        &format!("A corrective action was proposed for finding \"{}\"", finding.title),
    )
    .await;

    Ok(StepResult {
        corrective_action: after,
        dispatch: Some(dispatch),
    })
}

/// Step 3: the auditor reviews appropriateness. NO requires a comment and
/// sends the auditee back to step 2 (not hard-blocked); either way the HOD
/// role is notified of the outcome. No status change.
pub async fn review_appropriateness(
    pool: &SqlitePool,
    event_bus: &EventBus,
    finding_id: Uuid,
    actor_id: Uuid,
    response: ReviewResponse,
    comment: Option<String>,
) -> AppResult<StepResult> {
    if response == ReviewResponse::No && comment.as_deref().map_or(true, |c| c.trim().is_empty()) {
        return Err(AppError::bad_request(
            "a NO appropriateness review requires a comment",
        ));
    }

    let finding = get_finding(pool, finding_id).await?;
    let before = get_for_finding(pool, finding_id).await?;

    if before.proposed_action.is_none() {
        return Err(AppError::bad_request("no proposed action to review"));
    }

    let step = AppropriatenessReview {
        response,
        comment,
        reviewed_by: actor_id,
        reviewed_at: utc_now(),
    };
    update_step(pool, before.id, "appropriateness_review", to_json(&step)?, None).await?;

    let after = get_for_finding(pool, finding_id).await?;
    log_activity_diff(event_bus, "updated", Some(actor_id), &after, Some(&before));

    let (title, message) = match response {
        ReviewResponse::Yes => (
            "Proposed action accepted",
            format!("The proposed action for finding \"{}\" was found appropriate", finding.title),
        ),
        ReviewResponse::No => (
            "Proposed action needs rework",
            format!(
                "The proposed action for finding \"{}\" was found inappropriate; please revise",
                finding.title
            ),
        ),
    };
    let dispatch = dispatch_step(
        pool,
        event_bus,
        &finding,
        &after,
        role_names::HOD,
        "APPROPRIATENESS_REVIEWED",
        title,
        &message,
    )
    .await;

    Ok(StepResult {
        corrective_action: after,
        dispatch: Some(dispatch),
    })
}

/// Step 4: follow-up. Maps directly onto overall status
/// (fully completed -> COMPLETED, partially -> IN_PROGRESS, none -> OPEN)
/// and notifies the MR role.
pub async fn record_follow_up(
    pool: &SqlitePool,
    event_bus: &EventBus,
    finding_id: Uuid,
    actor_id: Uuid,
    status: FollowUpStatus,
    comment: Option<String>,
) -> AppResult<StepResult> {
    let finding = get_finding(pool, finding_id).await?;
    let before = get_for_finding(pool, finding_id).await?;

    let step = FollowUpAction {
        status,
        comment,
        recorded_by: actor_id,
        recorded_at: utc_now(),
    };
    update_step(
        pool,
        before.id,
        "follow_up_action",
        to_json(&step)?,
        Some(status.overall_status()),
    )
    .await?;

    let after = get_for_finding(pool, finding_id).await?;
    log_activity_diff(event_bus, "updated", Some(actor_id), &after, Some(&before));

    let dispatch = dispatch_step(
        pool,
        event_bus,
        &finding,
        &after,
        role_names::MR,
        "FOLLOW_UP_RECORDED",
        "Corrective action follow-up recorded",
        &format!(
            "Follow-up for finding \"{}\" recorded as {:?}",
            finding.title, status
        ),
    )
    .await;

    Ok(StepResult {
        corrective_action: after,
        dispatch: Some(dispatch),
    })
}

/// Step 5: effectiveness verification. YES -> VERIFIED (resolved for
/// reporting); NO -> IN_PROGRESS, implying a new corrective cycle. Never
/// CLOSED from here. Notifies the HOD role.
pub async fn verify_effectiveness(
    pool: &SqlitePool,
    event_bus: &EventBus,
    finding_id: Uuid,
    actor_id: Uuid,
    response: ReviewResponse,
    comment: Option<String>,
) -> AppResult<StepResult> {
    let finding = get_finding(pool, finding_id).await?;
    let before = get_for_finding(pool, finding_id).await?;

    if before.follow_up_action.is_none() {
        return Err(AppError::bad_request("no follow-up recorded to verify"));
    }

    let step = ActionEffectiveness {
        response,
        comment,
        verified_by: actor_id,
        verified_at: utc_now(),
    };
    let next_status = match response {
        ReviewResponse::Yes => CorrectiveActionStatus::Verified,
        ReviewResponse::No => CorrectiveActionStatus::InProgress,
    };
    update_step(
        pool,
        before.id,
        "action_effectiveness",
        to_json(&step)?,
        Some(next_status),
    )
    .await?;

    let after = get_for_finding(pool, finding_id).await?;
    log_activity_diff(event_bus, "updated", Some(actor_id), &after, Some(&before));

    let (title, message) = match response {
        ReviewResponse::Yes => (
            "Corrective action verified effective",
            format!("The corrective action for finding \"{}\" was verified effective", finding.title),
        ),
        ReviewResponse::No => (
            "Corrective action not yet effective",
            format!(
                "The corrective action for finding \"{}\" was not effective; a new cycle is required",
                finding.title
            ),
        ),
    };
    let dispatch = dispatch_step(
        pool,
        event_bus,
        &finding,
        &after,
        role_names::HOD,
        "EFFECTIVENESS_VERIFIED",
        title,
        &message,
    )
    .await;

    Ok(StepResult {
        corrective_action: after,
        dispatch: Some(dispatch),
    })
}
