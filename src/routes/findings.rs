//! Audit finding endpoints: raising, categorization, the acceptance workflow
//! and the five corrective-action steps.
//!
//! Handlers resolve the caller's permission first, then pin the finding to the
//! caller's tenant before any state moves. Corrective-action steps return the
//! committed state together with the notification dispatch report; a failed
//! dispatch never rolls the step back.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::catalog::{actions, modules};
use crate::authz::guard::{validate_same_tenant, TenantRefs};
use crate::authz::resolver::require_permission;
use crate::errors::AppError;
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::corrective::{
    AppropriatenessReviewRequest, CorrectionRequirementRequest, CorrectiveAction,
    EffectivenessRequest, FollowUpRequest, ProposedActionRequest,
};
use crate::models::finding::{
    AuditFinding, CategorizeRequest, ClassificationRecord, FindingCreateRequest,
    FindingStatusRequest,
};
use crate::utils::utc_now;
use crate::workflow::{categorize, corrective, finding};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_findings).post(create_finding))
        .route("/:finding_id", get(get_finding))
        .route("/:finding_id/status", put(set_finding_status))
        .route("/:finding_id/categorize", post(categorize_finding))
        .route(
            "/:finding_id/classification",
            get(get_classification),
        )
        .route(
            "/:finding_id/classification/repair",
            post(repair_classification),
        )
        .route("/:finding_id/corrective-action", get(get_corrective_action))
        .route(
            "/:finding_id/corrective-action/commit",
            post(commit_correction_requirement),
        )
        .route(
            "/:finding_id/corrective-action/proposal",
            post(submit_proposed_action),
        )
        .route(
            "/:finding_id/corrective-action/review",
            post(review_appropriateness),
        )
        .route(
            "/:finding_id/corrective-action/follow-up",
            post(record_follow_up),
        )
        .route(
            "/:finding_id/corrective-action/verify",
            post(verify_effectiveness),
        )
}

/// Load the finding and reject callers from another tenant.
async fn finding_in_tenant(
    state: &AppState,
    finding_id: Uuid,
    tenant_id: Uuid,
) -> Result<AuditFinding, AppError> {
    let found = finding::get_finding(&state.pool, finding_id).await?;
    if found.tenant_id != tenant_id {
        // presented as not-found so ids do not leak across tenants
        return Err(AppError::not_found("finding not found"));
    }
    Ok(found)
}

#[utoipa::path(
    get,
    path = "/findings",
    tag = "Findings",
    responses((status = 200, description = "Tenant findings", body = Vec<AuditFinding>)),
    security(("bearerAuth" = []))
)]
async fn list_findings(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<AuditFinding>>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::AUDIT_FINDING, actions::READ)
        .await?;

    let rows = sqlx::query(
        "SELECT id, tenant_id, department_id, audit_program_id, title, description, category, status, created_by, created_at, updated_at FROM audit_findings WHERE tenant_id = ? ORDER BY created_at DESC",
    )
    .bind(auth.tenant_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    rows.iter().map(AuditFinding::from_row).collect::<Result<Vec<_>, _>>().map(Json)
}

#[utoipa::path(
    post,
    path = "/findings",
    tag = "Findings",
    request_body = FindingCreateRequest,
    responses(
        (status = 201, description = "Finding raised", body = AuditFinding),
        (status = 403, description = "Department or program crosses the tenant boundary"),
    ),
    security(("bearerAuth" = []))
)]
async fn create_finding(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<FindingCreateRequest>,
) -> Result<(StatusCode, Json<AuditFinding>), AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::AUDIT_FINDING, actions::CREATE)
        .await?;

    let mut refs = TenantRefs::new().department(req.department_id);
    if let Some(program_id) = req.audit_program_id {
        refs = refs.audit_program(program_id);
    }
    validate_same_tenant(&state.pool, &state.event_bus, auth.tenant_id, &refs).await?;

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        r#"
        INSERT INTO audit_findings (id, tenant_id, department_id, audit_program_id, title, description, category, status, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, NULL, 'PENDING', ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(auth.tenant_id.to_string())
    .bind(req.department_id.to_string())
    .bind(req.audit_program_id.map(|p| p.to_string()))
    .bind(&req.title)
    .bind(&req.description)
    .bind(auth.user_id.to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let created = finding::get_finding(&state.pool, id).await?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &created);

    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/findings/{finding_id}",
    tag = "Findings",
    params(("finding_id" = Uuid, Path, description = "Finding ID")),
    responses(
        (status = 200, description = "Finding detail", body = AuditFinding),
        (status = 404, description = "Finding not found"),
    ),
    security(("bearerAuth" = []))
)]
async fn get_finding(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(finding_id): Path<Uuid>,
) -> Result<Json<AuditFinding>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::AUDIT_FINDING, actions::READ)
        .await?;
    let found = finding_in_tenant(&state, finding_id, auth.tenant_id).await?;
    Ok(Json(found))
}

/// Accept, refuse, or escalate a finding
#[utoipa::path(
    put,
    path = "/findings/{finding_id}/status",
    tag = "Findings",
    params(("finding_id" = Uuid, Path, description = "Finding ID")),
    request_body = FindingStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = AuditFinding),
        (status = 400, description = "Illegal transition"),
    ),
    security(("bearerAuth" = []))
)]
async fn set_finding_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(finding_id): Path<Uuid>,
    Json(req): Json<FindingStatusRequest>,
) -> Result<Json<AuditFinding>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::AUDIT_FINDING, actions::REVIEW)
        .await?;
    finding_in_tenant(&state, finding_id, auth.tenant_id).await?;

    let updated =
        finding::set_status(&state.pool, &state.event_bus, finding_id, req.status, auth.user_id)
            .await?;
    Ok(Json(updated))
}

/// Categorize a finding; idempotent per category
#[utoipa::path(
    post,
    path = "/findings/{finding_id}/categorize",
    tag = "Findings",
    params(("finding_id" = Uuid, Path, description = "Finding ID")),
    request_body = CategorizeRequest,
    responses((status = 200, description = "Classification record", body = ClassificationRecord)),
    security(("bearerAuth" = []))
)]
async fn categorize_finding(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(finding_id): Path<Uuid>,
    Json(req): Json<CategorizeRequest>,
) -> Result<Json<ClassificationRecord>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::AUDIT_FINDING, actions::CATEGORIZE)
        .await?;
    finding_in_tenant(&state, finding_id, auth.tenant_id).await?;

    let record =
        categorize::categorize(&state.pool, &state.event_bus, finding_id, req.category, auth.user_id)
            .await?;
    Ok(Json(record))
}

#[utoipa::path(
    get,
    path = "/findings/{finding_id}/classification",
    tag = "Findings",
    params(("finding_id" = Uuid, Path, description = "Finding ID")),
    responses(
        (status = 200, description = "Current classification record, null if uncategorized"),
    ),
    security(("bearerAuth" = []))
)]
async fn get_classification(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(finding_id): Path<Uuid>,
) -> Result<Json<Option<ClassificationRecord>>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::AUDIT_FINDING, actions::READ)
        .await?;
    finding_in_tenant(&state, finding_id, auth.tenant_id).await?;

    let record = categorize::current_classification(&state.pool, finding_id).await?;
    Ok(Json(record))
}

/// Recreate a missing classification record for a categorized finding
#[utoipa::path(
    post,
    path = "/findings/{finding_id}/classification/repair",
    tag = "Findings",
    params(("finding_id" = Uuid, Path, description = "Finding ID")),
    responses((status = 200, description = "Classification after repair")),
    security(("bearerAuth" = []))
)]
async fn repair_classification(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(finding_id): Path<Uuid>,
) -> Result<Json<Option<ClassificationRecord>>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::AUDIT_FINDING, actions::CATEGORIZE)
        .await?;
    finding_in_tenant(&state, finding_id, auth.tenant_id).await?;

    let record =
        categorize::repair_classification(&state.pool, &state.event_bus, finding_id, auth.user_id)
            .await?;
    Ok(Json(record))
}

#[utoipa::path(
    get,
    path = "/findings/{finding_id}/corrective-action",
    tag = "Corrective Actions",
    params(("finding_id" = Uuid, Path, description = "Finding ID")),
    responses(
        (status = 200, description = "Corrective action state", body = CorrectiveAction),
        (status = 404, description = "Workflow not initiated"),
    ),
    security(("bearerAuth" = []))
)]
async fn get_corrective_action(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(finding_id): Path<Uuid>,
) -> Result<Json<CorrectiveAction>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::AUDIT_FINDING, actions::READ)
        .await?;
    finding_in_tenant(&state, finding_id, auth.tenant_id).await?;

    let ca = corrective::get_for_finding(&state.pool, finding_id).await?;
    Ok(Json(ca))
}

/// Step 1: commit the correction requirement
#[utoipa::path(
    post,
    path = "/findings/{finding_id}/corrective-action/commit",
    tag = "Corrective Actions",
    params(("finding_id" = Uuid, Path, description = "Finding ID")),
    request_body = CorrectionRequirementRequest,
    responses(
        (status = 200, description = "Requirement committed", body = corrective::StepResult),
        (status = 400, description = "Finding not eligible"),
    ),
    security(("bearerAuth" = []))
)]
async fn commit_correction_requirement(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(finding_id): Path<Uuid>,
    Json(req): Json<CorrectionRequirementRequest>,
) -> Result<Json<corrective::StepResult>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::CORRECTIVE_ACTION, actions::COMMIT)
        .await?;
    finding_in_tenant(&state, finding_id, auth.tenant_id).await?;

    let result = corrective::commit_correction_requirement(
        &state.pool,
        &state.event_bus,
        finding_id,
        auth.user_id,
        &req.text,
    )
    .await?;
    Ok(Json(result))
}

/// Step 2: submit the proposed corrective action
#[utoipa::path(
    post,
    path = "/findings/{finding_id}/corrective-action/proposal",
    tag = "Corrective Actions",
    params(("finding_id" = Uuid, Path, description = "Finding ID")),
    request_body = ProposedActionRequest,
    responses((status = 200, description = "Proposal submitted", body = corrective::StepResult)),
    security(("bearerAuth" = []))
)]
async fn submit_proposed_action(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(finding_id): Path<Uuid>,
    Json(req): Json<ProposedActionRequest>,
) -> Result<Json<corrective::StepResult>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::CORRECTIVE_ACTION, actions::SUBMIT)
        .await?;
    finding_in_tenant(&state, finding_id, auth.tenant_id).await?;

    let result = corrective::submit_proposed_action(
        &state.pool,
        &state.event_bus,
        finding_id,
        auth.user_id,
        &req.text,
    )
    .await?;
    Ok(Json(result))
}

/// Step 3: review the proposal's appropriateness
#[utoipa::path(
    post,
    path = "/findings/{finding_id}/corrective-action/review",
    tag = "Corrective Actions",
    params(("finding_id" = Uuid, Path, description = "Finding ID")),
    request_body = AppropriatenessReviewRequest,
    responses(
        (status = 200, description = "Review recorded", body = corrective::StepResult),
        (status = 400, description = "NO review without a comment"),
    ),
    security(("bearerAuth" = []))
)]
async fn review_appropriateness(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(finding_id): Path<Uuid>,
    Json(req): Json<AppropriatenessReviewRequest>,
) -> Result<Json<corrective::StepResult>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::CORRECTIVE_ACTION, actions::REVIEW)
        .await?;
    finding_in_tenant(&state, finding_id, auth.tenant_id).await?;

    let result = corrective::review_appropriateness(
        &state.pool,
        &state.event_bus,
        finding_id,
        auth.user_id,
        req.response,
        req.comment,
    )
    .await?;
    Ok(Json(result))
}

/// Step 4: record follow-up; drives the overall status
#[utoipa::path(
    post,
    path = "/findings/{finding_id}/corrective-action/follow-up",
    tag = "Corrective Actions",
    params(("finding_id" = Uuid, Path, description = "Finding ID")),
    request_body = FollowUpRequest,
    responses((status = 200, description = "Follow-up recorded", body = corrective::StepResult)),
    security(("bearerAuth" = []))
)]
async fn record_follow_up(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(finding_id): Path<Uuid>,
    Json(req): Json<FollowUpRequest>,
) -> Result<Json<corrective::StepResult>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::CORRECTIVE_ACTION, actions::FOLLOW_UP)
        .await?;
    finding_in_tenant(&state, finding_id, auth.tenant_id).await?;

    let result = corrective::record_follow_up(
        &state.pool,
        &state.event_bus,
        finding_id,
        auth.user_id,
        req.status,
        req.comment,
    )
    .await?;
    Ok(Json(result))
}

/// Step 5: verify effectiveness
#[utoipa::path(
    post,
    path = "/findings/{finding_id}/corrective-action/verify",
    tag = "Corrective Actions",
    params(("finding_id" = Uuid, Path, description = "Finding ID")),
    request_body = EffectivenessRequest,
    responses((status = 200, description = "Verification recorded", body = corrective::StepResult)),
    security(("bearerAuth" = []))
)]
async fn verify_effectiveness(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(finding_id): Path<Uuid>,
    Json(req): Json<EffectivenessRequest>,
) -> Result<Json<corrective::StepResult>, AppError> {
    require_permission(&state.pool, auth.user_id, auth.tenant_id, modules::CORRECTIVE_ACTION, actions::VERIFY)
        .await?;
    finding_in_tenant(&state, finding_id, auth.tenant_id).await?;

    let result = corrective::verify_effectiveness(
        &state.pool,
        &state.event_bus,
        finding_id,
        auth.user_id,
        req.response,
        req.comment,
    )
    .await?;
    Ok(Json(result))
}
