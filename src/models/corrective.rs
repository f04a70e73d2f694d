use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::Loggable;
use crate::utils::parse_uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectiveActionStatus {
    Open,
    InProgress,
    Completed,
    Verified,
    Closed,
}

impl CorrectiveActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectiveActionStatus::Open => "OPEN",
            CorrectiveActionStatus::InProgress => "IN_PROGRESS",
            CorrectiveActionStatus::Completed => "COMPLETED",
            CorrectiveActionStatus::Verified => "VERIFIED",
            CorrectiveActionStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "OPEN" => Ok(CorrectiveActionStatus::Open),
            "IN_PROGRESS" => Ok(CorrectiveActionStatus::InProgress),
            "COMPLETED" => Ok(CorrectiveActionStatus::Completed),
            "VERIFIED" => Ok(CorrectiveActionStatus::Verified),
            "CLOSED" => Ok(CorrectiveActionStatus::Closed),
            other => Err(AppError::internal(format!(
                "unknown corrective action status: {other}"
            ))),
        }
    }

    /// The only predicate reporting surfaces may rely on.
    pub fn is_resolved(&self) -> bool {
        matches!(self, CorrectiveActionStatus::Closed | CorrectiveActionStatus::Verified)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FollowUpStatus {
    ActionFullyCompleted,
    ActionPartiallyCompleted,
    NoActionTaken,
}

impl FollowUpStatus {
    /// Overall-status mapping for the follow-up step.
    pub fn overall_status(&self) -> CorrectiveActionStatus {
        match self {
            FollowUpStatus::ActionFullyCompleted => CorrectiveActionStatus::Completed,
            FollowUpStatus::ActionPartiallyCompleted => CorrectiveActionStatus::InProgress,
            FollowUpStatus::NoActionTaken => CorrectiveActionStatus::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewResponse {
    Yes,
    No,
}

// Sub-step payloads, stored as JSON on the corrective_actions row.

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CorrectionRequirement {
    pub text: String,
    pub committed_by: Uuid,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProposedAction {
    pub text: String,
    pub submitted_by: Uuid,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AppropriatenessReview {
    pub response: ReviewResponse,
    /// Required when the response is NO
    pub comment: Option<String>,
    pub reviewed_by: Uuid,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FollowUpAction {
    pub status: FollowUpStatus,
    pub comment: Option<String>,
    pub recorded_by: Uuid,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActionEffectiveness {
    pub response: ReviewResponse,
    pub comment: Option<String>,
    pub verified_by: Uuid,
    pub verified_at: DateTime<Utc>,
}

/// The five-step remediation workflow attached to one non-conformity.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CorrectiveAction {
    pub id: Uuid,
    pub non_conformity_id: Uuid,
    pub status: CorrectiveActionStatus,
    pub correction_requirement: Option<CorrectionRequirement>,
    pub proposed_action: Option<ProposedAction>,
    pub appropriateness_review: Option<AppropriatenessReview>,
    pub follow_up_action: Option<FollowUpAction>,
    pub action_effectiveness: Option<ActionEffectiveness>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<T>, AppError> {
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        None => Ok(None),
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| AppError::internal(format!("malformed JSON in column {column}: {e}"))),
    }
}

impl CorrectiveAction {
    pub fn from_row(row: &SqliteRow) -> Result<Self, AppError> {
        Ok(CorrectiveAction {
            id: parse_uuid(row.try_get("id")?, "corrective_actions.id")?,
            non_conformity_id: parse_uuid(
                row.try_get("non_conformity_id")?,
                "corrective_actions.non_conformity_id",
            )?,
            status: CorrectiveActionStatus::parse(row.try_get("status")?)?,
            correction_requirement: json_column(row, "correction_requirement")?,
            proposed_action: json_column(row, "proposed_action")?,
            appropriateness_review: json_column(row, "appropriateness_review")?,
            follow_up_action: json_column(row, "follow_up_action")?,
            action_effectiveness: json_column(row, "action_effectiveness")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Loggable for CorrectiveAction {
    fn entity_type() -> &'static str {
        "corrective_action"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

// Request payloads for the five step endpoints.

#[derive(Debug, Deserialize, ToSchema)]
pub struct CorrectionRequirementRequest {
    #[schema(example = "Restore and back-fill the calibration log")]
    pub text: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProposedActionRequest {
    #[schema(example = "Introduce a monthly calibration checklist owned by the lab technician")]
    pub text: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AppropriatenessReviewRequest {
    pub response: ReviewResponse,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FollowUpRequest {
    pub status: FollowUpStatus,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EffectivenessRequest {
    pub response: ReviewResponse,
    pub comment: Option<String>,
}
