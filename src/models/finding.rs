use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::Loggable;
use crate::utils::parse_uuid;

/// Classification of an audit finding. A finding holds at most one current
/// classification record, the one matching this category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingCategory {
    Compliance,
    Improvement,
    NonConformity,
}

impl FindingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCategory::Compliance => "COMPLIANCE",
            FindingCategory::Improvement => "IMPROVEMENT",
            FindingCategory::NonConformity => "NON_CONFORMITY",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "COMPLIANCE" => Ok(FindingCategory::Compliance),
            "IMPROVEMENT" => Ok(FindingCategory::Improvement),
            "NON_CONFORMITY" => Ok(FindingCategory::NonConformity),
            other => Err(AppError::internal(format!("unknown finding category: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingStatus {
    Pending,
    Accepted,
    Refused,
    UnderReview,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::Pending => "PENDING",
            FindingStatus::Accepted => "ACCEPTED",
            FindingStatus::Refused => "REFUSED",
            FindingStatus::UnderReview => "UNDER_REVIEW",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "PENDING" => Ok(FindingStatus::Pending),
            "ACCEPTED" => Ok(FindingStatus::Accepted),
            "REFUSED" => Ok(FindingStatus::Refused),
            "UNDER_REVIEW" => Ok(FindingStatus::UnderReview),
            other => Err(AppError::internal(format!("unknown finding status: {other}"))),
        }
    }

    /// Legal acceptance-workflow transitions.
    pub fn can_transition_to(&self, next: FindingStatus) -> bool {
        matches!(
            (self, next),
            (FindingStatus::Pending, FindingStatus::Accepted)
                | (FindingStatus::Pending, FindingStatus::Refused)
                | (FindingStatus::Accepted, FindingStatus::UnderReview)
                | (FindingStatus::Refused, FindingStatus::UnderReview)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditFinding {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub department_id: Uuid,
    pub audit_program_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<FindingCategory>,
    pub status: FindingStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuditFinding {
    pub fn from_row(row: &SqliteRow) -> Result<Self, AppError> {
        let category: Option<String> = row.try_get("category")?;
        let audit_program_id: Option<String> = row.try_get("audit_program_id")?;
        Ok(AuditFinding {
            id: parse_uuid(row.try_get("id")?, "audit_findings.id")?,
            tenant_id: parse_uuid(row.try_get("tenant_id")?, "audit_findings.tenant_id")?,
            department_id: parse_uuid(row.try_get("department_id")?, "audit_findings.department_id")?,
            audit_program_id: audit_program_id
                .map(|s| parse_uuid(&s, "audit_findings.audit_program_id"))
                .transpose()?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            category: category.map(|c| FindingCategory::parse(&c)).transpose()?,
            status: FindingStatus::parse(row.try_get("status")?)?,
            created_by: parse_uuid(row.try_get("created_by")?, "audit_findings.created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Loggable for AuditFinding {
    fn entity_type() -> &'static str {
        "finding"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn tenant_id(&self) -> Option<Uuid> {
        Some(self.tenant_id)
    }
}

/// The per-category record a finding owns once categorized. All three
/// classification tables share this shape; non-conformities carry extra
/// workflow fields surfaced separately.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClassificationRecord {
    pub id: Uuid,
    pub finding_id: Uuid,
    pub category: FindingCategory,
    pub title: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ClassificationRecord {
    pub fn from_row(row: &SqliteRow, category: FindingCategory) -> Result<Self, AppError> {
        Ok(ClassificationRecord {
            id: parse_uuid(row.try_get("id")?, "classification.id")?,
            finding_id: parse_uuid(row.try_get("finding_id")?, "classification.finding_id")?,
            category,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            created_by: parse_uuid(row.try_get("created_by")?, "classification.created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FindingCreateRequest {
    pub department_id: Uuid,
    pub audit_program_id: Option<Uuid>,
    #[schema(example = "Calibration records missing for lab equipment")]
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CategorizeRequest {
    pub category: FindingCategory,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FindingStatusRequest {
    pub status: FindingStatus,
}
