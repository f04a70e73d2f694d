use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};
use crate::utils::parse_uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantStatus {
    Active,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "ACTIVE",
            TenantStatus::Suspended => "SUSPENDED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "ACTIVE" => Ok(TenantStatus::Active),
            "SUSPENDED" => Ok(TenantStatus::Suspended),
            other => Err(AppError::internal(format!("unknown tenant status: {other}"))),
        }
    }
}

/// An isolated customer/institution. Every role, department, user and finding
/// row belongs to exactly one tenant; only the permission catalog is shared.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn from_row(row: &SqliteRow) -> Result<Self, AppError> {
        Ok(Tenant {
            id: parse_uuid(row.try_get("id")?, "tenants.id")?,
            name: row.try_get("name")?,
            domain: row.try_get("domain")?,
            status: TenantStatus::parse(row.try_get("status")?)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Loggable for Tenant {
    fn entity_type() -> &'static str {
        "tenant"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn tenant_id(&self) -> Option<Uuid> {
        Some(self.id)
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}
