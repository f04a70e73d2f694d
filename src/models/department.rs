use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::Loggable;
use crate::utils::parse_uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Campus {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campus {
    pub fn from_row(row: &SqliteRow) -> Result<Self, AppError> {
        Ok(Campus {
            id: parse_uuid(row.try_get("id")?, "campuses.id")?,
            tenant_id: parse_uuid(row.try_get("tenant_id")?, "campuses.tenant_id")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Department {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub code: String,
    pub campus_id: Option<Uuid>,
    /// Weak reference to the Head of Department user; not ownership
    pub hod_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Department {
    pub fn from_row(row: &SqliteRow) -> Result<Self, AppError> {
        let campus_id: Option<String> = row.try_get("campus_id")?;
        let hod_id: Option<String> = row.try_get("hod_id")?;
        Ok(Department {
            id: parse_uuid(row.try_get("id")?, "departments.id")?,
            tenant_id: parse_uuid(row.try_get("tenant_id")?, "departments.tenant_id")?,
            name: row.try_get("name")?,
            code: row.try_get("code")?,
            campus_id: campus_id
                .map(|s| parse_uuid(&s, "departments.campus_id"))
                .transpose()?,
            hod_id: hod_id.map(|s| parse_uuid(&s, "departments.hod_id")).transpose()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Loggable for Department {
    fn entity_type() -> &'static str {
        "department"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn tenant_id(&self) -> Option<Uuid> {
        Some(self.tenant_id)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DepartmentCreateRequest {
    #[schema(example = "Mechanical Engineering")]
    pub name: String,
    #[schema(example = "MECH")]
    pub code: String,
    pub campus_id: Option<Uuid>,
}
