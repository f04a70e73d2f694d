use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};
use crate::utils::parse_uuid;

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_default: bool,
    pub is_removable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn from_row(row: &SqliteRow) -> Result<Self, AppError> {
        Ok(Role {
            id: parse_uuid(row.try_get("id")?, "roles.id")?,
            tenant_id: parse_uuid(row.try_get("tenant_id")?, "roles.tenant_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            is_default: row.try_get("is_default")?,
            is_removable: row.try_get("is_removable")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Loggable for Role {
    fn entity_type() -> &'static str {
        "role"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn tenant_id(&self) -> Option<Uuid> {
        Some(self.tenant_id)
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "HOD")]
    pub name: String,
    #[schema(example = "Head of Department")]
    pub description: Option<String>,
}

// =============================================================================
// PERMISSION (global catalog)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    #[schema(example = "auditProgram")]
    pub module: String,
    #[schema(example = "commit")]
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn from_row(row: &SqliteRow) -> Result<Self, AppError> {
        Ok(Permission {
            id: parse_uuid(row.try_get("id")?, "permissions.id")?,
            module: row.try_get("module")?,
            action: row.try_get("action")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// The `module:action` wire-contract string.
    pub fn key(&self) -> String {
        format!("{}:{}", self.module, self.action)
    }
}

impl Loggable for Permission {
    fn entity_type() -> &'static str {
        "permission"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

// =============================================================================
// ROLE-PERMISSION ASSIGNMENT (with explicit deny)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    /// false is an explicit deny, which overrides any allow on other roles
    pub allowed: bool,
    pub created_at: DateTime<Utc>,
}

impl Loggable for RolePermission {
    fn entity_type() -> &'static str {
        "role_permission"
    }
    fn subject_id(&self) -> Uuid {
        self.role_id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPermissionToRoleRequest {
    pub permission_id: Uuid,
    /// Defaults to allow; pass false to record an explicit deny
    #[serde(default = "default_allowed")]
    pub allowed: bool,
}

fn default_allowed() -> bool {
    true
}

// =============================================================================
// USER-ROLE BINDINGS
// =============================================================================

/// Global (tenant-wide) binding.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRole {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Loggable for UserRole {
    fn entity_type() -> &'static str {
        "user_role"
    }
    fn subject_id(&self) -> Uuid {
        self.user_id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

/// Department-scoped binding.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserDepartmentRole {
    pub user_id: Uuid,
    pub department_id: Uuid,
    pub role_id: Uuid,
    pub is_primary_department: bool,
    pub is_primary_role: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Loggable for UserDepartmentRole {
    fn entity_type() -> &'static str {
        "user_department_role"
    }
    fn subject_id(&self) -> Uuid {
        self.user_id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
    /// When set, creates a department-scoped binding instead of a global one
    pub department_id: Option<Uuid>,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub roles: Vec<String>,
    /// Resolved `module:action` strings after deny-overrides-allow
    pub permissions: Vec<String>,
}
