//! Authorization module - permission catalog, resolver and tenant guard
//!
//! This module implements the multi-tenant RBAC model:
//! - Global permission catalog of `module:action` pairs
//! - Tenant-scoped roles bound to users globally or per department
//! - Deny-overrides-allow permission resolution
//! - Cross-tenant reference guard invoked before multi-entity writes

pub mod catalog;
pub mod guard;
pub mod resolver;

pub use catalog::{is_known, PermissionKey, CATALOG};
pub use guard::{validate_same_tenant, TenantRefs};
pub use resolver::{
    has_permission, require_permission, resolve_permissions, resolve_recipients, Recipient,
    RoleBinding,
};

/// Well-known role names, seeded for every tenant at provisioning time.
pub mod role_names {
    pub const SYSTEM_ADMIN: &str = "SYSTEM_ADMIN";
    /// Management Representative - commits audit programs for approval
    pub const MR: &str = "MR";
    /// Head of Department
    pub const HOD: &str = "HOD";
    pub const AUDITOR: &str = "AUDITOR";
    pub const PRINCIPAL: &str = "PRINCIPAL";
    pub const STAFF: &str = "STAFF";
}
