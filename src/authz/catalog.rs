//! The global permission catalog.
//!
//! `module:action` strings are the wire contract shared with frontend route
//! guards; renaming an entry is a breaking change across the whole system.
//! The catalog is closed: unknown pairs are rejected at the API boundary and
//! `provisioning::sync_catalog` upserts exactly this table into storage.

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

pub mod modules {
    pub const AUDIT_PROGRAM: &str = "auditProgram";
    pub const AUDIT: &str = "audit";
    pub const AUDIT_FINDING: &str = "auditFinding";
    pub const CORRECTIVE_ACTION: &str = "correctiveAction";
    pub const USER: &str = "user";
    pub const ROLE: &str = "role";
    pub const DEPARTMENT: &str = "department";
    pub const TENANT: &str = "tenant";
    pub const DOCUMENT: &str = "document";
    pub const NOTIFICATION: &str = "notification";
}

pub mod actions {
    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const MANAGE: &str = "manage";
    pub const COMMIT: &str = "commit";
    pub const APPROVE: &str = "approve";
    pub const CATEGORIZE: &str = "categorize";
    pub const REVIEW: &str = "review";
    pub const SUBMIT: &str = "submit";
    pub const FOLLOW_UP: &str = "followUp";
    pub const VERIFY: &str = "verify";
    pub const APPLY: &str = "apply";
}

/// A `(module, action)` capability tag from the global catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    pub module: String,
    pub action: String,
}

impl PermissionKey {
    pub fn new(module: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.split_once(':') {
            Some((module, action)) if !module.is_empty() && !action.is_empty() => {
                Ok(Self::new(module, action))
            }
            _ => Err(AppError::bad_request(format!(
                "malformed permission key, expected module:action: {value}"
            ))),
        }
    }
}

impl std::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.module, self.action)
    }
}

pub struct CatalogEntry {
    pub module: &'static str,
    pub action: &'static str,
    pub description: &'static str,
}

const fn entry(module: &'static str, action: &'static str, description: &'static str) -> CatalogEntry {
    CatalogEntry {
        module,
        action,
        description,
    }
}

pub const CATALOG: &[CatalogEntry] = &[
    entry(modules::AUDIT_PROGRAM, actions::CREATE, "Create audit programs"),
    entry(modules::AUDIT_PROGRAM, actions::READ, "View audit programs"),
    entry(modules::AUDIT_PROGRAM, actions::COMMIT, "Commit an audit program for approval"),
    entry(modules::AUDIT_PROGRAM, actions::APPROVE, "Approve a committed audit program"),
    entry(modules::AUDIT, actions::CREATE, "Schedule audits within a program"),
    entry(modules::AUDIT, actions::READ, "View audits"),
    entry(modules::AUDIT_FINDING, actions::CREATE, "Raise audit findings"),
    entry(modules::AUDIT_FINDING, actions::READ, "View audit findings"),
    entry(modules::AUDIT_FINDING, actions::CATEGORIZE, "Categorize audit findings"),
    entry(modules::AUDIT_FINDING, actions::REVIEW, "Accept or refuse audit findings"),
    entry(modules::CORRECTIVE_ACTION, actions::COMMIT, "Commit a correction requirement"),
    entry(modules::CORRECTIVE_ACTION, actions::SUBMIT, "Submit a proposed corrective action"),
    entry(modules::CORRECTIVE_ACTION, actions::REVIEW, "Review corrective action appropriateness"),
    entry(modules::CORRECTIVE_ACTION, actions::FOLLOW_UP, "Record corrective action follow-up"),
    entry(modules::CORRECTIVE_ACTION, actions::VERIFY, "Verify corrective action effectiveness"),
    entry(modules::USER, actions::READ, "View users"),
    entry(modules::USER, actions::MANAGE, "Create and manage users"),
    entry(modules::ROLE, actions::READ, "View roles and their permissions"),
    entry(modules::ROLE, actions::MANAGE, "Create roles and assign permissions"),
    entry(modules::DEPARTMENT, actions::READ, "View departments"),
    entry(modules::DEPARTMENT, actions::MANAGE, "Create departments and assign HODs"),
    entry(modules::TENANT, actions::MANAGE, "Administer tenant settings"),
    entry(modules::DOCUMENT, actions::READ, "View controlled documents"),
    entry(modules::DOCUMENT, actions::APPLY, "Apply document change requests"),
    entry(modules::NOTIFICATION, actions::READ, "View own notifications"),
];

pub fn is_known(module: &str, action: &str) -> bool {
    CATALOG.iter().any(|e| e.module == module && e.action == action)
}
