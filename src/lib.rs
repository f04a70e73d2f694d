//! Multi-tenant quality-management backend: RBAC with deny-overrides-allow
//! resolution, tenant isolation guarding, audit-finding categorization and
//! the five-step corrective-action workflow.

pub mod app;
pub mod authz;
pub mod db;
pub mod errors;
pub mod events;
pub mod jwt;
pub mod models;
pub mod notify;
pub mod provisioning;
pub mod routes;
pub mod utils;
pub mod workflow;

pub use app::{create_app, AppState};
