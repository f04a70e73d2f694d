pub mod auth;
pub mod findings;
pub mod health;
pub mod notifications;
pub mod org;
pub mod rbac;
