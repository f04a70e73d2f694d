pub mod corrective;
pub mod department;
pub mod finding;
pub mod notification;
pub mod rbac;
pub mod tenant;
pub mod user;
