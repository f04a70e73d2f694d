//! Finding lifecycle and corrective-action workflow engine.

pub mod categorize;
pub mod corrective;
pub mod finding;
