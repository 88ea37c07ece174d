//! Database module: row models and SQL repositories.
//!
//! - `model`: typed rows returned and accepted by repositories.
//! - `repo`: SQL-only functions over the SQLite pool.
//!
//! Callers import from `poi_sync::db`; the repository API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{
    AuditEntry, MediaAttachment, NewAttachment, NewSurveyResponse, PendingSync, SurveyResponse,
};
