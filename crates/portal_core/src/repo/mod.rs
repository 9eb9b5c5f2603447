//! Repository layer: lifecycle-gated access to alerts and expressions.
//!
//! # Responsibility
//! - Define the repository contracts consumed by callers.
//! - Isolate SQLite query details behind per-backend query generators.
//!
//! # Invariants
//! - Every operation except `open` requires the repository to be open.
//! - Each upsert is a single all-or-nothing transaction.
//! - Malformed stored rows are logged and read as absent, never as errors.

pub mod alert_repo;
pub mod error;
pub mod expression_repo;
pub mod lifecycle;
pub mod maintenance;
pub mod query;

/// Whether `add_or_update` inserted a new record or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl UpsertOutcome {
    pub fn is_created(self) -> bool {
        matches!(self, Self::Created)
    }
}
