//! Administrative operations kept off the repository contracts.
//!
//! Nothing here is re-exported from the crate root; callers opt in with
//! `use portal_core::repo::maintenance::BulkClear`.

use crate::repo::error::RepoResult;

/// Bulk reset used by test fixtures and administrative tooling.
pub trait BulkClear {
    /// Deletes every record of the entity in one transaction and returns how
    /// many were removed. Requires the repository to be open.
    fn delete_all(&self) -> RepoResult<u64>;
}
