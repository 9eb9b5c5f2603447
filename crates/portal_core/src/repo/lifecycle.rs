//! Open/closed lifecycle gate shared by repositories.
//!
//! # Invariants
//! - Initial state is `Closed`.
//! - `open` succeeds only from `Closed`; `close` only from `Open`.
//! - Transitions are a single compare-and-swap, so exactly one of several
//!   racing callers wins.

use crate::repo::error::{RepoError, RepoResult};
use log::debug;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState {
    Closed,
    Open,
}

impl RepositoryState {
    fn from_flag(is_open: bool) -> Self {
        if is_open {
            Self::Open
        } else {
            Self::Closed
        }
    }
}

impl Display for RepositoryState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Atomic open flag owned by one repository instance.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    repository: &'static str,
    is_open: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn new(repository: &'static str) -> Self {
        Self {
            repository,
            is_open: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> RepositoryState {
        RepositoryState::from_flag(self.is_open.load(Ordering::Acquire))
    }

    pub(crate) fn open(&self) -> RepoResult<()> {
        self.transition("open", RepositoryState::Closed, RepositoryState::Open)
    }

    pub(crate) fn close(&self) -> RepoResult<()> {
        self.transition("close", RepositoryState::Open, RepositoryState::Closed)
    }

    /// Fails with `InvalidState` unless the repository is open.
    pub(crate) fn ensure_open(&self, operation: &'static str) -> RepoResult<()> {
        match self.state() {
            RepositoryState::Open => Ok(()),
            actual => Err(self.violation(operation, RepositoryState::Open, actual)),
        }
    }

    fn transition(
        &self,
        operation: &'static str,
        from: RepositoryState,
        to: RepositoryState,
    ) -> RepoResult<()> {
        let current = from == RepositoryState::Open;
        let next = to == RepositoryState::Open;
        match self
            .is_open
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                debug!(
                    "event=repository_{operation} module={} status=ok",
                    self.repository
                );
                Ok(())
            }
            Err(actual) => Err(self.violation(operation, from, RepositoryState::from_flag(actual))),
        }
    }

    fn violation(
        &self,
        operation: &'static str,
        expected: RepositoryState,
        actual: RepositoryState,
    ) -> RepoError {
        RepoError::InvalidState {
            repository: self.repository,
            operation,
            expected,
            actual,
        }
    }
}
