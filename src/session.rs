//! Per-scope context threaded through a scenario run.
//!
//! Each provisioned scope gets one [`ScopeSession`] that records the remote
//! references produced by earlier steps. Later steps read them through the
//! accessors, which turn a skipped step into a precondition error instead of
//! acting on an unset identifier.

use serde::Serialize;
use thiserror::Error;

use crate::api::{PoolRef, ScopeRef};

/// Raised when a step needs a reference an earlier step never recorded.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{label}: no {what} recorded by an earlier step")]
pub struct MissingReference {
    /// Label of the session that lacks the reference.
    pub label: String,
    /// Name of the missing reference.
    pub what: &'static str,
}

/// References held for one scope during a run.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ScopeSession {
    /// Label used in logs and reports.
    pub label: String,
    /// Provisioned scope.
    pub scope: Option<ScopeRef>,
    /// Pool provisioned under the scope.
    pub pool: Option<PoolRef>,
    /// First instance observed in the pool.
    pub instance_name: Option<String>,
}

impl ScopeSession {
    /// Starts an empty session.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// The provisioned scope.
    ///
    /// # Errors
    ///
    /// Returns [`MissingReference`] when no scope has been recorded.
    pub fn scope(&self) -> Result<&ScopeRef, MissingReference> {
        self.scope.as_ref().ok_or_else(|| self.missing("scope"))
    }

    /// The provisioned pool.
    ///
    /// # Errors
    ///
    /// Returns [`MissingReference`] when no pool has been recorded.
    pub fn pool(&self) -> Result<&PoolRef, MissingReference> {
        self.pool.as_ref().ok_or_else(|| self.missing("pool"))
    }

    /// Name of the observed instance.
    ///
    /// # Errors
    ///
    /// Returns [`MissingReference`] when no instance has been observed.
    pub fn instance_name(&self) -> Result<&str, MissingReference> {
        self.instance_name
            .as_deref()
            .ok_or_else(|| self.missing("instance"))
    }

    fn missing(&self, what: &'static str) -> MissingReference {
        MissingReference {
            label: self.label.clone(),
            what,
        }
    }
}
