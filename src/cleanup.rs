//! Discovery-based cleanup of resources left behind by an aborted run.
//!
//! A failed scenario leaves its scopes, pools, and instances in place. The
//! sweep finds the scopes a run would have created (by configured name),
//! collects their pools and instances, and hands everything to the
//! [`Teardown`] sequencer. It fails if a matching scope still exists
//! afterwards.

use thiserror::Error;
use tracing::info;

use crate::api::{ControlPlane, PoolRef, RemoteError, Scope, ScopeKind, ScopeRef};
use crate::config::E2eConfig;
use crate::poller::Poller;
use crate::teardown::{Teardown, TeardownError, TeardownSummary, TeardownTarget};

/// Names identifying the scopes a run creates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CleanupFilter {
    /// Organization name and repository owner.
    pub org_name: String,
    /// Repository name.
    pub repo_name: String,
}

impl CleanupFilter {
    /// Whether `scope` of `kind` was created by a run.
    #[must_use]
    pub fn matches(&self, kind: ScopeKind, scope: &Scope) -> bool {
        match kind {
            ScopeKind::Repository => {
                scope.owner.as_deref() == Some(self.org_name.as_str())
                    && scope.name == self.repo_name
            }
            ScopeKind::Organization => scope.name == self.org_name,
        }
    }
}

impl From<&E2eConfig> for CleanupFilter {
    fn from(config: &E2eConfig) -> Self {
        Self {
            org_name: config.org_name.clone(),
            repo_name: config.repo_name.clone(),
        }
    }
}

/// Errors raised by a cleanup sweep.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CleanupError {
    /// A discovery call failed.
    #[error("failed to {action}: {source}")]
    Remote {
        /// Discovery step.
        action: &'static str,
        /// Underlying failure.
        #[source]
        source: RemoteError,
    },
    /// Teardown of discovered resources failed.
    #[error(transparent)]
    Teardown(#[from] TeardownError),
    /// Matching scopes remain after the sweep.
    #[error("scopes remain after cleanup: {}", remaining.join(", "))]
    NotClean {
        /// Remaining scope identifiers.
        remaining: Vec<String>,
    },
}

/// Sweeps run-created scopes and everything beneath them.
pub struct Cleanup<'a, C: ControlPlane + ?Sized> {
    api: &'a C,
    poller: &'a Poller,
    filter: CleanupFilter,
}

impl<'a, C: ControlPlane + ?Sized> Cleanup<'a, C> {
    /// Creates a sweeper.
    pub const fn new(api: &'a C, poller: &'a Poller, filter: CleanupFilter) -> Self {
        Self {
            api,
            poller,
            filter,
        }
    }

    /// Tears down every matching scope of the given kinds.
    ///
    /// # Errors
    ///
    /// Returns [`CleanupError`] when discovery or teardown fails, or when a
    /// matching scope survives the sweep.
    pub async fn sweep(&self, kinds: &[ScopeKind]) -> Result<TeardownSummary, CleanupError> {
        let mut targets = Vec::new();
        let mut bare_scopes = Vec::new();

        for &kind in kinds {
            for scope in self.matching_scopes(kind).await? {
                let scope_ref = ScopeRef::new(kind, scope.id);
                let found = self.targets_for(&scope_ref).await?;
                info!(scope = %scope_ref, pools = found.len(), "discovered scope");
                if found.is_empty() {
                    bare_scopes.push(scope_ref);
                } else {
                    targets.extend(found);
                }
            }
        }

        let teardown = Teardown::new(self.api, self.poller);
        let mut summary = teardown.run(&targets).await?;
        teardown.delete_scopes(&bare_scopes, &mut summary).await?;

        let mut remaining = Vec::new();
        for &kind in kinds {
            remaining.extend(
                self.matching_scopes(kind)
                    .await?
                    .into_iter()
                    .map(|scope| ScopeRef::new(kind, scope.id).to_string()),
            );
        }
        if !remaining.is_empty() {
            return Err(CleanupError::NotClean { remaining });
        }

        Ok(summary)
    }

    async fn matching_scopes(&self, kind: ScopeKind) -> Result<Vec<Scope>, CleanupError> {
        let scopes = self
            .api
            .list_scopes(kind)
            .await
            .map_err(|source| CleanupError::Remote {
                action: "list scopes",
                source,
            })?;
        Ok(scopes
            .into_iter()
            .filter(|scope| self.filter.matches(kind, scope))
            .collect())
    }

    async fn targets_for(&self, scope: &ScopeRef) -> Result<Vec<TeardownTarget>, CleanupError> {
        let pools = self
            .api
            .list_scope_pools(scope)
            .await
            .map_err(|source| CleanupError::Remote {
                action: "list scope pools",
                source,
            })?;
        if pools.is_empty() {
            return Ok(Vec::new());
        }
        let instances = self
            .api
            .list_scope_instances(scope)
            .await
            .map_err(|source| CleanupError::Remote {
                action: "list scope instances",
                source,
            })?;

        Ok(pools
            .into_iter()
            .map(|pool| TeardownTarget {
                instances: instances
                    .iter()
                    .filter(|instance| instance.pool_id == pool.id)
                    .map(|instance| instance.name.clone())
                    .collect(),
                pool: PoolRef::Scoped {
                    scope: scope.clone(),
                    pool_id: pool.id,
                },
                scope: Some(scope.clone()),
            })
            .collect())
    }
}
