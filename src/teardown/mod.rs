//! Ordered teardown of pools, their instances, and their parent scopes.
//!
//! The control plane never cascades deletes, so teardown walks a fixed stage
//! sequence. Every target moves through a stage before any target enters the
//! next one:
//!
//! 1. `Active`: disable the pool so no new instances are spawned.
//! 2. `Disabling`: re-read each pool, delete every instance it lists or the
//!    caller knew about, and wait for each name to disappear from the global
//!    instance listing.
//! 3. `Draining`: wait until the pool reports no instances.
//! 4. `Drained`: delete the pool.
//! 5. `PoolDeleted`: delete each distinct parent scope once.
//! 6. `Done`.
//!
//! Targets naming the same pool are merged before the first stage, so each
//! pool is disabled, drained, and deleted once.
//!
//! The first failure aborts the sequence and leaves the remaining resources in
//! place.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::api::{ControlPlane, PoolRef, RemoteError, ScopeRef, UpdatePoolParams};
use crate::poller::predicates::{instance_absent, pool_drained};
use crate::poller::{PollError, Poller};

/// Stage of the teardown state machine.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum TeardownStage {
    /// Pools are still enabled.
    Active,
    /// Pools are disabled; instances are being deleted.
    Disabling,
    /// Instance deletes issued; waiting for pools to empty.
    Draining,
    /// Pools are empty and can be deleted.
    Drained,
    /// Pools are gone; parent scopes are deleted next.
    PoolDeleted,
    /// Terminal stage.
    Done,
}

impl TeardownStage {
    /// Stage that follows `self`. `Done` is terminal.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Active => Self::Disabling,
            Self::Disabling => Self::Draining,
            Self::Draining => Self::Drained,
            Self::Drained => Self::PoolDeleted,
            Self::PoolDeleted | Self::Done => Self::Done,
        }
    }

    /// Stable lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabling => "disabling",
            Self::Draining => "draining",
            Self::Drained => "drained",
            Self::PoolDeleted => "pool_deleted",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TeardownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pool to tear down, the instances known to belong to it, and its parent.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TeardownTarget {
    /// Pool to disable, drain, and delete.
    pub pool: PoolRef,
    /// Instance names to delete explicitly.
    pub instances: Vec<String>,
    /// Scope to delete once all pools are gone.
    pub scope: Option<ScopeRef>,
}

/// What a completed teardown removed, in call order.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TeardownSummary {
    /// Pools disabled.
    pub disabled_pools: Vec<PoolRef>,
    /// Instance names deleted.
    pub deleted_instances: Vec<String>,
    /// Pools deleted.
    pub deleted_pools: Vec<PoolRef>,
    /// Scopes deleted.
    pub deleted_scopes: Vec<ScopeRef>,
}

/// Errors that abort a teardown.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TeardownError {
    /// A destructive call failed.
    #[error("failed to {action} {resource}: {source}")]
    Remote {
        /// Action attempted.
        action: &'static str,
        /// Resource the action addressed.
        resource: String,
        /// Underlying failure.
        #[source]
        source: RemoteError,
    },
    /// A wait did not complete.
    #[error("teardown stalled while {stage}: {source}")]
    Wait {
        /// Stage that was waiting.
        stage: TeardownStage,
        /// Underlying failure.
        #[source]
        source: PollError,
    },
}

/// Runs the teardown state machine over a set of targets.
pub struct Teardown<'a, C: ControlPlane + ?Sized> {
    api: &'a C,
    poller: &'a Poller,
}

impl<'a, C: ControlPlane + ?Sized> Teardown<'a, C> {
    /// Creates a sequencer using `poller` for every wait.
    pub const fn new(api: &'a C, poller: &'a Poller) -> Self {
        Self { api, poller }
    }

    /// Tears down every target, stage by stage.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError`] on the first failed call or wait.
    pub async fn run(&self, targets: &[TeardownTarget]) -> Result<TeardownSummary, TeardownError> {
        let pools = distinct_targets(targets);
        let mut summary = TeardownSummary::default();
        let mut stage = TeardownStage::Active;

        while stage != TeardownStage::Done {
            info!(%stage, targets = pools.len(), "teardown stage");
            match stage {
                TeardownStage::Active => self.disable_pools(&pools, &mut summary).await?,
                TeardownStage::Disabling => self.delete_instances(&pools, &mut summary).await?,
                TeardownStage::Draining => self.await_drain(&pools).await?,
                TeardownStage::Drained => self.delete_pools(&pools, &mut summary).await?,
                TeardownStage::PoolDeleted => {
                    let scopes = distinct_scopes(&pools);
                    self.delete_scopes(&scopes, &mut summary).await?;
                }
                TeardownStage::Done => {}
            }
            stage = stage.next();
        }

        info!(
            pools = summary.deleted_pools.len(),
            instances = summary.deleted_instances.len(),
            scopes = summary.deleted_scopes.len(),
            "teardown complete"
        );
        Ok(summary)
    }

    /// Deletes scopes that own no pools, recording them in `summary`.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError::Remote`] when a delete fails.
    pub async fn delete_scopes(
        &self,
        scopes: &[ScopeRef],
        summary: &mut TeardownSummary,
    ) -> Result<(), TeardownError> {
        for scope in scopes {
            self.api
                .delete_scope(scope)
                .await
                .map_err(|source| remote("delete", scope.to_string(), source))?;
            info!(%scope, "deleted scope");
            summary.deleted_scopes.push(scope.clone());
        }
        Ok(())
    }

    async fn disable_pools(
        &self,
        targets: &[TeardownTarget],
        summary: &mut TeardownSummary,
    ) -> Result<(), TeardownError> {
        let disable = UpdatePoolParams::disable();
        for target in targets {
            self.api
                .update_pool(&target.pool, &disable)
                .await
                .map_err(|source| remote("disable", target.pool.to_string(), source))?;
            info!(pool = %target.pool, "disabled pool");
            summary.disabled_pools.push(target.pool.clone());
        }
        Ok(())
    }

    async fn delete_instances(
        &self,
        targets: &[TeardownTarget],
        summary: &mut TeardownSummary,
    ) -> Result<(), TeardownError> {
        for target in targets {
            let pool = self
                .api
                .get_pool(&target.pool)
                .await
                .map_err(|source| remote("read", target.pool.to_string(), source))?;
            let mut names = target.instances.clone();
            merge_names(&mut names, pool.instances.into_iter().map(|instance| instance.name));
            for name in &names {
                self.delete_instance(name, summary).await?;
            }
        }
        Ok(())
    }

    async fn delete_instance(
        &self,
        name: &str,
        summary: &mut TeardownSummary,
    ) -> Result<(), TeardownError> {
        self.api
            .delete_instance(name)
            .await
            .map_err(|source| remote("delete", format!("instance {name}"), source))?;
        self.poller
            .wait_for(
                &format!("instance {name} to disappear"),
                || self.api.list_instances(),
                instance_absent(name),
            )
            .await
            .map_err(|source| TeardownError::Wait {
                stage: TeardownStage::Disabling,
                source,
            })?;
        info!(instance = %name, "deleted instance");
        summary.deleted_instances.push(name.to_owned());
        Ok(())
    }

    async fn await_drain(&self, targets: &[TeardownTarget]) -> Result<(), TeardownError> {
        for target in targets {
            let drained = self
                .poller
                .wait_for(
                    &format!("{} to drain", target.pool),
                    || self.api.get_pool(&target.pool),
                    pool_drained,
                )
                .await
                .map_err(|source| TeardownError::Wait {
                    stage: TeardownStage::Draining,
                    source,
                })?;
            info!(pool = %target.pool, attempts = drained.attempts, "pool drained");
        }
        Ok(())
    }

    async fn delete_pools(
        &self,
        targets: &[TeardownTarget],
        summary: &mut TeardownSummary,
    ) -> Result<(), TeardownError> {
        for target in targets {
            self.api
                .delete_pool(&target.pool)
                .await
                .map_err(|source| remote("delete", target.pool.to_string(), source))?;
            info!(pool = %target.pool, "deleted pool");
            summary.deleted_pools.push(target.pool.clone());
        }
        Ok(())
    }
}

/// Targets with one entry per pool id, in first-appearance order.
///
/// Later duplicates contribute their instance names and, when the first entry
/// has none, their scope.
fn distinct_targets(targets: &[TeardownTarget]) -> Vec<TeardownTarget> {
    let mut merged: Vec<TeardownTarget> = Vec::new();
    for target in targets {
        let existing = merged
            .iter_mut()
            .find(|known| known.pool.pool_id() == target.pool.pool_id());
        match existing {
            Some(known) => {
                merge_names(&mut known.instances, target.instances.iter().cloned());
                if known.scope.is_none() {
                    known.scope.clone_from(&target.scope);
                }
            }
            None => merged.push(target.clone()),
        }
    }
    merged
}

fn merge_names(names: &mut Vec<String>, extra: impl IntoIterator<Item = String>) {
    for name in extra {
        if !names.contains(&name) {
            names.push(name);
        }
    }
}

/// Parent scopes in first-appearance order, without repeats.
fn distinct_scopes(targets: &[TeardownTarget]) -> Vec<ScopeRef> {
    let mut scopes: Vec<ScopeRef> = Vec::new();
    for scope in targets.iter().filter_map(|target| target.scope.as_ref()) {
        if !scopes.contains(scope) {
            scopes.push(scope.clone());
        }
    }
    scopes
}

fn remote(action: &'static str, resource: String, source: RemoteError) -> TeardownError {
    TeardownError::Remote {
        action,
        resource,
        source,
    }
}

#[cfg(test)]
mod tests;
