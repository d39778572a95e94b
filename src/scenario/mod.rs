//! Scenario driver: provision, verify, mutate, and tear down.
//!
//! The driver walks a [`ScenarioPlan`] in fixed phases:
//!
//! 1. provision every scope entry (scope, then its pool),
//! 2. await a ready instance per entry (pool updates go before or after this
//!    phase according to [`PhaseOrder`]),
//! 3. inspect the global instance listing,
//! 4. provision extra scope-less pools,
//! 5. tear everything down through [`Teardown`].
//!
//! Each scope carries its own [`ScopeSession`]. The first error aborts the run
//! and nothing is cleaned up.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::api::{ControlPlane, InstanceStatus, PoolRef, RemoteError, RunnerStatus, ScopeRef};
use crate::poller::predicates::first_instance_ready;
use crate::poller::{PollError, Poller};
use crate::provision::{ProvisionError, Provisioner};
use crate::report::log_response;
use crate::session::{MissingReference, ScopeSession};
use crate::teardown::{Teardown, TeardownError, TeardownSummary, TeardownTarget};

pub mod plan;

pub use plan::{
    ExtraPoolEntry, PhaseOrder, ScenarioPlan, ScenarioSettings, ScenarioVariant, ScopeEntry,
};

/// Outcome of a completed scenario.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ScenarioReport {
    /// Final state of every scope session.
    pub scopes: Vec<ScopeSession>,
    /// Extra pools that were exercised.
    pub extra_pools: Vec<PoolRef>,
    /// What teardown removed.
    pub teardown: TeardownSummary,
}

/// Errors that abort a scenario.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ScenarioError {
    /// Create-or-reuse failed.
    #[error("{label}: provisioning failed: {source}")]
    Provision {
        /// Entry label.
        label: String,
        /// Underlying failure.
        #[source]
        source: ProvisionError,
    },
    /// A read or update step failed.
    #[error("{label}: {step} failed: {source}")]
    Remote {
        /// Entry label.
        label: String,
        /// Step name.
        step: &'static str,
        /// Underlying failure.
        #[source]
        source: RemoteError,
    },
    /// An instance never became ready.
    #[error("{label}: {source}")]
    Wait {
        /// Entry label.
        label: String,
        /// Underlying failure.
        #[source]
        source: PollError,
    },
    /// A step ran without the reference an earlier step should have recorded.
    #[error(transparent)]
    Precondition(#[from] MissingReference),
    /// An extra pool names a parent that is not in the plan.
    #[error("extra pool {label} refers to unknown scope entry {parent}")]
    UnknownParent {
        /// Extra pool label.
        label: String,
        /// Parent label that was not found.
        parent: String,
    },
    /// Teardown failed.
    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

/// Drives a [`ScenarioPlan`] against a control plane.
pub struct Scenario<'a, C: ControlPlane + ?Sized> {
    api: &'a C,
    poller: &'a Poller,
}

impl<'a, C: ControlPlane + ?Sized> Scenario<'a, C> {
    /// Creates a driver using `poller` for every wait.
    pub const fn new(api: &'a C, poller: &'a Poller) -> Self {
        Self { api, poller }
    }

    /// Runs every phase of `plan`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ScenarioError`] encountered.
    pub async fn run(&self, plan: &ScenarioPlan) -> Result<ScenarioReport, ScenarioError> {
        let mutate_early = plan.order == PhaseOrder::MutateThenAwait;

        let mut sessions = Vec::with_capacity(plan.scopes.len());
        for entry in &plan.scopes {
            let session = self.provision(entry).await?;
            if mutate_early {
                self.update_pool(entry, &session).await?;
            }
            sessions.push(session);
        }

        for (entry, session) in plan.scopes.iter().zip(sessions.iter_mut()) {
            if entry.await_instance {
                self.await_instance(session).await?;
            }
        }

        if !mutate_early {
            for (entry, session) in plan.scopes.iter().zip(&sessions) {
                self.update_pool(entry, session).await?;
            }
        }

        if plan.inspect_instances {
            self.inspect_instances().await?;
        }

        let mut extra_pools = Vec::with_capacity(plan.extra_pools.len());
        for entry in &plan.extra_pools {
            extra_pools.push(self.provision_extra_pool(entry, &sessions).await?);
        }

        let targets = Self::teardown_targets(&sessions, &extra_pools)?;
        let teardown = Teardown::new(self.api, self.poller).run(&targets).await?;

        Ok(ScenarioReport {
            scopes: sessions,
            extra_pools,
            teardown,
        })
    }

    async fn provision(&self, entry: &ScopeEntry) -> Result<ScopeSession, ScenarioError> {
        let label = entry.label.as_str();
        let provisioner = Provisioner::new(self.api);
        let mut session = ScopeSession::new(label);

        info!(%label, name = %entry.create.display_name(), "ensuring scope");
        let scope = provisioner
            .ensure_scope(&entry.create)
            .await
            .map_err(|source| provision_error(label, source))?;
        let scope_ref = ScopeRef::new(entry.create.kind, scope.value.id);
        session.scope = Some(scope_ref.clone());

        let listed = self
            .api
            .list_scopes(entry.create.kind)
            .await
            .map_err(|source| remote_error(label, "list scopes", source))?;
        log_response("scopes", &listed);

        if let Some(update) = &entry.update {
            let updated = self
                .api
                .update_scope(&scope_ref, update)
                .await
                .map_err(|source| remote_error(label, "update scope", source))?;
            log_response("updated scope", &updated);
        }

        let fetched = self
            .api
            .get_scope(&scope_ref)
            .await
            .map_err(|source| remote_error(label, "get scope", source))?;
        log_response("scope", &fetched);

        info!(%label, scope = %scope_ref, "ensuring pool");
        let pool = provisioner
            .ensure_scope_pool(&scope_ref, &entry.pool)
            .await
            .map_err(|source| provision_error(label, source))?;
        let pool_ref = PoolRef::Scoped {
            scope: scope_ref.clone(),
            pool_id: pool.value.id,
        };
        session.pool = Some(pool_ref.clone());

        let pools = self
            .api
            .list_scope_pools(&scope_ref)
            .await
            .map_err(|source| remote_error(label, "list pools", source))?;
        log_response("scope pools", &pools);

        let current = self
            .api
            .get_pool(&pool_ref)
            .await
            .map_err(|source| remote_error(label, "get pool", source))?;
        log_response("pool", &current);

        Ok(session)
    }

    async fn update_pool(
        &self,
        entry: &ScopeEntry,
        session: &ScopeSession,
    ) -> Result<(), ScenarioError> {
        let Some(update) = &entry.pool_update else {
            return Ok(());
        };
        let pool_ref = session.pool()?;
        let updated = self
            .api
            .update_pool(pool_ref, update)
            .await
            .map_err(|source| remote_error(&session.label, "update pool", source))?;
        info!(
            label = %session.label,
            pool = %pool_ref,
            max_runners = updated.max_runners,
            min_idle_runners = updated.min_idle_runners,
            "updated pool"
        );
        log_response("updated pool", &updated);
        Ok(())
    }

    async fn await_instance(&self, session: &mut ScopeSession) -> Result<(), ScenarioError> {
        let scope = session.scope()?.clone();
        let what = format!("{} instance to be running and idle", session.label);

        let polled = self
            .poller
            .wait_for(
                &what,
                || self.api.list_scope_instances(&scope),
                first_instance_ready(InstanceStatus::Running, RunnerStatus::Idle),
            )
            .await
            .map_err(|source| ScenarioError::Wait {
                label: session.label.clone(),
                source,
            })?;

        let instance = polled.value.first().ok_or_else(|| MissingReference {
            label: session.label.clone(),
            what: "instance",
        })?;
        info!(label = %session.label, instance = %instance.name, attempts = polled.attempts, "instance ready");
        session.instance_name = Some(instance.name.clone());

        let instances = self
            .api
            .list_scope_instances(&scope)
            .await
            .map_err(|source| remote_error(&session.label, "list scope instances", source))?;
        log_response("scope instances", &instances);
        Ok(())
    }

    async fn inspect_instances(&self) -> Result<(), ScenarioError> {
        const LABEL: &str = "inspect";
        let instances = self
            .api
            .list_instances()
            .await
            .map_err(|source| remote_error(LABEL, "list instances", source))?;
        log_response("instances", &instances);

        let first = instances.first().ok_or_else(|| MissingReference {
            label: String::from(LABEL),
            what: "instance",
        })?;
        let instance = self
            .api
            .get_instance(&first.name)
            .await
            .map_err(|source| remote_error(LABEL, "get instance", source))?;
        log_response("instance", &instance);
        Ok(())
    }

    async fn provision_extra_pool(
        &self,
        entry: &ExtraPoolEntry,
        sessions: &[ScopeSession],
    ) -> Result<PoolRef, ScenarioError> {
        let label = entry.label.as_str();
        let parent = sessions
            .iter()
            .find(|session| session.label == entry.parent)
            .ok_or_else(|| ScenarioError::UnknownParent {
                label: entry.label.clone(),
                parent: entry.parent.clone(),
            })?
            .scope()?;

        info!(%label, image = %entry.pool.image, "ensuring extra pool");
        let pool = Provisioner::new(self.api)
            .ensure_global_pool(parent, &entry.pool)
            .await
            .map_err(|source| provision_error(label, source))?;
        let pool_ref = PoolRef::Global {
            pool_id: pool.value.id,
        };

        let pools = self
            .api
            .list_pools()
            .await
            .map_err(|source| remote_error(label, "list pools", source))?;
        log_response("pools", &pools);

        let current = self
            .api
            .get_pool(&pool_ref)
            .await
            .map_err(|source| remote_error(label, "get pool", source))?;
        log_response("pool", &current);

        Ok(pool_ref)
    }

    /// One target per session pool plus one per extra pool. Teardown re-reads
    /// each pool after disabling it, so only the recorded runner is listed.
    fn teardown_targets(
        sessions: &[ScopeSession],
        extra_pools: &[PoolRef],
    ) -> Result<Vec<TeardownTarget>, ScenarioError> {
        let mut targets = Vec::with_capacity(sessions.len() + extra_pools.len());
        for session in sessions {
            targets.push(TeardownTarget {
                pool: session.pool()?.clone(),
                instances: session.instance_name.iter().cloned().collect(),
                scope: Some(session.scope()?.clone()),
            });
        }
        targets.extend(extra_pools.iter().map(|pool| TeardownTarget {
            pool: pool.clone(),
            instances: Vec::new(),
            scope: None,
        }));
        Ok(targets)
    }
}

fn provision_error(label: &str, source: ProvisionError) -> ScenarioError {
    ScenarioError::Provision {
        label: label.to_owned(),
        source,
    }
}

fn remote_error(label: &str, step: &'static str, source: RemoteError) -> ScenarioError {
    ScenarioError::Remote {
        label: label.to_owned(),
        step,
        source,
    }
}
