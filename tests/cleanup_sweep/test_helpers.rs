//! Shared fixtures and helpers for cleanup BDD scenarios.

use std::time::Duration;

use garm_e2e::api::{ScopeKind, ScopeRef};
use garm_e2e::test_support::ScriptedControlPlane;
use garm_e2e::{CleanupFilter, PollPolicy, Poller, TeardownSummary};
use rstest::fixture;

#[derive(Clone, Debug)]
pub enum SweepOutcome {
    Success(TeardownSummary),
    Failure(String),
}

#[derive(Clone, Debug)]
pub struct CleanupContext {
    pub filter: Option<CleanupFilter>,
    pub api: ScriptedControlPlane,
    pub outcome: Option<SweepOutcome>,
}

#[fixture]
pub fn cleanup_context() -> CleanupContext {
    CleanupContext {
        filter: None,
        api: ScriptedControlPlane::new(),
        outcome: None,
    }
}

/// Short real-time polling; steps run on a plain runtime.
pub fn fast_poller() -> Poller {
    Poller::new(
        PollPolicy::default()
            .with_interval(Duration::from_millis(1))
            .with_max_attempts(Some(20)),
    )
}

/// Seeds a scope with one pool and one ready instance.
pub fn seed_leftover(api: &ScriptedControlPlane, kind: ScopeKind, owner: Option<&str>, name: &str) {
    let scope = api.seed_scope(kind, owner, name);
    let scope_ref = ScopeRef::new(kind, scope.id);
    let pool = api.seed_pool(&scope_ref, "ubuntu:22.04");
    api.seed_instance(&pool.id);
}
