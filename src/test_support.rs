//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedControlPlane`] is an in-memory control plane that records every
//! call, spawns instances when pools are created, and simulates the
//! asynchronous readiness and deletion the real service exhibits.

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, MutexGuard};

use crate::api::{
    ApiFuture, ControlPlane, CreatePoolParams, CreateScopeParams, Instance, InstanceStatus, Pool,
    PoolRef, RemoteError, RunnerStatus, Scope, ScopeKind, ScopeRef, Tag, UpdateEntityParams,
    UpdatePoolParams,
};

/// Records a single call made through [`ScriptedControlPlane`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    /// Trait method name, e.g. `delete_pool`.
    pub op: &'static str,
    /// Identifier or name the call addressed.
    pub target: String,
    /// Summary of the request body, when there is one.
    pub detail: Option<String>,
}

impl Call {
    /// Whether the call only read state.
    #[must_use]
    pub fn is_read(&self) -> bool {
        self.op.starts_with("list_") || self.op.starts_with("get_")
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.target)?;
        if let Some(detail) = &self.detail {
            write!(f, " {detail}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct TrackedInstance {
    instance: Instance,
    reads: u32,
    deleting: Option<u32>,
}

#[derive(Debug)]
struct State {
    scopes: Vec<(ScopeKind, Scope)>,
    pools: Vec<Pool>,
    instances: Vec<TrackedInstance>,
    counters: HashMap<&'static str, u32>,
    failures: HashMap<&'static str, RemoteError>,
    calls: Vec<Call>,
    ready_after: u32,
    delete_lag: u32,
    spawn_on_create: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            scopes: Vec::new(),
            pools: Vec::new(),
            instances: Vec::new(),
            counters: HashMap::new(),
            failures: HashMap::new(),
            calls: Vec::new(),
            ready_after: 1,
            delete_lag: 1,
            spawn_on_create: true,
        }
    }
}

/// In-memory [`ControlPlane`] with call recording.
///
/// Reads that touch instances advance a simulated clock: a fresh instance
/// stays `creating` for `ready_after` reads before turning `running`/`idle`,
/// and a deleted instance stays listed for `delete_lag` reads.
#[derive(Clone, Debug, Default)]
pub struct ScriptedControlPlane {
    state: Arc<std::sync::Mutex<State>>,
}

impl ScriptedControlPlane {
    /// Creates an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many reads a new instance stays not ready.
    #[must_use]
    pub fn with_ready_after(self, reads: u32) -> Self {
        self.state().ready_after = reads;
        self
    }

    /// Sets how many reads a deleted instance stays listed.
    #[must_use]
    pub fn with_delete_lag(self, reads: u32) -> Self {
        self.state().delete_lag = reads;
        self
    }

    /// Controls whether creating an enabled pool spawns an instance.
    #[must_use]
    pub fn with_spawn_on_create(self, spawn: bool) -> Self {
        self.state().spawn_on_create = spawn;
        self
    }

    /// Makes the next call to `op` fail with `error`.
    pub fn fail_next(&self, op: &'static str, error: RemoteError) {
        self.state().failures.insert(op, error);
    }

    /// Inserts a scope without recording a call.
    pub fn seed_scope(&self, kind: ScopeKind, owner: Option<&str>, name: &str) -> Scope {
        let mut state = self.state();
        let scope = Scope {
            id: state.next_id(kind.label()),
            owner: owner.map(str::to_owned),
            name: name.to_owned(),
            credentials_name: String::from("seeded"),
        };
        state.scopes.push((kind, scope.clone()));
        scope
    }

    /// Inserts an enabled pool under `scope` without recording a call.
    pub fn seed_pool(&self, scope: &ScopeRef, image: &str) -> Pool {
        let mut state = self.state();
        let params = CreatePoolParams {
            provider_name: String::from("seeded"),
            max_runners: 1,
            image: image.to_owned(),
            flavor: String::from("seeded"),
            enabled: true,
            ..CreatePoolParams::default()
        };
        let pool = state.build_pool(scope, &params);
        state.pools.push(pool.clone());
        pool
    }

    /// Inserts a ready instance into `pool_id` without recording a call.
    pub fn seed_instance(&self, pool_id: &str) -> Instance {
        let mut state = self.state();
        let name = state.spawn(pool_id);
        let ready_after = state.ready_after;
        let mut seeded = Instance::default();
        if let Some(tracked) = state.tracked_mut(&name) {
            tracked.reads = ready_after;
            tracked.instance.status = InstanceStatus::Running;
            tracked.instance.runner_status = RunnerStatus::Idle;
            seeded = tracked.instance.clone();
        }
        seeded
    }

    /// Snapshot of every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Recorded calls that changed state, rendered for assertions.
    #[must_use]
    pub fn mutations(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|call| !call.is_read())
            .map(ToString::to_string)
            .collect()
    }

    /// Number of calls recorded for `op`.
    #[must_use]
    pub fn count(&self, op: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.op == op)
            .count()
    }

    /// Scopes currently stored.
    #[must_use]
    pub fn scopes(&self) -> Vec<Scope> {
        self.state()
            .scopes
            .iter()
            .map(|(_, scope)| scope.clone())
            .collect()
    }

    /// Pools currently stored.
    #[must_use]
    pub fn pools(&self) -> Vec<Pool> {
        let state = self.state();
        state.pools.iter().map(|pool| state.with_instances(pool)).collect()
    }

    /// Instances currently stored, including ones pending deletion.
    #[must_use]
    pub fn instances(&self) -> Vec<Instance> {
        self.state()
            .instances
            .iter()
            .map(|tracked| tracked.instance.clone())
            .collect()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn respond<T: Send + 'static>(
        &self,
        op: &'static str,
        target: &str,
        detail: Option<String>,
        apply: impl FnOnce(&mut State) -> Result<T, RemoteError>,
    ) -> ApiFuture<'_, T> {
        let mut state = self.state();
        state.calls.push(Call {
            op,
            target: target.to_owned(),
            detail,
        });
        let result = state
            .failures
            .remove(op)
            .map_or_else(|| apply(&mut *state), Err);
        Box::pin(std::future::ready(result))
    }
}

impl State {
    fn next_id(&mut self, prefix: &'static str) -> String {
        let counter = self.counters.entry(prefix).or_insert(0);
        *counter += 1;
        format!("{prefix}-{counter}")
    }

    fn has_scope(&self, scope: &ScopeRef) -> bool {
        self.scopes
            .iter()
            .any(|(kind, stored)| *kind == scope.kind && stored.id == scope.id)
    }

    fn build_pool(&mut self, scope: &ScopeRef, params: &CreatePoolParams) -> Pool {
        let id = self.next_id("pool");
        let tags = params
            .tags
            .iter()
            .map(|name| Tag {
                id: self.next_id("tag"),
                name: name.clone(),
            })
            .collect();
        let (repo_id, org_id) = match scope.kind {
            ScopeKind::Repository => (Some(scope.id.clone()), None),
            ScopeKind::Organization => (None, Some(scope.id.clone())),
        };
        Pool {
            id,
            repo_id,
            org_id,
            provider_name: params.provider_name.clone(),
            max_runners: params.max_runners,
            min_idle_runners: params.min_idle_runners,
            image: params.image.clone(),
            flavor: params.flavor.clone(),
            os_type: params.os_type.clone(),
            os_arch: params.os_arch.clone(),
            tags,
            enabled: params.enabled,
            instances: Vec::new(),
        }
    }

    fn spawn(&mut self, pool_id: &str) -> String {
        let id = self.next_id("inst");
        let name = id.replacen("inst", "garm", 1);
        self.instances.push(TrackedInstance {
            instance: Instance {
                id,
                name: name.clone(),
                pool_id: pool_id.to_owned(),
                status: InstanceStatus::Creating,
                runner_status: RunnerStatus::Pending,
            },
            reads: 0,
            deleting: None,
        });
        name
    }

    fn tracked_mut(&mut self, name: &str) -> Option<&mut TrackedInstance> {
        self.instances
            .iter_mut()
            .find(|tracked| tracked.instance.name == name)
    }

    /// Moves every instance one read forward.
    fn advance(&mut self) {
        let ready_after = self.ready_after;
        self.instances.retain_mut(|tracked| match tracked.deleting.as_mut() {
            Some(0) => false,
            Some(lag) => {
                *lag -= 1;
                true
            }
            None => {
                tracked.reads += 1;
                if tracked.reads > ready_after {
                    tracked.instance.status = InstanceStatus::Running;
                    tracked.instance.runner_status = RunnerStatus::Idle;
                }
                true
            }
        });
    }

    fn instances_of(&self, pool_id: &str) -> Vec<Instance> {
        self.instances
            .iter()
            .filter(|tracked| tracked.instance.pool_id == pool_id)
            .map(|tracked| tracked.instance.clone())
            .collect()
    }

    fn with_instances(&self, pool: &Pool) -> Pool {
        Pool {
            instances: self.instances_of(&pool.id),
            ..pool.clone()
        }
    }

    fn find_pool(&self, pool: &PoolRef) -> Option<usize> {
        self.pools.iter().position(|stored| {
            stored.id == pool.pool_id()
                && match pool {
                    PoolRef::Scoped { scope, .. } => owner_of(stored).as_ref() == Some(scope),
                    PoolRef::Global { .. } => true,
                }
        })
    }

    fn scope_pool_ids(&self, scope: &ScopeRef) -> Vec<String> {
        self.pools
            .iter()
            .filter(|pool| owner_of(pool).as_ref() == Some(scope))
            .map(|pool| pool.id.clone())
            .collect()
    }

    fn maybe_spawn(&mut self, pool_id: &str) {
        let wants_runner = self
            .pools
            .iter()
            .find(|pool| pool.id == pool_id)
            .is_some_and(|pool| pool.enabled && pool.min_idle_runners > 0);
        if wants_runner && self.instances_of(pool_id).is_empty() {
            self.spawn(pool_id);
        }
    }
}

fn owner_of(pool: &Pool) -> Option<ScopeRef> {
    pool.repo_id
        .as_ref()
        .map(|id| ScopeRef::new(ScopeKind::Repository, id.clone()))
        .or_else(|| {
            pool.org_id
                .as_ref()
                .map(|id| ScopeRef::new(ScopeKind::Organization, id.clone()))
        })
}

fn not_found(endpoint: String, what: &str) -> RemoteError {
    RemoteError::Status {
        endpoint,
        status: 404,
        message: format!("Not Found: {what} not found"),
    }
}

fn conflict(endpoint: String, message: &str) -> RemoteError {
    RemoteError::Status {
        endpoint,
        status: 409,
        message: format!("Conflict: {message}"),
    }
}

fn describe_update(params: &UpdatePoolParams) -> String {
    let mut parts = Vec::new();
    if let Some(max) = params.max_runners {
        parts.push(format!("max_runners={max}"));
    }
    if let Some(min) = params.min_idle_runners {
        parts.push(format!("min_idle_runners={min}"));
    }
    if let Some(image) = &params.image {
        parts.push(format!("image={image}"));
    }
    if let Some(flavor) = &params.flavor {
        parts.push(format!("flavor={flavor}"));
    }
    if let Some(tags) = &params.tags {
        parts.push(format!("tags={}", tags.join("|")));
    }
    if let Some(enabled) = params.enabled {
        parts.push(format!("enabled={enabled}"));
    }
    parts.join(",")
}

impl ControlPlane for ScriptedControlPlane {
    fn list_scopes(&self, kind: ScopeKind) -> ApiFuture<'_, Vec<Scope>> {
        self.respond("list_scopes", kind.collection(), None, |state| {
            Ok(state
                .scopes
                .iter()
                .filter(|(stored, _)| *stored == kind)
                .map(|(_, scope)| scope.clone())
                .collect())
        })
    }

    fn create_scope<'a>(&'a self, params: &'a CreateScopeParams) -> ApiFuture<'a, Scope> {
        self.respond("create_scope", &params.display_name(), None, |state| {
            let scope = Scope {
                id: state.next_id(params.kind.label()),
                owner: params.owner.clone(),
                name: params.name.clone(),
                credentials_name: params.credentials_name.clone(),
            };
            state.scopes.push((params.kind, scope.clone()));
            Ok(scope)
        })
    }

    fn get_scope<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, Scope> {
        self.respond("get_scope", &scope.id, None, |state| {
            state
                .scopes
                .iter()
                .find(|(kind, stored)| *kind == scope.kind && stored.id == scope.id)
                .map(|(_, stored)| stored.clone())
                .ok_or_else(|| not_found(scope.id.clone(), "scope"))
        })
    }

    fn update_scope<'a>(
        &'a self,
        scope: &'a ScopeRef,
        params: &'a UpdateEntityParams,
    ) -> ApiFuture<'a, Scope> {
        let detail = params
            .credentials_name
            .as_ref()
            .map(|creds| format!("credentials_name={creds}"));
        self.respond("update_scope", &scope.id, detail, |state| {
            let (_, stored) = state
                .scopes
                .iter_mut()
                .find(|(kind, stored)| *kind == scope.kind && stored.id == scope.id)
                .ok_or_else(|| not_found(scope.id.clone(), "scope"))?;
            if let Some(creds) = &params.credentials_name {
                stored.credentials_name.clone_from(creds);
            }
            Ok(stored.clone())
        })
    }

    fn delete_scope<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, ()> {
        self.respond("delete_scope", &scope.id, None, |state| {
            if !state.scope_pool_ids(scope).is_empty() {
                return Err(conflict(scope.id.clone(), "scope still has pools"));
            }
            let position = state
                .scopes
                .iter()
                .position(|(kind, stored)| *kind == scope.kind && stored.id == scope.id)
                .ok_or_else(|| not_found(scope.id.clone(), "scope"))?;
            state.scopes.remove(position);
            Ok(())
        })
    }

    fn list_scope_pools<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, Vec<Pool>> {
        self.respond("list_scope_pools", &scope.id, None, |state| {
            state.advance();
            Ok(state
                .pools
                .iter()
                .filter(|pool| owner_of(pool).as_ref() == Some(scope))
                .map(|pool| state.with_instances(pool))
                .collect())
        })
    }

    fn create_scope_pool<'a>(
        &'a self,
        scope: &'a ScopeRef,
        params: &'a CreatePoolParams,
    ) -> ApiFuture<'a, Pool> {
        let detail = Some(format!(
            "image={},max_runners={},min_idle_runners={}",
            params.image, params.max_runners, params.min_idle_runners
        ));
        self.respond("create_scope_pool", &scope.id, detail, |state| {
            if !state.has_scope(scope) {
                return Err(not_found(scope.id.clone(), "scope"));
            }
            let pool = state.build_pool(scope, params);
            let pool_id = pool.id.clone();
            state.pools.push(pool);
            if state.spawn_on_create && params.enabled {
                state.spawn(&pool_id);
            } else {
                state.maybe_spawn(&pool_id);
            }
            let created = state
                .pools
                .iter()
                .find(|pool| pool.id == pool_id)
                .map(|pool| state.with_instances(pool))
                .ok_or_else(|| not_found(pool_id.clone(), "pool"))?;
            Ok(created)
        })
    }

    fn list_scope_instances<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, Vec<Instance>> {
        self.respond("list_scope_instances", &scope.id, None, |state| {
            state.advance();
            let pool_ids = state.scope_pool_ids(scope);
            Ok(state
                .instances
                .iter()
                .filter(|tracked| pool_ids.contains(&tracked.instance.pool_id))
                .map(|tracked| tracked.instance.clone())
                .collect())
        })
    }

    fn list_pools(&self) -> ApiFuture<'_, Vec<Pool>> {
        self.respond("list_pools", "pools", None, |state| {
            state.advance();
            Ok(state
                .pools
                .iter()
                .map(|pool| state.with_instances(pool))
                .collect())
        })
    }

    fn get_pool<'a>(&'a self, pool: &'a PoolRef) -> ApiFuture<'a, Pool> {
        self.respond("get_pool", pool.pool_id(), None, |state| {
            state.advance();
            state
                .find_pool(pool)
                .and_then(|index| state.pools.get(index))
                .map(|stored| state.with_instances(stored))
                .ok_or_else(|| not_found(pool.pool_id().to_owned(), "pool"))
        })
    }

    fn update_pool<'a>(
        &'a self,
        pool: &'a PoolRef,
        params: &'a UpdatePoolParams,
    ) -> ApiFuture<'a, Pool> {
        self.respond(
            "update_pool",
            pool.pool_id(),
            Some(describe_update(params)),
            |state| {
                let index = state
                    .find_pool(pool)
                    .ok_or_else(|| not_found(pool.pool_id().to_owned(), "pool"))?;
                let stored = state
                    .pools
                    .get_mut(index)
                    .ok_or_else(|| not_found(pool.pool_id().to_owned(), "pool"))?;
                if let Some(max) = params.max_runners {
                    stored.max_runners = max;
                }
                if let Some(min) = params.min_idle_runners {
                    stored.min_idle_runners = min;
                }
                if let Some(image) = &params.image {
                    stored.image.clone_from(image);
                }
                if let Some(flavor) = &params.flavor {
                    stored.flavor.clone_from(flavor);
                }
                if let Some(tags) = &params.tags {
                    stored.tags = tags
                        .iter()
                        .map(|name| Tag {
                            id: String::new(),
                            name: name.clone(),
                        })
                        .collect();
                }
                if let Some(enabled) = params.enabled {
                    stored.enabled = enabled;
                }
                let pool_id = stored.id.clone();
                state.maybe_spawn(&pool_id);
                state
                    .pools
                    .get(index)
                    .map(|updated| state.with_instances(updated))
                    .ok_or_else(|| not_found(pool_id, "pool"))
            },
        )
    }

    fn delete_pool<'a>(&'a self, pool: &'a PoolRef) -> ApiFuture<'a, ()> {
        self.respond("delete_pool", pool.pool_id(), None, |state| {
            let index = state
                .find_pool(pool)
                .ok_or_else(|| not_found(pool.pool_id().to_owned(), "pool"))?;
            if !state.instances_of(pool.pool_id()).is_empty() {
                return Err(conflict(
                    pool.pool_id().to_owned(),
                    "pool still has runners",
                ));
            }
            state.pools.remove(index);
            Ok(())
        })
    }

    fn list_instances(&self) -> ApiFuture<'_, Vec<Instance>> {
        self.respond("list_instances", "instances", None, |state| {
            state.advance();
            Ok(state
                .instances
                .iter()
                .map(|tracked| tracked.instance.clone())
                .collect())
        })
    }

    fn get_instance<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Instance> {
        self.respond("get_instance", name, None, |state| {
            state.advance();
            state
                .instances
                .iter()
                .find(|tracked| tracked.instance.name == name)
                .map(|tracked| tracked.instance.clone())
                .ok_or_else(|| not_found(format!("instances/{name}"), "instance"))
        })
    }

    fn delete_instance<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()> {
        self.respond("delete_instance", name, None, |state| {
            let lag = state.delete_lag;
            let tracked = state
                .tracked_mut(name)
                .ok_or_else(|| not_found(format!("instances/{name}"), "instance"))?;
            if tracked.deleting.is_none() {
                tracked.deleting = Some(lag);
                tracked.instance.status = InstanceStatus::PendingDelete;
            }
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets (or, for `None`, removes) environment variables while holding a
    /// global mutex.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
