//! Control-plane contract consumed by the orchestration engine.
//!
//! One method per remote resource action. Implementations translate each call
//! into a single request, surface failures as [`RemoteError`], and keep no
//! local state between calls.

use std::future::Future;
use std::pin::Pin;

mod error;
mod types;

pub use error::{ParamsError, RemoteError};
pub use types::{
    CreatePoolParams, CreateScopeParams, Instance, InstanceStatus, OsArch, OsType, Pool, PoolRef,
    RunnerStatus, Scope, ScopeKind, ScopeRef, Tag, UpdateEntityParams, UpdatePoolParams,
};

/// Future returned by control-plane operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Typed surface of the runner-fleet control plane.
pub trait ControlPlane: Send + Sync {
    /// Lists every scope of the given kind, in control-plane order.
    fn list_scopes(&self, kind: ScopeKind) -> ApiFuture<'_, Vec<Scope>>;

    /// Creates a repository or organization.
    fn create_scope<'a>(&'a self, params: &'a CreateScopeParams) -> ApiFuture<'a, Scope>;

    /// Fetches a single scope.
    fn get_scope<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, Scope>;

    /// Applies a partial update to a scope.
    fn update_scope<'a>(
        &'a self,
        scope: &'a ScopeRef,
        params: &'a UpdateEntityParams,
    ) -> ApiFuture<'a, Scope>;

    /// Deletes a scope.
    fn delete_scope<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, ()>;

    /// Lists the pools owned by a scope.
    fn list_scope_pools<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, Vec<Pool>>;

    /// Creates a pool under a scope.
    fn create_scope_pool<'a>(
        &'a self,
        scope: &'a ScopeRef,
        params: &'a CreatePoolParams,
    ) -> ApiFuture<'a, Pool>;

    /// Lists the instances spawned by every pool of a scope.
    fn list_scope_instances<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, Vec<Instance>>;

    /// Lists every pool known to the control plane.
    fn list_pools(&self) -> ApiFuture<'_, Vec<Pool>>;

    /// Fetches a pool, including its current instance list.
    fn get_pool<'a>(&'a self, pool: &'a PoolRef) -> ApiFuture<'a, Pool>;

    /// Applies a partial update to a pool.
    fn update_pool<'a>(
        &'a self,
        pool: &'a PoolRef,
        params: &'a UpdatePoolParams,
    ) -> ApiFuture<'a, Pool>;

    /// Deletes a pool. Instances are not cascaded.
    fn delete_pool<'a>(&'a self, pool: &'a PoolRef) -> ApiFuture<'a, ()>;

    /// Lists every instance known to the control plane.
    fn list_instances(&self) -> ApiFuture<'_, Vec<Instance>>;

    /// Fetches a single instance by name.
    fn get_instance<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Instance>;

    /// Requests deletion of an instance. Removal is asynchronous.
    fn delete_instance<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()>;
}
