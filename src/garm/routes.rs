//! Endpoint paths relative to the API base (`<base_url>/api/v1`).

use crate::api::{PoolRef, ScopeKind, ScopeRef};

pub(super) fn scopes(kind: ScopeKind) -> String {
    kind.collection().to_owned()
}

pub(super) fn scope(scope: &ScopeRef) -> String {
    format!("{}/{}", scope.kind.collection(), scope.id)
}

pub(super) fn scope_pools(scope_ref: &ScopeRef) -> String {
    format!("{}/pools", scope(scope_ref))
}

pub(super) fn scope_instances(scope_ref: &ScopeRef) -> String {
    format!("{}/instances", scope(scope_ref))
}

pub(super) fn pools() -> String {
    String::from("pools")
}

pub(super) fn pool(pool: &PoolRef) -> String {
    match pool {
        PoolRef::Scoped { scope: owner, pool_id } => format!("{}/{pool_id}", scope_pools(owner)),
        PoolRef::Global { pool_id } => format!("pools/{pool_id}"),
    }
}

pub(super) fn instances() -> String {
    String::from("instances")
}

pub(super) fn instance(name: &str) -> String {
    format!("instances/{name}")
}
