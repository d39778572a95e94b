//! Create-or-reuse provisioning for scopes and pools.
//!
//! The control plane has no upsert or natural-key lookup, so every `ensure_*`
//! operation lists the relevant collection first. A non-empty listing means the
//! first element is reused and no create call is issued. Reused records are
//! compared against the requested parameters and any drift is logged as a
//! warning; the record itself is never modified.

use thiserror::Error;
use tracing::{info, warn};

use crate::api::{
    ControlPlane, CreatePoolParams, CreateScopeParams, ParamsError, Pool, RemoteError, Scope,
    ScopeRef,
};
use crate::report::log_response;

/// Result of an `ensure_*` call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Provisioned<T> {
    /// The created or reused record.
    pub value: T,
    /// `true` when a create call was issued.
    pub created: bool,
}

/// Errors raised by the provisioner.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// A list or create call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Pool parameters were rejected before any call was made.
    #[error("invalid pool parameters: {0}")]
    InvalidParams(#[from] ParamsError),
}

/// Idempotent provisioner over any [`ControlPlane`].
pub struct Provisioner<'a, C: ControlPlane + ?Sized> {
    api: &'a C,
}

impl<'a, C: ControlPlane + ?Sized> Provisioner<'a, C> {
    /// Wraps a control-plane client.
    pub const fn new(api: &'a C) -> Self {
        Self { api }
    }

    /// Ensures a scope of `params.kind` exists.
    ///
    /// # Errors
    ///
    /// Propagates [`RemoteError`] from the list or create call.
    pub async fn ensure_scope(
        &self,
        params: &CreateScopeParams,
    ) -> Result<Provisioned<Scope>, ProvisionError> {
        let existing = self.api.list_scopes(params.kind).await?;
        log_response("list scopes", &existing);

        if let Some(scope) = existing.into_iter().next() {
            info!(kind = %params.kind, id = %scope.id, "reusing existing scope");
            warn_on_drift(&format!("{} {}", params.kind, scope.id), &scope_drift(&scope, params));
            return Ok(Provisioned {
                value: scope,
                created: false,
            });
        }

        let scope = self.api.create_scope(params).await?;
        info!(kind = %params.kind, id = %scope.id, name = %params.display_name(), "created scope");
        log_response("create scope", &scope);
        Ok(Provisioned {
            value: scope,
            created: true,
        })
    }

    /// Ensures a pool exists under `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidParams`] before any call when the
    /// parameters are inconsistent, and propagates [`RemoteError`] otherwise.
    pub async fn ensure_scope_pool(
        &self,
        scope: &ScopeRef,
        params: &CreatePoolParams,
    ) -> Result<Provisioned<Pool>, ProvisionError> {
        params.validate()?;
        let existing = self.api.list_scope_pools(scope).await?;
        log_response("list scope pools", &existing);

        if let Some(pool) = existing.into_iter().next() {
            info!(%scope, pool_id = %pool.id, "reusing existing pool");
            warn_on_drift(&format!("pool {}", pool.id), &pool_drift(&pool, params));
            return Ok(Provisioned {
                value: pool,
                created: false,
            });
        }

        self.create_pool(scope, params).await
    }

    /// Ensures a pool with the requested image exists anywhere on the control
    /// plane, creating it under `parent` when none does.
    ///
    /// # Errors
    ///
    /// Same as [`Provisioner::ensure_scope_pool`].
    pub async fn ensure_global_pool(
        &self,
        parent: &ScopeRef,
        params: &CreatePoolParams,
    ) -> Result<Provisioned<Pool>, ProvisionError> {
        params.validate()?;
        let existing = self.api.list_pools().await?;
        log_response("list pools", &existing);

        if let Some(pool) = existing.into_iter().find(|pool| pool.image == params.image) {
            info!(image = %params.image, pool_id = %pool.id, "reusing existing pool by image");
            warn_on_drift(&format!("pool {}", pool.id), &pool_drift(&pool, params));
            return Ok(Provisioned {
                value: pool,
                created: false,
            });
        }

        self.create_pool(parent, params).await
    }

    async fn create_pool(
        &self,
        scope: &ScopeRef,
        params: &CreatePoolParams,
    ) -> Result<Provisioned<Pool>, ProvisionError> {
        let pool = self.api.create_scope_pool(scope, params).await?;
        info!(%scope, pool_id = %pool.id, image = %pool.image, "created pool");
        log_response("create pool", &pool);
        Ok(Provisioned {
            value: pool,
            created: true,
        })
    }
}

fn warn_on_drift(resource: &str, fields: &[&'static str]) {
    if !fields.is_empty() {
        warn!(
            resource,
            fields = %fields.join(", "),
            "reused record differs from requested parameters"
        );
    }
}

fn scope_drift(existing: &Scope, requested: &CreateScopeParams) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if existing.name != requested.name {
        fields.push("name");
    }
    if requested.owner.is_some() && existing.owner != requested.owner {
        fields.push("owner");
    }
    if existing.credentials_name != requested.credentials_name {
        fields.push("credentials_name");
    }
    fields
}

fn pool_drift(existing: &Pool, requested: &CreatePoolParams) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if existing.image != requested.image {
        fields.push("image");
    }
    if existing.flavor != requested.flavor {
        fields.push("flavor");
    }
    if existing.os_type != requested.os_type || existing.os_arch != requested.os_arch {
        fields.push("os");
    }
    if existing.max_runners != requested.max_runners
        || existing.min_idle_runners != requested.min_idle_runners
    {
        fields.push("sizing");
    }
    let mut have = existing.tag_names();
    let mut want: Vec<&str> = requested.tags.iter().map(String::as_str).collect();
    have.sort_unstable();
    want.sort_unstable();
    if have != want {
        fields.push("tags");
    }
    fields
}
