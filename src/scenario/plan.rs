//! Declarative scenario tables.
//!
//! A [`ScenarioPlan`] lists the scopes to provision (each with its pool and the
//! mutations to apply) and the extra scope-less pools to exercise. The driver
//! walks the table; nothing about the run order lives in control flow.

use serde::Serialize;

use crate::api::{
    CreatePoolParams, CreateScopeParams, OsArch, OsType, UpdateEntityParams, UpdatePoolParams,
};
use crate::config::E2eConfig;

const PROVIDER: &str = "lxd_local";
const FLAVOR: &str = "garm";
const IMAGE: &str = "ubuntu:22.04";
const EXTRA_IMAGE: &str = "ubuntu:20.04";
const BASE_TAGS: [&str; 2] = ["ubuntu", "simple-runner"];
const ORG_TAG: &str = "org-runner";
const CLONE_SUFFIX: &str = "-clone";
const INITIAL_MAX_RUNNERS: u32 = 2;
const UPDATED_MAX_RUNNERS: u32 = 5;
const UPDATED_MIN_IDLE: u32 = 1;

/// Label of the repository entry in the built-in plans.
pub const REPO_LABEL: &str = "repo";
/// Label of the organization entry in the built-in plans.
pub const ORG_LABEL: &str = "org";

/// Built-in scenario shapes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum ScenarioVariant {
    /// A single repository scope.
    Repository,
    /// Repository and organization scopes.
    RepositoryAndOrganization,
    /// Repository and organization scopes plus a scope-less pool.
    #[default]
    Full,
}

/// Whether pool updates run before or after the first instance is awaited.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum PhaseOrder {
    /// Apply pool updates during provisioning, then await instances. Raising
    /// `min_idle_runners` is what makes a live control plane spawn a runner.
    #[default]
    MutateThenAwait,
    /// Await an instance first, then apply pool updates.
    AwaitThenMutate,
}

/// Values the built-in plans are parameterised by.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScenarioSettings {
    /// Organization name; also the repository owner.
    pub org_name: String,
    /// Repository name.
    pub repo_name: String,
    /// Credential set registered with the control plane.
    pub credentials_name: String,
    /// Repository webhook secret.
    pub repo_webhook_secret: String,
    /// Organization webhook secret.
    pub org_webhook_secret: String,
}

impl From<&E2eConfig> for ScenarioSettings {
    fn from(config: &E2eConfig) -> Self {
        Self {
            org_name: config.org_name.clone(),
            repo_name: config.repo_name.clone(),
            credentials_name: config.credentials_name.clone(),
            repo_webhook_secret: config.repo_webhook_secret.clone(),
            org_webhook_secret: config.org_webhook_secret.clone(),
        }
    }
}

/// One scope and the pool exercised under it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScopeEntry {
    /// Label used in logs, errors, and as the parent key for extra pools.
    pub label: String,
    /// Creation parameters, used only when no scope of this kind exists.
    pub create: CreateScopeParams,
    /// Update applied to the scope after listing.
    pub update: Option<UpdateEntityParams>,
    /// Pool creation parameters.
    pub pool: CreatePoolParams,
    /// Update applied to the pool.
    pub pool_update: Option<UpdatePoolParams>,
    /// Whether to wait for a ready instance in this scope.
    pub await_instance: bool,
}

/// A pool matched by image across the whole control plane.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtraPoolEntry {
    /// Label used in logs and errors.
    pub label: String,
    /// Label of the [`ScopeEntry`] the pool is created under when missing.
    pub parent: String,
    /// Pool creation parameters; `image` is the match key.
    pub pool: CreatePoolParams,
}

/// Complete scenario description.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScenarioPlan {
    /// Scopes in provisioning and teardown order.
    pub scopes: Vec<ScopeEntry>,
    /// Scope-less pools, provisioned after the scopes are ready.
    pub extra_pools: Vec<ExtraPoolEntry>,
    /// Whether to list every instance and fetch the first one.
    pub inspect_instances: bool,
    /// Relative order of pool updates and instance waits.
    pub order: PhaseOrder,
}

impl ScenarioPlan {
    /// Builds one of the built-in plans.
    #[must_use]
    pub fn for_variant(variant: ScenarioVariant, settings: &ScenarioSettings) -> Self {
        let mut scopes = vec![repository_entry(settings)];
        let mut extra_pools = Vec::new();
        if variant != ScenarioVariant::Repository {
            scopes.push(organization_entry(settings));
        }
        if variant == ScenarioVariant::Full {
            extra_pools.push(ExtraPoolEntry {
                label: String::from("extra"),
                parent: String::from(REPO_LABEL),
                pool: default_pool(EXTRA_IMAGE, &BASE_TAGS),
            });
        }
        Self {
            scopes,
            extra_pools,
            inspect_instances: variant != ScenarioVariant::Repository,
            order: PhaseOrder::MutateThenAwait,
        }
    }

    /// Replaces the phase order.
    #[must_use]
    pub fn with_order(mut self, order: PhaseOrder) -> Self {
        self.order = order;
        self
    }
}

fn repository_entry(settings: &ScenarioSettings) -> ScopeEntry {
    ScopeEntry {
        label: String::from(REPO_LABEL),
        create: CreateScopeParams::repository(
            settings.org_name.as_str(),
            settings.repo_name.as_str(),
            settings.credentials_name.as_str(),
            settings.repo_webhook_secret.as_str(),
        ),
        update: Some(clone_credentials(settings)),
        pool: default_pool(IMAGE, &BASE_TAGS),
        pool_update: Some(UpdatePoolParams::sizing(
            UPDATED_MAX_RUNNERS,
            UPDATED_MIN_IDLE,
        )),
        await_instance: true,
    }
}

fn organization_entry(settings: &ScenarioSettings) -> ScopeEntry {
    let mut tags = BASE_TAGS.to_vec();
    tags.push(ORG_TAG);
    ScopeEntry {
        label: String::from(ORG_LABEL),
        create: CreateScopeParams::organization(
            settings.org_name.as_str(),
            settings.credentials_name.as_str(),
            settings.org_webhook_secret.as_str(),
        ),
        update: Some(clone_credentials(settings)),
        pool: default_pool(IMAGE, &tags),
        pool_update: Some(UpdatePoolParams::sizing(
            UPDATED_MAX_RUNNERS,
            UPDATED_MIN_IDLE,
        )),
        await_instance: true,
    }
}

fn clone_credentials(settings: &ScenarioSettings) -> UpdateEntityParams {
    UpdateEntityParams {
        credentials_name: Some(format!("{}{CLONE_SUFFIX}", settings.credentials_name)),
        webhook_secret: None,
    }
}

fn default_pool(image: &str, tags: &[&str]) -> CreatePoolParams {
    CreatePoolParams {
        provider_name: String::from(PROVIDER),
        max_runners: INITIAL_MAX_RUNNERS,
        min_idle_runners: 0,
        image: image.to_owned(),
        flavor: String::from(FLAVOR),
        os_type: OsType::Linux,
        os_arch: OsArch::Amd64,
        tags: tags.iter().map(|tag| (*tag).to_owned()).collect(),
        enabled: true,
    }
}
