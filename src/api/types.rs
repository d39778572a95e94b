//! Records and request parameters exchanged with the control plane.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ParamsError;

/// Kind of top-level scope that owns runner pools.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// A single repository (`owner/name`).
    Repository,
    /// A whole organization.
    Organization,
}

impl ScopeKind {
    /// Collection segment used by the REST API.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Repository => "repositories",
            Self::Organization => "organizations",
        }
    }

    /// Short label used in log lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Repository => "repo",
            Self::Organization => "org",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reference to a scope held by the orchestrator.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct ScopeRef {
    /// Scope kind, which selects the endpoint family.
    pub kind: ScopeKind,
    /// Identifier assigned by the control plane.
    pub id: String,
}

impl ScopeRef {
    /// Builds a reference from a kind and identifier.
    #[must_use]
    pub fn new(kind: ScopeKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Reference to a pool, either through its owning scope or the global
/// pool endpoints.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum PoolRef {
    /// Pool addressed under its parent scope.
    Scoped {
        /// Owning scope.
        scope: ScopeRef,
        /// Pool identifier.
        pool_id: String,
    },
    /// Pool addressed through `/pools/{id}`.
    Global {
        /// Pool identifier.
        pool_id: String,
    },
}

impl PoolRef {
    /// Returns the pool identifier regardless of addressing mode.
    #[must_use]
    pub fn pool_id(&self) -> &str {
        match self {
            Self::Scoped { pool_id, .. } | Self::Global { pool_id } => pool_id,
        }
    }
}

impl fmt::Display for PoolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scoped { scope, pool_id } => write!(f, "pool {pool_id} ({scope})"),
            Self::Global { pool_id } => write!(f, "pool {pool_id}"),
        }
    }
}

/// Repository or organization record.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Scope {
    /// Identifier assigned by the control plane.
    pub id: String,
    /// Repository owner; absent for organizations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Repository or organization name.
    pub name: String,
    /// Credential set used to talk to the forge.
    #[serde(default)]
    pub credentials_name: String,
}

/// Parameters for creating a repository or organization.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CreateScopeParams {
    /// Scope kind; selects the endpoint and is not sent on the wire.
    #[serde(skip)]
    pub kind: ScopeKind,
    /// Repository owner; must be `None` for organizations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Repository or organization name.
    pub name: String,
    /// Credential set used to talk to the forge.
    pub credentials_name: String,
    /// Secret used to validate forge webhooks.
    pub webhook_secret: String,
}

impl CreateScopeParams {
    /// Parameters for a repository `owner/name`.
    #[must_use]
    pub fn repository(
        owner: impl Into<String>,
        name: impl Into<String>,
        credentials_name: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            kind: ScopeKind::Repository,
            owner: Some(owner.into()),
            name: name.into(),
            credentials_name: credentials_name.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Parameters for an organization.
    #[must_use]
    pub fn organization(
        name: impl Into<String>,
        credentials_name: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            kind: ScopeKind::Organization,
            owner: None,
            name: name.into(),
            credentials_name: credentials_name.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Human readable scope name (`owner/name` for repositories).
    #[must_use]
    pub fn display_name(&self) -> String {
        self.owner.as_ref().map_or_else(
            || self.name.clone(),
            |owner| format!("{owner}/{}", self.name),
        )
    }
}

/// Partial update for a scope; only supplied fields change.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct UpdateEntityParams {
    /// Replacement credential set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_name: Option<String>,
    /// Replacement webhook secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// Value not known to this client.
            Other(String),
        }

        impl $name {
            /// Wire representation of the value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $text,)+
                    Self::Other(value) => value,
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $($text => Self::$variant,)+
                    _ => Self::Other(value),
                }
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::from(value.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_owned()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Operating system family of runner images.
    OsType {
        /// Linux images.
        #[default]
        Linux => "linux",
        /// Windows images.
        Windows => "windows",
    }
}

string_enum! {
    /// CPU architecture of runner images.
    OsArch {
        /// 64-bit x86.
        #[default]
        Amd64 => "amd64",
        /// 64-bit ARM.
        Arm64 => "arm64",
        /// 32-bit x86.
        I386 => "386",
        /// 32-bit ARM.
        Arm => "arm",
    }
}

string_enum! {
    /// Lifecycle status of a compute instance.
    InstanceStatus {
        /// Instance is up.
        Running => "running",
        /// Instance is stopped.
        Stopped => "stopped",
        /// Provider reported an error.
        Error => "error",
        /// Deletion has been requested.
        PendingDelete => "pending_delete",
        /// Forced deletion has been requested.
        PendingForceDelete => "pending_force_delete",
        /// Provider is deleting the instance.
        Deleting => "deleting",
        /// Instance is gone on the provider side.
        Deleted => "deleted",
        /// Creation has been requested.
        PendingCreate => "pending_create",
        /// Provider is creating the instance.
        Creating => "creating",
        /// Status has not been reported yet.
        #[default]
        Unknown => "unknown",
    }
}

string_enum! {
    /// Readiness of the runner agent inside an instance.
    RunnerStatus {
        /// Runner has not started installing.
        Pending => "pending",
        /// Runner is installing.
        Installing => "installing",
        /// Runner is registered and waiting for jobs.
        Idle => "idle",
        /// Runner is executing a job.
        Active => "active",
        /// Runner installation failed.
        Failed => "failed",
        /// Runner has terminated.
        Terminated => "terminated",
        /// Status has not been reported yet.
        #[default]
        Unknown => "",
    }
}

/// Ephemeral compute instance spawned by a pool.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Instance {
    /// Provider-side identifier.
    #[serde(default)]
    pub id: String,
    /// Unique instance name.
    pub name: String,
    /// Owning pool identifier.
    #[serde(default)]
    pub pool_id: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: InstanceStatus,
    /// Runner readiness status.
    #[serde(default)]
    pub runner_status: RunnerStatus,
}

/// Tag attached to a pool.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Tag {
    /// Tag identifier.
    #[serde(default)]
    pub id: String,
    /// Tag label.
    pub name: String,
}

/// Runner pool record.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Pool {
    /// Identifier assigned by the control plane.
    pub id: String,
    /// Owning repository, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    /// Owning organization, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// Provider plugin name.
    #[serde(default)]
    pub provider_name: String,
    /// Upper bound on runners.
    #[serde(default)]
    pub max_runners: u32,
    /// Idle runner floor.
    #[serde(default)]
    pub min_idle_runners: u32,
    /// Boot image.
    #[serde(default)]
    pub image: String,
    /// Provider flavor.
    #[serde(default)]
    pub flavor: String,
    /// Operating system family.
    #[serde(default)]
    pub os_type: OsType,
    /// CPU architecture.
    #[serde(default)]
    pub os_arch: OsArch,
    /// Runner labels.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Whether new instances may be spawned.
    #[serde(default)]
    pub enabled: bool,
    /// Instances currently owned by the pool.
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl Pool {
    /// Returns the tag names in listing order.
    #[must_use]
    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.iter().map(|tag| tag.name.as_str()).collect()
    }
}

/// Parameters for creating a pool.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CreatePoolParams {
    /// Provider plugin name.
    pub provider_name: String,
    /// Upper bound on runners.
    pub max_runners: u32,
    /// Idle runner floor.
    pub min_idle_runners: u32,
    /// Boot image.
    pub image: String,
    /// Provider flavor.
    pub flavor: String,
    /// Operating system family.
    pub os_type: OsType,
    /// CPU architecture.
    pub os_arch: OsArch,
    /// Runner labels.
    pub tags: Vec<String>,
    /// Whether the pool starts enabled.
    pub enabled: bool,
}

impl CreatePoolParams {
    /// Validates the parameters before they are sent.
    ///
    /// # Errors
    ///
    /// Returns [`ParamsError::Validation`] when a required string is blank and
    /// [`ParamsError::Sizing`] when the idle floor exceeds the ceiling.
    pub fn validate(&self) -> Result<(), ParamsError> {
        for (field, value) in [
            ("provider_name", &self.provider_name),
            ("image", &self.image),
            ("flavor", &self.flavor),
        ] {
            if value.trim().is_empty() {
                return Err(ParamsError::Validation(field.to_owned()));
            }
        }
        if self.min_idle_runners > self.max_runners {
            return Err(ParamsError::Sizing {
                min_idle: self.min_idle_runners,
                max: self.max_runners,
            });
        }
        Ok(())
    }
}

/// Partial update for a pool; only supplied fields change.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct UpdatePoolParams {
    /// Replacement runner ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runners: Option<u32>,
    /// Replacement idle floor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_idle_runners: Option<u32>,
    /// Replacement image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Replacement flavor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    /// Replacement tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Enables or disables the pool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl UpdatePoolParams {
    /// Update that only changes the sizing bounds.
    #[must_use]
    pub const fn sizing(max_runners: u32, min_idle_runners: u32) -> Self {
        Self {
            max_runners: Some(max_runners),
            min_idle_runners: Some(min_idle_runners),
            image: None,
            flavor: None,
            tags: None,
            enabled: None,
        }
    }

    /// Update that disables the pool and touches nothing else.
    #[must_use]
    pub const fn disable() -> Self {
        Self {
            max_runners: None,
            min_idle_runners: None,
            image: None,
            flavor: None,
            tags: None,
            enabled: Some(false),
        }
    }
}
