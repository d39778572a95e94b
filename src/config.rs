//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::poller::PollPolicy;

/// Harness configuration derived from environment variables, configuration
/// files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "GARM",
    discovery(
        app_name = "garm-e2e",
        env_var = "GARM_E2E_CONFIG_PATH",
        config_file_name = "garm-e2e.toml",
        dotfile_name = ".garm-e2e.toml",
        project_file_name = "garm-e2e.toml"
    )
)]
pub struct E2eConfig {
    /// Control-plane base URL. Falls back to the garm-cli profile when unset.
    pub base_url: Option<String>,
    /// Bearer token. Falls back to the garm-cli profile when unset.
    pub token: Option<String>,
    /// Path to a garm-cli `config.toml` to read the profile from.
    pub profile_path: Option<String>,
    /// Credential set registered with the control plane. Required.
    pub credentials_name: String,
    /// Webhook secret for the repository scope. Required.
    pub repo_webhook_secret: String,
    /// Webhook secret for the organization scope. Required.
    pub org_webhook_secret: String,
    /// Organization name, also used as the repository owner.
    #[ortho_config(default = "test-garm-org".to_owned())]
    pub org_name: String,
    /// Repository name.
    #[ortho_config(default = "test-garm-repo".to_owned())]
    pub repo_name: String,
    /// Seconds between polls while waiting on the control plane.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Upper bound of random extra delay added to each poll, in milliseconds.
    #[ortho_config(default = 0)]
    pub poll_jitter_millis: u64,
    /// Attempts before a wait gives up. Zero waits forever.
    #[ortho_config(default = 120)]
    pub max_poll_attempts: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl E2eConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to garm-e2e.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("garm-e2e")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty and
    /// [`ConfigError::InvalidPollInterval`] when the interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.credentials_name,
            &FieldMetadata::new(
                "credential set name",
                "GARM_CREDENTIALS_NAME",
                "credentials_name",
            ),
        )?;
        Self::require_field(
            &self.repo_webhook_secret,
            &FieldMetadata::new(
                "repository webhook secret",
                "GARM_REPO_WEBHOOK_SECRET",
                "repo_webhook_secret",
            ),
        )?;
        Self::require_field(
            &self.org_webhook_secret,
            &FieldMetadata::new(
                "organization webhook secret",
                "GARM_ORG_WEBHOOK_SECRET",
                "org_webhook_secret",
            ),
        )?;
        Self::require_field(
            &self.org_name,
            &FieldMetadata::new("organization name", "GARM_ORG_NAME", "org_name"),
        )?;
        Self::require_field(
            &self.repo_name,
            &FieldMetadata::new("repository name", "GARM_REPO_NAME", "repo_name"),
        )?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }

    /// Polling policy described by this configuration.
    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        let max_attempts = (self.max_poll_attempts > 0).then_some(self.max_poll_attempts);
        PollPolicy::default()
            .with_interval(Duration::from_secs(self.poll_interval_secs))
            .with_jitter(Duration::from_millis(self.poll_jitter_millis))
            .with_max_attempts(max_attempts)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Raised when the poll interval is zero.
    #[error("poll_interval_secs must be greater than zero")]
    InvalidPollInterval,
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
