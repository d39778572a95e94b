//! Client profile resolution (base URL and bearer token).
//!
//! Explicit values from [`E2eConfig`] win. Otherwise the profile is read from
//! the garm-cli configuration file (`[[managers]]` entries with an optional
//! `active_manager` selector).

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use serde::Deserialize;
use thiserror::Error;

use crate::config::E2eConfig;

const API_PREFIX: &str = "api/v1";
const CLI_CONFIG_DIR: &str = "garm-cli";
const CLI_CONFIG_FILE: &str = "config.toml";

/// Connection details for the control plane.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientProfile {
    /// Control-plane base URL (scheme, host and optional path prefix).
    pub base_url: String,
    /// Bearer token.
    pub token: String,
}

/// Errors raised while resolving the client profile.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProfileError {
    /// Raised when neither configuration nor a profile file supplies a value.
    #[error("no {field} configured: set GARM_BASE_URL/GARM_TOKEN or log in with garm-cli")]
    Missing {
        /// Missing field name.
        field: &'static str,
    },
    /// Raised when the profile file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the profile file is not valid TOML.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the profile file lists no managers.
    #[error("{path} does not define any managers")]
    NoManagers {
        /// Profile file path.
        path: Utf8PathBuf,
    },
    /// Raised when `active_manager` names a manager that is not listed.
    #[error("active manager {name} is not defined in {path}")]
    UnknownManager {
        /// Profile file path.
        path: Utf8PathBuf,
        /// Manager name that could not be found.
        name: String,
    },
    /// Raised when the base URL lacks an HTTP scheme.
    #[error("base URL {url} must start with http:// or https://")]
    InvalidBaseUrl {
        /// Offending URL.
        url: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct CliConfigFile {
    #[serde(default)]
    active_manager: Option<String>,
    #[serde(default)]
    managers: Vec<Manager>,
}

#[derive(Debug, Deserialize)]
struct Manager {
    name: String,
    base_url: String,
    token: String,
}

impl ClientProfile {
    /// Builds a profile, rejecting URLs without an HTTP scheme.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidBaseUrl`] when the URL is not HTTP(S).
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ProfileError> {
        let url = base_url.into().trim().trim_end_matches('/').to_owned();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ProfileError::InvalidBaseUrl { url });
        }
        Ok(Self {
            base_url: url,
            token: token.into().trim().to_owned(),
        })
    }

    /// Resolves the profile, preferring explicit configuration over the
    /// garm-cli file.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] when no source supplies a base URL and token
    /// or when the profile file cannot be read.
    pub fn resolve(config: &E2eConfig) -> Result<Self, ProfileError> {
        if let (Some(url), Some(token)) = (config.base_url.as_deref(), config.token.as_deref()) {
            return Self::new(url, token);
        }

        let path = config
            .profile_path
            .as_deref()
            .map(Utf8PathBuf::from)
            .or_else(default_profile_path)
            .ok_or(ProfileError::Missing { field: "base_url" })?;
        let from_file = load_profile(&path)?;

        Self::new(
            config.base_url.clone().unwrap_or(from_file.base_url),
            config.token.clone().unwrap_or(from_file.token),
        )
    }

    /// API root every endpoint path is joined to.
    #[must_use]
    pub fn api_base(&self) -> String {
        format!("{}/{API_PREFIX}", self.base_url.trim_end_matches('/'))
    }
}

/// Default garm-cli configuration path (`$XDG_CONFIG_HOME/garm-cli/config.toml`,
/// falling back to `~/.config`).
#[must_use]
pub fn default_profile_path() -> Option<Utf8PathBuf> {
    let base = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(Utf8PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|home| Utf8PathBuf::from(home).join(".config"))
        })?;
    Some(base.join(CLI_CONFIG_DIR).join(CLI_CONFIG_FILE))
}

/// Reads the active manager from a garm-cli configuration file.
///
/// # Errors
///
/// Returns [`ProfileError`] when the file is unreadable, malformed, or does
/// not define the selected manager.
pub fn load_profile(path: &Utf8Path) -> Result<ClientProfile, ProfileError> {
    let contents = read_file(path)?;
    let parsed: CliConfigFile = toml::from_str(&contents).map_err(|err| ProfileError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    let manager = match parsed.active_manager.as_deref() {
        Some(name) => parsed
            .managers
            .iter()
            .find(|manager| manager.name == name)
            .ok_or_else(|| ProfileError::UnknownManager {
                path: path.to_path_buf(),
                name: name.to_owned(),
            })?,
        None => parsed
            .managers
            .first()
            .ok_or_else(|| ProfileError::NoManagers {
                path: path.to_path_buf(),
            })?,
    };

    ClientProfile::new(manager.base_url.as_str(), manager.token.as_str())
}

fn read_file(path: &Utf8Path) -> Result<String, ProfileError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| ProfileError::Io {
        path: path.to_path_buf(),
        message: String::from("profile path is missing a filename"),
    })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| io_error(path, &err))?;
    dir.read_to_string(file_name)
        .map_err(|err| io_error(path, &err))
}

fn io_error(path: &Utf8Path, err: &io::Error) -> ProfileError {
    ProfileError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
