//! The relay's configuration document.

use std::path::{Path, PathBuf};

use anyhow::Context;
use courier_delivery::{DeliveryConfig, DkimConfig};
use courier_smtp::SmtpConfig;
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

/// Searched in order when no path is given.
pub const DEFAULT_PATHS: [&str; 2] = [
    "./courier.config.ron",
    "/etc/courier/courier.config.ron",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Courier {
    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub dkim: DkimConfig,

    /// How long in-flight sessions may run on after a shutdown signal.
    #[serde(default = "defaults::shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for Courier {
    fn default() -> Self {
        Self {
            smtp: SmtpConfig::default(),
            delivery: DeliveryConfig::default(),
            dkim: DkimConfig::default(),
            shutdown_grace_secs: defaults::shutdown_grace_secs(),
        }
    }
}

mod defaults {
    pub const fn shutdown_grace_secs() -> u64 {
        30
    }
}

impl Courier {
    /// # Errors
    ///
    /// Returns an error if the file can't be read or isn't valid.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        ron::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }
}

/// Find the configuration file: the explicit path if given (from `--config`
/// or the environment), otherwise the first of `candidates` that exists.
///
/// # Errors
///
/// Returns an error if the explicit path doesn't exist, or if none of the
/// candidates do.
pub fn locate(explicit: Option<PathBuf>, candidates: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("Configuration file {} does not exist", path.display());
    }

    if let Some(path) = candidates.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let tried = candidates
        .iter()
        .map(|path| format!("  - {}", path.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config / {CONFIG_ENV}\n{tried}"
    )
}
