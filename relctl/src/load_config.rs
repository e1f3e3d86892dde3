/// `load_config`: reads the YAML release configuration into [`ReleaseConfig`].
///
/// This is the only place that parses the addon configuration file. Secrets
/// never live in it; tokens come from the environment through clap.
///
/// # Errors
/// A missing file or malformed YAML is reported with the offending path so
/// the CLI can print it as is.
use anyhow::Result;
use relctl_core::config::ReleaseConfig;
use relctl_core::error::ErrorKind;
use std::fs;
use std::path::Path;
use tracing::{debug, error};

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ReleaseConfig> {
    let path = path.as_ref();
    debug!(config_path = ?path, "[CONFIG] Reading release configuration");

    let raw = fs::read_to_string(path).map_err(|e| {
        error!(kind = %ErrorKind::Input, error = ?e, config_path = ?path, "[CONFIG] Config file unreadable");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path, e)
    })?;

    let config: ReleaseConfig = serde_yaml::from_str(&raw).map_err(|e| {
        error!(kind = %ErrorKind::Input, error = ?e, config_path = ?path, "[CONFIG] Config YAML rejected");
        anyhow::anyhow!("Failed to parse config YAML {:?}: {e}", path)
    })?;

    config.trace_loaded();
    Ok(config)
}
