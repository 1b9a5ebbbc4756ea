//! Configuration loading for `klyqa-ctl` (§6 ambient Config file).
//!
//! TOML is the sole config source; every key is optional and falls back to
//! the constants the core components already default to.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Resolved configuration, merging the TOML file with built-in defaults.
#[derive(Debug, Clone)]
pub struct KlyqaConfig {
    pub udp_port: u16,
    pub tcp_port: u16,
    pub bind_interface: Option<String>,
    pub discovery_broadcast: bool,
    pub process_timeout_secs: u64,
    /// Writable data directory for the AES key and device-config caches
    /// (spec's "persisted state layout", default `~/.klyqa`).
    pub data_dir: PathBuf,
}

impl Default for KlyqaConfig {
    fn default() -> Self {
        Self {
            udp_port: 2222,
            tcp_port: 3333,
            bind_interface: None,
            discovery_broadcast: false,
            process_timeout_secs: 600,
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".klyqa")
}

/// Default config file location, `~/.config/klyqa-ctl/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("klyqa-ctl")
        .join("config.toml")
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    udp_port: Option<u16>,
    tcp_port: Option<u16>,
    bind_interface: Option<String>,
    discovery_broadcast: Option<bool>,
    process_timeout_secs: Option<u64>,
    data_dir: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("parsing config file '{path}': {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

/// Load config from `path` if given, else from [`default_config_path`] if it
/// exists, else fall back to all-default values.
pub fn load(path: Option<&Path>) -> Result<KlyqaConfig, ConfigError> {
    let (resolved_path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    let raw = match std::fs::read_to_string(&resolved_path) {
        Ok(contents) => toml::from_str::<RawConfig>(&contents)
            .map_err(|source| ConfigError::Parse { path: resolved_path.clone(), source })?,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => RawConfig::default(),
        Err(source) => return Err(ConfigError::Io { path: resolved_path, source }),
    };

    let defaults = KlyqaConfig::default();
    Ok(KlyqaConfig {
        udp_port: raw.udp_port.unwrap_or(defaults.udp_port),
        tcp_port: raw.tcp_port.unwrap_or(defaults.tcp_port),
        bind_interface: raw.bind_interface.or(defaults.bind_interface),
        discovery_broadcast: raw.discovery_broadcast.unwrap_or(defaults.discovery_broadcast),
        process_timeout_secs: raw.process_timeout_secs.unwrap_or(defaults.process_timeout_secs),
        data_dir: raw.data_dir.map(PathBuf::from).unwrap_or(defaults.data_dir),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_optional_config_file_yields_defaults() {
        let cfg = load(None).unwrap();
        assert_eq!(cfg.udp_port, 2222);
        assert_eq!(cfg.tcp_port, 3333);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load(Some(Path::new("/nonexistent/klyqa-ctl.toml")));
        assert!(matches!(err, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn partial_toml_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tcp_port = 4444\ndiscovery_broadcast = true\n").unwrap();
        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.tcp_port, 4444);
        assert_eq!(cfg.udp_port, 2222);
        assert!(cfg.discovery_broadcast);
    }
}
