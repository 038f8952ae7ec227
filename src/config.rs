//! Layered configuration.
//!
//! Resolution order, later layers winning:
//! 1. Built-in defaults
//! 2. JSON file at `$EXPRCALC_CONFIG`, else `<config dir>/exprcalc/config.json`
//! 3. Environment: `EXPRCALC_HOST`, `EXPRCALC_PORT`, `EXPRCALC_ALLOW_POWER`
//! 4. Command-line flags (applied by the binary)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::CompileOptions;
use crate::protocol::DEFAULT_PORT;

pub const CONFIG_PATH_ENV: &str = "EXPRCALC_CONFIG";
pub const HOST_ENV: &str = "EXPRCALC_HOST";
pub const PORT_ENV: &str = "EXPRCALC_PORT";
pub const ALLOW_POWER_ENV: &str = "EXPRCALC_ALLOW_POWER";

/// Address the server binds when no host is configured.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
/// Address clients connect to when no host is configured.
pub const DEFAULT_CONNECT_HOST: &str = "127.0.0.1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host to bind (server) or reach (client). `None` picks the role default.
    pub host: Option<String>,
    pub port: u16,
    /// Accept the `^` operator.
    pub allow_power: bool,
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            allow_power: false,
            connect_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Defaults, then the config file, then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            // An explicitly named file must exist.
            Some(path) => Self::from_file(Path::new(&path))?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(HOST_ENV).filter(|h| !h.trim().is_empty()) {
            self.host = Some(host.trim().to_string());
        }
        if let Some(value) = lookup(PORT_ENV) {
            self.port = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: PORT_ENV,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ALLOW_POWER_ENV) {
            self.allow_power = parse_bool(&value).ok_or(ConfigError::InvalidEnv {
                var: ALLOW_POWER_ENV,
                value,
            })?;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or(DEFAULT_BIND_HOST),
            self.port
        )
    }

    pub fn connect_addr(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or(DEFAULT_CONNECT_HOST),
            self.port
        )
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            allow_power: self.allow_power,
        }
    }
}

/// `<config dir>/exprcalc/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("exprcalc").join("config.json"))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
