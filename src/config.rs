//! Daemon configuration.
//!
//! Layers, lowest precedence first: built-in defaults, the TOML config file,
//! `SRVKEEP_*` environment variables, then CLI flags.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{ReadinessProbe, RestoreSettings};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/srvkeep/config.toml";
pub const CONFIG_PATH_ENV: &str = "SRVKEEP_CONFIG";
const ENV_PREFIX: &str = "SRVKEEP_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub servers_base_path: PathBuf,
    pub rpc_bind: SocketAddr,
    pub http_bind: SocketAddr,
    pub workers: usize,
    pub stop_timeout_secs: u64,
    pub restart_timeout_secs: u64,
    pub backup_container_suffix: String,
    pub ready_pattern: String,
    pub ready_timeout_secs: u64,
    pub ready_poll_interval_secs: u64,
    pub ready_log_lookback_secs: u64,
    pub ready_log_tail_lines: usize,
    pub container_engine: String,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            servers_base_path: PathBuf::from("/opt/docker"),
            rpc_bind: SocketAddr::from(([127, 0, 0, 1], 9847)),
            http_bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            workers: 2,
            stop_timeout_secs: 60,
            restart_timeout_secs: 30,
            backup_container_suffix: "-backup".to_string(),
            ready_pattern: r"Done \([0-9.]+s\)! For help".to_string(),
            ready_timeout_secs: 300,
            ready_poll_interval_secs: 2,
            ready_log_lookback_secs: 5,
            ready_log_tail_lines: 100,
            container_engine: "docker".to_string(),
            simulation: false,
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Load configuration, merging `overrides` (usually CLI flags) last.
    pub fn new<T: Serialize>(overrides: Option<&T>) -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        Self::load(Figment::new().merge(Toml::file(path)), overrides)
    }

    /// Like [`AppConfig::new`] but reading an explicit figment for the file
    /// layer. Used by tests to avoid touching `/etc`.
    pub fn load<T: Serialize>(file_layer: Figment, overrides: Option<&T>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(file_layer)
            .merge(Env::prefixed(ENV_PREFIX));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment.extract().context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.ready_poll_interval_secs == 0 {
            bail!("ready_poll_interval_secs must be at least 1");
        }
        Regex::new(&self.ready_pattern)
            .with_context(|| format!("Invalid ready_pattern: {}", self.ready_pattern))?;
        Ok(())
    }

    pub fn restore_settings(&self) -> Result<RestoreSettings> {
        let pattern = Regex::new(&self.ready_pattern)
            .with_context(|| format!("Invalid ready_pattern: {}", self.ready_pattern))?;

        Ok(RestoreSettings {
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            restart_timeout: Duration::from_secs(self.restart_timeout_secs),
            backup_container_suffix: self.backup_container_suffix.clone(),
            log_lookback: Duration::from_secs(self.ready_log_lookback_secs),
            readiness: ReadinessProbe {
                pattern,
                timeout: Duration::from_secs(self.ready_timeout_secs),
                poll_interval: Duration::from_secs(self.ready_poll_interval_secs),
                tail_lines: self.ready_log_tail_lines,
            },
        })
    }
}
