use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock, RwLockReadGuard};

use crate::error::ConfigLoadError;

/// Default listen port. The source this system is modeled after uses 433,
/// almost certainly a typo for 443; kept as written for bit-exact behavior
/// (see DESIGN.md open question).
const DEFAULT_PORT: u16 = 433;

/// Load balancing strategy, selected per-config (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    WeightedRoundRobin,
}

impl Strategy {
    /// Parses a strategy string, case-insensitively. Anything unrecognized
    /// silently defaults to round robin.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "wrr" => Self::WeightedRoundRobin,
            _ => Self::RoundRobin,
        }
    }
}

/// One backend replica as declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub url: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// One service as declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub matcher: String,
    pub replicas: Vec<ReplicaConfig>,
}

/// Root configuration file shape (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    pub max_connections: usize,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    /// Rate, in seconds, at which to probe each replica's health.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

fn default_ports() -> Vec<u16> {
    vec![DEFAULT_PORT]
}

fn default_strategy() -> String {
    "rr".to_owned()
}

fn default_health_check_interval() -> u64 {
    10
}

impl Config {
    pub fn strategy(&self) -> Strategy {
        Strategy::parse(&self.strategy)
    }
}

/// Reads and parses the configuration file from disk.
pub async fn read_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigLoadError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

/// Holds the current [`Config`] behind a lock, and notifies waiters when it
/// changes. Mirrors the teacher's `RuntimeConfigProvider`.
pub struct ConfigProvider {
    config: RwLock<Config>,
    reload_notify: Notify,
}

impl ConfigProvider {
    pub fn new(initial_config: Config) -> Self {
        Self {
            config: RwLock::new(initial_config),
            reload_notify: Notify::new(),
        }
    }

    #[inline]
    pub async fn read(&self) -> RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    #[inline]
    pub async fn wait_reload(&self) {
        self.reload_notify.notified().await;
    }

    /// Installs a freshly parsed config and wakes reload waiters.
    pub async fn reload(&self, config: Config) {
        let mut w = self.config.write().await;
        *w = config;
        drop(w);
        self.reload_notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parse_is_case_insensitive() {
        assert_eq!(Strategy::parse("RR"), Strategy::RoundRobin);
        assert_eq!(Strategy::parse("Wrr"), Strategy::WeightedRoundRobin);
        assert_eq!(Strategy::parse("bogus"), Strategy::RoundRobin);
    }

    #[tokio::test]
    async fn parses_minimal_config() {
        let toml_str = r#"
            max_connections = 100
            [[services]]
            name = "a"
            matcher = "/a"
            [[services.replicas]]
            url = "http://127.0.0.1:9090"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.ports, vec![433]);
        assert_eq!(config.strategy(), Strategy::RoundRobin);
        assert_eq!(config.services.len(), 1);
    }
}
