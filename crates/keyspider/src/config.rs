use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Daemon configuration, loaded from a YAML file with per-field defaults.
/// The database DSN may also be supplied through `KEYSPIDER_DB_DSN`, which
/// takes precedence over the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub key_hunt: KeyHuntConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub dsn: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
}

impl SshConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub dns: DnsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyHuntConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_allow_roots")]
    pub allow_roots: Vec<String>,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window: usize,
}

fn default_api_listen() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_ssh_user() -> String {
    "root".to_string()
}
fn default_connect_timeout_seconds() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_allow_roots() -> Vec<String> {
    vec!["/home".to_string(), "/root".to_string(), "/etc".to_string()]
}
fn default_max_files() -> usize {
    20_000
}
fn default_max_depth() -> u32 {
    10
}
fn default_dedupe_window() -> usize {
    256
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_api_listen(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for KeyHuntConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_roots: default_allow_roots(),
            max_files: default_max_files(),
            max_depth: default_max_depth(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts: Vec::new(),
            dedupe_window: default_dedupe_window(),
        }
    }
}

/// Load configuration from an optional YAML file plus the environment.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let yaml = match path {
        Some(p) => Some(
            std::fs::read_to_string(p)
                .with_context(|| format!("read config file {}", p.display()))?,
        ),
        None => None,
    };
    load_from(yaml.as_deref(), std::env::var("KEYSPIDER_DB_DSN").ok())
}

fn load_from(yaml: Option<&str>, env_dsn: Option<String>) -> anyhow::Result<Config> {
    let mut config: Config = match yaml {
        Some(text) => serde_yaml::from_str(text).context("parse config yaml")?,
        None => Config::default(),
    };

    if let Some(dsn) = env_dsn.filter(|d| !d.is_empty()) {
        config.db.dsn = dsn;
    }
    if config.db.dsn.is_empty() {
        anyhow::bail!("db.dsn is required (set KEYSPIDER_DB_DSN or the config file)");
    }
    Ok(config)
}
