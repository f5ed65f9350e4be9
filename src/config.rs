//! Configuration loading and defaults.
//!
//! Configuration lives in a TOML file with three sections: `[main]` for the
//! broker and encryption settings shared by both ends of the pipeline,
//! `[store]` for the consumer, and `[scanner]` for the producer.
//!
//! Precedence, highest first: explicit command-line flags, environment
//! variables (`HASHUP_NATS_URL`, `HASHUP_ENCRYPTION_KEY`, `HASHUP_DB_PATH`,
//! wired through clap), the config file, built-in defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Upper bound on scanning concurrency
pub const MAX_CONCURRENCY: usize = 256;

/// Overall application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub main: MainConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// Path the config was loaded from, used to resolve relative paths
    #[serde(skip)]
    pub path: PathBuf,
}

/// Broker and encryption settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MainConfig {
    #[serde(default = "default_nats_url")]
    pub nats_server_url: String,
    #[serde(default)]
    pub encryption_key: String,
    #[serde(default = "default_stream")]
    pub nats_stream: String,
    #[serde(default = "default_subject")]
    pub nats_subject: String,
    /// Client certificate for mutual TLS, optional
    #[serde(default)]
    pub client_cert: Option<String>,
    /// Client key for mutual TLS, optional
    #[serde(default)]
    pub client_key: Option<String>,
    /// CA certificate for mutual TLS, optional
    #[serde(default)]
    pub ca_cert: Option<String>,
}

/// Consumer settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Seconds between periodic stats dumps, 0 disables them
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

/// Producer settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScannerConfig {
    /// Seconds between automatic scans when driven by an external scheduler
    #[serde(default = "default_scanning_interval")]
    pub scanning_interval: u64,
    #[serde(default = "default_concurrency")]
    pub scanning_concurrency: usize,
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_stream() -> String {
    "HASHUP".to_string()
}

fn default_subject() -> String {
    "FILES".to_string()
}

fn default_stats_interval() -> u64 {
    30
}

fn default_scanning_interval() -> u64 {
    3600
}

fn default_concurrency() -> usize {
    5
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Default config file location: `~/.config/hashup/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home_dir().join(".config"))
        .join("hashup")
        .join("config.toml")
}

/// Default catalog location: `~/.local/share/hashup/hashup.db`
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| home_dir().join(".local").join("share"))
        .join("hashup")
        .join("hashup.db")
}

/// Default cache checkpoint location: `~/.cache/hashup/cache`
pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| home_dir().join(".cache"))
        .join("hashup")
        .join("cache")
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            nats_server_url: default_nats_url(),
            encryption_key: String::new(),
            nats_stream: default_stream(),
            nats_subject: default_subject(),
            client_cert: None,
            client_key: None,
            ca_cert: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stats_interval: default_stats_interval(),
            db_path: default_db_path(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scanning_interval: default_scanning_interval(),
            scanning_concurrency: default_concurrency(),
            cache_path: default_cache_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            main: MainConfig::default(),
            store: StoreConfig::default(),
            scanner: ScannerConfig::default(),
            path: default_config_path(),
        }
    }
}

/// Values collected from flags and the environment that override the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub nats_url: Option<String>,
    pub encryption_key: Option<String>,
    pub stream: Option<String>,
    pub subject: Option<String>,
    pub db_path: Option<PathBuf>,
    pub stats_interval: Option<u64>,
    pub concurrency: Option<usize>,
    pub cache_path: Option<PathBuf>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub ca_cert: Option<String>,
}

impl Config {
    /// Load the configuration from `path`. A missing or unparseable file is
    /// a startup error.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Parse {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        })?;

        let mut config: Config = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.path = path.to_path_buf();

        let client_cert = config.main.client_cert.take();
        config.main.client_cert = client_cert.map(|p| config.normalize_path(&p));
        let client_key = config.main.client_key.take();
        config.main.client_key = client_key.map(|p| config.normalize_path(&p));
        let ca_cert = config.main.ca_cert.take();
        config.main.ca_cert = ca_cert.map(|p| config.normalize_path(&p));

        let db_path = config.normalize_path(&config.store.db_path.to_string_lossy());
        config.store.db_path = PathBuf::from(db_path);
        let cache_path = config.normalize_path(&config.scanner.cache_path.to_string_lossy());
        config.scanner.cache_path = PathBuf::from(cache_path);

        Ok(config)
    }

    /// Expand `~` and resolve relative paths against the config file's
    /// directory.
    pub fn normalize_path(&self, file: &str) -> String {
        if file.is_empty() {
            return String::new();
        }

        let expanded = if let Some(rest) = file.strip_prefix("~/") {
            home_dir().join(rest)
        } else {
            PathBuf::from(file)
        };

        if expanded.is_absolute() {
            return expanded.to_string_lossy().into_owned();
        }

        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(expanded)
            .to_string_lossy()
            .into_owned()
    }

    /// Apply flag and environment overrides on top of the file values.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(url) = &overrides.nats_url {
            self.main.nats_server_url = url.clone();
        }
        if let Some(key) = &overrides.encryption_key {
            self.main.encryption_key = key.clone();
        }
        if let Some(stream) = &overrides.stream {
            self.main.nats_stream = stream.clone();
        }
        if let Some(subject) = &overrides.subject {
            self.main.nats_subject = subject.clone();
        }
        if let Some(db_path) = &overrides.db_path {
            self.store.db_path = db_path.clone();
        }
        if let Some(interval) = overrides.stats_interval {
            self.store.stats_interval = interval;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.scanner.scanning_concurrency = concurrency;
        }
        if let Some(cache_path) = &overrides.cache_path {
            self.scanner.cache_path = cache_path.clone();
        }
        if let Some(cert) = &overrides.client_cert {
            self.main.client_cert = Some(self.normalize_path(cert));
        }
        if let Some(key) = &overrides.client_key {
            self.main.client_key = Some(self.normalize_path(key));
        }
        if let Some(cert) = &overrides.ca_cert {
            self.main.ca_cert = Some(self.normalize_path(cert));
        }
    }

    /// Validate the settings both pipeline ends depend on.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.main.encryption_key.is_empty() {
            return Err(ConfigError::MissingEncryptionKey);
        }
        if self.main.nats_server_url.is_empty() {
            return Err(ConfigError::MissingNatsUrl);
        }
        let concurrency = self.scanner.scanning_concurrency;
        if concurrency == 0 || concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::InvalidConcurrency {
                count: concurrency,
                max: MAX_CONCURRENCY,
            });
        }
        Ok(())
    }
}

/// Read a user ignore list: one regular expression per line, blank lines
/// dropped, `~/` expanded to the home directory and anchored.
pub fn read_ignore_list(path: &Path) -> ConfigResult<Vec<String>> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::IgnoreFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut patterns = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("~/") {
            patterns.push(format!(
                "^{}",
                home_dir().join(rest).to_string_lossy()
            ));
        } else {
            patterns.push(line.to_string());
        }
    }

    Ok(patterns)
}
