//! Configuration management.
//!
//! Files are TOML (`.toml`) or YAML (`.yaml`, `.yml`). Every key is
//! optional; missing values fall back to defaults, except the keys the
//! selected storage backend needs.
//!
//! ```toml
//! [storage]
//! type = "sqlite"
//! path = "/var/lib/tally/counter.db"
//!
//! [bench]
//! workers = 10
//! transactions_per_worker = 10000
//! ```
//!
//! A flat document with top-level `type` and `file_path` keys is read as
//! the storage section, so older single-backend files keep working.

mod backend;

pub use backend::{
    BackendConfig, DEFAULT_CASSANDRA_PORT, DEFAULT_MONGO_DATABASE, DEFAULT_MONGO_POOL_MAX,
    DEFAULT_MONGO_POOL_MIN, DEFAULT_OPERATION_TIMEOUT_MS, DEFAULT_POOL_MAX, DEFAULT_POOL_MIN,
    DEFAULT_POSTGRES_PORT, PostgresSettings, StorageSection,
};

use crate::{Error, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "TALLY_CONFIG_PATH";

/// Environment variable overriding the PostgreSQL password.
pub const POSTGRES_PASSWORD_ENV: &str = "TALLY_POSTGRES_PASSWORD";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize)]
pub struct LoggingSettings {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive used when `TALLY_LOG`/`RUST_LOG` are unset.
    pub filter: String,
    /// Append logs here instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
            file: None,
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSettings {
    /// Whether to install the recorder at all.
    pub enabled: bool,
    /// Scrape listener port, used by `serve`.
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

/// Benchmark defaults, overridable on the command line.
#[derive(Debug, Clone, Serialize)]
pub struct BenchSettings {
    /// Concurrent workers.
    pub workers: usize,
    /// Transactions each worker commits.
    pub transactions_per_worker: usize,
    /// Sleep between serializable retries.
    pub backoff_ms: u64,
    /// Attempts per logical transaction before a retrying strategy gives up.
    pub max_attempts: u32,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            transactions_per_worker: 10_000,
            backoff_ms: 1,
            max_attempts: 10_000,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// HTTP load client settings.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSettings {
    /// Base URL of the counter server.
    pub url: String,
    /// Concurrency levels to run, one round each.
    pub clients: Vec<usize>,
    /// `/inc` calls per client per round.
    pub requests_per_client: usize,
    /// Per-request timeout.
    pub timeout_seconds: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
            clients: vec![1, 2, 5, 10],
            requests_per_client: 1_000,
            timeout_seconds: 10,
        }
    }
}

/// Configuration file as written on disk.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// `[storage]` section.
    pub storage: Option<StorageSection>,
    /// Flat-layout backend kind.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Flat-layout counter file.
    pub file_path: Option<PathBuf>,
    /// `[logging]` section.
    pub logging: Option<ConfigFileLogging>,
    /// `[metrics]` section.
    pub metrics: Option<ConfigFileMetrics>,
    /// `[bench]` section.
    pub bench: Option<ConfigFileBench>,
    /// `[server]` section.
    pub server: Option<ConfigFileServer>,
    /// `[client]` section.
    pub client: Option<ConfigFileClient>,
}

/// `[logging]` as written on disk.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<LogFormat>,
    /// Filter directive.
    pub filter: Option<String>,
    /// Log file.
    pub file: Option<PathBuf>,
}

/// `[metrics]` as written on disk.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFileMetrics {
    /// Enable the exporter.
    pub enabled: Option<bool>,
    /// Scrape port.
    pub port: Option<u16>,
}

/// `[bench]` as written on disk.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFileBench {
    /// Concurrent workers.
    pub workers: Option<usize>,
    /// Transactions per worker.
    pub transactions_per_worker: Option<usize>,
    /// Retry backoff.
    pub backoff_ms: Option<u64>,
    /// Retry bound.
    pub max_attempts: Option<u32>,
}

/// `[server]` as written on disk.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFileServer {
    /// Bind address.
    pub host: Option<String>,
    /// Bind port.
    pub port: Option<u16>,
}

/// `[client]` as written on disk.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFileClient {
    /// Server base URL.
    pub url: Option<String>,
    /// Concurrency levels.
    pub clients: Option<Vec<usize>>,
    /// Requests per client.
    pub requests_per_client: Option<usize>,
    /// Request timeout.
    pub timeout_seconds: Option<u64>,
}

/// Supported config file syntaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML.
    Toml,
    /// YAML.
    Yaml,
}

impl ConfigFormat {
    /// Picks the syntax from a file extension; anything but `.yaml`/`.yml`
    /// is TOML.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Self::Yaml
            },
            _ => Self::Toml,
        }
    }
}

impl ConfigFile {
    /// Parses a config document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the document does not parse.
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Toml => toml::from_str(contents)
                .map_err(|e| Error::Configuration(format!("invalid TOML config: {e}"))),
            ConfigFormat::Yaml => serde_yaml_ng::from_str(contents)
                .map_err(|e| Error::Configuration(format!("invalid YAML config: {e}"))),
        }
    }

    /// Reads and parses a config file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::parse(&contents, ConfigFormat::from_path(path))
    }

    /// The storage section, falling back to the flat layout.
    fn storage_section(&self) -> Option<StorageSection> {
        if let Some(storage) = &self.storage {
            return Some(storage.clone());
        }
        self.kind.as_ref().map(|kind| StorageSection {
            kind: Some(kind.clone()),
            file_path: self.file_path.clone(),
            ..StorageSection::default()
        })
    }
}

/// Effective process configuration.
///
/// Immutable once loaded; the storage part is handed to exactly one
/// backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TallyConfig {
    /// Selected backend.
    pub storage: BackendConfig,
    /// Logging.
    pub logging: LoggingSettings,
    /// Metrics.
    pub metrics: MetricsSettings,
    /// Benchmark defaults.
    pub bench: BenchSettings,
    /// HTTP server.
    pub server: ServerSettings,
    /// HTTP load client.
    pub client: ClientSettings,
    /// File the configuration came from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl TallyConfig {
    /// Loads configuration.
    ///
    /// The first of these that is set wins:
    /// 1. `explicit` (the `--config` flag)
    /// 2. `TALLY_CONFIG_PATH`
    /// 3. `tally/config.toml` under the platform config dir, if it exists
    ///
    /// With none of them, built-in defaults apply (in-memory backend).
    /// Environment overrides are applied last.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a named file is missing or
    /// invalid, or if the storage section fails validation.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .or_else(|| Self::default_path().filter(|p| p.exists()));

        let file = match &path {
            Some(p) => ConfigFile::read(p)?,
            None => ConfigFile::default(),
        };

        let mut config = Self::from_config_file_with_env(file, |key| std::env::var(key).ok())?;
        if let Some(p) = &path {
            tracing::debug!(path = %p.display(), "Loaded configuration");
        }
        config.source = path;
        Ok(config)
    }

    /// Loads one file, ignoring the environment lookup chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file is missing or invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut config = Self::from_config_file(ConfigFile::read(path)?)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Platform config location (`~/.config/tally/config.toml` on Linux).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("tally").join("config.toml"))
    }

    /// Converts a parsed file, applying defaults and validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on invalid values.
    pub fn from_config_file(file: ConfigFile) -> Result<Self> {
        Self::from_config_file_with_env(file, |_| None)
    }

    /// Like [`TallyConfig::from_config_file`], reading overrides through
    /// `env`.
    fn from_config_file_with_env(
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::default();

        if let Some(mut section) = file.storage_section() {
            if let Some(password) = env(POSTGRES_PASSWORD_ENV).filter(|p| !p.is_empty()) {
                section.password = Some(SecretString::from(password));
            }
            config.storage = BackendConfig::from_section(&section)?;
        }

        if let Some(logging) = file.logging {
            if let Some(format) = logging.format {
                config.logging.format = format;
            }
            if let Some(filter) = logging.filter {
                config.logging.filter = filter;
            }
            config.logging.file = logging.file;
        }

        if let Some(metrics) = file.metrics {
            if let Some(enabled) = metrics.enabled {
                config.metrics.enabled = enabled;
            }
            if let Some(port) = metrics.port {
                config.metrics.port = port;
            }
        }
        if let Some(enabled) = env("TALLY_METRICS_ENABLED").map(|v| parse_bool(&v)) {
            config.metrics.enabled = enabled;
        }
        if let Some(port) = env("TALLY_METRICS_PORT").and_then(|v| v.parse::<u16>().ok()) {
            config.metrics.port = port;
        }

        if let Some(bench) = file.bench {
            if let Some(workers) = bench.workers {
                config.bench.workers = workers;
            }
            if let Some(transactions) = bench.transactions_per_worker {
                config.bench.transactions_per_worker = transactions;
            }
            if let Some(backoff) = bench.backoff_ms {
                config.bench.backoff_ms = backoff;
            }
            if let Some(max_attempts) = bench.max_attempts {
                config.bench.max_attempts = max_attempts;
            }
        }

        if let Some(server) = file.server {
            if let Some(host) = server.host {
                config.server.host = host;
            }
            if let Some(port) = server.port {
                config.server.port = port;
            }
        }

        if let Some(client) = file.client {
            if let Some(url) = client.url {
                config.client.url = url;
            }
            if let Some(clients) = client.clients {
                config.client.clients = clients;
            }
            if let Some(requests) = client.requests_per_client {
                config.client.requests_per_client = requests;
            }
            if let Some(timeout) = client.timeout_seconds {
                config.client.timeout_seconds = timeout;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bench.workers == 0 || self.bench.transactions_per_worker == 0 {
            return Err(Error::Configuration(
                "[bench] workers and transactions_per_worker must be positive".to_string(),
            ));
        }
        if self.bench.max_attempts == 0 {
            return Err(Error::Configuration(
                "[bench] max_attempts must be positive".to_string(),
            ));
        }
        if self.client.clients.is_empty() || self.client.clients.contains(&0) {
            return Err(Error::Configuration(
                "[client] clients must be a non-empty list of positive counts".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    let value = value.to_lowercase();
    value == "true" || value == "1" || value == "yes"
}
