use std::{env, fmt, fs, path, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_INTERVAL_SECONDS: f64 = 60.0;
pub const MIN_INTERVAL_SECONDS: f64 = 1.0;
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 1.5;
pub const MIN_TIMEOUT_SECONDS: f64 = 0.1;
pub const MAX_RETRY_COUNT: u8 = 2;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config file: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("Failed to write config file: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("No config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub probe: ProbeConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_seconds: f64,
    pub retry_count: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

impl StorageBackend {
    /// Parse a backend name, treating anything unrecognised as `memory`
    pub fn from_str_lossy(value: &str) -> Self {
        value.parse().unwrap_or(StorageBackend::Memory)
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: path::PathBuf,
    /// Results kept per node in the sqlite backend, 0 keeps everything
    pub retention_per_node: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `compact` or `json`
    pub format: String,
    pub level: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_seconds: DEFAULT_INTERVAL_SECONDS }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { timeout_seconds: DEFAULT_TIMEOUT_SECONDS, retry_count: 0 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: path::PathBuf::from("./netsentinel.sqlite3"),
            retention_per_node: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: "compact".into(), level: "info".into() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            probe: ProbeConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Non-positive intervals fall back to the default, tiny ones are raised to the minimum
pub fn normalize_interval(seconds: f64) -> f64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        DEFAULT_INTERVAL_SECONDS
    } else {
        seconds.max(MIN_INTERVAL_SECONDS)
    }
}

/// Non-positive timeouts fall back to the default, tiny ones are raised to the minimum
pub fn normalize_timeout(seconds: f64) -> f64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        DEFAULT_TIMEOUT_SECONDS
    } else {
        seconds.max(MIN_TIMEOUT_SECONDS)
    }
}

pub fn normalize_retry_count(count: i64) -> u8 {
    count.clamp(0, i64::from(MAX_RETRY_COUNT)) as u8
}

fn env_override<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={:?}", name, raw);
            None
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/netsentinel/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("netsentinel/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Interval (s)", &self.scheduler.interval_seconds)?;
        write_title_1(f, "Probe")?;
        write_1(f, "Timeout (s)", &self.probe.timeout_seconds)?;
        write_1(f, "Retries", &self.probe.retry_count)?;
        write_title_1(f, "Storage")?;
        write_1(f, "Backend", &self.storage.backend)?;
        write_1(f, "Path", &self.storage.path.display())?;
        write_1(f, "Retention per node", &self.storage.retention_per_node)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Format", &self.logging.format)?;
        write_1(f, "Level", &self.logging.level)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/netsentinel/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// Environment overrides are applied and values normalized afterwards.
    ///
    /// ```ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        Ok(config.with_env_overrides().normalized())
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(Error::WriteFailed)
    }

    /// Apply `NETSENTINEL_*` environment variables on top of this config
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(interval) = env_override::<f64>("NETSENTINEL_SCHEDULER_INTERVAL_S") {
            self.scheduler.interval_seconds = interval;
        }
        if let Some(timeout) = env_override::<f64>("NETSENTINEL_PROBE_TIMEOUT_S") {
            self.probe.timeout_seconds = timeout;
        }
        if let Some(retries) = env_override::<i64>("NETSENTINEL_PROBE_RETRY_COUNT") {
            self.probe.retry_count = normalize_retry_count(retries);
        }
        if let Ok(backend) = env::var("NETSENTINEL_STORAGE_BACKEND") {
            self.storage.backend = StorageBackend::from_str_lossy(&backend);
        }
        if let Ok(path) = env::var("NETSENTINEL_SQLITE_PATH") {
            self.storage.path = path::PathBuf::from(path);
        }
        if let Some(retention) = env_override::<i64>("NETSENTINEL_RESULT_RETENTION_PER_NODE") {
            self.storage.retention_per_node = u32::try_from(retention.max(0)).unwrap_or(u32::MAX);
        }
        self
    }

    /// Clamp every value into its supported range
    pub fn normalized(mut self) -> Self {
        self.scheduler.interval_seconds = normalize_interval(self.scheduler.interval_seconds);
        self.probe.timeout_seconds = normalize_timeout(self.probe.timeout_seconds);
        self.probe.retry_count = self.probe.retry_count.min(MAX_RETRY_COUNT);
        self
    }
}
