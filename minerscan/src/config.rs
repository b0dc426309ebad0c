//! Runtime configuration.
//!
//! Loaded once at startup from an optional TOML file, then overridden
//! from the environment, then validated. Every section has defaults, so
//! an empty file (or no file) is a working configuration apart from the
//! directory access key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::model::DEFAULT_ADDRESS_PREFIX;

/// File read when `--config` is not given, if it exists.
pub const DEFAULT_CONFIG_FILE: &str = "minerscan.toml";

pub const ENV_MINER_USER: &str = "MINERSCAN_MINER_USER";
pub const ENV_MINER_PASSWORD: &str = "MINERSCAN_MINER_PASSWORD";
pub const ENV_DIRECTORY_COOKIE: &str = "MINERSCAN_DIRECTORY_COOKIE";
pub const ENV_DIRECTORY_ACCESS_KEY: &str = "MINERSCAN_DIRECTORY_ACCESS_KEY";
pub const ENV_DATABASE: &str = "MINERSCAN_DATABASE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub directory: DirectoryConfig,
    pub scan: ScanConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("minerscan.db"),
        }
    }
}

/// Pool observer API used to discover the fleet.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub url: String,
    pub access_key: String,
    pub observer_user_id: String,
    pub coin_type: String,
    pub page_size: u32,
    /// Whole-request timeout. Must exceed the probe timeout.
    pub request_timeout_secs: u64,
    /// Pause between page requests.
    pub page_delay_ms: u64,
    /// Session cookie header value, sent verbatim.
    pub cookie: String,
    pub user_agent: String,
    /// First two octets of derived device addresses.
    pub address_prefix: [u8; 2],
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: "https://www.antpool.com/auth/v3/observer/api/worker/list".into(),
            access_key: String::new(),
            observer_user_id: String::new(),
            coin_type: "BTC".into(),
            page_size: 100,
            request_timeout_secs: 30,
            page_delay_ms: 500,
            cookie: String::new(),
            user_agent: concat!("minerscan/", env!("CARGO_PKG_VERSION")).into(),
            address_prefix: DEFAULT_ADDRESS_PREFIX,
        }
    }
}

impl DirectoryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

/// Fleet scan parameters. Credentials are shared by every device.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Maximum devices probed at once.
    pub concurrency: usize,
    /// Per-attempt HTTP timeout.
    pub probe_timeout_secs: u64,
    pub username: String,
    pub password: String,
    /// Endpoint templates tried in order; `{ip}` is the device address.
    pub endpoints: Vec<String>,
    /// Cancel a pass that runs longer than this.
    pub pass_deadline_secs: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            probe_timeout_secs: 5,
            username: "root".into(),
            password: "root".into(),
            endpoints: vec![
                "http://{ip}/cgi-bin/get_stats.cgi".into(),
                "http://{ip}/cgi-bin/stats.cgi".into(),
            ],
            pass_deadline_secs: None,
        }
    }
}

impl ScanConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn pass_deadline(&self) -> Option<Duration> {
        self.pass_deadline_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load, apply environment overrides and validate.
    ///
    /// With `path` set the file must exist. Without it,
    /// [`DEFAULT_CONFIG_FILE`] is read if present and defaults are used
    /// otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Override secrets and the database path from `lookup` (normally the
    /// process environment). Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get(ENV_MINER_USER) {
            self.scan.username = v;
        }
        if let Some(v) = get(ENV_MINER_PASSWORD) {
            self.scan.password = v;
        }
        if let Some(v) = get(ENV_DIRECTORY_COOKIE) {
            self.directory.cookie = v;
        }
        if let Some(v) = get(ENV_DIRECTORY_ACCESS_KEY) {
            self.directory.access_key = v;
        }
        if let Some(v) = get(ENV_DATABASE) {
            self.database.path = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let scan = &self.scan;
        let directory = &self.directory;

        if scan.concurrency == 0 {
            return Err(ConfigError::Invalid("scan.concurrency must be at least 1".into()));
        }
        if scan.endpoints.is_empty() {
            return Err(ConfigError::Invalid("scan.endpoints must not be empty".into()));
        }
        if scan.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid("scan.probe_timeout_secs must be at least 1".into()));
        }
        if scan.probe_timeout_secs >= directory.request_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "scan.probe_timeout_secs ({}) must be shorter than directory.request_timeout_secs ({})",
                scan.probe_timeout_secs, directory.request_timeout_secs
            )));
        }
        if scan.pass_deadline_secs == Some(0) {
            return Err(ConfigError::Invalid("scan.pass_deadline_secs must be at least 1".into()));
        }
        if directory.page_size == 0 {
            return Err(ConfigError::Invalid("directory.page_size must be at least 1".into()));
        }
        Ok(())
    }
}
