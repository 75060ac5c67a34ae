use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::EncodingMode;
use crate::endpoint::{Endpoint, DEFAULT_URI};
use crate::error::EndpointError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Connection URI, the path selects the database
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Request body encoding
    #[serde(default)]
    pub encoding: EncodingMode,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Keep-alive bound on a single exchange
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Directory for JSON log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Rotate when a file reaches this size
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_uri() -> String {
    DEFAULT_URI.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    3
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_log_filter() -> String {
    "tycoon=info,tycoon_rs=info,tycoon_core=info".to_string()
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_files() -> usize {
    9
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            filter: default_log_filter(),
            max_file_bytes: default_max_file_bytes(),
            max_files: default_max_files(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn endpoint(&self) -> Result<Endpoint, EndpointError> {
        Endpoint::parse(&self.uri)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            encoding: EncodingMode::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            keepalive_secs: default_keepalive_secs(),
            log: LogConfig::default(),
        }
    }
}
