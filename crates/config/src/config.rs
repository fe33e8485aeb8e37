//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Lowest batch concurrency a request may ask for
pub const MIN_BATCH_CONCURRENCY: u32 = 1;
/// Highest batch concurrency a request may ask for
pub const MAX_BATCH_CONCURRENCY: u32 = 16;

/// qBittorrent Web API connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QbitConfig {
    /// Host name or URL (a missing scheme means plain http)
    #[serde(default = "default_qbit_host")]
    pub host: String,
    /// Web UI port
    #[serde(default = "default_qbit_port")]
    pub port: u16,
    /// User name; empty means the Web UI accepts anonymous requests
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

fn default_qbit_host() -> String {
    "localhost".to_string()
}

fn default_qbit_port() -> u16 {
    8080
}

impl Default for QbitConfig {
    fn default() -> Self {
        Self {
            host: default_qbit_host(),
            port: default_qbit_port(),
            user: String::new(),
            password: String::new(),
        }
    }
}

impl QbitConfig {
    /// Whether requests need a session cookie
    pub fn has_auth(&self) -> bool {
        !self.user.is_empty()
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address to bind (default 0.0.0.0)
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to listen on (default 3000)
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Directory of UI assets served for non-API GET requests
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_server_port(),
            static_dir: None,
        }
    }
}

/// External transform binary settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransformConfig {
    /// Path or name of the ffmpeg binary
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: PathBuf,
    /// Concurrency used by batch remux requests that don't carry a hint
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: u32,
}

fn default_ffmpeg_bin() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_batch_concurrency() -> u32 {
    4
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub qbit: QbitConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transform: TransformConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - QBIT_HOST, QBIT_PORT, QBIT_USER, QBIT_PASSWORD -> qbit.*
    /// - BIND_ADDR -> server.bind
    /// - PORT -> server.port
    /// - STATIC_DIR -> server.static_dir
    /// - FFMPEG_BIN -> transform.ffmpeg_bin
    /// - BATCH_CONCURRENCY -> transform.batch_concurrency
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("QBIT_HOST") {
            if !val.is_empty() {
                self.qbit.host = val;
            }
        }

        if let Ok(val) = env::var("QBIT_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.qbit.port = port;
            }
        }

        if let Ok(val) = env::var("QBIT_USER") {
            self.qbit.user = val;
        }

        if let Ok(val) = env::var("QBIT_PASSWORD") {
            self.qbit.password = val;
        }

        if let Ok(val) = env::var("BIND_ADDR") {
            if !val.is_empty() {
                self.server.bind = val;
            }
        }

        if let Ok(val) = env::var("PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("STATIC_DIR") {
            if !val.is_empty() {
                self.server.static_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("FFMPEG_BIN") {
            if !val.is_empty() {
                self.transform.ffmpeg_bin = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("BATCH_CONCURRENCY") {
            if let Ok(n) = val.parse::<u32>() {
                self.transform.batch_concurrency = n;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise start from defaults.
    /// Environment overrides are applied either way.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }
}
