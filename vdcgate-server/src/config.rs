use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use vdcgate_transport::pbuf::DEFAULT_MAX_FRAME_SIZE;
use vdcgate_transport::ApiRole;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port '{0}'")]
    InvalidPort(String),
    #[error("Unknown API flavor '{0}', expected 'protobuf' or 'json'")]
    InvalidFlavor(String),
    #[error("Invalid role: {0}")]
    InvalidRole(String),
    #[error("Invalid max frame size '{0}'")]
    InvalidFrameSize(String),
    #[error("Invalid log level '{0}'")]
    InvalidLogLevel(String),
}

/// Wire format spoken on accepted connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFlavor {
    #[default]
    Protobuf,
    Json,
}

impl fmt::Display for ApiFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiFlavor::Protobuf => write!(f, "protobuf"),
            ApiFlavor::Json => write!(f, "json"),
        }
    }
}

impl FromStr for ApiFlavor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "protobuf" | "pbuf" => Ok(ApiFlavor::Protobuf),
            "json" | "jsonrpc" => Ok(ApiFlavor::Json),
            other => Err(ConfigError::InvalidFlavor(other.to_string())),
        }
    }
}

/// Settings applied to each connection the server creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub role: ApiRole,
    /// Largest frame (protobuf) or line (JSON-RPC) accepted and sent.
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            role: ApiRole::Vdc,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub flavor: ApiFlavor,
    pub role: ApiRole,
    pub max_frame_size: usize,
    pub log_dir: PathBuf,
    /// Level for the vdcgate crates; everything else logs warnings only.
    pub log_level: Level,
    /// Write the log file as JSON lines instead of text.
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8440,
            flavor: ApiFlavor::Protobuf,
            role: ApiRole::Vdc,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            log_dir: PathBuf::from("logs"),
            log_level: Level::INFO,
            log_json: false,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `VDCGATE_HOST`, `VDCGATE_PORT`,
    /// `VDCGATE_FLAVOR`, `VDCGATE_ROLE`, `VDCGATE_MAX_FRAME`,
    /// `VDCGATE_LOG_DIR`, `VDCGATE_LOG_LEVEL` and `VDCGATE_LOG_JSON`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = ServerConfig::default();
        if let Some(host) = lookup("VDCGATE_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("VDCGATE_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }
        if let Some(flavor) = lookup("VDCGATE_FLAVOR") {
            config.flavor = flavor.parse()?;
        }
        if let Some(role) = lookup("VDCGATE_ROLE") {
            config.role = role.parse().map_err(ConfigError::InvalidRole)?;
        }
        if let Some(size) = lookup("VDCGATE_MAX_FRAME") {
            config.max_frame_size = size
                .trim()
                .parse()
                .ok()
                .filter(|n| *n > 0 && *n <= u16::MAX as usize)
                .ok_or_else(|| ConfigError::InvalidFrameSize(size.clone()))?;
        }
        if let Some(dir) = lookup("VDCGATE_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("VDCGATE_LOG_LEVEL") {
            config.log_level = level
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidLogLevel(level.clone()))?;
        }
        if let Some(json) = lookup("VDCGATE_LOG_JSON") {
            config.log_json = matches!(json.trim(), "1" | "true" | "yes");
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            role: self.role,
            max_frame_size: self.max_frame_size,
        }
    }
}
