//! Configuration for the multiconn server and client.
//!
//! Supports both command-line arguments and an optional TOML configuration
//! file. CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "multiconn-server")]
#[command(version = "0.1.0")]
#[command(about = "Single-threaded multi-connection TCP echo server", long_about = None)]
pub struct ServerArgs {
    /// Host to listen on (e.g., 127.0.0.1)
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the multi-connection client
#[derive(Parser, Debug)]
#[command(name = "multiconn-client")]
#[command(version = "0.1.0")]
#[command(about = "Opens several connections and sends a fixed message set on each", long_about = None)]
pub struct ClientArgs {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Number of connections to open
    pub num_connections: usize,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub reactor: ReactorConfig,
    #[serde(default)]
    pub client: ClientFileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reactor tuning shared by both roles
#[derive(Debug, Deserialize)]
pub struct ReactorConfig {
    /// Maximum bytes taken by a single read
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Maximum readiness events returned per poll
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Listen backlog (server only)
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            event_capacity: default_event_capacity(),
            backlog: default_backlog(),
        }
    }
}

/// Client-role settings
#[derive(Debug, Deserialize)]
pub struct ClientFileConfig {
    /// Messages sent, in order, on every connection
    #[serde(default = "default_messages")]
    pub messages: Vec<String>,
    /// Poll timeout used to re-check for an empty registry
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for ClientFileConfig {
    fn default() -> Self {
        Self {
            messages: default_messages(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_chunk_size() -> usize {
    1024
}

fn default_event_capacity() -> usize {
    1024
}

fn default_backlog() -> i32 {
    1024
}

fn default_messages() -> Vec<String> {
    vec![
        "Message 1 from client.".to_string(),
        "Message 2 from client.".to_string(),
    ]
}

fn default_poll_timeout_ms() -> u64 {
    1000 // 1 second
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub chunk_size: usize,
    pub event_capacity: usize,
    pub backlog: i32,
    pub log_level: String,
}

impl ServerConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    pub fn from_args(args: ServerArgs) -> Result<Self, ConfigError> {
        let file = load_toml(args.config.as_ref())?;
        validate(&file.reactor)?;

        Ok(ServerConfig {
            addr: resolve(&args.host, args.port)?,
            chunk_size: file.reactor.chunk_size,
            event_capacity: file.reactor.event_capacity,
            backlog: file.reactor.backlog,
            log_level: args.log_level.unwrap_or(file.logging.level),
        })
    }
}

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: SocketAddr,
    pub num_connections: usize,
    pub messages: Vec<Vec<u8>>,
    pub chunk_size: usize,
    pub event_capacity: usize,
    pub poll_timeout: Duration,
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ClientArgs::parse())
    }

    pub fn from_args(args: ClientArgs) -> Result<Self, ConfigError> {
        let file = load_toml(args.config.as_ref())?;
        validate(&file.reactor)?;

        Ok(ClientConfig {
            addr: resolve(&args.host, args.port)?,
            num_connections: args.num_connections,
            messages: file
                .client
                .messages
                .into_iter()
                .map(String::into_bytes)
                .collect(),
            chunk_size: file.reactor.chunk_size,
            event_capacity: file.reactor.event_capacity,
            poll_timeout: Duration::from_millis(file.client.poll_timeout_ms),
            log_level: args.log_level.unwrap_or(file.logging.level),
        })
    }
}

fn load_toml(path: Option<&PathBuf>) -> Result<TomlConfig, ConfigError> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::FileRead(path.clone(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.clone(), e))
        }
        None => Ok(TomlConfig::default()),
    }
}

fn validate(reactor: &ReactorConfig) -> Result<(), ConfigError> {
    // A zero-length read buffer would look like a peer close.
    if reactor.chunk_size == 0 {
        return Err(ConfigError::Invalid("chunk_size must be greater than 0"));
    }
    if reactor.event_capacity == 0 {
        return Err(ConfigError::Invalid("event_capacity must be greater than 0"));
    }
    Ok(())
}

/// Resolve `host:port`, taking the first address.
fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| ConfigError::Resolve(format!("{host}:{port}"), Some(e)))?
        .next()
        .ok_or_else(|| ConfigError::Resolve(format!("{host}:{port}"), None))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Resolve(String, Option<std::io::Error>),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Resolve(addr, Some(e)) => {
                write!(f, "Failed to resolve '{addr}': {e}")
            }
            ConfigError::Resolve(addr, None) => {
                write!(f, "Failed to resolve '{addr}': no addresses found")
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
