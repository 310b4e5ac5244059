//! Configuration module for hello-endpoint.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values. With neither,
//! the server listens on 0.0.0.0:8080 with a 1024 byte read buffer.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::runtime::EndpointOptions;

/// How many read/write attempts a single exchange makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeMode {
    /// One read and one write per peer.
    Single,
    /// Read until end of headers or the peer goes idle, write until every
    /// byte is sent.
    #[default]
    Complete,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "hello-endpoint")]
#[command(author = "hello-endpoint authors")]
#[command(version = "0.1.0")]
#[command(about = "Answers every TCP connection with a fixed HTTP response", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Local address to listen on (e.g., 0.0.0.0)
    #[arg(short = 'H', long)]
    pub host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Read buffer size in bytes
    #[arg(short, long)]
    pub buffer_size: Option<usize>,

    /// Exchange mode
    #[arg(long, value_enum)]
    pub exchange: Option<ExchangeMode>,

    /// Peer read timeout in milliseconds (0 = none)
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Peer write timeout in milliseconds (0 = none)
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,

    /// How long a peer may stay idle mid-request before it is answered
    #[arg(long)]
    pub header_grace_ms: Option<u64>,

    /// Set SO_REUSEADDR on the listening socket
    #[arg(long)]
    pub reuse_address: bool,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub reuse_address: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            reuse_address: false,
        }
    }
}

/// Per-peer configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub exchange: ExchangeMode,
    #[serde(default)]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub write_timeout_ms: u64,
    #[serde(default = "default_header_grace_ms")]
    pub header_grace_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            exchange: ExchangeMode::default(),
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            header_grace_ms: default_header_grace_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_buffer_size() -> usize {
    1024
}

fn default_header_grace_ms() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub buffer_size: usize,
    pub exchange: ExchangeMode,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub header_grace: Duration,
    pub reuse_address: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::empty(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            buffer_size: cli
                .buffer_size
                .unwrap_or(toml_config.connection.buffer_size),
            exchange: cli.exchange.unwrap_or(toml_config.connection.exchange),
            read_timeout: millis(
                cli.read_timeout_ms
                    .unwrap_or(toml_config.connection.read_timeout_ms),
            ),
            write_timeout: millis(
                cli.write_timeout_ms
                    .unwrap_or(toml_config.connection.write_timeout_ms),
            ),
            header_grace: Duration::from_millis(
                cli.header_grace_ms
                    .unwrap_or(toml_config.connection.header_grace_ms),
            ),
            reuse_address: cli.reuse_address || toml_config.server.reuse_address,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be greater than 0"));
        }
        if self.header_grace.is_zero() {
            return Err(ConfigError::Invalid("header_grace_ms must be greater than 0"));
        }
        Ok(())
    }

    /// Address the endpoint binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Socket options for the endpoint.
    pub fn endpoint_options(&self) -> EndpointOptions {
        EndpointOptions {
            reuse_address: self.reuse_address,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }
}

impl CliArgs {
    fn empty() -> Self {
        Self {
            config: None,
            host: None,
            port: None,
            buffer_size: None,
            exchange: None,
            read_timeout_ms: None,
            write_timeout_ms: None,
            header_grace_ms: None,
            reuse_address: false,
            log_level: None,
        }
    }
}

/// Zero disables the timeout.
fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}
