//! Configuration module for the msgframe server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Which runtime drives connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Single-threaded mio reactor (epoll/kqueue).
    #[default]
    Mio,
    /// One tokio task per connection.
    Tasks,
}

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "msgframe")]
#[command(author = "msgframe authors")]
#[command(version = "0.1.0")]
#[command(about = "A length-prefixed binary message server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:12345)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Connection runtime
    #[arg(short = 'r', long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Maximum number of live connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Connection runtime
    #[serde(default)]
    pub runtime: RuntimeType,
    /// Maximum number of live connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Reactor events batch size
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            runtime: RuntimeType::default(),
            max_connections: default_max_connections(),
            events_capacity: default_events_capacity(),
        }
    }
}

/// Login handler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    /// Identifier handed back to every client that logs in
    #[serde(default = "default_assigned_id")]
    pub assigned_id: i64,
    /// Prefix of the login response message
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            assigned_id: default_assigned_id(),
            greeting: default_greeting(),
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

fn default_listen() -> String {
    "0.0.0.0:12345".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_events_capacity() -> usize {
    1024
}

fn default_assigned_id() -> i64 {
    123_456
}

fn default_greeting() -> String {
    "Hey you!".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub runtime: RuntimeType,
    pub max_connections: usize,
    pub events_capacity: usize,
    pub login: LoginConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let listen = SocketAddr::from(([0, 0, 0, 0], 12345));
        Self {
            listen,
            runtime: RuntimeType::default(),
            max_connections: default_max_connections(),
            events_capacity: default_events_capacity(),
            login: LoginConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve an already parsed set of CLI arguments.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        Ok(Config {
            listen,
            runtime: cli.runtime.unwrap_or(toml_config.server.runtime),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            events_capacity: toml_config.server.events_capacity,
            login: toml_config.login,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> CliArgs {
        CliArgs {
            log_level: "info".to_string(),
            ..CliArgs::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:12345");
        assert_eq!(config.server.runtime, RuntimeType::Mio);
        assert_eq!(config.server.max_connections, 10_000);
        assert_eq!(config.login.assigned_id, 123_456);
        assert_eq!(config.login.greeting, "Hey you!");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:4000"
            runtime = "tasks"
            max_connections = 64

            [login]
            assigned_id = 42
            greeting = "Welcome, "

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:4000");
        assert_eq!(config.server.runtime, RuntimeType::Tasks);
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.server.events_capacity, 1024);
        assert_eq!(config.login.assigned_id, 42);
        assert_eq!(config.login.greeting, "Welcome, ");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:4000"
            max_connections = 64
            "#,
        )
        .unwrap();

        let args = CliArgs {
            listen: Some("127.0.0.1:5000".to_string()),
            runtime: Some(RuntimeType::Tasks),
            log_level: "trace".to_string(),
            ..CliArgs::default()
        };

        let config = Config::merge(args, toml_config).unwrap();
        assert_eq!(config.listen, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.runtime, RuntimeType::Tasks);
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_invalid_listen_rejected() {
        let args = CliArgs {
            listen: Some("not-an-address".to_string()),
            ..cli()
        };
        let err = Config::merge(args, TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(ref s) if s == "not-an-address"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let args = CliArgs {
            config: Some(PathBuf::from("/nonexistent/msgframe.toml")),
            ..cli()
        };
        assert!(matches!(
            Config::from_cli(args),
            Err(ConfigError::FileRead(_, _))
        ));
    }
}
