//! Server configuration.
//!
//! This module provides configuration management for the dbrelay gateway.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Native driver backing a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// SQLite through rusqlite.
    Sqlite,
}

/// A provider exposed to clients under an invariant name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name clients pass to `OpenConnection`.
    pub invariant_name: String,
    /// Native driver.
    pub driver: DriverKind,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Accept gRPC-Web over HTTP/1.1 in addition to native gRPC.
    #[serde(default = "default_grpc_web")]
    pub grpc_web: bool,

    /// Rows buffered per streaming query before the producer waits.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Log statement text at debug level.
    #[serde(default)]
    pub log_statements: bool,

    /// Warn about statements taking longer than this many milliseconds.
    #[serde(default = "default_slow_statement_ms")]
    pub slow_statement_ms: u64,

    /// Table receiving the client identifier of each new transaction.
    #[serde(default)]
    pub remote_transaction_table: Option<String>,

    /// Providers available to clients.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7400
}

fn default_grpc_web() -> bool {
    true
}

fn default_stream_buffer() -> usize {
    64
}

fn default_slow_statement_ms() -> u64 {
    1000
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig {
        invariant_name: "sqlite".to_string(),
        driver: DriverKind::Sqlite,
    }]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            grpc_web: default_grpc_web(),
            stream_buffer: default_stream_buffer(),
            log_statements: false,
            slow_statement_ms: default_slow_statement_ms(),
            remote_transaction_table: None,
            providers: default_providers(),
        }
    }
}

impl ServerConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Converts configuration to TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.stream_buffer == 0 {
            bail!("stream_buffer must be at least 1");
        }
        if self.providers.is_empty() {
            bail!("at least one provider must be configured");
        }
        for (i, provider) in self.providers.iter().enumerate() {
            if provider.invariant_name.trim().is_empty() {
                bail!("provider {} has an empty invariant_name", i);
            }
            if self.providers[..i]
                .iter()
                .any(|p| p.invariant_name == provider.invariant_name)
            {
                bail!("duplicate provider '{}'", provider.invariant_name);
            }
        }
        if let Some(table) = &self.remote_transaction_table {
            if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                bail!("invalid remote_transaction_table '{}'", table);
            }
        }
        Ok(())
    }

    /// Returns the socket address string.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parses the socket address.
    pub fn parse_socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket_addr().parse()?)
    }

    /// Creates a builder for configuration.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }
}

/// Builder for server configuration.
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Enables or disables gRPC-Web.
    pub fn grpc_web(mut self, enabled: bool) -> Self {
        self.config.grpc_web = enabled;
        self
    }

    /// Sets the streaming buffer size.
    pub fn stream_buffer(mut self, rows: usize) -> Self {
        self.config.stream_buffer = rows;
        self
    }

    /// Enables statement logging.
    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.config.log_statements = enabled;
        self
    }

    /// Sets the slow statement threshold.
    pub fn slow_statement_ms(mut self, ms: u64) -> Self {
        self.config.slow_statement_ms = ms;
        self
    }

    /// Sets the remote transaction table.
    pub fn remote_transaction_table(mut self, table: impl Into<String>) -> Self {
        self.config.remote_transaction_table = Some(table.into());
        self
    }

    /// Adds a provider.
    pub fn provider(mut self, invariant_name: impl Into<String>, driver: DriverKind) -> Self {
        self.config.providers.push(ProviderConfig {
            invariant_name: invariant_name.into(),
            driver,
        });
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}
