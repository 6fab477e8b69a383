//! Client entry point.
//!
//! A [`Client`] owns the channel pool and value codec shared by every
//! connection it creates.

use std::sync::Arc;
use std::time::Duration;

use dbrelay_common::ValueCodec;

use super::connection::Connection;
use super::error::{ClientError, ClientResult};
use super::pool::ChannelPool;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout for new channels.
    pub connect_timeout: Duration,
    /// Deadline applied to every request, if any.
    pub request_timeout: Option<Duration>,
    /// Run queries through the buffered operation instead of streaming.
    pub buffered: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Some(Duration::from_secs(300)),
            buffered: false,
        }
    }
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the request deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Removes the request deadline.
    pub fn no_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    /// Selects buffered query execution.
    pub fn buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        if self.connect_timeout.is_zero() {
            return Err(ClientError::InvalidConfig(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ClientError::InvalidConfig(
                "request_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// dbrelay client.
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
    pool: Arc<ChannelPool>,
    codec: Arc<ValueCodec>,
}

impl Client {
    /// Creates a client with its own channel pool and the default codec.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let pool = Arc::new(ChannelPool::new(config.connect_timeout));
        Ok(Self {
            config,
            pool,
            codec: Arc::new(ValueCodec::new()),
        })
    }

    /// Replaces the value codec. Both ends must register the same types.
    pub fn with_codec(mut self, codec: Arc<ValueCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Shares a channel pool with other clients.
    pub fn with_pool(mut self, pool: Arc<ChannelPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the channel pool.
    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// Returns the value codec.
    pub fn codec(&self) -> &Arc<ValueCodec> {
        &self.codec
    }

    /// Creates a closed connection.
    ///
    /// `connection_string` names the gateway (`GrpcServer=host:port`),
    /// `provider` is the invariant name of the native driver and
    /// `server_connection_string` is handed to that driver unchanged.
    pub fn connection(
        &self,
        connection_string: impl Into<String>,
        provider: impl Into<String>,
        server_connection_string: impl Into<String>,
    ) -> Connection {
        Connection::new(
            self.clone(),
            connection_string.into(),
            provider.into(),
            server_connection_string.into(),
        )
    }

    /// Creates and opens a connection.
    pub async fn open(
        &self,
        connection_string: impl Into<String>,
        provider: impl Into<String>,
        server_connection_string: impl Into<String>,
    ) -> ClientResult<Connection> {
        let mut connection =
            self.connection(connection_string, provider, server_connection_string);
        connection.open().await?;
        Ok(connection)
    }
}
