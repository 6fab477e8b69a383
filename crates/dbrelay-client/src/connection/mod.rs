//! Connection proxy.
//!
//! A [`Connection`] is a logical session on the gateway. It moves from
//! `Closed` to `Open` once and back to `Closed` once; commands and
//! transactions created from it share its pooled channel.

use std::sync::Arc;

use dbrelay_common::connection_string::{CLIENT_IDENTIFIER_KEY, GRPC_SERVER_KEY};
use dbrelay_common::{ConnectionStringBuilder, IsolationLevel, RemoteFault, ValueCodec};
use dbrelay_proto::{
    BeginTransactionRequest, CloseConnectionRequest, CreateCommandRequest, DataException,
    DatabaseServiceClient, OpenConnectionRequest,
};
use tonic::transport::Channel;
use tonic::Request;
use tracing::{debug, info, warn};

use super::client::{Client, ClientConfig};
use super::command::Command;
use super::error::{ClientError, ClientResult, ConnectionState};
use super::pool::ChannelHandle;
use super::transaction::Transaction;

/// What commands and transactions need from their connection.
pub(crate) struct SessionLink {
    pub(crate) rpc: DatabaseServiceClient<Channel>,
    pub(crate) codec: Arc<ValueCodec>,
    pub(crate) config: ClientConfig,
    pub(crate) connection_id: String,
}

impl SessionLink {
    pub(crate) fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(timeout) = self.config.request_timeout {
            request.set_timeout(timeout);
        }
        request
    }

    pub(crate) fn rpc(&self) -> DatabaseServiceClient<Channel> {
        self.rpc.clone()
    }

    /// Turns a populated fault into an error.
    pub(crate) fn check(&self, exception: Option<DataException>) -> ClientResult<()> {
        match exception {
            Some(exception) => Err(RemoteFault::from_proto(&exception, &self.codec).into()),
            None => Ok(()),
        }
    }
}

struct OpenState {
    link: Arc<SessionLink>,
    channel: ChannelHandle,
    client_identifier: String,
}

/// A logical connection to a database behind the gateway.
pub struct Connection {
    client: Client,
    connection_string: String,
    provider: String,
    server_connection_string: String,
    open: Option<OpenState>,
}

impl Connection {
    pub(crate) fn new(
        client: Client,
        connection_string: String,
        provider: String,
        server_connection_string: String,
    ) -> Self {
        Self {
            client,
            connection_string,
            provider,
            server_connection_string,
            open: None,
        }
    }

    /// Returns the connection state.
    pub fn state(&self) -> ConnectionState {
        if self.open.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    /// Returns the gateway session id while open.
    pub fn connection_id(&self) -> Option<&str> {
        self.open.as_ref().map(|o| o.link.connection_id.as_str())
    }

    /// Returns the identifier transactions are tagged with while open.
    pub fn client_identifier(&self) -> Option<&str> {
        self.open.as_ref().map(|o| o.client_identifier.as_str())
    }

    /// Returns the client-side connection string.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Returns the provider invariant name.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Returns the connection string passed to the native driver.
    pub fn server_connection_string(&self) -> &str {
        &self.server_connection_string
    }

    /// Opens the session on the gateway.
    pub async fn open(&mut self) -> ClientResult<()> {
        if self.open.is_some() {
            return Err(ClientError::InvalidOperation(
                "connection is already open".to_string(),
            ));
        }
        if self.connection_string.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "connection string is empty".to_string(),
            ));
        }
        if self.provider.trim().is_empty() {
            return Err(ClientError::InvalidConfig("provider is empty".to_string()));
        }
        if self.server_connection_string.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "server connection string is empty".to_string(),
            ));
        }

        let builder = ConnectionStringBuilder::parse(&self.connection_string)
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        let address = builder.get_non_empty(GRPC_SERVER_KEY).ok_or_else(|| {
            ClientError::InvalidConfig(format!("connection string has no {}", GRPC_SERVER_KEY))
        })?;
        let configured_identifier = builder.get_non_empty(CLIENT_IDENTIFIER_KEY).map(String::from);

        let pool = self.client.pool().clone();
        let channel = pool.acquire(address)?;
        let mut link = SessionLink {
            rpc: DatabaseServiceClient::new(channel.channel().clone()),
            codec: self.client.codec().clone(),
            config: self.client.config().clone(),
            connection_id: String::new(),
        };

        let request = link.request(OpenConnectionRequest {
            provider_invariant_name: self.provider.clone(),
            connection_string: self.server_connection_string.clone(),
        });
        let response = match link.rpc().open_connection(request).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                pool.release(&channel);
                return Err(status.into());
            }
        };
        if let Err(e) = link.check(response.data_exception) {
            pool.release(&channel);
            return Err(e);
        }
        if response.connection_id.is_empty() {
            pool.release(&channel);
            return Err(ClientError::NotFound("provider"));
        }

        info!(
            connection = %response.connection_id,
            provider = %self.provider,
            address = %channel.address(),
            "connection opened"
        );
        link.connection_id = response.connection_id;
        self.open = Some(OpenState {
            link: Arc::new(link),
            channel,
            client_identifier: configured_identifier.unwrap_or(response.client_identifier),
        });
        Ok(())
    }

    /// Closes the session and releases the channel. Closing a closed
    /// connection is a no-op.
    pub async fn close(&mut self) -> ClientResult<()> {
        let Some(state) = self.open.take() else {
            return Ok(());
        };

        let request = state.link.request(CloseConnectionRequest {
            connection_id: state.link.connection_id.clone(),
        });
        let result = state.link.rpc().close_connection(request).await;
        self.client.pool().release(&state.channel);
        debug!(connection = %state.link.connection_id, "connection closed");

        result.map(|_| ()).map_err(ClientError::from)
    }

    /// Starts a transaction.
    pub async fn begin_transaction(&self, level: IsolationLevel) -> ClientResult<Transaction> {
        let state = self.open_state()?;
        let request = state.link.request(BeginTransactionRequest {
            connection_id: state.link.connection_id.clone(),
            isolation_level: level.to_wire(),
            client_identifier: state.client_identifier.clone(),
        });
        let response = state.link.rpc().begin_transaction(request).await?.into_inner();
        state.link.check(response.data_exception)?;
        if response.transaction_id.is_empty() {
            return Err(ClientError::NotFound("connection"));
        }

        debug!(transaction = %response.transaction_id, %level, "transaction started");
        Ok(Transaction::new(
            state.link.clone(),
            response.transaction_id,
            level,
        ))
    }

    /// Creates a command.
    pub async fn create_command(&self) -> ClientResult<Command> {
        let state = self.open_state()?;
        let request = state.link.request(CreateCommandRequest {
            connection_id: state.link.connection_id.clone(),
        });
        let response = state.link.rpc().create_command(request).await?.into_inner();
        if response.command_id.is_empty() {
            return Err(ClientError::NotFound("connection"));
        }
        Ok(Command::new(state.link.clone(), response.command_id))
    }

    /// Creates a command with statement text.
    pub async fn command(&self, text: impl Into<String>) -> ClientResult<Command> {
        let mut command = self.create_command().await?;
        command.set_text(text);
        Ok(command)
    }

    fn open_state(&self) -> ClientResult<&OpenState> {
        self.open.as_ref().ok_or(ClientError::ConnectionClosed)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let Some(state) = self.open.take() else {
            return;
        };
        let pool = self.client.pool().clone();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let request = state.link.request(CloseConnectionRequest {
                        connection_id: state.link.connection_id.clone(),
                    });
                    if let Err(e) = state.link.rpc().close_connection(request).await {
                        warn!(connection = %state.link.connection_id, error = %e, "close on drop failed");
                    }
                    pool.release(&state.channel);
                });
            }
            Err(_) => {
                pool.release(&state.channel);
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("provider", &self.provider)
            .field("state", &self.state())
            .field("connection_id", &self.connection_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::new(ClientConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_open_requires_all_inputs() {
        let client = client();

        let mut conn = client.connection("", "sqlite", "Data Source=:memory:");
        assert!(matches!(conn.open().await, Err(ClientError::InvalidConfig(_))));

        let mut conn = client.connection("GrpcServer=localhost:1", "", "Data Source=:memory:");
        assert!(matches!(conn.open().await, Err(ClientError::InvalidConfig(_))));

        let mut conn = client.connection("GrpcServer=localhost:1", "sqlite", " ");
        assert!(matches!(conn.open().await, Err(ClientError::InvalidConfig(_))));

        assert!(client.pool().is_empty());
    }

    #[tokio::test]
    async fn test_open_requires_gateway_address() {
        let client = client();
        let mut conn = client.connection("Timeout=5", "sqlite", "Data Source=:memory:");
        let err = conn.open().await.unwrap_err();
        assert!(err.to_string().contains("GrpcServer"));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_calls() {
        let client = client();
        let mut conn = client.connection("GrpcServer=localhost:1", "sqlite", "Data Source=:memory:");

        assert!(matches!(
            conn.create_command().await,
            Err(ClientError::ConnectionClosed)
        ));
        assert!(matches!(
            conn.begin_transaction(IsolationLevel::ReadCommitted).await,
            Err(ClientError::ConnectionClosed)
        ));
        assert!(conn.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_gateway_releases_channel() {
        let client = Client::new(
            ClientConfig::default().connect_timeout(std::time::Duration::from_millis(200)),
        )
        .unwrap();
        let mut conn = client.connection("GrpcServer=127.0.0.1:1", "sqlite", "Data Source=:memory:");

        assert!(matches!(
            conn.open().await,
            Err(ClientError::Transport(_) | ClientError::Cancelled(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(client.pool().is_empty());
    }
}
