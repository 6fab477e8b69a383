//! Synchronous wrappers over the async proxies.
//!
//! A [`BlockingClient`] owns a small tokio runtime and every proxy it hands
//! out drives its calls to completion on that runtime. The wrappers must not
//! be used from inside an async context: `block_on` panics there.
//!
//! Dropping a wrapper cleans up synchronously: an open connection is closed,
//! an active transaction is rolled back and a command is destroyed before the
//! drop returns.

use std::ops::Deref;
use std::sync::Arc;

use dbrelay_common::{IsolationLevel, Value};
use tokio::runtime::{Builder, Runtime};
use tracing::warn;

use crate::client::{Client, ClientConfig};
use crate::command::{Command, ParameterCollection};
use crate::connection::Connection;
use crate::error::{ClientResult, ConnectionState};
use crate::reader::DataReader;
use crate::transaction::{Transaction, TransactionState};

/// Synchronous client.
pub struct BlockingClient {
    inner: Client,
    runtime: Arc<Runtime>,
}

impl BlockingClient {
    /// Creates a client with its own runtime.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("dbrelay-client")
            .enable_all()
            .build()?;
        Ok(Self::from_client(Client::new(config)?, Arc::new(runtime)))
    }

    /// Wraps an existing client. Channels are created on `runtime`.
    pub fn from_client(inner: Client, runtime: Arc<Runtime>) -> Self {
        Self { inner, runtime }
    }

    /// Returns the async client.
    pub fn client(&self) -> &Client {
        &self.inner
    }

    /// Creates a closed connection.
    pub fn connection(
        &self,
        connection_string: impl Into<String>,
        provider: impl Into<String>,
        server_connection_string: impl Into<String>,
    ) -> BlockingConnection {
        BlockingConnection {
            inner: self
                .inner
                .connection(connection_string, provider, server_connection_string),
            runtime: self.runtime.clone(),
        }
    }

    /// Creates and opens a connection.
    pub fn open(
        &self,
        connection_string: impl Into<String>,
        provider: impl Into<String>,
        server_connection_string: impl Into<String>,
    ) -> ClientResult<BlockingConnection> {
        let mut connection =
            self.connection(connection_string, provider, server_connection_string);
        connection.open()?;
        Ok(connection)
    }
}

/// Synchronous connection.
pub struct BlockingConnection {
    inner: Connection,
    runtime: Arc<Runtime>,
}

impl BlockingConnection {
    /// Returns the connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Returns the gateway connection id while open.
    pub fn connection_id(&self) -> Option<&str> {
        self.inner.connection_id()
    }

    /// Opens a session on the gateway.
    pub fn open(&mut self) -> ClientResult<()> {
        self.runtime.block_on(self.inner.open())
    }

    /// Closes the session. Closing a closed connection is a no-op.
    pub fn close(&mut self) -> ClientResult<()> {
        self.runtime.block_on(self.inner.close())
    }

    /// Starts a transaction.
    pub fn begin_transaction(&self, level: IsolationLevel) -> ClientResult<BlockingTransaction> {
        let inner = self.runtime.block_on(self.inner.begin_transaction(level))?;
        Ok(BlockingTransaction {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    /// Creates a command.
    pub fn create_command(&self) -> ClientResult<BlockingCommand> {
        let inner = self.runtime.block_on(self.inner.create_command())?;
        Ok(BlockingCommand {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    /// Creates a command with statement text.
    pub fn command(&self, text: impl Into<String>) -> ClientResult<BlockingCommand> {
        let mut command = self.create_command()?;
        command.set_text(text);
        Ok(command)
    }
}

impl Drop for BlockingConnection {
    fn drop(&mut self) {
        if self.inner.state() == ConnectionState::Open {
            if let Err(e) = self.runtime.block_on(self.inner.close()) {
                warn!(error = %e, "close on drop failed");
            }
        }
    }
}

/// Synchronous transaction.
pub struct BlockingTransaction {
    inner: Transaction,
    runtime: Arc<Runtime>,
}

impl BlockingTransaction {
    /// Returns the gateway transaction id.
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// Returns the isolation level.
    pub fn isolation_level(&self) -> IsolationLevel {
        self.inner.isolation_level()
    }

    /// Returns the transaction state.
    pub fn state(&self) -> TransactionState {
        self.inner.state()
    }

    /// Commits the transaction.
    pub fn commit(&self) -> ClientResult<()> {
        self.runtime.block_on(self.inner.commit())
    }

    /// Rolls the transaction back.
    pub fn rollback(&self) -> ClientResult<()> {
        self.runtime.block_on(self.inner.rollback())
    }
}

impl Drop for BlockingTransaction {
    fn drop(&mut self) {
        if self.inner.is_active() {
            if let Err(e) = self.rollback() {
                warn!(transaction = %self.inner.id(), error = %e, "rollback on drop failed");
            }
        }
    }
}

/// Synchronous command.
pub struct BlockingCommand {
    inner: Command,
    runtime: Arc<Runtime>,
}

impl BlockingCommand {
    /// Returns the gateway command id.
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// Returns the statement text.
    pub fn text(&self) -> &str {
        self.inner.text()
    }

    /// Replaces the statement text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.inner.set_text(text);
    }

    /// Returns the parameters.
    pub fn parameters(&self) -> &ParameterCollection {
        self.inner.parameters()
    }

    /// Returns the parameters for editing.
    pub fn parameters_mut(&mut self) -> &mut ParameterCollection {
        self.inner.parameters_mut()
    }

    /// Enlists the command in a transaction, or clears it.
    pub fn set_transaction(&mut self, transaction: Option<&BlockingTransaction>) {
        self.inner.set_transaction(transaction.map(|t| &t.inner));
    }

    /// Runs the statement and returns a row reader.
    pub fn execute_reader(&self) -> ClientResult<BlockingReader> {
        let inner = self.runtime.block_on(self.inner.execute_reader())?;
        Ok(BlockingReader {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    /// Runs the statement and returns the number of affected rows, or -1 when
    /// no statement in the text writes.
    pub fn execute_non_query(&self) -> ClientResult<i64> {
        self.runtime.block_on(self.inner.execute_non_query())
    }

    /// Returns the first field of the first row.
    pub fn execute_scalar(&self) -> ClientResult<Option<Value>> {
        self.runtime.block_on(self.inner.execute_scalar())
    }

    /// Releases the command on the gateway.
    pub fn destroy(mut self) -> ClientResult<()> {
        self.runtime.block_on(self.inner.release())
    }
}

impl Drop for BlockingCommand {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.block_on(self.inner.release()) {
            warn!(command = %self.inner.id(), error = %e, "destroy on drop failed");
        }
    }
}

/// Synchronous row reader. Field accessors come from [`DataReader`].
#[derive(Debug)]
pub struct BlockingReader {
    inner: DataReader,
    runtime: Arc<Runtime>,
}

impl BlockingReader {
    /// Advances to the next row. Returns false at the end of the result.
    pub fn read(&mut self) -> ClientResult<bool> {
        self.runtime.block_on(self.inner.read())
    }

    /// Closes the reader, cancelling a streaming result.
    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl Deref for BlockingReader {
    type Target = DataReader;

    fn deref(&self) -> &DataReader {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    #[test]
    fn test_open_requires_server() {
        let client = BlockingClient::new(ClientConfig::default()).unwrap();
        let mut conn = client.connection("Mode=Fast", "sqlite", "Data Source=:memory:");
        assert!(matches!(conn.open(), Err(ClientError::InvalidConfig(_))));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.close().is_ok());
    }

    #[test]
    fn test_closed_connection_rejects_calls() {
        let client = BlockingClient::new(ClientConfig::default()).unwrap();
        let conn = client.connection("GrpcServer=127.0.0.1:1", "sqlite", "Data Source=:memory:");
        assert!(matches!(conn.create_command(), Err(ClientError::ConnectionClosed)));
        assert!(matches!(
            conn.begin_transaction(IsolationLevel::Serializable),
            Err(ClientError::ConnectionClosed)
        ));
    }
}
