//! # dbrelay-client
//!
//! Client library for the dbrelay gateway.
//!
//! The proxies in this crate mirror a conventional database API while every
//! call travels to a gateway that owns the real driver:
//!
//! - **Connection**: opens a session on the gateway named by `GrpcServer`
//! - **Command**: reusable statement with an ordered parameter collection
//! - **Transaction**: terminal commit or rollback, rolled back on drop
//! - **DataReader**: streaming or buffered forward-only cursor
//! - **ChannelPool**: one physical channel per gateway address
//!
//! Every call is async. The [`blocking`] module wraps the same proxies for
//! synchronous callers.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dbrelay_client::{Client, ClientConfig};
//! use dbrelay_common::IsolationLevel;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(ClientConfig::default())?;
//!     let mut conn = client
//!         .open("GrpcServer=localhost:7400", "sqlite", "Data Source=app.db")
//!         .await?;
//!
//!     let txn = conn.begin_transaction(IsolationLevel::ReadCommitted).await?;
//!     let mut cmd = conn.command("INSERT INTO users (name) VALUES (@name)").await?;
//!     cmd.set_transaction(Some(&txn));
//!     cmd.parameters_mut().add_value("@name", "Alice");
//!     cmd.execute_non_query().await?;
//!     txn.commit().await?;
//!
//!     let cmd = conn.command("SELECT id, name FROM users").await?;
//!     let mut reader = cmd.execute_reader().await?;
//!     while reader.read().await? {
//!         println!("{:?} {:?}", reader.get::<i64>(0)?, reader.get_string(1)?);
//!     }
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;

/// Client entry point and configuration.
pub mod client;

/// Channel pool.
pub mod pool;

/// Connection proxy.
pub mod connection;

/// Command proxy.
pub mod command;

/// Transaction proxy.
pub mod transaction;

/// Row reader.
pub mod reader;

pub mod blocking;

// Re-exports
pub use blocking::{
    BlockingClient, BlockingCommand, BlockingConnection, BlockingReader, BlockingTransaction,
};
pub use client::{Client, ClientConfig};
pub use command::{Command, ParameterCollection};
pub use connection::Connection;
pub use error::{ClientError, ClientResult, ConnectionState, RemoteError};
pub use pool::{ChannelHandle, ChannelPool};
pub use reader::DataReader;
pub use transaction::{Transaction, TransactionState};
