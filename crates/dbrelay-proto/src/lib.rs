//! dbrelay wire protocol.
//!
//! This crate provides the gRPC service definition and generated code shared
//! by the gateway server and its clients.
//!
//! # Overview
//!
//! The protocol defines ten operations:
//! - Connection lifecycle (`OpenConnection`, `CloseConnection`)
//! - Command lifecycle (`CreateCommand`, `DestroyCommand`)
//! - Transaction lifecycle (`BeginTransaction`, `CommitTransaction`,
//!   `RollbackTransaction`)
//! - Execution (`ExecuteQuery` streaming, `ExecuteQuerySync` buffered,
//!   `ExecuteNonQuery`)
//!
//! Native driver failures travel as [`DataException`] values inside ordinary
//! responses, never as gRPC status codes.
//!
//! # Example
//!
//! ```ignore
//! use dbrelay_proto::{DatabaseServiceClient, OpenConnectionRequest};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = DatabaseServiceClient::connect("http://localhost:7400").await?;
//!
//!     let response = client
//!         .open_connection(OpenConnectionRequest {
//!             provider_invariant_name: "sqlite".to_string(),
//!             connection_string: "Data Source=:memory:".to_string(),
//!         })
//!         .await?;
//!     println!("session: {}", response.into_inner().connection_id);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

/// Generated protobuf types and gRPC service definitions.
#[allow(missing_docs)]
#[allow(clippy::derive_partial_eq_without_eq)]
pub mod proto {
    tonic::include_proto!("dbrelay.v1");
}

pub use proto::*;

pub use proto::database_service_client::DatabaseServiceClient;
pub use proto::database_service_server::{DatabaseService, DatabaseServiceServer};
