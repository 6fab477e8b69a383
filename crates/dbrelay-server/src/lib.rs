//! # dbrelay-server
//!
//! Remote database gateway. Clients open sessions against a native driver
//! selected by provider invariant name, then create commands, begin
//! transactions and execute statements over gRPC. Every native object lives
//! in the [`SessionRegistry`] under an opaque id the client refers to.
//!
//! # Quick Start
//!
//! ```ignore
//! use dbrelay_server::config::ServerConfig;
//! use dbrelay_server::grpc::GrpcServer;
//!
//! let config = ServerConfig::default();
//! GrpcServer::from_config(&config)?.serve().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Server configuration.
pub mod config;

/// Native driver traits and the providers shipped with the gateway.
pub mod driver;

/// Gateway errors.
pub mod error;

/// gRPC service and server.
pub mod grpc;

/// Session registry.
pub mod registry;

pub use config::{DriverKind, ProviderConfig, ServerConfig};
pub use driver::{DriverError, DriverResult, ProviderFactory, ProviderRegistry};
pub use error::{GatewayError, GatewayResult};
pub use grpc::{GatewayService, GrpcServer, ServiceOptions};
pub use registry::{RegistryStats, Session, SessionRegistry};
