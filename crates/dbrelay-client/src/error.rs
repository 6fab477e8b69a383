//! Error types for the client library.

use std::any::Any;
use std::fmt;

use dbrelay_common::{Property, RemoteFault, Value};
use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid configuration or connection string.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The connection is not open.
    #[error("connection closed")]
    ConnectionClosed,

    /// The call is not valid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The gateway answered with a default response: the connection,
    /// command or transaction it refers to does not exist.
    #[error("{0} not found on the gateway")]
    NotFound(&'static str),

    /// The gateway reported a fault.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(tonic::Status),

    /// The transaction already committed or rolled back.
    #[error("transaction has already been committed or rolled back")]
    TransactionFinished,

    /// No column with the requested name.
    #[error("Could not find specified column in results: {0}")]
    ColumnNotFound(String),

    /// Ordinal outside the current row.
    #[error("index {index} is out of range for {count} fields")]
    IndexOutOfRange {
        /// Requested ordinal.
        index: usize,
        /// Number of fields in the row.
        count: usize,
    },

    /// The field does not hold the requested type.
    #[error("field {index} holds {actual}, not {expected}")]
    TypeMismatch {
        /// Field ordinal.
        index: usize,
        /// Requested type.
        expected: &'static str,
        /// Stored type.
        actual: &'static str,
    },

    /// The call was cancelled or ran past its deadline.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The runtime behind the blocking client could not start.
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl From<tonic::Status> for ClientError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Cancelled | tonic::Code::DeadlineExceeded => {
                ClientError::Cancelled(status.message().to_string())
            }
            _ => ClientError::Transport(status),
        }
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Closed,
    /// Connected and ready.
    Open,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Open => write!(f, "open"),
        }
    }
}

/// A fault raised on the gateway, rebuilt on the client with its class
/// name, message and named properties.
#[derive(Debug, Clone, Error)]
#[error("{}: {}", fault.class_name, fault.message)]
pub struct RemoteError {
    fault: RemoteFault,
}

impl RemoteError {
    /// Returns the error class name reported by the gateway.
    pub fn class_name(&self) -> &str {
        &self.fault.class_name
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.fault.message
    }

    /// Returns the properties in the order the gateway sent them.
    pub fn properties(&self) -> &[Property] {
        &self.fault.properties
    }

    /// Returns the number of properties.
    pub fn property_count(&self) -> usize {
        self.fault.properties.len()
    }

    /// Returns the value of the property at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.fault.properties.get(index)?.value.as_ref()
    }

    /// Returns the value of the named property.
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.fault.property(name)
    }

    /// Returns the named property as `T`, if present and of that type.
    pub fn try_get<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.get_named(name)?.get::<T>()
    }

    /// Returns the position of the named property.
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.fault.properties.iter().position(|p| p.name == name)
    }

    /// Returns the name of the property at `index`.
    pub fn property_name(&self, index: usize) -> Option<&str> {
        self.fault.properties.get(index).map(|p| p.name.as_str())
    }

    /// Returns the underlying fault.
    pub fn fault(&self) -> &RemoteFault {
        &self.fault
    }
}

impl From<RemoteFault> for RemoteError {
    fn from(fault: RemoteFault) -> Self {
        Self { fault }
    }
}

impl From<RemoteFault> for ClientError {
    fn from(fault: RemoteFault) -> Self {
        ClientError::Remote(RemoteError::from(fault))
    }
}
