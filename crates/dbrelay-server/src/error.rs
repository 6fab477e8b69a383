//! Gateway error types.

use dbrelay_common::{Fault, Property};
use thiserror::Error;

use crate::driver::DriverError;

/// Errors reported by the protocol operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No provider is registered under the requested invariant name.
    #[error("Unable to get the connection for the provider {0}.")]
    UnknownProvider(String),

    /// The connection identifier is unknown.
    #[error("no such connection: {0}")]
    NoSuchConnection(String),

    /// The transaction identifier is unknown on this connection.
    #[error("no such transaction: {0}")]
    NoSuchTransaction(String),

    /// The command identifier is unknown on this connection.
    #[error("no such command: {0}")]
    NoSuchCommand(String),

    /// The native driver failed.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Result type for protocol operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl Fault for GatewayError {
    fn class_name(&self) -> &'static str {
        match self {
            GatewayError::Driver(e) => e.class_name(),
            _ => "InvalidOperation",
        }
    }

    fn properties(&self) -> Vec<Property> {
        match self {
            GatewayError::UnknownProvider(name) => vec![Property::new("ProviderName", name.clone())],
            GatewayError::NoSuchConnection(id) => vec![Property::new("ConnectionId", id.clone())],
            GatewayError::NoSuchTransaction(id) => vec![Property::new("TransactionId", id.clone())],
            GatewayError::NoSuchCommand(id) => vec![Property::new("CommandId", id.clone())],
            GatewayError::Driver(e) => e.properties(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbrelay_common::RemoteFault;

    #[test]
    fn test_unknown_provider_fault() {
        let fault = RemoteFault::from_fault(&GatewayError::UnknownProvider("oracle".to_string()));
        assert_eq!(fault.class_name, "InvalidOperation");
        assert_eq!(
            fault.message,
            "Unable to get the connection for the provider oracle."
        );
        assert_eq!(
            fault.property("ProviderName").and_then(|v| v.get::<String>()),
            Some("oracle".to_string())
        );
    }

    #[test]
    fn test_driver_fault_is_transparent() {
        let err = GatewayError::from(DriverError::NotOpen);
        assert_eq!(err.class_name(), "InvalidOperation");
        assert_eq!(err.to_string(), "connection is not open");
    }
}
