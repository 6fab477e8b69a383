//! Native driver errors.

use dbrelay_common::{Fault, Property, Value};
use thiserror::Error;

/// Errors raised by native drivers.
///
/// Each variant declares the properties that travel with it to the remote
/// caller through [`Fault::properties`].
#[derive(Debug, Error)]
pub enum DriverError {
    /// SQLite reported a failure.
    #[error("{message}")]
    Sqlite {
        /// Primary result code.
        code: i32,
        /// Extended result code.
        extended_code: i32,
        /// Error message.
        message: String,
        /// Generic description of the result code.
        description: Option<String>,
    },

    /// The operation is not valid in the current state.
    #[error("{0}")]
    InvalidOperation(String),

    /// The native connection is not open.
    #[error("connection is not open")]
    NotOpen,

    /// A parameter value has no native representation.
    #[error("parameter '{name}' has unsupported type {type_name}")]
    UnsupportedParameter {
        /// Parameter name.
        name: String,
        /// Rust type name of the value.
        type_name: &'static str,
    },

    /// A statement parameter was given no value.
    #[error("must add a value for parameter '{0}'")]
    MissingParameter(String),

    /// The connection string could not be used.
    #[error("invalid connection string: {0}")]
    ConnectionString(String),

    /// A blocking driver task failed.
    #[error("driver task failed: {0}")]
    Task(String),
}

/// Result type for native driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, message) => {
                let description = failure.to_string();
                DriverError::Sqlite {
                    code: failure.extended_code & 0xff,
                    extended_code: failure.extended_code,
                    message: message.unwrap_or_else(|| description.clone()),
                    description: Some(description),
                }
            }
            other => DriverError::Sqlite {
                code: -1,
                extended_code: -1,
                message: other.to_string(),
                description: None,
            },
        }
    }
}

impl Fault for DriverError {
    fn class_name(&self) -> &'static str {
        match self {
            DriverError::Sqlite { .. } => "SqliteError",
            DriverError::InvalidOperation(_) | DriverError::NotOpen => "InvalidOperation",
            DriverError::UnsupportedParameter { .. } => "NotSupported",
            DriverError::MissingParameter(_) | DriverError::ConnectionString(_) => "Argument",
            DriverError::Task(_) => "Internal",
        }
    }

    fn properties(&self) -> Vec<Property> {
        match self {
            DriverError::Sqlite {
                code,
                extended_code,
                description,
                ..
            } => vec![
                Property::new("ErrorCode", *code),
                Property::new("ExtendedCode", *extended_code),
                Property {
                    name: "Description".to_string(),
                    value: description.clone().map(Value::from),
                },
            ],
            DriverError::UnsupportedParameter { name, type_name } => vec![
                Property::new("ParameterName", name.clone()),
                Property::new("TypeName", *type_name),
            ],
            DriverError::MissingParameter(name) => {
                vec![Property::new("ParameterName", name.clone())]
            }
            _ => Vec::new(),
        }
    }
}
