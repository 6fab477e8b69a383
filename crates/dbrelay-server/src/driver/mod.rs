//! Native driver abstraction.
//!
//! The gateway is provider agnostic: it selects a [`ProviderFactory`] by the
//! invariant name a client passes to `OpenConnection` and drives the native
//! objects it creates through the traits below. Each trait mirrors one
//! registry entry kind (connection, command, transaction) plus the forward-only
//! row reader returned by query execution.

mod error;
pub mod sqlite;

pub use error::{DriverError, DriverResult};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dbrelay_common::{DataField, IsolationLevel, Parameter};

use crate::config::{DriverKind, ProviderConfig};

/// Creates native connections for one provider.
pub trait ProviderFactory: Send + Sync {
    /// Returns the driver name.
    fn driver_name(&self) -> &'static str;

    /// Creates an unopened connection.
    fn create_connection(&self, connection_string: &str)
        -> DriverResult<Box<dyn NativeConnection>>;
}

/// A native database connection.
#[async_trait]
pub trait NativeConnection: Send + Sync {
    /// Opens the connection.
    async fn open(&mut self) -> DriverResult<()>;

    /// Closes the connection. Closing a closed connection is a no-op.
    async fn close(&mut self) -> DriverResult<()>;

    /// Creates a command bound to this connection.
    fn create_command(&self) -> DriverResult<Box<dyn NativeCommand>>;

    /// Starts a transaction.
    async fn begin_transaction(
        &self,
        level: IsolationLevel,
    ) -> DriverResult<Arc<dyn NativeTransaction>>;
}

/// A native transaction.
#[async_trait]
pub trait NativeTransaction: Send + Sync {
    /// Returns the isolation level the transaction was started with.
    fn isolation_level(&self) -> IsolationLevel;

    /// Returns true until the transaction commits or rolls back.
    fn is_active(&self) -> bool;

    /// Commits the transaction.
    async fn commit(&self) -> DriverResult<()>;

    /// Rolls the transaction back.
    async fn rollback(&self) -> DriverResult<()>;

    /// Releases native resources, rolling back if still active.
    async fn dispose(&self) {}
}

/// A native command. Text, transaction and parameters are re-bound before
/// every execution.
#[async_trait]
pub trait NativeCommand: Send {
    /// Sets the statement text.
    fn set_text(&mut self, text: &str);

    /// Enlists the command in a transaction, or clears it.
    fn set_transaction(&mut self, transaction: Option<Arc<dyn NativeTransaction>>);

    /// Removes all parameters.
    fn clear_parameters(&mut self);

    /// Appends a parameter.
    fn add_parameter(&mut self, parameter: Parameter);

    /// Executes the statement and returns a row reader.
    async fn execute_reader(&mut self) -> DriverResult<Box<dyn NativeReader>>;

    /// Executes the statement and returns the number of affected rows, or -1
    /// when the statement does not write.
    async fn execute_non_query(&mut self) -> DriverResult<i64>;

    /// Releases native resources.
    async fn dispose(&mut self) {}
}

/// Forward-only row reader.
#[async_trait]
pub trait NativeReader: Send {
    /// Fetches the next row, or `None` at the end of the result.
    async fn next_row(&mut self) -> DriverResult<Option<Vec<DataField>>>;
}

/// Provider factories by invariant name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the registry described by the configuration.
    pub fn from_config(providers: &[ProviderConfig], row_buffer: usize) -> Self {
        let mut registry = Self::new();
        for provider in providers {
            let factory: Arc<dyn ProviderFactory> = match provider.driver {
                DriverKind::Sqlite => Arc::new(sqlite::SqliteFactory::new(row_buffer)),
            };
            registry.register(provider.invariant_name.clone(), factory);
        }
        registry
    }

    /// Registers a factory, replacing any previous one with the same name.
    pub fn register(&mut self, invariant_name: impl Into<String>, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(invariant_name.into(), factory);
    }

    /// Looks up a factory.
    pub fn get(&self, invariant_name: &str) -> Option<Arc<dyn ProviderFactory>> {
        self.factories.get(invariant_name).cloned()
    }

    /// Returns the registered invariant names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered providers.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
