//! Command proxy.
//!
//! A [`Command`] is created once per connection and reused: statement text,
//! parameters and the enlisted transaction are sent with every execution.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use dbrelay_common::{Parameter, Value};
use dbrelay_proto::{DestroyCommandRequest, ExecuteQueryRequest};
use tracing::{debug, warn};

use super::connection::SessionLink;
use super::error::{ClientError, ClientResult};
use super::reader::DataReader;
use super::transaction::{Transaction, TransactionShared};

/// Ordered statement parameters, addressable by name.
#[derive(Debug, Clone, Default)]
pub struct ParameterCollection {
    items: Vec<Parameter>,
}

impl ParameterCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter, replacing one with the same non-empty name.
    pub fn add(&mut self, parameter: Parameter) -> &mut Self {
        match self.index_of(&parameter.name) {
            Some(index) if !parameter.is_positional() => self.items[index] = parameter,
            _ => self.items.push(parameter),
        }
        self
    }

    /// Appends a named value.
    pub fn add_value(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.add(Parameter::new(name, value))
    }

    /// Appends a named NULL.
    pub fn add_null(&mut self, name: impl Into<String>) -> &mut Self {
        self.add(Parameter::null(name))
    }

    /// Appends a positional value.
    pub fn push(&mut self, value: impl Into<Value>) -> &mut Self {
        self.items.push(Parameter::positional(value));
        self
    }

    /// Returns the position of the named parameter. Names compare
    /// case-insensitively.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        self.items
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Returns true if the named parameter exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Returns the named parameter.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.index_of(name).map(|i| &self.items[i])
    }

    /// Returns the named parameter for update.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.index_of(name).map(|i| &mut self.items[i])
    }

    /// Removes the named parameter.
    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        self.index_of(name).map(|i| self.items.remove(i))
    }

    /// Removes every parameter.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates in binding order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.items.iter()
    }
}

impl Index<usize> for ParameterCollection {
    type Output = Parameter;

    fn index(&self, index: usize) -> &Parameter {
        &self.items[index]
    }
}

impl IndexMut<usize> for ParameterCollection {
    fn index_mut(&mut self, index: usize) -> &mut Parameter {
        &mut self.items[index]
    }
}

/// A reusable statement on the gateway.
pub struct Command {
    link: Arc<SessionLink>,
    command_id: String,
    text: String,
    parameters: ParameterCollection,
    transaction: Option<Arc<TransactionShared>>,
    destroyed: bool,
}

impl Command {
    pub(crate) fn new(link: Arc<SessionLink>, command_id: String) -> Self {
        Self {
            link,
            command_id,
            text: String::new(),
            parameters: ParameterCollection::new(),
            transaction: None,
            destroyed: false,
        }
    }

    /// Returns the gateway command id.
    pub fn id(&self) -> &str {
        &self.command_id
    }

    /// Returns the statement text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Sets the statement text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Returns the parameters.
    pub fn parameters(&self) -> &ParameterCollection {
        &self.parameters
    }

    /// Returns the parameters for update.
    pub fn parameters_mut(&mut self) -> &mut ParameterCollection {
        &mut self.parameters
    }

    /// Enlists the command in a transaction, or returns it to autocommit.
    pub fn set_transaction(&mut self, transaction: Option<&Transaction>) {
        self.transaction = transaction.map(|t| t.shared().clone());
    }

    /// Returns the id of the enlisted transaction.
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction.as_ref().map(|t| t.id.as_str())
    }

    fn build_request(&self) -> ClientResult<ExecuteQueryRequest> {
        if self.destroyed {
            return Err(ClientError::InvalidOperation(
                "command has been destroyed".to_string(),
            ));
        }
        let transaction_id = match &self.transaction {
            None => String::new(),
            Some(transaction) if transaction.is_active() => transaction.id.clone(),
            Some(_) => return Err(ClientError::TransactionFinished),
        };

        Ok(ExecuteQueryRequest {
            connection_id: self.link.connection_id.clone(),
            transaction_id,
            command_id: self.command_id.clone(),
            query: self.text.clone(),
            parameters: self
                .parameters
                .iter()
                .map(|p| p.to_envelope(&self.link.codec))
                .collect(),
        })
    }

    /// Runs the statement and returns a row reader. Faults raised before the
    /// first row are returned here.
    pub async fn execute_reader(&self) -> ClientResult<DataReader> {
        let request = self.link.request(self.build_request()?);
        let codec = self.link.codec.clone();

        if self.link.config.buffered {
            let response = self.link.rpc().execute_query_sync(request).await?.into_inner();
            self.link.check(response.data_exception)?;
            return Ok(DataReader::buffered(response.rows, codec));
        }

        let mut stream = self.link.rpc().execute_query(request).await?.into_inner();
        let first = stream.message().await?;
        if let Some(exception) = first.as_ref().and_then(|m| m.data_exception.clone()) {
            self.link.check(Some(exception))?;
        }
        Ok(DataReader::streaming(stream, first, codec))
    }

    /// Runs the statement and returns the number of affected rows, or -1 when
    /// no statement in the text writes.
    pub async fn execute_non_query(&self) -> ClientResult<i64> {
        let request = self.link.request(self.build_request()?);
        let response = self.link.rpc().execute_non_query(request).await?.into_inner();
        self.link.check(response.data_exception)?;
        Ok(response.rows_affected)
    }

    /// Returns the first field of the first row, or `None` if there are no
    /// rows or the field is NULL.
    pub async fn execute_scalar(&self) -> ClientResult<Option<Value>> {
        let mut reader = self.execute_reader().await?;
        if !reader.read().await? {
            return Ok(None);
        }
        let value = if reader.field_count() == 0 {
            None
        } else {
            reader.value(0)?.cloned()
        };
        reader.close();
        Ok(value)
    }

    /// Releases the command on the gateway.
    pub async fn destroy(mut self) -> ClientResult<()> {
        self.release().await
    }

    // Destroys the command in place; later calls are no-ops.
    pub(crate) async fn release(&mut self) -> ClientResult<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        let request = self.link.request(DestroyCommandRequest {
            connection_id: self.link.connection_id.clone(),
            command_id: self.command_id.clone(),
        });
        self.link.rpc().destroy_command(request).await?;
        debug!(command = %self.command_id, "command destroyed");
        Ok(())
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let link = self.link.clone();
        let command_id = std::mem::take(&mut self.command_id);
        runtime.spawn(async move {
            let request = link.request(DestroyCommandRequest {
                connection_id: link.connection_id.clone(),
                command_id: command_id.clone(),
            });
            if let Err(e) = link.rpc().destroy_command(request).await {
                warn!(command = %command_id, error = %e, "destroy on drop failed");
            }
        });
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.command_id)
            .field("text", &self.text)
            .field("parameters", &self.parameters.len())
            .field("transaction", &self.transaction_id())
            .finish()
    }
}
