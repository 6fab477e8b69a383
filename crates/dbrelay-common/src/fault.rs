//! Faults that cross the gateway as response data.
//!
//! Errors that should reach the remote caller implement [`Fault`], which
//! names the error class and lists the properties that travel with it. The
//! gateway turns them into a [`RemoteFault`] and then into a
//! [`DataException`] carried inside the ordinary response.

use std::fmt;

use dbrelay_proto::DataException;

use crate::codec::ValueCodec;
use crate::envelope::Property;
use crate::value::Value;

/// An error that can be reported to a remote caller.
pub trait Fault: std::error::Error {
    /// Returns the error class name.
    fn class_name(&self) -> &'static str;

    /// Returns the properties describing this error. `None` values are dropped.
    fn properties(&self) -> Vec<Property> {
        Vec::new()
    }
}

/// A captured fault: class name, message and named properties.
#[derive(Debug, Clone)]
pub struct RemoteFault {
    /// Error class name.
    pub class_name: String,
    /// Human-readable message.
    pub message: String,
    /// Non-null properties, in declaration order.
    pub properties: Vec<Property>,
}

impl RemoteFault {
    /// Creates a fault with no properties.
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            properties: Vec::new(),
        }
    }

    /// Adds a property.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push(Property::new(name, value));
        self
    }

    /// Captures an error.
    pub fn from_fault<F: Fault + ?Sized>(fault: &F) -> Self {
        Self {
            class_name: fault.class_name().to_string(),
            message: fault.to_string(),
            properties: fault
                .properties()
                .into_iter()
                .filter(|p| p.value.is_some())
                .collect(),
        }
    }

    /// Looks up a property value by name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_ref())
    }

    /// Encodes the fault.
    pub fn to_proto(&self, codec: &ValueCodec) -> DataException {
        DataException {
            class_name: self.class_name.clone(),
            message: self.message.clone(),
            properties: self
                .properties
                .iter()
                .map(|p| p.to_envelope(codec))
                .collect(),
        }
    }

    /// Decodes a fault. Properties that cannot be decoded are kept as `None`.
    pub fn from_proto(exception: &DataException, codec: &ValueCodec) -> Self {
        Self {
            class_name: exception.class_name.clone(),
            message: exception.message.clone(),
            properties: exception
                .properties
                .iter()
                .map(|e| Property::from_envelope(e, codec))
                .collect(),
        }
    }
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_name, self.message)
    }
}

impl std::error::Error for RemoteFault {}

impl<F: Fault> From<&F> for RemoteFault {
    fn from(fault: &F) -> Self {
        RemoteFault::from_fault(fault)
    }
}
