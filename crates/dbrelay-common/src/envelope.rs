//! Named values and their wire envelopes.
//!
//! Parameters, result fields and fault properties share one wire shape,
//! [`ValueEnvelope`]. An envelope with an empty type tag is null. Values that
//! cannot be encoded are sent as null, and envelopes that cannot be decoded
//! (unknown tag, unknown encoding, corrupt payload) are read as null: the
//! surrounding operation never fails because of a single value.

use dbrelay_proto::{DataRow, ValueEnvelope};
use tracing::debug;

use crate::codec::{Encoding, ValueCodec};
use crate::value::Value;

/// Returns the null envelope for `name`.
pub fn null_envelope(name: impl Into<String>) -> ValueEnvelope {
    ValueEnvelope {
        name: name.into(),
        ..Default::default()
    }
}

/// Returns true if the envelope carries no value.
pub fn is_null(envelope: &ValueEnvelope) -> bool {
    envelope.r#type.is_empty()
}

impl ValueCodec {
    /// Encodes a named value. `None` and unencodable values become null.
    pub fn to_envelope(&self, name: &str, value: Option<&Value>) -> ValueEnvelope {
        let Some(value) = value else {
            return null_envelope(name);
        };

        match self.encode(value) {
            Ok(encoded) => ValueEnvelope {
                name: name.to_string(),
                r#type: encoded.tag,
                content: encoded.content,
                encoding: encoded.encoding.to_wire(),
                data_type_name: String::new(),
            },
            Err(e) => {
                debug!(name, error = %e, "sending value as null");
                null_envelope(name)
            }
        }
    }

    /// Decodes an envelope's value. Null and undecodable envelopes give `None`.
    pub fn from_envelope(&self, envelope: &ValueEnvelope) -> Option<Value> {
        if is_null(envelope) {
            return None;
        }
        let Some(encoding) = Encoding::from_wire(envelope.encoding) else {
            debug!(name = %envelope.name, encoding = envelope.encoding, "unknown value encoding");
            return None;
        };

        match self.decode(&envelope.r#type, encoding, &envelope.content) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(name = %envelope.name, error = %e, "reading value as null");
                None
            }
        }
    }
}

/// A statement parameter. An empty name binds by position.
#[derive(Debug, Clone, Default)]
pub struct Parameter {
    /// Parameter name, possibly empty.
    pub name: String,
    /// Parameter value; `None` is SQL NULL.
    pub value: Option<Value>,
}

impl Parameter {
    /// Creates a named parameter.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Creates a named NULL parameter.
    pub fn null(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Creates a positional parameter.
    pub fn positional(value: impl Into<Value>) -> Self {
        Self::new(String::new(), value)
    }

    /// Returns true if the parameter binds by position.
    pub fn is_positional(&self) -> bool {
        self.name.is_empty()
    }

    /// Encodes the parameter.
    pub fn to_envelope(&self, codec: &ValueCodec) -> ValueEnvelope {
        codec.to_envelope(&self.name, self.value.as_ref())
    }

    /// Decodes a parameter.
    pub fn from_envelope(envelope: &ValueEnvelope, codec: &ValueCodec) -> Self {
        Self {
            name: envelope.name.clone(),
            value: codec.from_envelope(envelope),
        }
    }
}

/// One column of a result row.
#[derive(Debug, Clone, Default)]
pub struct DataField {
    /// Column name as reported by the native driver.
    pub name: String,
    /// Native type name as reported by the native driver.
    pub data_type_name: String,
    /// Column value; `None` is SQL NULL.
    pub value: Option<Value>,
}

impl DataField {
    /// Creates a field.
    pub fn new(
        name: impl Into<String>,
        data_type_name: impl Into<String>,
        value: Option<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type_name: data_type_name.into(),
            value,
        }
    }

    /// Encodes the field.
    pub fn to_envelope(&self, codec: &ValueCodec) -> ValueEnvelope {
        let mut envelope = codec.to_envelope(&self.name, self.value.as_ref());
        envelope.data_type_name = self.data_type_name.clone();
        envelope
    }

    /// Decodes a field.
    pub fn from_envelope(envelope: &ValueEnvelope, codec: &ValueCodec) -> Self {
        Self {
            name: envelope.name.clone(),
            data_type_name: envelope.data_type_name.clone(),
            value: codec.from_envelope(envelope),
        }
    }
}

/// A named property of a fault.
#[derive(Debug, Clone)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: Option<Value>,
}

impl Property {
    /// Creates a property.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Encodes the property.
    pub fn to_envelope(&self, codec: &ValueCodec) -> ValueEnvelope {
        codec.to_envelope(&self.name, self.value.as_ref())
    }

    /// Decodes a property.
    pub fn from_envelope(envelope: &ValueEnvelope, codec: &ValueCodec) -> Self {
        Self {
            name: envelope.name.clone(),
            value: codec.from_envelope(envelope),
        }
    }
}

/// Encodes a result row.
pub fn encode_row(fields: &[DataField], codec: &ValueCodec) -> Vec<ValueEnvelope> {
    fields.iter().map(|f| f.to_envelope(codec)).collect()
}

/// Decodes a result row.
pub fn decode_row(envelopes: &[ValueEnvelope], codec: &ValueCodec) -> Vec<DataField> {
    envelopes
        .iter()
        .map(|e| DataField::from_envelope(e, codec))
        .collect()
}

/// Decodes a buffered result row.
pub fn decode_data_row(row: &DataRow, codec: &ValueCodec) -> Vec<DataField> {
    decode_row(&row.fields, codec)
}
