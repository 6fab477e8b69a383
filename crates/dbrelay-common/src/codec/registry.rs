//! Registry of encodable types.
//!
//! Every type that can cross the wire is registered up front under a
//! canonical tag. An entry carries monomorphized encode/decode functions for
//! both wire formats, so decoding never resolves a type from its name at
//! runtime.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{CodecError, CodecResult};
use super::Encoding;
use crate::value::Value;

/// Types that can be registered with the codec.
pub trait Encodable: Serialize + DeserializeOwned + Any + Send + Sync + fmt::Debug {}

impl<T: Serialize + DeserializeOwned + Any + Send + Sync + fmt::Debug> Encodable for T {}

/// Encodes a value of the entry's type.
pub type EncodeFn = fn(&dyn Any) -> CodecResult<Vec<u8>>;

/// Decodes bytes into a value of the entry's type.
pub type DecodeFn = fn(&[u8]) -> CodecResult<Value>;

/// Encode/decode pair for one wire format.
#[derive(Clone, Copy)]
pub struct FormatFns {
    /// Encoder.
    pub encode: EncodeFn,
    /// Decoder.
    pub decode: DecodeFn,
}

/// A registered type.
pub struct TypeEntry {
    tag: String,
    type_id: TypeId,
    type_name: &'static str,
    binary: FormatFns,
    text: FormatFns,
}

impl TypeEntry {
    /// Creates the entry for `T` under `tag`.
    pub fn of<T: Encodable>(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            binary: FormatFns {
                encode: encode_binary::<T>,
                decode: decode_binary::<T>,
            },
            text: FormatFns {
                encode: encode_text::<T>,
                decode: decode_text::<T>,
            },
        }
    }

    /// Returns the canonical tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns the `TypeId` of the registered type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the Rust type name of the registered type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the functions for a wire format.
    pub fn format(&self, encoding: Encoding) -> FormatFns {
        match encoding {
            Encoding::Binary => self.binary,
            Encoding::Text => self.text,
        }
    }
}

impl fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEntry")
            .field("tag", &self.tag)
            .field("type_name", &self.type_name)
            .finish()
    }
}

fn downcast<T: Encodable>(value: &dyn Any) -> CodecResult<&T> {
    value
        .downcast_ref::<T>()
        .ok_or(CodecError::TypeMismatch(std::any::type_name::<T>()))
}

fn encode_binary<T: Encodable>(value: &dyn Any) -> CodecResult<Vec<u8>> {
    bincode::serialize(downcast::<T>(value)?).map_err(|e| CodecError::Binary(e.to_string()))
}

fn decode_binary<T: Encodable>(bytes: &[u8]) -> CodecResult<Value> {
    bincode::deserialize::<T>(bytes)
        .map(Value::new)
        .map_err(|e| CodecError::Binary(e.to_string()))
}

fn encode_text<T: Encodable>(value: &dyn Any) -> CodecResult<Vec<u8>> {
    serde_json::to_vec(downcast::<T>(value)?).map_err(|e| CodecError::Text(e.to_string()))
}

fn decode_text<T: Encodable>(bytes: &[u8]) -> CodecResult<Value> {
    serde_json::from_slice::<T>(bytes)
        .map(Value::new)
        .map_err(|e| CodecError::Text(e.to_string()))
}

/// Tag to type mapping, built before the codec starts serving.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_tag: HashMap<String, Arc<TypeEntry>>,
    by_type: HashMap<TypeId, Arc<TypeEntry>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in scalar, temporal and JSON types.
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        registry
            .register::<bool>("bool")
            .register::<i8>("i8")
            .register::<i16>("i16")
            .register::<i32>("i32")
            .register::<i64>("i64")
            .register::<u8>("u8")
            .register::<u16>("u16")
            .register::<u32>("u32")
            .register::<u64>("u64")
            .register::<f32>("f32")
            .register::<f64>("f64")
            .register::<char>("char")
            .register::<String>("string")
            .register::<Vec<u8>>("bytes")
            .register::<uuid::Uuid>("uuid")
            .register::<chrono::NaiveDate>("date")
            .register::<chrono::NaiveTime>("time")
            .register::<chrono::NaiveDateTime>("datetime")
            .register::<chrono::DateTime<chrono::Utc>>("timestamp")
            .register::<serde_json::Value>("json");
        registry
    }

    /// Registers `T` under `tag`, replacing any previous entry for either.
    pub fn register<T: Encodable>(&mut self, tag: impl Into<String>) -> &mut Self {
        let entry = Arc::new(TypeEntry::of::<T>(tag));
        if let Some(old) = self.by_type.insert(entry.type_id, entry.clone()) {
            self.by_tag.remove(&old.tag);
        }
        if let Some(old) = self.by_tag.insert(entry.tag.clone(), entry.clone()) {
            if old.type_id != entry.type_id {
                self.by_type.remove(&old.type_id);
            }
        }
        self
    }

    /// Looks up an entry by tag.
    pub fn by_tag(&self, tag: &str) -> Option<&Arc<TypeEntry>> {
        self.by_tag.get(tag)
    }

    /// Looks up an entry by type.
    pub fn by_type(&self, type_id: TypeId) -> Option<&Arc<TypeEntry>> {
        self.by_type.get(&type_id)
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    /// Returns true if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::any::TypeId;

    use super::{CodecError, Encoding, TypeEntry, TypeRegistry};

    #[test]
    fn test_builtin_lookup() {
        let registry = TypeRegistry::with_builtin_types();
        let entry = registry.by_tag("i64").unwrap();
        assert_eq!(entry.type_id(), TypeId::of::<i64>());
        assert_eq!(
            registry.by_type(TypeId::of::<String>()).unwrap().tag(),
            "string"
        );
        assert!(registry.by_tag("System.Int32").is_none());
    }

    #[test]
    fn test_register_replaces_tag() {
        let mut registry = TypeRegistry::new();
        registry.register::<i32>("int");
        registry.register::<i64>("int");

        assert_eq!(registry.len(), 1);
        assert!(registry.by_type(TypeId::of::<i32>()).is_none());
        assert_eq!(
            registry.by_tag("int").unwrap().type_id(),
            TypeId::of::<i64>()
        );
    }

    #[test]
    fn test_register_replaces_type() {
        let mut registry = TypeRegistry::new();
        registry.register::<i32>("a");
        registry.register::<i32>("b");

        assert_eq!(registry.len(), 1);
        assert!(registry.by_tag("a").is_none());
        assert_eq!(registry.by_type(TypeId::of::<i32>()).unwrap().tag(), "b");
    }

    #[test]
    fn test_format_functions() {
        let entry = TypeEntry::of::<String>("string");
        let value = String::from("hello");

        let binary = (entry.format(Encoding::Binary).encode)(&value).unwrap();
        let decoded = (entry.format(Encoding::Binary).decode)(&binary).unwrap();
        assert_eq!(decoded.downcast_ref::<String>(), Some(&value));

        let text = (entry.format(Encoding::Text).encode)(&value).unwrap();
        assert_eq!(text, b"\"hello\"");

        let err = (entry.format(Encoding::Binary).encode)(&5i32).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch(_)));
    }
}
