//! Value codec.
//!
//! Encodes dynamically typed [`Value`]s into `(tag, encoding, bytes)` triples
//! and back. The primary format is bincode; types bincode cannot round-trip
//! (self-describing types such as `serde_json::Value`) fall back to JSON.
//!
//! The format used for a type is decided the first time a value of that type
//! is encoded and cached per `TypeId`, including a permanent "unsupported"
//! marker for types no format can carry. Resolution for one type runs once
//! even under concurrent first use.
//!
//! Provider-specific shapes are carried through pre-encode converters (keyed
//! by the source type) and post-decode converters (keyed by the canonical
//! type).

mod error;
mod registry;
mod zoned;

pub use error::{CodecError, CodecResult};
pub use registry::{DecodeFn, Encodable, EncodeFn, FormatFns, TypeEntry, TypeRegistry};
pub use zoned::ZonedDateTime;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use chrono::DateTime;
use chrono_tz::Tz;
use dashmap::DashMap;
use dbrelay_proto::ValueEncoding;
use tracing::debug;

use crate::value::Value;

/// Wire format of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// bincode.
    #[default]
    Binary,
    /// JSON.
    Text,
}

impl Encoding {
    /// Returns the wire value.
    pub fn to_wire(self) -> i32 {
        match self {
            Encoding::Binary => ValueEncoding::Binary as i32,
            Encoding::Text => ValueEncoding::Text as i32,
        }
    }

    /// Parses a wire value.
    pub fn from_wire(value: i32) -> Option<Self> {
        match ValueEncoding::try_from(value).ok()? {
            ValueEncoding::Binary => Some(Encoding::Binary),
            ValueEncoding::Text => Some(Encoding::Text),
        }
    }
}

/// An encoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Canonical type tag.
    pub tag: String,
    /// Wire format of `content`.
    pub encoding: Encoding,
    /// Encoded bytes.
    pub content: Bytes,
}

/// Converts a value into another value, or declines with `None`.
pub type ConvertFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Clone)]
enum Binding {
    Bound {
        entry: Arc<TypeEntry>,
        encoding: Encoding,
    },
    Unsupported,
}

/// Encoder/decoder for [`Value`]s.
///
/// Shared by every request of a process; all methods take `&self`.
pub struct ValueCodec {
    registry: TypeRegistry,
    pre_encode: HashMap<TypeId, ConvertFn>,
    post_decode: HashMap<TypeId, ConvertFn>,
    bindings: DashMap<TypeId, Arc<OnceLock<Binding>>>,
}

impl ValueCodec {
    /// Creates a codec with the built-in types and converters.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder preloaded with the built-in types and converters.
    pub fn builder() -> ValueCodecBuilder {
        ValueCodecBuilder::new()
    }

    /// Returns the type registry.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Encodes a value.
    pub fn encode(&self, value: &Value) -> CodecResult<Encoded> {
        let converted = self.convert(&self.pre_encode, value);
        let value = converted.as_ref().unwrap_or(value);

        match self.binding(value) {
            Binding::Bound { entry, encoding } => {
                let content = (entry.format(encoding).encode)(value.as_any())?;
                Ok(Encoded {
                    tag: entry.tag().to_string(),
                    encoding,
                    content: Bytes::from(content),
                })
            }
            Binding::Unsupported => Err(CodecError::NotEncodable(value.type_name())),
        }
    }

    /// Decodes a value.
    pub fn decode(&self, tag: &str, encoding: Encoding, content: &[u8]) -> CodecResult<Value> {
        let entry = self
            .registry
            .by_tag(tag)
            .ok_or_else(|| CodecError::UnknownTag(tag.to_string()))?;
        let value = (entry.format(encoding).decode)(content)?;

        Ok(self.convert(&self.post_decode, &value).unwrap_or(value))
    }

    /// Returns the wire format bound to the value's type, resolving it if needed.
    pub fn encoding_for(&self, value: &Value) -> Option<Encoding> {
        let converted = self.convert(&self.pre_encode, value);
        match self.binding(converted.as_ref().unwrap_or(value)) {
            Binding::Bound { encoding, .. } => Some(encoding),
            Binding::Unsupported => None,
        }
    }

    /// Returns the number of types with a cached binding.
    pub fn cached_bindings(&self) -> usize {
        self.bindings.len()
    }

    fn convert(&self, converters: &HashMap<TypeId, ConvertFn>, value: &Value) -> Option<Value> {
        converters
            .get(&value.value_type_id())
            .and_then(|convert| convert(value))
    }

    fn binding(&self, value: &Value) -> Binding {
        let type_id = value.value_type_id();
        if let Some(cell) = self.bindings.get(&type_id) {
            if let Some(binding) = cell.get() {
                return binding.clone();
            }
        }

        // The map guard is released before resolving; the cell serializes
        // concurrent first use of the same type.
        let cell = self.bindings.entry(type_id).or_default().value().clone();
        cell.get_or_init(|| self.resolve(value)).clone()
    }

    fn resolve(&self, value: &Value) -> Binding {
        let Some(entry) = self.registry.by_type(value.value_type_id()) else {
            debug!(type_name = value.type_name(), "type is not registered");
            return Binding::Unsupported;
        };

        if probe(entry.format(Encoding::Binary), value.as_any(), false) {
            return Binding::Bound {
                entry: entry.clone(),
                encoding: Encoding::Binary,
            };
        }
        if probe(entry.format(Encoding::Text), value.as_any(), true) {
            debug!(tag = entry.tag(), "falling back to text encoding");
            return Binding::Bound {
                entry: entry.clone(),
                encoding: Encoding::Text,
            };
        }

        debug!(tag = entry.tag(), "type cannot be round-tripped");
        Binding::Unsupported
    }
}

// Checks that `value` survives an encode/decode cycle in one format.
fn probe(format: FormatFns, value: &dyn Any, require_output: bool) -> bool {
    match (format.encode)(value) {
        Ok(bytes) if require_output && bytes.is_empty() => false,
        Ok(bytes) => (format.decode)(&bytes).is_ok(),
        Err(_) => false,
    }
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValueCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCodec")
            .field("types", &self.registry.len())
            .field("pre_encode", &self.pre_encode.len())
            .field("post_decode", &self.post_decode.len())
            .field("cached_bindings", &self.bindings.len())
            .finish()
    }
}

/// Builder for [`ValueCodec`].
pub struct ValueCodecBuilder {
    registry: TypeRegistry,
    pre_encode: HashMap<TypeId, ConvertFn>,
    post_decode: HashMap<TypeId, ConvertFn>,
}

impl ValueCodecBuilder {
    /// Creates a builder with the built-in types and the zoned timestamp converters.
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::with_builtin_types(),
            pre_encode: HashMap::new(),
            post_decode: HashMap::new(),
        }
        .with_zoned_timestamps()
    }

    /// Creates a builder with no registered types.
    pub fn empty() -> Self {
        Self {
            registry: TypeRegistry::new(),
            pre_encode: HashMap::new(),
            post_decode: HashMap::new(),
        }
    }

    /// Registers an encodable type under a canonical tag.
    pub fn register<T: Encodable>(mut self, tag: impl Into<String>) -> Self {
        self.registry.register::<T>(tag);
        self
    }

    /// Converts values of type `S` to `C` before encoding.
    pub fn pre_encode<S, C, F>(mut self, convert: F) -> Self
    where
        S: Any,
        C: Any + Send + Sync + fmt::Debug,
        F: Fn(&S) -> C + Send + Sync + 'static,
    {
        let convert: ConvertFn =
            Arc::new(move |value: &Value| value.downcast_ref::<S>().map(|v| Value::new(convert(v))));
        self.pre_encode.insert(TypeId::of::<S>(), convert);
        self
    }

    /// Converts decoded values of type `C` to `T`. A converter returning
    /// `None` leaves the decoded value as is.
    pub fn post_decode<C, T, F>(mut self, convert: F) -> Self
    where
        C: Any,
        T: Any + Send + Sync + fmt::Debug,
        F: Fn(&C) -> Option<T> + Send + Sync + 'static,
    {
        let convert: ConvertFn = Arc::new(move |value: &Value| {
            value
                .downcast_ref::<C>()
                .and_then(|v| convert(v))
                .map(Value::new)
        });
        self.post_decode.insert(TypeId::of::<C>(), convert);
        self
    }

    /// Carries `DateTime<chrono_tz::Tz>` as [`ZonedDateTime`].
    pub fn with_zoned_timestamps(self) -> Self {
        self.register::<ZonedDateTime>("zoned_datetime")
            .pre_encode::<DateTime<Tz>, ZonedDateTime, _>(ZonedDateTime::from_zoned)
            .post_decode::<ZonedDateTime, DateTime<Tz>, _>(ZonedDateTime::to_zoned)
    }

    /// Builds the codec.
    pub fn build(self) -> ValueCodec {
        ValueCodec {
            registry: self.registry,
            pre_encode: self.pre_encode,
            post_decode: self.post_decode,
            bindings: DashMap::new(),
        }
    }
}

impl Default for ValueCodecBuilder {
    fn default() -> Self {
        Self::new()
    }
}
