//! Dynamically typed values.
//!
//! A [`Value`] holds any `'static` value that is `Send + Sync + Debug`. The
//! concrete type is recovered with [`Value::downcast_ref`] or [`Value::get`];
//! whether a value can cross the wire is decided by the
//! [`ValueCodec`](crate::codec::ValueCodec), not by the value itself.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Object-safe view of a value stored inside a [`Value`].
pub trait DataValue: Any + Send + Sync + fmt::Debug {
    /// Returns the value as `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns the Rust type name of the value.
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + fmt::Debug> DataValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A cheaply clonable, dynamically typed value.
#[derive(Clone)]
pub struct Value(Arc<dyn DataValue>);

impl Value {
    /// Wraps a concrete value.
    pub fn new<T: Any + Send + Sync + fmt::Debug>(value: T) -> Self {
        Self(Arc::new(value))
    }

    // Dispatch through the trait object, not the `Arc`, which is itself a `DataValue`.
    fn inner(&self) -> &dyn DataValue {
        &*self.0
    }

    /// Returns the `TypeId` of the wrapped value.
    pub fn value_type_id(&self) -> TypeId {
        DataValue::as_any(self.inner()).type_id()
    }

    /// Returns the Rust type name of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        DataValue::type_name(self.inner())
    }

    /// Returns the wrapped value as `&dyn Any`.
    pub fn as_any(&self) -> &dyn Any {
        DataValue::as_any(self.inner())
    }

    /// Returns true if the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Returns a reference to the wrapped value if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns a clone of the wrapped value if it is a `T`.
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.inner(), f)
    }
}

macro_rules! impl_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::new(v)
                }
            }
        )*
    };
}

impl_from!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    char,
    String,
    Vec<u8>,
    uuid::Uuid,
    chrono::NaiveDate,
    chrono::NaiveTime,
    chrono::NaiveDateTime,
    chrono::DateTime<chrono::Utc>,
    serde_json::Value,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::new(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::new(v.to_vec())
    }
}
