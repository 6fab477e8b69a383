//! # dbrelay-common
//!
//! Types shared by the dbrelay gateway server and client.
//!
//! This crate provides:
//! - [`Value`]: dynamically typed values carried as parameters, result fields
//!   and fault properties
//! - [`ValueCodec`]: the value codec (bincode with a JSON fallback, a type
//!   registry, per-type binding cache, pre/post converters)
//! - Envelopes: [`Parameter`], [`DataField`], [`Property`]
//! - [`RemoteFault`] and the [`Fault`] trait
//! - [`IsolationLevel`] with its wire mapping
//! - [`ConnectionStringBuilder`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod connection_string;
pub mod envelope;
pub mod fault;
pub mod isolation;
pub mod value;

pub use codec::{CodecError, CodecResult, Encoding, ValueCodec, ValueCodecBuilder, ZonedDateTime};
pub use connection_string::{ConnectionStringBuilder, ConnectionStringError};
pub use envelope::{DataField, Parameter, Property};
pub use fault::{Fault, RemoteFault};
pub use isolation::IsolationLevel;
pub use value::Value;
