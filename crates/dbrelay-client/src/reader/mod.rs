//! Row reader.
//!
//! A [`DataReader`] is a forward-only cursor over a query result. It either
//! pulls one message per row from a server stream or walks rows the gateway
//! returned in a single buffered response.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use dbrelay_common::envelope::{decode_data_row, decode_row};
use dbrelay_common::{DataField, RemoteFault, Value, ValueCodec};
use dbrelay_proto::{DataRow, ExecuteQueryResponse};
use tonic::Streaming;

use super::error::{ClientError, ClientResult};

enum Source {
    Streaming {
        stream: Streaming<ExecuteQueryResponse>,
        pending: Option<ExecuteQueryResponse>,
    },
    Buffered(VecDeque<DataRow>),
    Closed,
}

/// Forward-only result cursor.
pub struct DataReader {
    source: Source,
    codec: Arc<ValueCodec>,
    current: Option<Vec<DataField>>,
    rows_read: u64,
}

impl DataReader {
    /// Wraps a stream. The first message, if already fetched, is replayed
    /// before the stream is polled again.
    pub(crate) fn streaming(
        stream: Streaming<ExecuteQueryResponse>,
        first: Option<ExecuteQueryResponse>,
        codec: Arc<ValueCodec>,
    ) -> Self {
        let source = match first {
            // The stream ended before any row.
            None => Source::Closed,
            Some(first) => Source::Streaming {
                stream,
                pending: Some(first),
            },
        };
        Self::new(source, codec)
    }

    /// Wraps rows from a buffered response.
    pub(crate) fn buffered(rows: Vec<DataRow>, codec: Arc<ValueCodec>) -> Self {
        Self::new(Source::Buffered(rows.into()), codec)
    }

    fn new(source: Source, codec: Arc<ValueCodec>) -> Self {
        Self {
            source,
            codec,
            current: None,
            rows_read: 0,
        }
    }

    /// Advances to the next row. Returns false at the end of the result.
    /// A fault raised mid-stream is returned as [`ClientError::Remote`].
    pub async fn read(&mut self) -> ClientResult<bool> {
        let next = match &mut self.source {
            Source::Closed => None,
            Source::Buffered(rows) => rows
                .pop_front()
                .map(|row| decode_data_row(&row, &self.codec)),
            Source::Streaming { stream, pending } => {
                let message = match pending.take() {
                    Some(message) => Some(message),
                    None => stream.message().await?,
                };
                match message {
                    None => None,
                    Some(message) => {
                        if let Some(exception) = message.data_exception {
                            self.source = Source::Closed;
                            self.current = None;
                            return Err(RemoteFault::from_proto(&exception, &self.codec).into());
                        }
                        Some(decode_row(&message.fields, &self.codec))
                    }
                }
            }
        };

        match next {
            Some(fields) => {
                self.current = Some(fields);
                self.rows_read += 1;
                Ok(true)
            }
            None => {
                self.source = Source::Closed;
                self.current = None;
                Ok(false)
            }
        }
    }

    /// Returns true while rows may remain.
    pub fn is_open(&self) -> bool {
        !matches!(self.source, Source::Closed)
    }

    /// Returns the number of rows read so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Stops reading. Dropping a stream cancels it on the gateway.
    pub fn close(&mut self) {
        self.source = Source::Closed;
        self.current = None;
    }

    /// Returns the number of fields in the current row, or 0 before the
    /// first row.
    pub fn field_count(&self) -> usize {
        self.current.as_ref().map_or(0, Vec::len)
    }

    /// Returns the fields of the current row.
    pub fn fields(&self) -> ClientResult<&[DataField]> {
        self.current.as_deref().ok_or_else(|| {
            ClientError::InvalidOperation("no current row; call read() first".to_string())
        })
    }

    fn field(&self, index: usize) -> ClientResult<&DataField> {
        let fields = self.fields()?;
        fields.get(index).ok_or(ClientError::IndexOutOfRange {
            index,
            count: fields.len(),
        })
    }

    /// Returns the column name at `index`.
    pub fn name(&self, index: usize) -> ClientResult<&str> {
        Ok(&self.field(index)?.name)
    }

    /// Returns the ordinal of the named column. Exact matches win over
    /// case-insensitive ones.
    pub fn ordinal(&self, name: &str) -> ClientResult<usize> {
        let fields = self.fields()?;
        fields
            .iter()
            .position(|f| f.name == name)
            .or_else(|| fields.iter().position(|f| f.name.eq_ignore_ascii_case(name)))
            .ok_or_else(|| ClientError::ColumnNotFound(name.to_string()))
    }

    /// Returns the native type name the driver reported for a column.
    pub fn data_type_name(&self, index: usize) -> ClientResult<&str> {
        Ok(&self.field(index)?.data_type_name)
    }

    /// Returns the Rust type of a column value, or `None` for NULL.
    pub fn field_type_name(&self, index: usize) -> ClientResult<Option<&'static str>> {
        Ok(self.field(index)?.value.as_ref().map(Value::type_name))
    }

    /// Returns true if the column is NULL or could not be decoded.
    pub fn is_null(&self, index: usize) -> ClientResult<bool> {
        Ok(self.field(index)?.value.is_none())
    }

    /// Returns the column value.
    pub fn value(&self, index: usize) -> ClientResult<Option<&Value>> {
        Ok(self.field(index)?.value.as_ref())
    }

    /// Returns the column value as `T`, or `None` for NULL.
    pub fn get<T: Any + Clone>(&self, index: usize) -> ClientResult<Option<T>> {
        match self.value(index)? {
            None => Ok(None),
            Some(value) => value.get::<T>().map(Some).ok_or(ClientError::TypeMismatch {
                index,
                expected: std::any::type_name::<T>(),
                actual: value.type_name(),
            }),
        }
    }

    /// Returns the named column value as `T`.
    pub fn get_by_name<T: Any + Clone>(&self, name: &str) -> ClientResult<Option<T>> {
        self.get(self.ordinal(name)?)
    }

    /// Returns a text column.
    pub fn get_string(&self, index: usize) -> ClientResult<Option<String>> {
        self.get::<String>(index)
    }

    /// Returns every value of the current row.
    pub fn values(&self) -> ClientResult<Vec<Option<Value>>> {
        Ok(self.fields()?.iter().map(|f| f.value.clone()).collect())
    }

    /// Copies up to `length` bytes of a binary column, starting at
    /// `field_offset`, into `buffer[buffer_offset..]`. Returns the number of
    /// bytes copied, 0 when either offset is out of range.
    pub fn get_bytes(
        &self,
        index: usize,
        field_offset: usize,
        buffer: &mut [u8],
        buffer_offset: usize,
        length: usize,
    ) -> ClientResult<usize> {
        let bytes = match self.value(index)? {
            None => return Ok(0),
            Some(value) => value.downcast_ref::<Vec<u8>>().ok_or(ClientError::TypeMismatch {
                index,
                expected: "bytes",
                actual: value.type_name(),
            })?,
        };
        Ok(copy_window(bytes, field_offset, buffer, buffer_offset, length))
    }

    /// Copies up to `length` characters of a text column, starting at
    /// character `field_offset`, into `buffer[buffer_offset..]`.
    pub fn get_chars(
        &self,
        index: usize,
        field_offset: usize,
        buffer: &mut [char],
        buffer_offset: usize,
        length: usize,
    ) -> ClientResult<usize> {
        let chars: Vec<char> = match self.value(index)? {
            None => return Ok(0),
            Some(value) => value
                .downcast_ref::<String>()
                .ok_or(ClientError::TypeMismatch {
                    index,
                    expected: "string",
                    actual: value.type_name(),
                })?
                .chars()
                .collect(),
        };
        Ok(copy_window(&chars, field_offset, buffer, buffer_offset, length))
    }
}

// Copies the window clipped to both the source and the buffer capacity.
fn copy_window<T: Copy>(
    source: &[T],
    source_offset: usize,
    buffer: &mut [T],
    buffer_offset: usize,
    length: usize,
) -> usize {
    if source_offset >= source.len() || buffer_offset >= buffer.len() {
        return 0;
    }
    let count = length
        .min(source.len() - source_offset)
        .min(buffer.len() - buffer_offset);
    buffer[buffer_offset..buffer_offset + count]
        .copy_from_slice(&source[source_offset..source_offset + count]);
    count
}

impl std::fmt::Debug for DataReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataReader")
            .field("open", &self.is_open())
            .field("rows_read", &self.rows_read)
            .field("field_count", &self.field_count())
            .finish()
    }
}
