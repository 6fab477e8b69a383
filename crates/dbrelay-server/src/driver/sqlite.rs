//! SQLite provider backed by rusqlite.
//!
//! A connection owns one `rusqlite::Connection` behind a mutex shared with its
//! commands and transactions. All driver calls run on the blocking pool.
//! A query runs to completion while the mutex is held; its rows are handed
//! to the async side through a bounded channel only after the mutex is
//! released. A slow reader never holds up other commands on the connection,
//! and a dropped reader stops the hand-over.
//!
//! Statement text may hold several statements. Each one is prepared, bound
//! and stepped in turn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use dbrelay_common::{ConnectionStringBuilder, DataField, IsolationLevel, Parameter, Value};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Batch, Connection, Statement};
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    DriverError, DriverResult, NativeCommand, NativeConnection, NativeReader, NativeTransaction,
    ProviderFactory,
};

type SharedConnection = Arc<Mutex<Connection>>;

type RowResult = DriverResult<Vec<DataField>>;

/// Connection string keys naming the database file.
const DATA_SOURCE_KEYS: [&str; 3] = ["Data Source", "DataSource", "Filename"];

/// Path that opens a private in-memory database.
pub const MEMORY_DATA_SOURCE: &str = ":memory:";

/// Affected row count when no statement in the text writes.
pub const NO_ROWS_AFFECTED: i64 = -1;

async fn run_blocking<T, F>(f: F) -> DriverResult<T>
where
    F: FnOnce() -> DriverResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DriverError::Task(e.to_string()))?
}

/// Factory for SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    row_buffer: usize,
}

impl SqliteFactory {
    /// Creates a factory whose readers buffer up to `row_buffer` rows.
    pub fn new(row_buffer: usize) -> Self {
        Self {
            row_buffer: row_buffer.max(1),
        }
    }
}

impl Default for SqliteFactory {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ProviderFactory for SqliteFactory {
    fn driver_name(&self) -> &'static str {
        "sqlite"
    }

    fn create_connection(
        &self,
        connection_string: &str,
    ) -> DriverResult<Box<dyn NativeConnection>> {
        let builder = ConnectionStringBuilder::parse(connection_string)
            .map_err(|e| DriverError::ConnectionString(e.to_string()))?;
        let path = DATA_SOURCE_KEYS
            .iter()
            .find_map(|key| builder.get_non_empty(key))
            .ok_or_else(|| DriverError::ConnectionString("missing 'Data Source'".to_string()))?;

        Ok(Box::new(SqliteConnection {
            path: path.to_string(),
            row_buffer: self.row_buffer,
            conn: None,
        }))
    }
}

/// A SQLite connection.
pub struct SqliteConnection {
    path: String,
    row_buffer: usize,
    conn: Option<SharedConnection>,
}

impl SqliteConnection {
    fn shared(&self) -> DriverResult<SharedConnection> {
        self.conn.clone().ok_or(DriverError::NotOpen)
    }
}

fn begin_statement(level: IsolationLevel) -> &'static str {
    match level {
        IsolationLevel::RepeatableRead | IsolationLevel::Serializable | IsolationLevel::Snapshot => {
            "BEGIN IMMEDIATE"
        }
        _ => "BEGIN DEFERRED",
    }
}

#[async_trait]
impl NativeConnection for SqliteConnection {
    async fn open(&mut self) -> DriverResult<()> {
        if self.conn.is_some() {
            return Err(DriverError::InvalidOperation(
                "connection is already open".to_string(),
            ));
        }

        let path = self.path.clone();
        let conn = run_blocking(move || {
            let conn = if path == MEMORY_DATA_SOURCE {
                Connection::open_in_memory()?
            } else {
                Connection::open(&path)?
            };
            Ok(conn)
        })
        .await?;

        debug!(path = %self.path, "sqlite connection opened");
        self.conn = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    async fn close(&mut self) -> DriverResult<()> {
        // Readers still streaming keep the handle alive until they finish.
        if self.conn.take().is_some() {
            debug!(path = %self.path, "sqlite connection closed");
        }
        Ok(())
    }

    fn create_command(&self) -> DriverResult<Box<dyn NativeCommand>> {
        Ok(Box::new(SqliteCommand {
            conn: self.shared()?,
            row_buffer: self.row_buffer,
            text: String::new(),
            parameters: Vec::new(),
            transaction: None,
        }))
    }

    async fn begin_transaction(
        &self,
        level: IsolationLevel,
    ) -> DriverResult<Arc<dyn NativeTransaction>> {
        let conn = self.shared()?;
        let worker = conn.clone();
        run_blocking(move || {
            let conn = worker.lock();
            if level == IsolationLevel::ReadUncommitted {
                conn.execute_batch("PRAGMA read_uncommitted = 1")?;
            }
            conn.execute_batch(begin_statement(level))?;
            Ok(())
        })
        .await?;

        Ok(Arc::new(SqliteTransaction {
            conn,
            level,
            finished: AtomicBool::new(false),
        }))
    }
}

/// A SQLite transaction, i.e. a `BEGIN` on the shared connection.
pub struct SqliteTransaction {
    conn: SharedConnection,
    level: IsolationLevel,
    finished: AtomicBool,
}

impl SqliteTransaction {
    async fn finish(&self, statement: &'static str) -> DriverResult<()> {
        if self.finished.load(Ordering::Acquire) {
            return Err(DriverError::InvalidOperation(
                "transaction has already been committed or rolled back".to_string(),
            ));
        }

        let conn = self.conn.clone();
        run_blocking(move || {
            conn.lock().execute_batch(statement)?;
            Ok(())
        })
        .await?;
        self.finished.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl NativeTransaction for SqliteTransaction {
    fn isolation_level(&self) -> IsolationLevel {
        self.level
    }

    fn is_active(&self) -> bool {
        !self.finished.load(Ordering::Acquire)
    }

    async fn commit(&self) -> DriverResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> DriverResult<()> {
        self.finish("ROLLBACK").await
    }

    async fn dispose(&self) {
        if self.is_active() {
            if let Err(e) = self.finish("ROLLBACK").await {
                debug!(error = %e, "rollback on dispose failed");
            }
            self.finished.store(true, Ordering::Release);
        }
    }
}

/// A SQLite command.
pub struct SqliteCommand {
    conn: SharedConnection,
    row_buffer: usize,
    text: String,
    parameters: Vec<Parameter>,
    transaction: Option<Arc<dyn NativeTransaction>>,
}

impl SqliteCommand {
    fn check_transaction(&self) -> DriverResult<()> {
        match &self.transaction {
            Some(tx) if !tx.is_active() => Err(DriverError::InvalidOperation(
                "the transaction has completed and can no longer be used".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl NativeCommand for SqliteCommand {
    fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
    }

    fn set_transaction(&mut self, transaction: Option<Arc<dyn NativeTransaction>>) {
        self.transaction = transaction;
    }

    fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    fn add_parameter(&mut self, parameter: Parameter) {
        self.parameters.push(parameter);
    }

    async fn execute_reader(&mut self) -> DriverResult<Box<dyn NativeReader>> {
        self.check_transaction()?;

        let (tx, rx) = mpsc::channel(self.row_buffer);
        let conn = self.conn.clone();
        let text = self.text.clone();
        let parameters = self.parameters.clone();

        // Statement errors surface on the first fetch.
        tokio::task::spawn_blocking(move || {
            let collected = {
                let conn = conn.lock();
                let mut rows = Vec::new();
                run_batch(&conn, &text, &parameters, Some(&mut rows)).map(|_| rows)
            };

            match collected {
                Ok(rows) => {
                    for row in rows {
                        if tx.blocking_send(Ok(row)).is_err() {
                            debug!("reader dropped, stopping row hand-over");
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                }
            }
        });

        Ok(Box::new(SqliteReader { rows: rx }))
    }

    async fn execute_non_query(&mut self) -> DriverResult<i64> {
        self.check_transaction()?;

        let conn = self.conn.clone();
        let text = self.text.clone();
        let parameters = self.parameters.clone();
        run_blocking(move || run_batch(&conn.lock(), &text, &parameters, None)).await
    }

    async fn dispose(&mut self) {
        self.transaction = None;
        self.parameters.clear();
    }
}

/// Reader over rows produced on the blocking pool.
pub struct SqliteReader {
    rows: mpsc::Receiver<RowResult>,
}

#[async_trait]
impl NativeReader for SqliteReader {
    async fn next_row(&mut self) -> DriverResult<Option<Vec<DataField>>> {
        self.rows.recv().await.transpose()
    }
}

/// Runs every statement in `text` and returns the number of rows changed by
/// the writing statements, or [`NO_ROWS_AFFECTED`] if none of them writes.
///
/// When `rows` is given, the rows of the first statement that returns columns
/// are collected into it. Rows of every other statement are stepped through
/// and discarded.
fn run_batch(
    conn: &Connection,
    text: &str,
    parameters: &[Parameter],
    mut rows: Option<&mut Vec<Vec<DataField>>>,
) -> DriverResult<i64> {
    let mut affected = NO_ROWS_AFFECTED;
    let mut batch = Batch::new(conn, text);

    while let Some(mut stmt) = batch.next()? {
        bind_parameters(&mut stmt, parameters)?;
        let writes = !stmt.readonly();
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut sink = if names.is_empty() { None } else { rows.take() };

        let mut cursor = stmt.raw_query();
        while let Some(row) = cursor.next()? {
            if let Some(out) = sink.as_mut() {
                let mut fields = Vec::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    fields.push(read_field(name, row.get_ref(i)?));
                }
                out.push(fields);
            }
        }
        drop(cursor);

        if writes {
            let changes = i64::try_from(conn.changes()).unwrap_or(i64::MAX);
            affected = affected.max(0).saturating_add(changes);
        }
    }
    Ok(affected)
}

fn read_field(name: &str, value: ValueRef<'_>) -> DataField {
    match value {
        ValueRef::Null => DataField::new(name, "NULL", None),
        ValueRef::Integer(i) => DataField::new(name, "INTEGER", Some(Value::from(i))),
        ValueRef::Real(f) => DataField::new(name, "REAL", Some(Value::from(f))),
        ValueRef::Text(t) => DataField::new(
            name,
            "TEXT",
            Some(Value::from(String::from_utf8_lossy(t).into_owned())),
        ),
        ValueRef::Blob(b) => DataField::new(name, "BLOB", Some(Value::from(b))),
    }
}

/// Binds parameters to one statement. Positional parameters fill `?` slots
/// in order; named ones go to the slot of the same name, with or without a
/// `:`, `@` or `$` prefix. Parameters the statement does not declare are
/// skipped, and a declared slot left without a value is an error.
fn bind_parameters(stmt: &mut Statement<'_>, parameters: &[Parameter]) -> DriverResult<()> {
    let count = stmt.parameter_count();
    let mut bound = vec![false; count + 1];
    let mut position = 0;

    for parameter in parameters {
        let index = if parameter.is_positional() {
            position += 1;
            position
        } else {
            match parameter_index(stmt, &parameter.name)? {
                Some(index) => index,
                None => continue,
            }
        };
        if index > count {
            continue;
        }
        stmt.raw_bind_parameter(index, to_sql_value(parameter)?)?;
        bound[index] = true;
    }

    match (1..=count).find(|&i| !bound[i]) {
        Some(index) => Err(DriverError::MissingParameter(
            stmt.parameter_name(index)
                .map(String::from)
                .unwrap_or_else(|| format!("?{}", index)),
        )),
        None => Ok(()),
    }
}

fn parameter_index(stmt: &Statement<'_>, name: &str) -> DriverResult<Option<usize>> {
    if let Some(index) = stmt.parameter_index(name)? {
        return Ok(Some(index));
    }
    if !name.starts_with([':', '@', '$']) {
        for prefix in [":", "@", "$"] {
            if let Some(index) = stmt.parameter_index(&format!("{}{}", prefix, name))? {
                return Ok(Some(index));
            }
        }
    }
    Ok(None)
}

macro_rules! integer_value {
    ($value:expr, $($ty:ty),*) => {
        $(
            if let Some(v) = $value.downcast_ref::<$ty>() {
                return Ok(SqlValue::Integer(i64::from(*v)));
            }
        )*
    };
}

fn to_sql_value(parameter: &Parameter) -> DriverResult<SqlValue> {
    let Some(value) = &parameter.value else {
        return Ok(SqlValue::Null);
    };

    integer_value!(value, i64, i32, i16, i8, u32, u16, u8);
    if let Some(v) = value.downcast_ref::<bool>() {
        return Ok(SqlValue::Integer(i64::from(*v)));
    }
    if let Some(v) = value.downcast_ref::<u64>() {
        if let Ok(v) = i64::try_from(*v) {
            return Ok(SqlValue::Integer(v));
        }
    }
    if let Some(v) = value.downcast_ref::<f64>() {
        return Ok(SqlValue::Real(*v));
    }
    if let Some(v) = value.downcast_ref::<f32>() {
        return Ok(SqlValue::Real(f64::from(*v)));
    }
    if let Some(v) = value.downcast_ref::<String>() {
        return Ok(SqlValue::Text(v.clone()));
    }
    if let Some(v) = value.downcast_ref::<char>() {
        return Ok(SqlValue::Text(v.to_string()));
    }
    if let Some(v) = value.downcast_ref::<Vec<u8>>() {
        return Ok(SqlValue::Blob(v.clone()));
    }
    if let Some(v) = value.downcast_ref::<uuid::Uuid>() {
        return Ok(SqlValue::Text(v.hyphenated().to_string()));
    }
    if let Some(v) = value.downcast_ref::<NaiveDate>() {
        return Ok(SqlValue::Text(v.format("%Y-%m-%d").to_string()));
    }
    if let Some(v) = value.downcast_ref::<NaiveTime>() {
        return Ok(SqlValue::Text(v.format("%H:%M:%S%.f").to_string()));
    }
    if let Some(v) = value.downcast_ref::<NaiveDateTime>() {
        return Ok(SqlValue::Text(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()));
    }
    if let Some(v) = value.downcast_ref::<DateTime<Utc>>() {
        return Ok(SqlValue::Text(v.to_rfc3339()));
    }
    if let Some(v) = value.downcast_ref::<serde_json::Value>() {
        return Ok(SqlValue::Text(v.to_string()));
    }

    Err(DriverError::UnsupportedParameter {
        name: parameter.name.clone(),
        type_name: value.type_name(),
    })
}
