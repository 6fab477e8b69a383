//! A connection session: one native connection plus the commands and
//! transactions opened on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbrelay_common::IsolationLevel;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, warn};

use crate::driver::{DriverResult, NativeCommand, NativeConnection, NativeTransaction};

/// Shared handle to a native command. Holding the lock drives the command.
pub type CommandRef = Arc<AsyncMutex<Box<dyn NativeCommand>>>;

struct CommandHandle {
    id: String,
    native: CommandRef,
}

/// A registered transaction.
#[derive(Clone)]
pub struct TransactionHandle {
    id: String,
    isolation_level: IsolationLevel,
    native: Arc<dyn NativeTransaction>,
}

impl TransactionHandle {
    /// Returns the transaction identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the isolation level requested by the client.
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Returns the native transaction.
    pub fn native(&self) -> &Arc<dyn NativeTransaction> {
        &self.native
    }
}

#[derive(Default)]
struct Children {
    commands: Vec<CommandHandle>,
    transactions: Vec<TransactionHandle>,
}

/// Generates an opaque identifier.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A live connection session.
pub struct Session {
    id: String,
    provider: String,
    connection: RwLock<Box<dyn NativeConnection>>,
    children: Mutex<Children>,
    tag_transactions: AtomicBool,
    created_at: Instant,
}

impl Session {
    pub(crate) fn new(provider: &str, connection: Box<dyn NativeConnection>) -> Self {
        Self {
            id: new_id(),
            provider: provider.to_string(),
            connection: RwLock::new(connection),
            children: Mutex::new(Children::default()),
            tag_transactions: AtomicBool::new(true),
            created_at: Instant::now(),
        }
    }

    /// Returns the session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the provider invariant name.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Returns session uptime.
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Returns the number of open commands.
    pub fn command_count(&self) -> usize {
        self.children.lock().commands.len()
    }

    /// Returns the number of open transactions.
    pub fn transaction_count(&self) -> usize {
        self.children.lock().transactions.len()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Creates a native command and registers it.
    pub async fn create_command(&self) -> DriverResult<String> {
        let native = self.native_command().await?;
        Ok(self.add_command(native))
    }

    /// Creates a native command without registering it.
    pub async fn native_command(&self) -> DriverResult<Box<dyn NativeCommand>> {
        self.connection.read().await.create_command()
    }

    /// Registers a native command.
    pub fn add_command(&self, native: Box<dyn NativeCommand>) -> String {
        let id = new_id();
        self.children.lock().commands.push(CommandHandle {
            id: id.clone(),
            native: Arc::new(AsyncMutex::new(native)),
        });
        debug!(session = %self.id, command = %id, "command created");
        id
    }

    /// Looks up a command.
    pub fn get_command(&self, id: &str) -> Option<CommandRef> {
        self.children
            .lock()
            .commands
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.native.clone())
    }

    /// Unregisters and disposes a command. Returns false for an unknown id.
    pub async fn remove_command(&self, id: &str) -> bool {
        let handle = {
            let mut children = self.children.lock();
            match children.commands.iter().position(|c| c.id == id) {
                Some(i) => children.commands.remove(i),
                None => return false,
            }
        };

        handle.native.lock().await.dispose().await;
        debug!(session = %self.id, command = %id, "command destroyed");
        true
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Starts a native transaction without registering it.
    pub async fn begin_native(&self, level: IsolationLevel) -> DriverResult<Arc<dyn NativeTransaction>> {
        self.connection.read().await.begin_transaction(level).await
    }

    /// Registers a native transaction.
    pub fn add_transaction(&self, native: Arc<dyn NativeTransaction>, level: IsolationLevel) -> String {
        let id = new_id();
        self.children.lock().transactions.push(TransactionHandle {
            id: id.clone(),
            isolation_level: level,
            native,
        });
        debug!(session = %self.id, transaction = %id, %level, "transaction started");
        id
    }

    /// Looks up a transaction.
    pub fn get_transaction(&self, id: &str) -> Option<Arc<dyn NativeTransaction>> {
        self.transaction_handle(id).map(|t| t.native)
    }

    /// Looks up a transaction handle.
    pub fn transaction_handle(&self, id: &str) -> Option<TransactionHandle> {
        self.children
            .lock()
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    /// Commits, disposes and unregisters a transaction. The handle is gone
    /// afterwards even when the commit fails. Returns `None` for an unknown id.
    pub async fn commit_and_remove(&self, id: &str) -> Option<DriverResult<()>> {
        let handle = self.take_transaction(id)?;
        let result = handle.native.commit().await;
        handle.native.dispose().await;
        debug!(session = %self.id, transaction = %id, ok = result.is_ok(), "transaction committed");
        Some(result)
    }

    /// Rolls back, disposes and unregisters a transaction. The handle is gone
    /// afterwards even when the rollback fails. Returns `None` for an unknown id.
    pub async fn rollback_and_remove(&self, id: &str) -> Option<DriverResult<()>> {
        let handle = self.take_transaction(id)?;
        let result = handle.native.rollback().await;
        handle.native.dispose().await;
        debug!(session = %self.id, transaction = %id, ok = result.is_ok(), "transaction rolled back");
        Some(result)
    }

    fn take_transaction(&self, id: &str) -> Option<TransactionHandle> {
        let mut children = self.children.lock();
        let i = children.transactions.iter().position(|t| t.id == id)?;
        Some(children.transactions.remove(i))
    }

    // =========================================================================
    // Remote transaction tagging
    // =========================================================================

    /// Returns true while transactions of this session should be tagged.
    pub fn tags_transactions(&self) -> bool {
        self.tag_transactions.load(Ordering::Relaxed)
    }

    /// Stops tagging transactions of this session.
    pub fn disable_transaction_tags(&self) {
        self.tag_transactions.store(false, Ordering::Relaxed);
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Disposes every command, rolls back every open transaction and closes
    /// the native connection.
    pub(crate) async fn close(&self) {
        let children = std::mem::take(&mut *self.children.lock());

        for command in children.commands {
            match command.native.try_lock() {
                Ok(mut native) => native.dispose().await,
                Err(_) => {
                    // Still streaming rows: dispose once the stream lets go.
                    debug!(
                        session = %self.id,
                        command = %command.id,
                        "command busy at close, deferring dispose"
                    );
                    let native = command.native.clone();
                    tokio::spawn(async move {
                        native.lock().await.dispose().await;
                    });
                }
            }
        }

        for transaction in children.transactions {
            if transaction.native.is_active() {
                if let Err(e) = transaction.native.rollback().await {
                    warn!(
                        session = %self.id,
                        transaction = %transaction.id,
                        error = %e,
                        "rollback at close failed"
                    );
                }
            }
            transaction.native.dispose().await;
        }

        if let Err(e) = self.connection.write().await.close().await {
            warn!(session = %self.id, error = %e, "native close failed");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("commands", &self.command_count())
            .field("transactions", &self.transaction_count())
            .finish()
    }
}
