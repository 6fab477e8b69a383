//! Session registry.
//!
//! Maps opaque connection identifiers to live [`Session`]s. The table is a
//! concurrent map, so sessions are created, looked up and destroyed
//! independently of each other; each session guards its own command and
//! transaction lists.
//!
//! The registry is created when the server starts and shared by every
//! request; [`SessionRegistry::shutdown`] closes whatever is left when the
//! server stops.

mod session;

pub use session::{CommandRef, Session, TransactionHandle};

use std::sync::Arc;

use dashmap::DashMap;
use dbrelay_common::IsolationLevel;
use tracing::info;

use crate::driver::{DriverResult, NativeCommand, NativeConnection, NativeTransaction};

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live sessions.
    pub sessions: usize,
    /// Open commands across all sessions.
    pub commands: usize,
    /// Open transactions across all sessions.
    pub transactions: usize,
}

/// Concurrent table of live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an opened native connection and returns its session.
    pub fn create_session(
        &self,
        provider: &str,
        connection: Box<dyn NativeConnection>,
    ) -> Arc<Session> {
        let session = Arc::new(Session::new(provider, connection));
        self.sessions
            .insert(session.id().to_string(), session.clone());
        session
    }

    /// Looks up a session.
    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Unregisters a session and closes it. Returns false for an unknown id.
    pub async fn destroy_session(&self, id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        session.close().await;
        true
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns counts of sessions, commands and transactions.
    pub fn stats(&self) -> RegistryStats {
        self.sessions
            .iter()
            .fold(RegistryStats::default(), |mut stats, entry| {
                stats.sessions += 1;
                stats.commands += entry.command_count();
                stats.transactions += entry.transaction_count();
                stats
            })
    }

    /// Closes every session. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for id in ids {
            if self.destroy_session(&id).await {
                closed += 1;
            }
        }
        if closed > 0 {
            info!(sessions = closed, "closed remaining sessions");
        }
        closed
    }

    // =========================================================================
    // Session-scoped shortcuts
    // =========================================================================

    /// Registers a command on a session.
    pub fn add_command(&self, session_id: &str, native: Box<dyn NativeCommand>) -> Option<String> {
        self.get_session(session_id).map(|s| s.add_command(native))
    }

    /// Looks up a command on a session.
    pub fn get_command(&self, session_id: &str, command_id: &str) -> Option<CommandRef> {
        self.get_session(session_id)?.get_command(command_id)
    }

    /// Unregisters and disposes a command.
    pub async fn remove_command(&self, session_id: &str, command_id: &str) -> bool {
        match self.get_session(session_id) {
            Some(session) => session.remove_command(command_id).await,
            None => false,
        }
    }

    /// Registers a transaction on a session.
    pub fn add_transaction(
        &self,
        session_id: &str,
        native: Arc<dyn NativeTransaction>,
        level: IsolationLevel,
    ) -> Option<String> {
        self.get_session(session_id)
            .map(|s| s.add_transaction(native, level))
    }

    /// Looks up a transaction on a session.
    pub fn get_transaction(
        &self,
        session_id: &str,
        transaction_id: &str,
    ) -> Option<Arc<dyn NativeTransaction>> {
        self.get_session(session_id)?.get_transaction(transaction_id)
    }

    /// Commits and unregisters a transaction.
    pub async fn commit_and_remove(
        &self,
        session_id: &str,
        transaction_id: &str,
    ) -> Option<DriverResult<()>> {
        self.get_session(session_id)?
            .commit_and_remove(transaction_id)
            .await
    }

    /// Rolls back and unregisters a transaction.
    pub async fn rollback_and_remove(
        &self,
        session_id: &str,
        transaction_id: &str,
    ) -> Option<DriverResult<()>> {
        self.get_session(session_id)?
            .rollback_and_remove(transaction_id)
            .await
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
