//! Transaction proxy.
//!
//! A transaction is `Active` until exactly one of commit or rollback runs.
//! The terminal state is taken before the request goes out, so a failed
//! commit cannot be retried and a second commit or rollback is an error.

use std::fmt;
use std::sync::Arc;

use dbrelay_common::IsolationLevel;
use dbrelay_proto::{CommitTransactionRequest, RollbackTransactionRequest};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::connection::SessionLink;
use super::error::{ClientError, ClientResult};

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Statements may run in the transaction.
    Active,
    /// Commit was requested.
    Committed,
    /// Rollback was requested.
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "active"),
            TransactionState::Committed => write!(f, "committed"),
            TransactionState::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// State shared with the commands enlisted in the transaction.
#[derive(Debug)]
pub(crate) struct TransactionShared {
    pub(crate) id: String,
    state: Mutex<TransactionState>,
}

impl TransactionShared {
    pub(crate) fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    // Moves Active to `next`; any other state is final.
    fn finish(&self, next: TransactionState) -> ClientResult<()> {
        let mut state = self.state.lock();
        if *state != TransactionState::Active {
            return Err(ClientError::TransactionFinished);
        }
        *state = next;
        Ok(())
    }
}

/// A transaction on the gateway. Dropping an active transaction rolls it
/// back.
pub struct Transaction {
    link: Arc<SessionLink>,
    shared: Arc<TransactionShared>,
    isolation_level: IsolationLevel,
}

impl Transaction {
    pub(crate) fn new(
        link: Arc<SessionLink>,
        id: String,
        isolation_level: IsolationLevel,
    ) -> Self {
        Self {
            link,
            shared: Arc::new(TransactionShared {
                id,
                state: Mutex::new(TransactionState::Active),
            }),
            isolation_level,
        }
    }

    /// Returns the gateway transaction id.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Returns the requested isolation level.
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.shared.state()
    }

    /// Returns true until commit or rollback.
    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    pub(crate) fn shared(&self) -> &Arc<TransactionShared> {
        &self.shared
    }

    /// Commits the transaction.
    pub async fn commit(&self) -> ClientResult<()> {
        self.shared.finish(TransactionState::Committed)?;
        let request = self.link.request(CommitTransactionRequest {
            connection_id: self.link.connection_id.clone(),
            transaction_id: self.shared.id.clone(),
        });
        let response = self.link.rpc().commit_transaction(request).await?.into_inner();
        self.link.check(response.data_exception)?;
        debug!(transaction = %self.shared.id, "transaction committed");
        Ok(())
    }

    /// Rolls the transaction back.
    pub async fn rollback(&self) -> ClientResult<()> {
        self.shared.finish(TransactionState::RolledBack)?;
        rollback(&self.link, &self.shared.id).await?;
        debug!(transaction = %self.shared.id, "transaction rolled back");
        Ok(())
    }
}

async fn rollback(link: &SessionLink, transaction_id: &str) -> ClientResult<()> {
    let request = link.request(RollbackTransactionRequest {
        connection_id: link.connection_id.clone(),
        transaction_id: transaction_id.to_string(),
    });
    let response = link.rpc().rollback_transaction(request).await?.into_inner();
    link.check(response.data_exception)
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.shared.finish(TransactionState::RolledBack).is_err() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(transaction = %self.shared.id, "transaction dropped outside a runtime, left to the gateway");
            return;
        };

        let link = self.link.clone();
        let id = self.shared.id.clone();
        runtime.spawn(async move {
            if let Err(e) = rollback(&link, &id).await {
                warn!(transaction = %id, error = %e, "rollback on drop failed");
            }
        });
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.shared.id)
            .field("isolation_level", &self.isolation_level)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> TransactionShared {
        TransactionShared {
            id: "t1".to_string(),
            state: Mutex::new(TransactionState::Active),
        }
    }

    #[test]
    fn test_terminal_states() {
        let txn = shared();
        assert!(txn.is_active());

        txn.finish(TransactionState::Committed).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);

        assert!(matches!(
            txn.finish(TransactionState::RolledBack),
            Err(ClientError::TransactionFinished)
        ));
        assert!(matches!(
            txn.finish(TransactionState::Committed),
            Err(ClientError::TransactionFinished)
        ));
        assert_eq!(txn.state(), TransactionState::Committed);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TransactionState::RolledBack.to_string(), "rolled_back");
    }
}
