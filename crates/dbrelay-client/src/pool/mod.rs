//! Channel pool shared by logical connections.
//!
//! Every logical [`Connection`](crate::Connection) to the same gateway
//! address multiplexes one physical channel. Entries are reference counted;
//! the channel is dropped from the pool when the last holder releases it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use super::error::{ClientError, ClientResult};

/// A pooled channel. Handles compare equal when they share one physical
/// channel.
#[derive(Clone)]
pub struct ChannelHandle {
    id: u64,
    address: Arc<str>,
    channel: Channel,
}

impl ChannelHandle {
    /// Returns the pool-assigned channel id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the gateway address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the transport channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

impl PartialEq for ChannelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChannelHandle {}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish()
    }
}

struct PoolEntry {
    handle: ChannelHandle,
    refs: usize,
}

/// Reference-counted channels by gateway address.
pub struct ChannelPool {
    connect_timeout: Duration,
    entries: Mutex<HashMap<String, PoolEntry>>,
    next_id: AtomicU64,
}

impl ChannelPool {
    /// Creates an empty pool.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the channel for `address`, creating it on first use.
    ///
    /// Channels connect lazily, so this must run inside a Tokio runtime and
    /// never waits on the network.
    pub fn acquire(&self, address: &str) -> ClientResult<ChannelHandle> {
        let address = normalize_address(address)?;
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&address) {
            entry.refs += 1;
            debug!(%address, refs = entry.refs, "reusing pooled channel");
            return Ok(entry.handle.clone());
        }

        let channel = Endpoint::from_shared(address.clone())
            .map_err(|e| ClientError::InvalidConfig(format!("invalid gateway address: {}", e)))?
            .connect_timeout(self.connect_timeout)
            .connect_lazy();
        let handle = ChannelHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            address: Arc::from(address.as_str()),
            channel,
        };
        debug!(%address, id = handle.id, "opened pooled channel");

        entries.insert(
            address,
            PoolEntry {
                handle: handle.clone(),
                refs: 1,
            },
        );
        Ok(handle)
    }

    /// Releases one reference to `handle`. Returns true if this was the last
    /// reference and the channel left the pool.
    pub fn release(&self, handle: &ChannelHandle) -> bool {
        let mut entries = self.entries.lock();
        let Some(address) = entries
            .iter()
            .find(|(_, entry)| entry.handle.id == handle.id)
            .map(|(address, _)| address.clone())
        else {
            return false;
        };

        let remaining = match entries.get_mut(&address) {
            Some(entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs
            }
            None => return false,
        };
        if remaining == 0 {
            entries.remove(&address);
            debug!(%address, "closed pooled channel");
            true
        } else {
            false
        }
    }

    /// Returns the number of holders of the channel for `address`.
    pub fn ref_count(&self, address: &str) -> usize {
        let Ok(address) = normalize_address(address) else {
            return 0;
        };
        self.entries
            .lock()
            .get(&address)
            .map(|entry| entry.refs)
            .unwrap_or(0)
    }

    /// Returns the number of pooled channels.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no channel is pooled.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for ChannelPool {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPool")
            .field("channels", &self.len())
            .finish()
    }
}

// Addresses without a scheme are plain-text HTTP/2.
fn normalize_address(address: &str) -> ClientResult<String> {
    let address = address.trim().trim_end_matches('/');
    if address.is_empty() {
        return Err(ClientError::InvalidConfig(
            "gateway address is empty".to_string(),
        ));
    }
    if address.starts_with("http://") || address.starts_with("https://") {
        Ok(address.to_string())
    } else {
        Ok(format!("http://{}", address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_shares_channel() {
        let pool = ChannelPool::default();
        let a = pool.acquire("127.0.0.1:7400").unwrap();
        let b = pool.acquire("http://127.0.0.1:7400").unwrap();

        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.ref_count("127.0.0.1:7400"), 2);
    }

    #[tokio::test]
    async fn test_release_removes_last_reference() {
        let pool = ChannelPool::default();
        let a = pool.acquire("127.0.0.1:7400").unwrap();
        let b = pool.acquire("127.0.0.1:7400").unwrap();

        assert!(!pool.release(&a));
        assert_eq!(pool.ref_count("127.0.0.1:7400"), 1);
        assert_eq!(pool.len(), 1);

        assert!(pool.release(&b));
        assert!(pool.is_empty());
        assert!(!pool.release(&b));
    }

    #[tokio::test]
    async fn test_distinct_addresses() {
        let pool = ChannelPool::default();
        let a = pool.acquire("127.0.0.1:7400").unwrap();
        let b = pool.acquire("127.0.0.1:7401").unwrap();

        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);

        // A new channel after full release gets a new identity.
        assert!(pool.release(&a));
        let c = pool.acquire("127.0.0.1:7400").unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_release() {
        let pool = Arc::new(ChannelPool::default());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let handle = pool.acquire("127.0.0.1:7400").unwrap();
                    pool.release(&handle);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(pool.is_empty());
    }

    #[test]
    fn test_empty_address() {
        let pool = ChannelPool::default();
        assert!(matches!(
            pool.acquire("  "),
            Err(ClientError::InvalidConfig(_))
        ));
    }
}
