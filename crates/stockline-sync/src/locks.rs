//! # Stock Locks
//!
//! In-process exclusive locks keyed by product, held around every
//! read-check-write on stock.
//!
//! ## Acquisition
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  acquire(["p-7", "p-2", "p-7"], wait)                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  sort + dedup  →  ["p-2", "p-7"]                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  lock p-2, then p-7 ─── all within one `wait` budget                   │
//! │       │                        │                                        │
//! │       ▼                        ▼ budget exhausted                       │
//! │  StockGuard               drop what was taken, LockTimeout             │
//! │  (released on drop)                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every caller takes its keys in the same sorted order, so two multi-item
//! workflows over overlapping products cannot deadlock.
//!
//! The locks are process-local; one gateway process owns the database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Table size above which idle entries are dropped on the next acquire.
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Default)]
pub struct StockLocks {
    table: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Holds a set of stock locks until dropped.
#[derive(Debug)]
pub struct StockGuard {
    keys: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl StockGuard {
    /// Keys held, in acquisition order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl StockLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every key or none of them within `wait`.
    ///
    /// ## Errors
    /// * `SyncError::LockTimeout` - Not all keys were free in time
    pub async fn acquire<I, S>(&self, keys: I, wait: Duration) -> SyncResult<StockGuard>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let mutexes = self.mutexes_for(&keys);

        let take_all = async move {
            let mut guards = Vec::with_capacity(mutexes.len());
            for mutex in mutexes {
                guards.push(mutex.lock_owned().await);
            }
            guards
        };

        match tokio::time::timeout(wait, take_all).await {
            Ok(guards) => {
                debug!(keys = ?keys, "Stock locks acquired");
                Ok(StockGuard { keys, _guards: guards })
            }
            Err(_) => {
                warn!(keys = ?keys, wait_ms = wait.as_millis() as u64, "Stock lock wait exceeded");
                Err(SyncError::LockTimeout(format!(
                    "{} product lock(s) not free within {} ms",
                    keys.len(),
                    wait.as_millis()
                )))
            }
        }
    }

    fn mutexes_for(&self, keys: &[String]) -> Vec<Arc<AsyncMutex<()>>> {
        // The table mutex is never held across an await, so poisoning can
        // only come from a panic mid-insert; the map is still usable.
        let mut table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if table.len() > PRUNE_THRESHOLD {
            table.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        }

        keys.iter()
            .map(|key| Arc::clone(table.entry(key.clone()).or_default()))
            .collect()
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keys_sorted_and_deduplicated() {
        let locks = StockLocks::new();
        let guard = locks
            .acquire(["p-7", "p-2", "p-7"], Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(guard.keys(), ["p-2".to_string(), "p-7".to_string()]);
        assert_eq!(locks.tracked(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_key_times_out() {
        let locks = StockLocks::new();
        let _held = locks.acquire(["p-1"], Duration::from_millis(100)).await.unwrap();

        let err = locks
            .acquire(["p-0", "p-1"], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // p-0 was released when the attempt gave up
        locks.acquire(["p-0"], Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_released_on_drop() {
        let locks = StockLocks::new();
        {
            let _guard = locks.acquire(["p-1"], Duration::from_millis(100)).await.unwrap();
        }
        locks.acquire(["p-1"], Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_opposite_orders_do_not_deadlock() {
        let locks = StockLocks::new();
        let mut tasks = Vec::new();

        for i in 0..20 {
            let locks = locks.clone();
            tasks.push(tokio::spawn(async move {
                let keys = if i % 2 == 0 { ["a", "b"] } else { ["b", "a"] };
                let _guard = locks.acquire(keys, Duration::from_secs(5)).await.unwrap();
                tokio::task::yield_now().await;
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
    }
}
