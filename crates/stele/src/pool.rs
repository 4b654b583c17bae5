// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::PoolError;
use crate::store::DataStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryPoolConfig {
    pub max_connections: usize,

    /// `None` blocks until a lease frees up.
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for QueryPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolStatistics {
    pub max_connections: usize,
    pub active_leases: usize,
    pub peak_active_leases: usize,
    pub checkout_requests: u64,
    pub checkout_timeouts: u64,
    pub leases_released: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    active: AtomicUsize,
    peak_active: AtomicUsize,
    checkout_requests: AtomicU64,
    checkout_timeouts: AtomicU64,
    released: AtomicU64,
}

/// Bounded access to a [`DataStore`].
///
/// Cloning shares the same permits. Every component that queries the store
/// receives a handle at construction and holds a [`QueryLease`] only for the
/// duration of one store call.
#[derive(Clone)]
pub struct QueryPool {
    store: Arc<dyn DataStore>,
    semaphore: Arc<Semaphore>,
    counters: Arc<PoolCounters>,
    config: QueryPoolConfig,
}

/// A checked-out slot. Dereferences to the store; the slot is returned when
/// the lease is dropped, on every exit path.
pub struct QueryLease {
    store: Arc<dyn DataStore>,
    counters: Arc<PoolCounters>,
    _permit: OwnedSemaphorePermit,
}

impl QueryPool {
    pub fn new(store: Arc<dyn DataStore>, config: QueryPoolConfig) -> Result<Self, PoolError> {
        if config.max_connections == 0 {
            return Err(PoolError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            store,
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            counters: Arc::new(PoolCounters::default()),
            config,
        })
    }

    pub async fn acquire(&self) -> Result<QueryLease, PoolError> {
        self.counters.checkout_requests.fetch_add(1, Ordering::Relaxed);
        let acquire = Arc::clone(&self.semaphore).acquire_owned();

        let permit = match self.config.acquire_timeout_ms {
            Some(ms) => timeout(Duration::from_millis(ms), acquire)
                .await
                .map_err(|_| {
                    self.counters.checkout_timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(timeout_ms = ms, "Timed out waiting for a query lease");
                    PoolError::Timeout(ms)
                })?,
            None => acquire.await,
        }
        .map_err(|_| PoolError::Closed)?;

        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_active.fetch_max(active, Ordering::SeqCst);
        debug!(active, max = self.config.max_connections, "Query lease acquired");

        Ok(QueryLease {
            store: Arc::clone(&self.store),
            counters: Arc::clone(&self.counters),
            _permit: permit,
        })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Stops handing out leases. Outstanding leases stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn statistics(&self) -> PoolStatistics {
        PoolStatistics {
            max_connections: self.config.max_connections,
            active_leases: self.counters.active.load(Ordering::SeqCst),
            peak_active_leases: self.counters.peak_active.load(Ordering::SeqCst),
            checkout_requests: self.counters.checkout_requests.load(Ordering::Relaxed),
            checkout_timeouts: self.counters.checkout_timeouts.load(Ordering::Relaxed),
            leases_released: self.counters.released.load(Ordering::Relaxed),
        }
    }
}

impl Deref for QueryLease {
    type Target = dyn DataStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

impl Drop for QueryLease {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        self.counters.released.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, StoreResult};
    use async_trait::async_trait;
    use estel::{ColumnProfile, Row};

    struct NullStore;

    #[async_trait]
    impl DataStore for NullStore {
        async fn column_profiles(&self, _dataset_id: &str) -> StoreResult<Vec<ColumnProfile>> {
            Ok(Vec::new())
        }
        async fn sample_rows(&self, _table_name: &str, _limit: usize) -> StoreResult<Vec<Row>> {
            Ok(Vec::new())
        }
        async fn execute_query(&self, _table_name: &str, _query: &str) -> StoreResult<Vec<Row>> {
            Err(StoreError::InvalidQuery("null store".into()))
        }
    }

    fn pool(max_connections: usize, acquire_timeout_ms: Option<u64>) -> QueryPool {
        QueryPool::new(
            Arc::new(NullStore),
            QueryPoolConfig {
                max_connections,
                acquire_timeout_ms,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_zero_connections_rejected() {
        let result = QueryPool::new(
            Arc::new(NullStore),
            QueryPoolConfig {
                max_connections: 0,
                acquire_timeout_ms: None,
            },
        );
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[tokio::test]
    async fn test_lease_released_on_error_path() {
        let pool = pool(1, None);
        let outcome = async {
            let lease = pool.acquire().await?;
            lease.execute_query("t", "SELECT 1").await?;
            Ok::<_, StoreError>(())
        }
        .await;
        assert!(outcome.is_err());
        assert_eq!(pool.available(), 1);

        let stats = pool.statistics();
        assert_eq!(stats.active_leases, 0);
        assert_eq!(stats.leases_released, 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out_when_configured() {
        let pool = pool(1, Some(20));
        let _held = pool.acquire().await.unwrap();
        assert!(matches!(pool.acquire().await, Err(PoolError::Timeout(20))));
        assert_eq!(pool.statistics().checkout_timeouts, 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_blocks_until_release() {
        let pool = pool(1, None);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(pool.statistics().peak_active_leases, 1);
    }

    #[tokio::test]
    async fn test_closed_pool() {
        let pool = pool(2, None);
        pool.close();
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}
