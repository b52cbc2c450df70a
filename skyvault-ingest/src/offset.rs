// Copyright 2025 Skyvault (https://github.com/skyvault)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Durable import offset.
//!
//! A single process-wide value meaning "all source rows with id below this
//! have been enqueued". It only ever advances; small advances are debounced
//! so the cache is not written on every batch.

use skyvault_core::Result;
use skyvault_storage::{KvCache, KEY_LAST_MIGRATED};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ImportOffset {
    value: AtomicI64,
    cache: Arc<dyn KvCache>,
    /// Minimum advance that triggers a persist: `10 x batch_size`.
    debounce: i64,
}

impl ImportOffset {
    /// Read the checkpoint back from the cache, or start at zero.
    pub async fn load(cache: Arc<dyn KvCache>, batch_size: usize) -> Result<Self> {
        let value = cache
            .get(KEY_LAST_MIGRATED)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        info!(offset = value, "loaded import offset");
        Ok(Self {
            value: AtomicI64::new(value),
            cache,
            debounce: 10 * batch_size as i64,
        })
    }

    pub fn current(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Advance the offset. Regressions are ignored; advances below the
    /// debounce threshold are skipped. Returns whether a persist happened.
    pub async fn set(&self, n: i64) -> Result<bool> {
        let current = self.value.load(Ordering::Acquire);
        if n <= current {
            return Ok(false);
        }
        if (n - current) <= self.debounce && current != 0 {
            debug!(offset = n, current, "offset advance below debounce threshold");
            return Ok(false);
        }

        self.value.store(n, Ordering::Release);
        self.cache.set(KEY_LAST_MIGRATED, &n.to_string()).await?;
        debug!(offset = n, "persisted import offset");
        Ok(true)
    }

    /// Advance without debouncing, e.g. the final flush after a drain.
    /// Still never regresses.
    pub async fn force(&self, n: i64) -> Result<bool> {
        let current = self.value.load(Ordering::Acquire);
        if n <= current {
            return Ok(false);
        }
        self.value.store(n, Ordering::Release);
        self.cache.set(KEY_LAST_MIGRATED, &n.to_string()).await?;
        debug!(offset = n, "persisted import offset (forced)");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyvault_storage::MemoryKvCache;

    #[tokio::test]
    async fn starts_at_zero_and_loads_back() {
        let cache = Arc::new(MemoryKvCache::new());
        let offset = ImportOffset::load(cache.clone(), 2_500).await.unwrap();
        assert_eq!(offset.current(), 0);

        assert!(offset.set(100_000).await.unwrap());
        assert_eq!(offset.current(), 100_000);

        let reloaded = ImportOffset::load(cache, 2_500).await.unwrap();
        assert_eq!(reloaded.current(), 100_000);
    }

    #[tokio::test]
    async fn never_regresses() {
        let cache = Arc::new(MemoryKvCache::new());
        let offset = ImportOffset::load(cache, 2_500).await.unwrap();

        offset.set(100_000).await.unwrap();
        assert!(!offset.set(50_000).await.unwrap());
        assert_eq!(offset.current(), 100_000);
    }

    #[tokio::test]
    async fn small_advances_are_debounced() {
        let cache = Arc::new(MemoryKvCache::new());
        let offset = ImportOffset::load(cache.clone(), 2_500).await.unwrap();

        offset.set(100_000).await.unwrap();
        // 10 * 2500 = 25_000 debounce window
        assert!(!offset.set(100_000 + 24_999).await.unwrap());
        assert_eq!(offset.current(), 100_000);
        assert_eq!(
            cache.get(KEY_LAST_MIGRATED).await.unwrap().as_deref(),
            Some("100000")
        );

        assert!(offset.set(100_000 + 25_001).await.unwrap());
        assert_eq!(offset.current(), 125_001);
    }
}
