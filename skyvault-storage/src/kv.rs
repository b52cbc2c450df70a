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

//! Key-value cache seam.
//!
//! Production runs this against Redis; the archive only needs string get
//! and set for the import checkpoint and migration paging cursors.

use async_trait::async_trait;
use dashmap::DashMap;
use skyvault_core::Result;

/// Cache key of the persisted import offset.
pub const KEY_LAST_MIGRATED: &str = "lastMigratedAuctionIndex";

/// Cache key of a table's base64 paging cursor.
pub fn paging_state_key(table: &str) -> String {
    format!("cassandra_migration_{table}_paging_state")
}

/// Cache key of a table's migrated row count.
pub fn offset_key(table: &str) -> String {
    format!("cassandra_migration_{table}_offset")
}

#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process reference implementation.
#[derive(Debug, Default)]
pub struct MemoryKvCache {
    values: DashMap<String, String>,
}

impl MemoryKvCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for MemoryKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
