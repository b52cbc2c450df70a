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

//! Skyvault Storage Layer
//!
//! The two tiers of the archive and their supporting structures:
//!
//! - **HotStore**: the wide-column live table, partitioned by
//!   `(tag, time_key)` with secondary indexes for point lookups.
//! - **ColdStore**: immutable per-tag monthly blobs in an object store,
//!   covered by a hierarchical bloom index (master plus per-tag).
//! - **BloomFilter**: fixed-capacity filter with a configurable target
//!   false-positive rate.
//! - **SummaryStore**: memoized daily aggregates for the summary cache.
//! - **KvCache**: the small key-value seam used for the import offset.
//!
//! The drivers themselves (wide-column cluster, object store, Redis) are
//! external; each tier is a trait with an in-process reference
//! implementation that honors the same contracts.

pub mod backend;
pub mod bloom;
pub mod cold;
pub mod hot;
pub mod kv;
pub mod summary;

pub use backend::{LocalFsBackend, MemoryBackend, ObjectBackend, ObjectMetadata};
pub use bloom::BloomFilter;
pub use cold::{sanitize_tag, ColdStore, TagIndex, MASTER_BLOOM_KEY};
pub use hot::{HotStore, InsertOutcome, MemoryHotStore, RETROFIT_WINDOW_DAYS};
pub use kv::{offset_key, paging_state_key, KvCache, MemoryKvCache, KEY_LAST_MIGRATED};
pub use summary::{price_stats, MemorySummaryStore, PriceStats, SummaryRecord, SummaryStore};
