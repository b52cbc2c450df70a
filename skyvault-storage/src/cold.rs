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

//! Cold archive: immutable monthly blobs per tag, covered by a hierarchical
//! bloom index.
//!
//! # Object layout
//!
//! ```text
//! auctions/{sanitized_tag}/{yyyy}/{mm}.blob   bincode -> lz4 -> gzip
//! index/{sanitized_tag}/bloom.bin             per-tag TagIndex
//! index/master_bloom_0.bin                    master BloomFilter
//! ```
//!
//! Blob and index writes are not transactional across objects. After
//! `store_month` returns, this process sees both; another process may
//! briefly read the blob before the refreshed filter. That only widens the
//! uuid-lookup path, which falls back to ranged scans anyway.

use crate::backend::ObjectBackend;
use crate::bloom::BloomFilter;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use skyvault_core::{Auction, AuctionCodec, ColdStoreConfig, Result, SkyvaultError, StoredAuction};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Key of the master bloom covering every archived uuid.
pub const MASTER_BLOOM_KEY: &str = "index/master_bloom_0.bin";

/// Object-store-safe tag: path separators replaced, empty mapped to unknown.
pub fn sanitize_tag(tag: &str) -> String {
    if tag.is_empty() {
        return "unknown".to_string();
    }
    tag.replace(['/', '\\'], "_")
}

/// Per-tag index: bloom over the tag's archived uuids plus the set of
/// months that have a blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagIndex {
    pub bloom: BloomFilter,
    pub months: BTreeSet<(i32, u32)>,
}

impl TagIndex {
    fn new(config: &ColdStoreConfig) -> Self {
        Self {
            bloom: BloomFilter::new(config.tag_bloom_capacity, config.tag_bloom_fpr),
            months: BTreeSet::new(),
        }
    }
}

pub struct ColdStore {
    backend: Arc<dyn ObjectBackend>,
    config: ColdStoreConfig,
    tag_indexes: DashMap<String, TagIndex>,
    master: tokio::sync::RwLock<Option<BloomFilter>>,
    /// Serializes filter updates for one tag within this process.
    tag_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl ColdStore {
    pub fn new(backend: Arc<dyn ObjectBackend>, config: ColdStoreConfig) -> Self {
        Self {
            backend,
            config,
            tag_indexes: DashMap::new(),
            master: tokio::sync::RwLock::new(None),
            tag_locks: DashMap::new(),
        }
    }

    pub fn data_key(tag: &str, year: i32, month: u32) -> String {
        format!("auctions/{}/{}/{:02}.blob", sanitize_tag(tag), year, month)
    }

    pub fn index_key(tag: &str) -> String {
        format!("index/{}/bloom.bin", sanitize_tag(tag))
    }

    fn encode_blob(records: &[StoredAuction]) -> Result<Vec<u8>> {
        let packed = bincode::serialize(records)?;
        let framed = lz4_flex::compress_prepend_size(&packed);
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&framed)?;
        Ok(encoder.finish()?)
    }

    fn decode_blob(bytes: &[u8]) -> Result<Vec<StoredAuction>> {
        let mut decoder = flate2::read::GzDecoder::new(bytes);
        let mut framed = Vec::new();
        decoder.read_to_end(&mut framed)?;
        let packed = lz4_flex::decompress_size_prepended(&framed)
            .map_err(|e| SkyvaultError::Codec(format!("lz4 frame: {e}")))?;
        Ok(bincode::deserialize(&packed)?)
    }

    fn tag_lock(&self, tag: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.tag_locks
            .entry(sanitize_tag(tag))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn load_tag_index(&self, tag: &str) -> Result<TagIndex> {
        let sanitized = sanitize_tag(tag);
        if let Some(cached) = self.tag_indexes.get(&sanitized) {
            return Ok(cached.clone());
        }
        match self.backend.get(&Self::index_key(tag)).await? {
            Some(bytes) => {
                let index: TagIndex = bincode::deserialize(&bytes)?;
                self.tag_indexes.insert(sanitized, index.clone());
                Ok(index)
            }
            None => Ok(TagIndex::new(&self.config)),
        }
    }

    async fn persist_tag_index(&self, tag: &str, index: TagIndex) -> Result<()> {
        let bytes = bincode::serialize(&index)?;
        self.backend
            .put(&Self::index_key(tag), bytes, BTreeMap::new())
            .await?;
        self.tag_indexes.insert(sanitize_tag(tag), index);
        Ok(())
    }

    async fn load_master(&self) -> Result<BloomFilter> {
        if let Some(cached) = self.master.read().await.as_ref() {
            return Ok(cached.clone());
        }
        match self.backend.get(MASTER_BLOOM_KEY).await? {
            Some(bytes) => {
                let filter = BloomFilter::from_bytes(&bytes)?;
                *self.master.write().await = Some(filter.clone());
                Ok(filter)
            }
            None => Ok(BloomFilter::new(
                self.config.master_bloom_capacity,
                self.config.master_bloom_fpr,
            )),
        }
    }

    async fn persist_master(&self, filter: BloomFilter) -> Result<()> {
        self.backend
            .put(MASTER_BLOOM_KEY, filter.to_bytes()?, BTreeMap::new())
            .await?;
        *self.master.write().await = Some(filter);
        Ok(())
    }

    /// Seal one month of a tag into an immutable blob and fold its uuids
    /// into the per-tag and master filters.
    pub async fn store_month(
        &self,
        tag: &str,
        year: i32,
        month: u32,
        records: &[Auction],
    ) -> Result<()> {
        let lock = self.tag_lock(tag);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let stored: Vec<StoredAuction> = records
            .iter()
            .map(|a| AuctionCodec::encode(a, now))
            .collect();
        let blob = Self::encode_blob(&stored)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("count".to_string(), stored.len().to_string());
        metadata.insert("tag".to_string(), sanitize_tag(tag));
        metadata.insert("year".to_string(), year.to_string());
        metadata.insert("month".to_string(), month.to_string());

        self.backend
            .put(&Self::data_key(tag, year, month), blob, metadata)
            .await?;

        let mut index = self.load_tag_index(tag).await?;
        for record in &stored {
            index.bloom.add(&record.uuid);
        }
        index.months.insert((year, month));
        self.persist_tag_index(tag, index).await?;

        let mut master = self.load_master().await?;
        for record in &stored {
            master.add(&record.uuid);
        }
        self.persist_master(master).await?;

        info!(tag, year, month, rows = stored.len(), "sealed month into cold storage");
        Ok(())
    }

    /// Every auction archived for `(tag, year, month)`; empty when no blob.
    pub async fn get_month(&self, tag: &str, year: i32, month: u32) -> Result<Vec<Auction>> {
        match self.backend.get(&Self::data_key(tag, year, month)).await? {
            Some(bytes) => Ok(Self::decode_blob(&bytes)?
                .into_iter()
                .map(AuctionCodec::decode)
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    pub async fn month_exists(&self, tag: &str, year: i32, month: u32) -> Result<bool> {
        Ok(self
            .backend
            .head(&Self::data_key(tag, year, month))
            .await?
            .is_some())
    }

    /// Master-filter answer. A positive cannot be narrowed to a tag without
    /// the per-tag scan, hence the `None`.
    pub async fn may_contain(&self, uuid: Uuid) -> Result<(bool, Option<String>)> {
        let master = self.load_master().await?;
        if master.is_empty() || !master.may_contain(&uuid) {
            return Ok((false, None));
        }
        Ok((true, None))
    }

    /// Point lookup across the whole archive: master filter, then per-tag
    /// filters, then candidate blob scans.
    pub async fn lookup(&self, uuid: Uuid) -> Result<Option<Auction>> {
        let (maybe, _) = self.may_contain(uuid).await?;
        if !maybe {
            return Ok(None);
        }

        for tag in self.archived_tags().await? {
            let index = self.load_tag_index(&tag).await?;
            if !index.bloom.may_contain(&uuid) {
                continue;
            }
            for &(year, month) in &index.months {
                let versions: Vec<Auction> = self
                    .get_month(&tag, year, month)
                    .await?
                    .into_iter()
                    .filter(|a| a.uuid == uuid)
                    .collect();
                if !versions.is_empty() {
                    debug!(%uuid, tag = %tag, year, month, "cold lookup hit");
                    return Ok(skyvault_core::combine_versions(versions));
                }
            }
        }
        Ok(None)
    }

    /// Months archived for a tag, ascending.
    pub async fn list_months(&self, tag: &str) -> Result<Vec<(i32, u32)>> {
        Ok(self.load_tag_index(tag).await?.months.into_iter().collect())
    }

    /// Tags that have a per-tag index object.
    async fn archived_tags(&self) -> Result<Vec<String>> {
        let keys = self.backend.list("index/").await?;
        let mut tags: Vec<String> = keys
            .iter()
            .filter_map(|key| {
                let parts: Vec<&str> = key.split('/').collect();
                match parts.as_slice() {
                    ["index", tag, "bloom.bin"] => Some(tag.to_string()),
                    _ => None,
                }
            })
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use chrono::{Duration, TimeZone};

    fn small_config() -> ColdStoreConfig {
        ColdStoreConfig {
            master_bloom_capacity: 10_000,
            tag_bloom_capacity: 1_000,
            ..Default::default()
        }
    }

    fn cold() -> ColdStore {
        ColdStore::new(Arc::new(MemoryBackend::new()), small_config())
    }

    fn auction(uuid: u128, tag: &str, year: i32, month: u32) -> Auction {
        let end = Utc.with_ymd_and_hms(year, month, 15, 12, 0, 0).unwrap();
        Auction {
            uuid: Uuid::from_u128(uuid),
            tag: tag.to_string(),
            seller: Uuid::from_u128(uuid ^ 0xff),
            start: end - Duration::days(1),
            end,
            highest_bid_amount: 1000,
            bids: vec![skyvault_core::Bid {
                bidder: Uuid::from_u128(uuid ^ 0xabc),
                profile_id: Uuid::from_u128(uuid ^ 0xabc),
                amount: 1000,
                timestamp: end,
            }],
            count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_tag("A/B\\C"), "A_B_C");
        assert_eq!(sanitize_tag(""), "unknown");
        assert_eq!(sanitize_tag("ENCHANTED_BOOK"), "ENCHANTED_BOOK");
    }

    #[test]
    fn key_layout() {
        assert_eq!(ColdStore::data_key("X", 2023, 1), "auctions/X/2023/01.blob");
        assert_eq!(ColdStore::index_key("X"), "index/X/bloom.bin");
    }

    #[test]
    fn blob_codec_round_trips() {
        let now = Utc::now();
        let stored: Vec<StoredAuction> = (0..50u128)
            .map(|i| AuctionCodec::encode(&auction(i, "X", 2023, 1), now))
            .collect();

        let blob = ColdStore::encode_blob(&stored).unwrap();
        let decoded = ColdStore::decode_blob(&blob).unwrap();
        assert_eq!(decoded, stored);
    }

    #[tokio::test]
    async fn store_and_get_month() {
        let cold = cold();
        let records: Vec<Auction> = (0..20u128).map(|i| auction(i, "X", 2023, 1)).collect();

        cold.store_month("X", 2023, 1, &records).await.unwrap();

        assert!(cold.month_exists("X", 2023, 1).await.unwrap());
        assert!(!cold.month_exists("X", 2023, 2).await.unwrap());

        let read = cold.get_month("X", 2023, 1).await.unwrap();
        assert_eq!(read.len(), 20);
        let mut uuids: Vec<Uuid> = read.iter().map(|a| a.uuid).collect();
        uuids.sort();
        assert_eq!(uuids, (0..20u128).map(Uuid::from_u128).collect::<Vec<_>>());

        let missing = cold.get_month("X", 2024, 1).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn blob_metadata_is_attached() {
        let cold = cold();
        let records: Vec<Auction> = (0..3u128).map(|i| auction(i, "X", 2023, 1)).collect();
        cold.store_month("X", 2023, 1, &records).await.unwrap();

        let meta = cold
            .backend
            .head(&ColdStore::data_key("X", 2023, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.custom.get("count").map(String::as_str), Some("3"));
        assert_eq!(meta.custom.get("tag").map(String::as_str), Some("X"));
        assert_eq!(meta.custom.get("year").map(String::as_str), Some("2023"));
        assert_eq!(meta.custom.get("month").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn lookup_goes_through_the_bloom_hierarchy() {
        let cold = cold();
        cold.store_month("X", 2023, 1, &(0..10u128).map(|i| auction(i, "X", 2023, 1)).collect::<Vec<_>>())
            .await
            .unwrap();
        cold.store_month("Y", 2023, 2, &(100..110u128).map(|i| auction(i, "Y", 2023, 2)).collect::<Vec<_>>())
            .await
            .unwrap();

        let hit = cold.lookup(Uuid::from_u128(105)).await.unwrap().unwrap();
        assert_eq!(hit.uuid, Uuid::from_u128(105));
        assert_eq!(hit.tag, "Y");

        assert!(cold.lookup(Uuid::from_u128(999_999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn may_contain_consults_master() {
        let cold = cold();
        assert_eq!(cold.may_contain(Uuid::from_u128(1)).await.unwrap(), (false, None));

        cold.store_month("X", 2023, 1, &[auction(1, "X", 2023, 1)])
            .await
            .unwrap();
        assert_eq!(cold.may_contain(Uuid::from_u128(1)).await.unwrap(), (true, None));
    }

    #[tokio::test]
    async fn list_months_accumulates() {
        let cold = cold();
        cold.store_month("X", 2023, 2, &[auction(1, "X", 2023, 2)])
            .await
            .unwrap();
        cold.store_month("X", 2023, 1, &[auction(2, "X", 2023, 1)])
            .await
            .unwrap();

        assert_eq!(cold.list_months("X").await.unwrap(), vec![(2023, 1), (2023, 2)]);
        assert!(cold.list_months("Z").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn indexes_survive_cache_loss() {
        let backend = Arc::new(MemoryBackend::new());
        {
            let cold = ColdStore::new(backend.clone(), small_config());
            cold.store_month("X", 2023, 1, &[auction(7, "X", 2023, 1)])
                .await
                .unwrap();
        }

        // fresh process over the same backend
        let cold = ColdStore::new(backend, small_config());
        let hit = cold.lookup(Uuid::from_u128(7)).await.unwrap().unwrap();
        assert_eq!(hit.uuid, Uuid::from_u128(7));
        assert_eq!(cold.list_months("X").await.unwrap(), vec![(2023, 1)]);
    }
}
