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

//! Hot store: the wide-column live table.
//!
//! # Layout
//!
//! ```text
//! auctions: partition (tag, time_key)
//!           clustering (is_sold ASC, end DESC, auction_uid DESC)
//!           secondary indexes: auction_uid, item_uid, seller, highest_bidder
//! bids:     partition (bidder)
//!           clustering (timestamp DESC)
//!           secondary index: auction_uuid
//! ```
//!
//! Writes are idempotent at-least-once: an insert first reads its exact
//! clustering coordinate and skips when a row with the same seller already
//! sits there. A row with a different seller is overwritten; the `end`
//! field doubles as the conflict-resolution stamp.
//!
//! [`MemoryHotStore`] is the in-process reference implementation; a driver
//! binding for the production cluster implements the same trait.

use crate::summary::{price_stats, PriceStats};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use skyvault_core::{
    combine_versions, time_bucket, Auction, AuctionCodec, Bid, Predicate, Result, SkyvaultError,
    StoredAuction,
};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Sold events younger than this window are eligible for retrofit.
pub const RETROFIT_WINDOW_DAYS: i64 = 14;

/// Result of an individual insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same coordinate and seller already existed.
    SkippedExisting,
}

#[async_trait]
pub trait HotStore: Send + Sync {
    /// Insert one auction and its bids, idempotently.
    async fn insert(&self, auction: &Auction) -> Result<InsertOutcome>;

    /// Insert a micro-batch that shares one tag, retrofitting sparse sold
    /// events from earlier listed rows first. Returns the number of rows
    /// actually written.
    async fn insert_batch_same_tag(&self, batch: Vec<Auction>) -> Result<usize>;

    /// Insert bid rows keyed by bidder.
    async fn insert_bids(&self, bids: Vec<(Uuid, Bid)>) -> Result<()>;

    /// Bids on one auction via the bids table's auction index, newest
    /// first.
    async fn bids_for_auction(&self, auction_uuid: Uuid) -> Result<Vec<Bid>>;

    /// One bidder's bid history, newest first.
    async fn bids_by_bidder(&self, bidder: Uuid, limit: usize) -> Result<Vec<Bid>>;

    /// Tag-scoped scan over `end ∈ (t0, t1]`, newest first, walking buckets
    /// from `bucket(tag, t1)` down to `bucket(tag, t0)`.
    async fn range(
        &self,
        tag: &str,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
        is_sold: Option<bool>,
        limit: usize,
    ) -> Result<Vec<Auction>>;

    /// Scan a single bucket, used by the tier router.
    async fn scan_bucket(
        &self,
        tag: &str,
        bucket: i16,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
        is_sold: Option<bool>,
    ) -> Result<Vec<Auction>>;

    /// Every stored version of an auction (listing and sale may both exist).
    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Vec<Auction>>;

    /// All versions folded into one record.
    async fn get_combined(&self, uuid: Uuid) -> Result<Option<Auction>>;

    /// Secondary-index lookup by numeric item uid.
    async fn get_by_item_uid(&self, item_uid: i64) -> Result<Vec<Auction>>;

    /// Auctions by seller with `end ∈ [before − 30d, before)`, newest first.
    async fn recent_by_seller(
        &self,
        seller: Uuid,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Auction>>;

    /// Sold-price statistics for one day under a compiled filter.
    async fn daily_aggregate(
        &self,
        tag: &str,
        filter: &Predicate,
        day_start: DateTime<Utc>,
    ) -> Result<PriceStats>;

    /// Delete rows by exact clustering coordinate. Returns rows removed.
    async fn delete_rows(&self, rows: &[Auction]) -> Result<u64>;

    /// Tags currently present in the store.
    async fn distinct_tags(&self) -> Result<Vec<String>>;
}

type PartitionKey = (String, i16);
/// `(is_sold ASC, end DESC, auction_uid DESC)`
type ClusterKey = (bool, Reverse<i64>, Reverse<u128>);

#[derive(Debug, Clone, PartialEq, Eq)]
struct RowLocator {
    tag: String,
    time_key: i16,
    is_sold: bool,
    end_ts: i64,
    uuid: u128,
}

impl RowLocator {
    fn of(stored: &StoredAuction) -> Self {
        Self {
            tag: stored.tag.clone(),
            time_key: stored.time_key,
            is_sold: stored.is_sold,
            end_ts: stored.end.timestamp(),
            uuid: stored.uuid.as_u128(),
        }
    }

    fn cluster_key(&self) -> ClusterKey {
        (self.is_sold, Reverse(self.end_ts), Reverse(self.uuid))
    }
}

/// In-process wide-column model.
#[derive(Default)]
pub struct MemoryHotStore {
    partitions: RwLock<BTreeMap<PartitionKey, BTreeMap<ClusterKey, StoredAuction>>>,
    by_uuid: DashMap<u128, Vec<RowLocator>>,
    by_seller: DashMap<u128, Vec<RowLocator>>,
    by_item_uid: DashMap<i64, Vec<RowLocator>>,
    by_bidder: DashMap<u128, Vec<RowLocator>>,
    /// `(bidder, timestamp DESC, auction_uuid)` -> bid
    bids: RwLock<BTreeMap<(u128, Reverse<i64>, u128), Bid>>,
    bids_by_auction: DashMap<u128, Vec<(u128, i64)>>,
}

impl MemoryHotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_row(&self, stored: &StoredAuction) {
        let locator = RowLocator::of(stored);
        for (map, key) in [
            (&self.by_uuid, stored.uuid.as_u128()),
            (&self.by_seller, stored.seller.as_u128()),
            (&self.by_bidder, stored.highest_bidder.as_u128()),
        ] {
            let mut entry = map.entry(key).or_default();
            if !entry.contains(&locator) {
                entry.push(locator.clone());
            }
        }
        let mut entry = self.by_item_uid.entry(stored.item_uid).or_default();
        if !entry.contains(&locator) {
            entry.push(locator);
        }
    }

    fn unindex_row(&self, stored: &StoredAuction) {
        let locator = RowLocator::of(stored);
        for (map, key) in [
            (&self.by_uuid, stored.uuid.as_u128()),
            (&self.by_seller, stored.seller.as_u128()),
            (&self.by_bidder, stored.highest_bidder.as_u128()),
        ] {
            if let Some(mut entry) = map.get_mut(&key) {
                entry.retain(|l| l != &locator);
            }
        }
        if let Some(mut entry) = self.by_item_uid.get_mut(&stored.item_uid) {
            entry.retain(|l| l != &locator);
        }
    }

    fn fetch(&self, locator: &RowLocator) -> Option<StoredAuction> {
        let partitions = self.partitions.read();
        partitions
            .get(&(locator.tag.clone(), locator.time_key))
            .and_then(|partition| partition.get(&locator.cluster_key()))
            .cloned()
    }

    fn fetch_versions(&self, uuid: Uuid) -> Vec<StoredAuction> {
        let locators = self
            .by_uuid
            .get(&uuid.as_u128())
            .map(|entry| entry.clone())
            .unwrap_or_default();
        locators.iter().filter_map(|l| self.fetch(l)).collect()
    }

    /// Exists-check plus write; returns whether a write happened.
    fn upsert(&self, stored: StoredAuction) -> InsertOutcome {
        let key = RowLocator::of(&stored).cluster_key();
        let partition_key = (stored.tag.clone(), stored.time_key);

        {
            let partitions = self.partitions.read();
            if let Some(existing) = partitions
                .get(&partition_key)
                .and_then(|partition| partition.get(&key))
            {
                if existing.seller == stored.seller {
                    return InsertOutcome::SkippedExisting;
                }
            }
        }

        self.index_row(&stored);
        let mut partitions = self.partitions.write();
        partitions
            .entry(partition_key)
            .or_default()
            .insert(key, stored);
        InsertOutcome::Inserted
    }

    fn store_bids(&self, bids: impl IntoIterator<Item = (Uuid, Bid)>) {
        let mut table = self.bids.write();
        for (auction_uuid, bid) in bids {
            let bid = bid.normalized();
            let key = (
                bid.bidder.as_u128(),
                Reverse(bid.timestamp.timestamp()),
                auction_uuid.as_u128(),
            );
            self.bids_by_auction
                .entry(auction_uuid.as_u128())
                .or_default()
                .push((bid.bidder.as_u128(), bid.timestamp.timestamp()));
            table.insert(key, bid);
        }
    }

    /// Fill listing fields of a sparse sold event from a nearby listed row.
    fn retrofit(&self, pending: &mut Auction, now: DateTime<Utc>) {
        if !pending.is_sparse_sold_event()
            || pending.end <= now - Duration::days(RETROFIT_WINDOW_DAYS)
        {
            return;
        }

        let tag = pending.tag_or_unknown().to_string();
        let current = time_bucket::bucket(&tag, now);
        let window = current.saturating_sub(1)..=current.saturating_add(2);

        let locators = self
            .by_uuid
            .get(&pending.uuid.as_u128())
            .map(|entry| entry.clone())
            .unwrap_or_default();

        let listed = locators
            .iter()
            .filter(|l| l.tag == tag && window.contains(&l.time_key))
            .filter_map(|l| self.fetch(l))
            .find(|row| row.start != DateTime::<Utc>::UNIX_EPOCH);

        match listed {
            Some(row) => {
                pending.start = row.start;
                pending.count = row.count;
                pending.item_created_at = row.item_created_at;
                pending.item_name = row.item_name;
                pending.profile_id = row.profile_id;
                pending.bin = row.bin;
                pending.starting_bid = row.starting_bid;
            }
            None => {
                debug!(uuid = %pending.uuid, %tag, "no listed row found for retrofit");
            }
        }
    }

    fn scan_partition(
        &self,
        tag: &str,
        bucket: i16,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
        is_sold: Option<bool>,
    ) -> Vec<StoredAuction> {
        let partitions = self.partitions.read();
        let mut rows: Vec<StoredAuction> = partitions
            .get(&(tag.to_string(), bucket))
            .map(|partition| {
                partition
                    .values()
                    .filter(|row| is_sold.map_or(true, |s| row.is_sold == s))
                    .filter(|row| row.end > t0 && row.end <= t1)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|row| Reverse((row.end.timestamp(), row.uuid.as_u128())));
        rows
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn insert(&self, auction: &Auction) -> Result<InsertOutcome> {
        let stored = AuctionCodec::encode(auction, Utc::now());
        let bids: Vec<(Uuid, Bid)> = stored
            .bids
            .iter()
            .cloned()
            .map(|bid| (stored.uuid, bid))
            .collect();

        let outcome = self.upsert(stored);
        if outcome == InsertOutcome::Inserted {
            self.store_bids(bids);
        }
        Ok(outcome)
    }

    async fn insert_batch_same_tag(&self, batch: Vec<Auction>) -> Result<usize> {
        let Some(first_tag) = batch.first().map(|a| a.tag_or_unknown().to_string()) else {
            return Ok(0);
        };
        if batch
            .iter()
            .any(|a| a.tag_or_unknown() != first_tag.as_str())
        {
            return Err(SkyvaultError::InvalidInput(format!(
                "mixed tags in same-tag batch (expected {first_tag})"
            )));
        }

        let now = Utc::now();
        let mut written = 0;
        for mut auction in batch {
            self.retrofit(&mut auction, now);
            if self.insert(&auction).await? == InsertOutcome::Inserted {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn insert_bids(&self, bids: Vec<(Uuid, Bid)>) -> Result<()> {
        self.store_bids(bids);
        Ok(())
    }

    async fn bids_for_auction(&self, auction_uuid: Uuid) -> Result<Vec<Bid>> {
        let locators = self
            .bids_by_auction
            .get(&auction_uuid.as_u128())
            .map(|entry| entry.clone())
            .unwrap_or_default();
        let table = self.bids.read();
        let mut bids: Vec<Bid> = locators
            .iter()
            .filter_map(|(bidder, ts)| {
                table
                    .get(&(*bidder, Reverse(*ts), auction_uuid.as_u128()))
                    .cloned()
            })
            .collect();
        bids.sort_by_key(|b| Reverse(b.timestamp.timestamp()));
        Ok(bids)
    }

    async fn bids_by_bidder(&self, bidder: Uuid, limit: usize) -> Result<Vec<Bid>> {
        let table = self.bids.read();
        Ok(table
            .range((bidder.as_u128(), Reverse(i64::MAX), 0)..=(bidder.as_u128(), Reverse(i64::MIN), u128::MAX))
            .map(|(_, bid)| bid.clone())
            .take(limit)
            .collect())
    }

    async fn range(
        &self,
        tag: &str,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
        is_sold: Option<bool>,
        limit: usize,
    ) -> Result<Vec<Auction>> {
        let mut out = Vec::new();
        for bucket in time_bucket::bucket_range(tag, t0, t1) {
            for stored in self.scan_partition(tag, bucket, t0, t1, is_sold) {
                out.push(AuctionCodec::decode(stored));
                if out.len() >= limit {
                    return Ok(out);
                }
            }
        }
        Ok(out)
    }

    async fn scan_bucket(
        &self,
        tag: &str,
        bucket: i16,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
        is_sold: Option<bool>,
    ) -> Result<Vec<Auction>> {
        Ok(self
            .scan_partition(tag, bucket, t0, t1, is_sold)
            .into_iter()
            .map(AuctionCodec::decode)
            .collect())
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Vec<Auction>> {
        Ok(self
            .fetch_versions(uuid)
            .into_iter()
            .map(AuctionCodec::decode)
            .collect())
    }

    async fn get_combined(&self, uuid: Uuid) -> Result<Option<Auction>> {
        Ok(combine_versions(self.get_by_uuid(uuid).await?))
    }

    async fn get_by_item_uid(&self, item_uid: i64) -> Result<Vec<Auction>> {
        let locators = self
            .by_item_uid
            .get(&item_uid)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        Ok(locators
            .iter()
            .filter_map(|l| self.fetch(l))
            .map(AuctionCodec::decode)
            .collect())
    }

    async fn recent_by_seller(
        &self,
        seller: Uuid,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Auction>> {
        let window_start = before - Duration::days(30);
        let locators = self
            .by_seller
            .get(&seller.as_u128())
            .map(|entry| entry.clone())
            .unwrap_or_default();

        let mut rows: Vec<StoredAuction> = locators
            .iter()
            .filter(|l| {
                l.end_ts >= window_start.timestamp() && l.end_ts < before.timestamp()
            })
            .filter_map(|l| self.fetch(l))
            .collect();
        rows.sort_by_key(|row| Reverse(row.end.timestamp()));
        rows.truncate(limit);
        Ok(rows.into_iter().map(AuctionCodec::decode).collect())
    }

    async fn daily_aggregate(
        &self,
        tag: &str,
        filter: &Predicate,
        day_start: DateTime<Utc>,
    ) -> Result<PriceStats> {
        let day_end = day_start + Duration::days(1);
        let sold = self
            .range(tag, day_start, day_end, Some(true), usize::MAX)
            .await?;
        let prices: Vec<i64> = sold
            .iter()
            .filter(|a| filter(a))
            .map(|a| a.highest_bid_amount)
            .collect();
        Ok(price_stats(&prices))
    }

    async fn delete_rows(&self, rows: &[Auction]) -> Result<u64> {
        let now = Utc::now();
        let mut removed = 0u64;
        for auction in rows {
            let stored = AuctionCodec::encode(auction, now);
            let mut locator = RowLocator::of(&stored);
            let taken = {
                let mut partitions = self.partitions.write();
                let Some(partition) = partitions.get_mut(&(stored.tag.clone(), stored.time_key))
                else {
                    continue;
                };
                // A row written before its end passed clusters under the
                // other is_sold value; try both coordinates.
                partition.remove(&locator.cluster_key()).or_else(|| {
                    locator.is_sold = !locator.is_sold;
                    partition.remove(&locator.cluster_key())
                })
            };
            if let Some(existing) = taken {
                self.unindex_row(&existing);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn distinct_tags(&self) -> Result<Vec<String>> {
        let partitions = self.partitions.read();
        let mut tags: Vec<String> = partitions.keys().map(|(tag, _)| tag.clone()).collect();
        tags.dedup();
        Ok(tags)
    }
}
