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

//! Query engine: the read-side facade over both storage tiers.
//!
//! The summary path memoizes daily aggregates in the summary table, so a
//! repeated query becomes a single partition read. Missing days are
//! computed sequentially; two concurrent misses may race and write
//! identical rows, which is harmless because a day's row is idempotent by
//! `(tag, filter_key, end)`.

use crate::aggregation::PriceSummary;
use crate::router::TierRouter;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::DashMap;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use skyvault_core::{
    combine_versions, filter_key, parse_time_filter, Auction, FilterCompiler, Result,
    FILTER_END_AFTER, FILTER_END_BEFORE,
};
use skyvault_storage::{price_stats, ColdStore, HotStore, SummaryRecord, SummaryStore};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::debug;
use uuid::Uuid;

/// Rows shown by the recent overview.
const OVERVIEW_SIZE: usize = 12;
/// Rows scanned before the filter is applied.
const OVERVIEW_SCAN_LIMIT: usize = 1_000;
/// Fallback window when the last hour is too quiet.
const OVERVIEW_FALLBACK_DAYS: i64 = 14;
/// TTL of the price-summary cache.
const PRICE_CACHE_TTL_SECS: u64 = 1_800;

/// Resolves player uuids to display names; an external batched API in
/// production.
#[async_trait]
pub trait PlayerNameResolver: Send + Sync {
    async fn resolve(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>>;
}

/// Fixed-map resolver for tests and offline use. Unknown ids resolve to
/// their hyphenless uuid.
#[derive(Debug, Default)]
pub struct StaticNameResolver {
    names: DashMap<Uuid, String>,
}

impl StaticNameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: Uuid, name: impl Into<String>) {
        self.names.insert(id, name.into());
    }
}

#[async_trait]
impl PlayerNameResolver for StaticNameResolver {
    async fn resolve(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
        Ok(ids
            .iter()
            .map(|id| {
                let name = self
                    .names
                    .get(id)
                    .map(|n| n.clone())
                    .unwrap_or_else(|| id.simple().to_string());
                (*id, name)
            })
            .collect())
    }
}

/// One row of the recent-overview response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionPreview {
    pub uuid: Uuid,
    pub item_name: String,
    pub price: i64,
    pub end: DateTime<Utc>,
    pub bidder: Uuid,
    pub bidder_name: String,
}

pub struct QueryEngine {
    hot: Arc<dyn HotStore>,
    cold: Option<Arc<ColdStore>>,
    summaries: Arc<dyn SummaryStore>,
    compiler: Arc<dyn FilterCompiler>,
    names: Arc<dyn PlayerNameResolver>,
    router: TierRouter,
    price_cache: Cache<String, PriceSummary>,
}

impl QueryEngine {
    pub fn new(
        hot: Arc<dyn HotStore>,
        cold: Option<Arc<ColdStore>>,
        summaries: Arc<dyn SummaryStore>,
        compiler: Arc<dyn FilterCompiler>,
        names: Arc<dyn PlayerNameResolver>,
        retention_months: u32,
    ) -> Self {
        let router = TierRouter::new(hot.clone(), cold.clone(), retention_months);
        Self {
            hot,
            cold,
            summaries,
            compiler,
            names,
            router,
            price_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(StdDuration::from_secs(PRICE_CACHE_TTL_SECS))
                .build(),
        }
    }

    fn floor_day(t: DateTime<Utc>) -> DateTime<Utc> {
        let ts = t.timestamp();
        Utc.timestamp_opt(ts - ts.rem_euclid(86_400), 0)
            .single()
            .unwrap_or(t)
    }

    /// Per-day aggregates for `(tag, filter)` over the requested window,
    /// memoized in the summary table.
    pub async fn summary(
        &self,
        tag: &str,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<SummaryRecord>> {
        let end = filters
            .get(FILTER_END_BEFORE)
            .and_then(|v| parse_time_filter(v))
            .unwrap_or_else(Utc::now);
        let end = Self::floor_day(end);
        let start = filters
            .get(FILTER_END_AFTER)
            .and_then(|v| parse_time_filter(v))
            .map(Self::floor_day)
            .unwrap_or_else(|| end - Duration::days(7));

        let key = filter_key(filters);
        let mut rows = self.summaries.read_range(tag, &key, start, end).await?;
        let expected = ((end - start).num_seconds() / 86_400).max(0) as usize;

        if rows.len() < expected {
            let predicate = self.compiler.compile(filters)?;
            let present: HashSet<i64> = rows.iter().map(|r| r.end.timestamp()).collect();
            let stored_filters: BTreeMap<String, String> = filters
                .iter()
                .filter(|(k, _)| k.as_str() != FILTER_END_AFTER && k.as_str() != FILTER_END_BEFORE)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            let mut computed = 0usize;
            for i in 0..expected as i64 {
                let day_start = start + Duration::days(i);
                let day_end = day_start + Duration::days(1);
                if present.contains(&day_end.timestamp()) {
                    continue;
                }
                let stats = self.hot.daily_aggregate(tag, &predicate, day_start).await?;
                let record = SummaryRecord {
                    tag: tag.to_string(),
                    filter_key: key.clone(),
                    filters: stored_filters.clone(),
                    start: day_start,
                    end: day_end,
                    max: stats.max,
                    min: stats.min,
                    median: stats.median,
                    mean: stats.mean,
                    mode: stats.mode,
                    volume: stats.volume,
                };
                self.summaries.insert(record.clone()).await?;
                rows.push(record);
                computed += 1;
            }
            debug!(tag, computed, "filled summary cache misses");
            rows.sort_by_key(|r| r.end);
        }

        Ok(rows)
    }

    /// The twelve most recently ended sales for a tag, with bidder names
    /// resolved. Falls back from the last hour to two weeks when quiet.
    pub async fn recent_overview(
        &self,
        tag: &str,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<AuctionPreview>> {
        let predicate = self.compiler.compile(filters)?;
        let now = Utc::now();

        let mut rows = self
            .hot
            .range(tag, now - Duration::hours(1), now, Some(true), OVERVIEW_SCAN_LIMIT)
            .await?;
        rows.retain(|a| predicate(a));
        rows.truncate(OVERVIEW_SIZE);

        if rows.len() < OVERVIEW_SIZE {
            rows = self
                .hot
                .range(
                    tag,
                    now - Duration::days(OVERVIEW_FALLBACK_DAYS),
                    now,
                    Some(true),
                    OVERVIEW_SCAN_LIMIT,
                )
                .await?;
            rows.retain(|a| predicate(a));
            rows.truncate(OVERVIEW_SIZE);
        }

        let bidders: Vec<Uuid> = rows
            .iter()
            .filter_map(|a| a.highest_bid().map(|b| b.bidder))
            .collect();
        let names = self.names.resolve(&bidders).await?;

        Ok(rows
            .into_iter()
            .map(|a| {
                let bidder = a.highest_bid().map(|b| b.bidder).unwrap_or_else(Uuid::nil);
                AuctionPreview {
                    uuid: a.uuid,
                    item_name: a.item_name.clone(),
                    price: a.highest_bid_amount,
                    end: a.end,
                    bidder,
                    bidder_name: names.get(&bidder).cloned().unwrap_or_default(),
                }
            })
            .collect())
    }

    /// Lazily filtered range scan across both tiers.
    pub async fn filtered(
        &self,
        tag: &str,
        filters: &BTreeMap<String, String>,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Auction>> {
        let predicate = self.compiler.compile(filters)?;
        self.router
            .filtered(tag, t0, t1, &predicate, None, limit)
            .await
    }

    /// One auction, all versions folded, from whichever tier holds it.
    pub async fn get_auction(&self, uuid: Uuid) -> Result<Option<Auction>> {
        let versions = self.hot.get_by_uuid(uuid).await?;
        if !versions.is_empty() {
            return Ok(combine_versions(versions));
        }
        match &self.cold {
            Some(cold) => cold.lookup(uuid).await,
            None => Ok(None),
        }
    }

    /// Every stored version of an auction, unfolded.
    pub async fn auction_versions(&self, uuid: Uuid) -> Result<Vec<Auction>> {
        let versions = self.hot.get_by_uuid(uuid).await?;
        if !versions.is_empty() {
            return Ok(versions);
        }
        match &self.cold {
            Some(cold) => Ok(cold.lookup(uuid).await?.into_iter().collect()),
            None => Ok(Vec::new()),
        }
    }

    /// One-shot price summary over the trailing `days` window (clamped to
    /// `[0, 2]`), cached for thirty minutes.
    pub async fn price_summary(
        &self,
        tag: &str,
        filters: &BTreeMap<String, String>,
        days: f64,
    ) -> Result<PriceSummary> {
        let days = days.clamp(0.0, 2.0);
        let cache_key = format!("{tag}|{}|{days:.3}", filter_key(filters));
        if let Some(cached) = self.price_cache.get(&cache_key) {
            return Ok(cached);
        }

        let predicate = self.compiler.compile(filters)?;
        let now = Utc::now();
        let t0 = now - Duration::seconds((days * 86_400.0) as i64);

        let rows = self.hot.range(tag, t0, now, Some(true), usize::MAX).await?;
        let prices: Vec<i64> = rows
            .iter()
            .filter(|a| predicate(a))
            .map(|a| a.highest_bid_amount)
            .collect();

        let summary = PriceSummary::from(price_stats(&prices));
        self.price_cache.insert(cache_key, summary);
        Ok(summary)
    }
}
