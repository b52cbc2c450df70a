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

//! Memoized daily aggregates.
//!
//! The summary table is partitioned by `(tag, filter_key)` and clustered by
//! the day boundary. A finalized day's row is immutable; concurrent misses
//! recompute identical content, so last-writer-wins is safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use skyvault_core::Result;
use std::collections::{BTreeMap, HashMap};

/// Price statistics over one set of sold prices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub max: i64,
    pub min: i64,
    /// Lower median: element at index `n / 2` of the sorted prices.
    pub median: i64,
    pub mean: f64,
    /// Most frequent price; ties break to the first seen.
    pub mode: i64,
    pub volume: u64,
}

/// Compute the summary arithmetic. Every field is zero on empty input.
pub fn price_stats(prices: &[i64]) -> PriceStats {
    if prices.is_empty() {
        return PriceStats::default();
    }

    let mut sorted = prices.to_vec();
    sorted.sort_unstable();

    let mut counts: HashMap<i64, u64> = HashMap::new();
    for &price in prices {
        *counts.entry(price).or_insert(0) += 1;
    }
    let top_count = counts.values().copied().max().unwrap_or(0);
    // ties break to the price seen first
    let mode = prices
        .iter()
        .copied()
        .find(|price| counts.get(price) == Some(&top_count))
        .unwrap_or(prices[0]);

    let sum: i128 = prices.iter().map(|&p| p as i128).sum();

    PriceStats {
        max: sorted[sorted.len() - 1],
        min: sorted[0],
        median: sorted[sorted.len() / 2],
        mean: sum as f64 / prices.len() as f64,
        mode,
        volume: prices.len() as u64,
    }
}

/// One day's aggregate for a `(tag, filter_key)` partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub tag: String,
    pub filter_key: String,
    pub filters: BTreeMap<String, String>,
    pub start: DateTime<Utc>,
    /// Day boundary this row is clustered on (exclusive upper bound).
    pub end: DateTime<Utc>,
    pub max: i64,
    pub min: i64,
    pub median: i64,
    pub mean: f64,
    pub mode: i64,
    pub volume: u64,
}

impl SummaryRecord {
    pub fn from_prices(
        tag: &str,
        filter_key: &str,
        filters: &BTreeMap<String, String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        prices: &[i64],
    ) -> Self {
        let stats = price_stats(prices);
        Self {
            tag: tag.to_string(),
            filter_key: filter_key.to_string(),
            filters: filters.clone(),
            start,
            end,
            max: stats.max,
            min: stats.min,
            median: stats.median,
            mean: stats.mean,
            mode: stats.mode,
            volume: stats.volume,
        }
    }
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Rows for `(tag, filter_key)` with `end` in `(start, end]`, ascending.
    async fn read_range(
        &self,
        tag: &str,
        filter_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SummaryRecord>>;

    /// Idempotent by `(tag, filter_key, end)`.
    async fn insert(&self, record: SummaryRecord) -> Result<()>;
}

/// In-process reference implementation.
#[derive(Default)]
pub struct MemorySummaryStore {
    rows: RwLock<BTreeMap<(String, String), BTreeMap<i64, SummaryRecord>>>,
}

impl MemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryStore for MemorySummaryStore {
    async fn read_range(
        &self,
        tag: &str,
        filter_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SummaryRecord>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let rows = self.rows.read();
        Ok(rows
            .get(&(tag.to_string(), filter_key.to_string()))
            .map(|partition| {
                partition
                    .range(start.timestamp() + 1..=end.timestamp())
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, record: SummaryRecord) -> Result<()> {
        let mut rows = self.rows.write();
        rows.entry((record.tag.clone(), record.filter_key.clone()))
            .or_default()
            .insert(record.end.timestamp(), record);
        Ok(())
    }
}
