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

//! Tier router: decides, bucket by bucket, whether a range scan reads the
//! hot store or the cold archive.
//!
//! Buckets whose nominal date is younger than the retention horizon read
//! from hot; older buckets read from the cold blob of their enclosing
//! month. The walk goes newest-first and stops at the limit, so the window
//! is never buffered whole. A failed cold read degrades that bucket to
//! empty rather than failing the query.

use chrono::{DateTime, Datelike, Months, Utc};
use skyvault_core::{time_bucket, Auction, Predicate, Result};
use skyvault_storage::{ColdStore, HotStore};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

pub struct TierRouter {
    hot: Arc<dyn HotStore>,
    cold: Option<Arc<ColdStore>>,
    retention_months: u32,
}

impl TierRouter {
    pub fn new(hot: Arc<dyn HotStore>, cold: Option<Arc<ColdStore>>, retention_months: u32) -> Self {
        Self {
            hot,
            cold,
            retention_months,
        }
    }

    fn horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(self.retention_months))
            .unwrap_or(now)
    }

    /// Months overlapped by one bucket.
    fn bucket_months(tag: &str, bucket: i16) -> Vec<(i32, u32)> {
        let start = time_bucket::date_of(tag, bucket);
        let end = start + time_bucket::width(tag) - chrono::Duration::seconds(1);
        let mut months = vec![(start.year(), start.month())];
        if (end.year(), end.month()) != (start.year(), start.month()) {
            months.push((end.year(), end.month()));
        }
        months
    }

    /// Filtered, newest-first scan over `end ∈ (t0, t1]`, transparently
    /// spanning both tiers.
    pub async fn filtered(
        &self,
        tag: &str,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
        predicate: &Predicate,
        is_sold: Option<bool>,
        limit: usize,
    ) -> Result<Vec<Auction>> {
        let now = Utc::now();
        let horizon = self.horizon(now);
        let mut out: Vec<Auction> = Vec::new();
        let mut fetched_months: HashSet<(i32, u32)> = HashSet::new();

        for bucket in time_bucket::bucket_range(tag, t0, t1) {
            if out.len() >= limit {
                break;
            }
            let bucket_date = time_bucket::date_of(tag, bucket);
            let cold = match &self.cold {
                Some(cold) if bucket_date < horizon => cold,
                _ => {
                    let rows = self.hot.scan_bucket(tag, bucket, t0, t1, is_sold).await?;
                    for auction in rows {
                        if predicate(&auction) {
                            out.push(auction);
                            if out.len() >= limit {
                                break;
                            }
                        }
                    }
                    continue;
                }
            };
            for (year, month) in Self::bucket_months(tag, bucket) {
                if !fetched_months.insert((year, month)) {
                    continue;
                }
                let mut rows = match cold.get_month(tag, year, month).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!(tag, year, month, error = %e, "cold read failed, eliding bucket");
                        continue;
                    }
                };
                rows.retain(|a| {
                    a.end > t0
                        && a.end <= t1
                        && is_sold.map_or(true, |s| (a.highest_bid_amount > 0 && a.end <= now) == s)
                        && predicate(a)
                });
                rows.sort_by_key(|a| Reverse(a.end.timestamp()));
                for auction in rows {
                    out.push(auction);
                    if out.len() >= limit {
                        break;
                    }
                }
            }
        }

        Ok(out)
    }
}
