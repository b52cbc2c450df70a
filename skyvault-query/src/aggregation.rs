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

//! Aggregate arithmetic above the per-day records.

use serde::{Deserialize, Serialize};
use skyvault_storage::{PriceStats, SummaryRecord};

/// The price summary served for one tag and filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub max: i64,
    pub min: i64,
    pub median: i64,
    pub mean: f64,
    pub mode: i64,
    pub volume: u64,
}

impl From<PriceStats> for PriceSummary {
    fn from(stats: PriceStats) -> Self {
        Self {
            max: stats.max,
            min: stats.min,
            median: stats.median,
            mean: stats.mean,
            mode: stats.mode,
            volume: stats.volume,
        }
    }
}

/// Fold per-day records into one summary. The mean is volume-weighted; the
/// median and mode come from the highest-volume day, which is the best
/// available proxy without the raw prices.
pub fn fold_records(records: &[SummaryRecord]) -> PriceSummary {
    let mut out = PriceSummary::default();
    let mut weighted_sum = 0f64;
    let mut best_volume = 0u64;

    for record in records {
        if record.volume == 0 {
            continue;
        }
        if out.volume == 0 {
            out.max = record.max;
            out.min = record.min;
        } else {
            out.max = out.max.max(record.max);
            out.min = out.min.min(record.min);
        }
        if record.volume > best_volume {
            best_volume = record.volume;
            out.median = record.median;
            out.mode = record.mode;
        }
        weighted_sum += record.mean * record.volume as f64;
        out.volume += record.volume;
    }

    if out.volume > 0 {
        out.mean = weighted_sum / out.volume as f64;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn record(day: u32, prices: &[i64]) -> SummaryRecord {
        let end = Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap();
        SummaryRecord::from_prices(
            "X",
            "",
            &BTreeMap::new(),
            end - chrono::Duration::days(1),
            end,
            prices,
        )
    }

    #[test]
    fn fold_of_nothing_is_zero() {
        assert_eq!(fold_records(&[]), PriceSummary::default());
        assert_eq!(fold_records(&[record(1, &[])]), PriceSummary::default());
    }

    #[test]
    fn fold_spans_days() {
        let folded = fold_records(&[record(1, &[100, 200]), record(2, &[50, 50, 400])]);
        assert_eq!(folded.max, 400);
        assert_eq!(folded.min, 50);
        assert_eq!(folded.volume, 5);
        // weighted mean: (150*2 + 166.66*3) / 5 = 160
        assert!((folded.mean - 160.0).abs() < 0.01);
        // day 2 has the larger volume
        assert_eq!(folded.mode, 50);
    }
}
