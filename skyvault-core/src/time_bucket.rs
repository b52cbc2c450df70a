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

//! Time bucketing.
//!
//! The hot store partitions on `(tag, time_key)`; the time key is a short
//! integer bucket derived from the auction end time. Ordinary tags use
//! 7-day buckets; the two high-volume tags use half-day buckets so a single
//! partition stays scannable.

use crate::auction::UNKNOWN_TAG;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::Rng;

/// Bucket zero starts here.
pub fn bucket_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()
}

const ORDINARY_WIDTH_SECS: i64 = 7 * 24 * 3600;
const HIGH_VOLUME_WIDTH_SECS: i64 = 12 * 3600;

/// Tags whose volume forces the narrow bucket width.
pub fn is_high_volume_tag(tag: &str) -> bool {
    tag == "ENCHANTED_BOOK" || tag == UNKNOWN_TAG || tag.is_empty()
}

/// Bucket width for a tag.
pub fn width(tag: &str) -> Duration {
    if is_high_volume_tag(tag) {
        Duration::seconds(HIGH_VOLUME_WIDTH_SECS)
    } else {
        Duration::seconds(ORDINARY_WIDTH_SECS)
    }
}

fn legacy_cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 6, 1, 0, 0, 0).unwrap()
}

/// Map `(tag, end_time)` to the partition time key.
///
/// High-volume rows with end times before 2000-06 are legacy garbage; they
/// land in a random small bucket rather than a deeply negative one.
pub fn bucket(tag: &str, t: DateTime<Utc>) -> i16 {
    if is_high_volume_tag(tag) && t < legacy_cutoff() {
        return rand::thread_rng().gen_range(0..10);
    }
    let width_secs = if is_high_volume_tag(tag) {
        HIGH_VOLUME_WIDTH_SECS
    } else {
        ORDINARY_WIDTH_SECS
    };
    let offset = t.timestamp() - bucket_epoch().timestamp();
    offset.div_euclid(width_secs) as i16
}

/// Nominal start date of a bucket.
pub fn date_of(tag: &str, b: i16) -> DateTime<Utc> {
    bucket_epoch() + width(tag) * b as i32
}

/// Buckets covering `[t0, t1]`, newest first. This is the scan order of
/// every range query.
pub fn bucket_range(tag: &str, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Vec<i16> {
    let lo = bucket(tag, t0);
    let hi = bucket(tag, t1);
    if hi < lo {
        return Vec::new();
    }
    (lo..=hi).rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn epoch_is_bucket_zero() {
        assert_eq!(bucket("DIAMOND_SWORD", bucket_epoch()), 0);
        assert_eq!(bucket("ENCHANTED_BOOK", bucket_epoch()), 0);
    }

    #[test]
    fn ordinary_tags_use_weekly_buckets() {
        assert_eq!(bucket("DIAMOND_SWORD", at(2019, 1, 7)), 0);
        assert_eq!(bucket("DIAMOND_SWORD", at(2019, 1, 8)), 1);
        assert_eq!(bucket("DIAMOND_SWORD", at(2019, 1, 15)), 2);
    }

    #[test]
    fn high_volume_tags_use_half_day_buckets() {
        assert_eq!(
            bucket("ENCHANTED_BOOK", Utc.with_ymd_and_hms(2019, 1, 1, 11, 59, 59).unwrap()),
            0
        );
        assert_eq!(
            bucket("ENCHANTED_BOOK", Utc.with_ymd_and_hms(2019, 1, 1, 12, 0, 0).unwrap()),
            1
        );
        assert_eq!(bucket(UNKNOWN_TAG, at(2019, 1, 2)), 2);
    }

    #[test]
    fn bucket_is_monotone_per_tag() {
        let mut prev = bucket("DIAMOND_SWORD", at(2019, 1, 1));
        for day in 1..400u64 {
            let t = at(2019, 1, 1) + Duration::days(day as i64);
            let b = bucket("DIAMOND_SWORD", t);
            assert!(b >= prev, "bucket went backwards at day {day}");
            prev = b;
        }
    }

    #[test]
    fn date_of_inverts_bucket_start() {
        for tag in ["DIAMOND_SWORD", "ENCHANTED_BOOK"] {
            let b = bucket(tag, at(2024, 6, 15));
            let d = date_of(tag, b);
            assert_eq!(bucket(tag, d), b);
            assert!(d <= at(2024, 6, 15));
        }
    }

    #[test]
    fn legacy_high_volume_dates_land_in_small_buckets() {
        for _ in 0..20 {
            let b = bucket("ENCHANTED_BOOK", at(1999, 1, 1));
            assert!((0..10).contains(&b));
        }
    }

    #[test]
    fn pre_epoch_ordinary_dates_are_negative() {
        assert!(bucket("DIAMOND_SWORD", at(2018, 12, 1)) < 0);
    }

    #[test]
    fn range_walk_is_descending() {
        let buckets = bucket_range("DIAMOND_SWORD", at(2024, 1, 1), at(2024, 2, 1));
        assert!(!buckets.is_empty());
        for pair in buckets.windows(2) {
            assert_eq!(pair[0], pair[1] + 1);
        }
        assert_eq!(*buckets.last().unwrap(), bucket("DIAMOND_SWORD", at(2024, 1, 1)));
    }

    #[test]
    fn empty_range_when_reversed() {
        assert!(bucket_range("DIAMOND_SWORD", at(2024, 2, 1), at(2024, 1, 1)).is_empty());
    }
}
