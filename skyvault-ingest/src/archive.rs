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

//! Archive migrator: moves whole months from hot to cold.
//!
//! For every tag, every month older than the retention window is sealed
//! into a cold blob, read back and verified, and only then deleted from
//! the hot store. A verification mismatch aborts the pass with nothing
//! deleted. Progress needs no pointer: a month is done exactly when its
//! blob exists and verifies.

use chrono::{DateTime, Months, TimeZone, Utc};
use rand::seq::SliceRandom;
use skyvault_core::{Auction, Result, SkyvaultError};
use skyvault_storage::{ColdStore, HotStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// No auctions exist before this year.
pub const ARCHIVE_START_YEAR: i32 = 2019;

/// Rows sampled for field-level verification.
const VERIFY_SAMPLES: usize = 10;

pub struct ArchiveMigrator {
    hot: Arc<dyn HotStore>,
    cold: Arc<ColdStore>,
    retention_months: u32,
    dry_run: bool,
    verification_failures: AtomicU64,
    months_archived: AtomicU64,
}

impl ArchiveMigrator {
    pub fn new(hot: Arc<dyn HotStore>, cold: Arc<ColdStore>, retention_months: u32) -> Self {
        Self {
            hot,
            cold,
            retention_months,
            dry_run: false,
            verification_failures: AtomicU64::new(0),
            months_archived: AtomicU64::new(0),
        }
    }

    /// Copy and verify without deleting from hot.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn verification_failures(&self) -> u64 {
        self.verification_failures.load(Ordering::Relaxed)
    }

    pub fn months_archived(&self) -> u64 {
        self.months_archived.load(Ordering::Relaxed)
    }

    fn month_start(year: i32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    fn next_month(year: i32, month: u32) -> (i32, u32) {
        if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        }
    }

    /// Months from 2019-01 whose end falls before the retention horizon.
    fn archivable_months(&self, now: DateTime<Utc>) -> Vec<(i32, u32)> {
        let horizon = now
            .checked_sub_months(Months::new(self.retention_months))
            .unwrap_or(now);

        let mut months = Vec::new();
        let (mut year, mut month) = (ARCHIVE_START_YEAR, 1u32);
        loop {
            let (next_year, next_month) = Self::next_month(year, month);
            if Self::month_start(next_year, next_month) > horizon {
                break;
            }
            months.push((year, month));
            year = next_year;
            month = next_month;
        }
        months
    }

    /// One full pass over every tag and archivable month. Returns months
    /// sealed this pass; aborts on the first verification failure without
    /// deleting anything.
    pub async fn run_once(&self) -> Result<u64> {
        let now = Utc::now();
        let months = self.archivable_months(now);
        let tags = self.hot.distinct_tags().await?;
        let mut sealed = 0u64;

        for tag in tags {
            for &(year, month) in &months {
                if self.cold.month_exists(&tag, year, month).await? {
                    continue;
                }

                let month_start = Self::month_start(year, month);
                let (next_year, next_month) = Self::next_month(year, month);
                let month_end = Self::month_start(next_year, next_month);
                // end ∈ [month_start, month_end)
                let rows = self
                    .hot
                    .range(
                        &tag,
                        month_start - chrono::Duration::seconds(1),
                        month_end - chrono::Duration::seconds(1),
                        None,
                        usize::MAX,
                    )
                    .await?;
                if rows.is_empty() {
                    continue;
                }

                self.cold.store_month(&tag, year, month, &rows).await?;

                if let Err(e) = self.verify(&tag, year, month, &rows).await {
                    self.verification_failures.fetch_add(1, Ordering::Relaxed);
                    error!(tag = %tag, year, month, error = %e, "verification failed, hot rows retained");
                    return Err(e);
                }

                if self.dry_run {
                    info!(tag = %tag, year, month, rows = rows.len(), "dry run, skipping deletion");
                } else {
                    let deleted = self.hot.delete_rows(&rows).await?;
                    info!(tag = %tag, year, month, deleted, "month migrated to cold");
                }
                sealed += 1;
                self.months_archived.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(sealed)
    }

    /// Read the blob back and compare it against what was sealed: equal
    /// count, equal uuid set, and matching fields on a random sample.
    async fn verify(&self, tag: &str, year: i32, month: u32, rows: &[Auction]) -> Result<()> {
        let archived = self.cold.get_month(tag, year, month).await?;

        if archived.len() != rows.len() {
            return Err(SkyvaultError::VerificationFailed(format!(
                "{tag} {year}-{month:02}: blob holds {} rows, expected {}",
                archived.len(),
                rows.len()
            )));
        }

        let archived_uuids: HashSet<Uuid> = archived.iter().map(|a| a.uuid).collect();
        let hot_uuids: HashSet<Uuid> = rows.iter().map(|a| a.uuid).collect();
        if archived_uuids != hot_uuids {
            return Err(SkyvaultError::VerificationFailed(format!(
                "{tag} {year}-{month:02}: uuid sets differ"
            )));
        }

        let mut samples: Vec<&Auction> = rows.iter().collect();
        samples.shuffle(&mut rand::thread_rng());
        for sample in samples.into_iter().take(VERIFY_SAMPLES) {
            let Some(twin) = archived.iter().find(|a| {
                a.uuid == sample.uuid && a.end == sample.end
            }) else {
                return Err(SkyvaultError::VerificationFailed(format!(
                    "{tag} {year}-{month:02}: sampled row {} missing from blob",
                    sample.uuid
                )));
            };
            if twin.highest_bid_amount != sample.highest_bid_amount
                || twin.seller != sample.seller
                || twin.tag_or_unknown() != sample.tag_or_unknown()
            {
                return Err(SkyvaultError::VerificationFailed(format!(
                    "{tag} {year}-{month:02}: sampled row {} differs in blob",
                    sample.uuid
                )));
            }
        }

        Ok(())
    }

    /// Periodic driver, nominally once per day.
    pub async fn run(&self, cancel: CancellationToken, interval: Duration) {
        loop {
            match self.run_once().await {
                Ok(sealed) if sealed > 0 => info!(sealed, "archive pass complete"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "archive pass aborted"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use skyvault_core::Bid;
    use skyvault_storage::{MemoryBackend, MemoryHotStore};

    fn small_cold() -> Arc<ColdStore> {
        Arc::new(ColdStore::new(
            Arc::new(MemoryBackend::new()),
            skyvault_core::ColdStoreConfig {
                master_bloom_capacity: 10_000,
                tag_bloom_capacity: 1_000,
                ..Default::default()
            },
        ))
    }

    fn auction(uuid: u128, tag: &str, end: DateTime<Utc>) -> Auction {
        Auction {
            uuid: Uuid::from_u128(uuid),
            tag: tag.to_string(),
            seller: Uuid::from_u128(uuid ^ 0xff),
            start: end - ChronoDuration::days(1),
            end,
            highest_bid_amount: 1_000,
            bids: vec![Bid {
                bidder: Uuid::from_u128(uuid ^ 0xabc),
                profile_id: Uuid::from_u128(uuid ^ 0xabc),
                amount: 1_000,
                timestamp: end,
            }],
            count: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn archivable_months_respect_retention() {
        let migrator = ArchiveMigrator::new(Arc::new(MemoryHotStore::new()), small_cold(), 3);
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();

        let months = migrator.archivable_months(now);
        assert_eq!(months.first(), Some(&(2019, 1)));
        // horizon = 2024-03-15, so 2024-02 is the last full month before it
        assert_eq!(months.last(), Some(&(2024, 2)));
    }

    #[tokio::test]
    async fn migrates_verify_then_delete() {
        let hot = Arc::new(MemoryHotStore::new());
        let cold = small_cold();

        let end = Utc.with_ymd_and_hms(2023, 1, 15, 12, 0, 0).unwrap();
        for i in 0..25u128 {
            hot.insert(&auction(i, "X", end + ChronoDuration::hours(i as i64)))
                .await
                .unwrap();
        }

        let migrator = ArchiveMigrator::new(hot.clone(), cold.clone(), 3);
        let sealed = migrator.run_once().await.unwrap();
        assert_eq!(sealed, 1);
        assert_eq!(migrator.verification_failures(), 0);

        // hot is empty for that month, cold holds the rows
        assert!(hot.get_by_uuid(Uuid::from_u128(0)).await.unwrap().is_empty());
        let archived = cold.get_month("X", 2023, 1).await.unwrap();
        assert_eq!(archived.len(), 25);

        // a second pass is a no-op: progress is implicit in the blob
        assert_eq!(migrator.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dry_run_keeps_hot_rows() {
        let hot = Arc::new(MemoryHotStore::new());
        let cold = small_cold();

        let end = Utc.with_ymd_and_hms(2023, 2, 10, 0, 0, 0).unwrap();
        hot.insert(&auction(1, "X", end)).await.unwrap();

        let migrator = ArchiveMigrator::new(hot.clone(), cold.clone(), 3).with_dry_run(true);
        assert_eq!(migrator.run_once().await.unwrap(), 1);

        assert_eq!(hot.get_by_uuid(Uuid::from_u128(1)).await.unwrap().len(), 1);
        assert_eq!(cold.get_month("X", 2023, 2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn verification_failure_preserves_hot() {
        use skyvault_core::ColdStoreConfig;
        use skyvault_storage::{ObjectBackend, ObjectMetadata};
        use std::collections::BTreeMap;

        // A backend that loses one row from every sealed blob, the kind of
        // silent corruption verification exists to catch.
        struct LossyBackend {
            inner: MemoryBackend,
            wrong_blob: Vec<u8>,
        }

        #[async_trait::async_trait]
        impl ObjectBackend for LossyBackend {
            async fn put(
                &self,
                key: &str,
                data: Vec<u8>,
                metadata: BTreeMap<String, String>,
            ) -> Result<()> {
                let data = if key.ends_with(".blob") {
                    self.wrong_blob.clone()
                } else {
                    data
                };
                self.inner.put(key, data, metadata).await
            }
            async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
                self.inner.get(key).await
            }
            async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>> {
                self.inner.head(key).await
            }
            async fn delete(&self, key: &str) -> Result<()> {
                self.inner.delete(key).await
            }
            async fn list(&self, prefix: &str) -> Result<Vec<String>> {
                self.inner.list(prefix).await
            }
        }

        let end = Utc.with_ymd_and_hms(2023, 1, 15, 12, 0, 0).unwrap();

        // Capture a blob that is missing one uuid.
        let scratch_backend = Arc::new(MemoryBackend::new());
        let scratch = ColdStore::new(
            scratch_backend.clone(),
            ColdStoreConfig {
                master_bloom_capacity: 10_000,
                tag_bloom_capacity: 1_000,
                ..Default::default()
            },
        );
        let incomplete: Vec<Auction> = (0..4u128)
            .map(|i| auction(i, "X", end + ChronoDuration::hours(i as i64)))
            .collect();
        scratch.store_month("X", 2023, 1, &incomplete).await.unwrap();
        let wrong_blob = scratch_backend
            .get(&ColdStore::data_key("X", 2023, 1))
            .await
            .unwrap()
            .unwrap();

        let cold = Arc::new(ColdStore::new(
            Arc::new(LossyBackend {
                inner: MemoryBackend::new(),
                wrong_blob,
            }),
            ColdStoreConfig {
                master_bloom_capacity: 10_000,
                tag_bloom_capacity: 1_000,
                ..Default::default()
            },
        ));

        let hot = Arc::new(MemoryHotStore::new());
        for i in 0..5u128 {
            hot.insert(&auction(i, "X", end + ChronoDuration::hours(i as i64)))
                .await
                .unwrap();
        }

        let migrator = ArchiveMigrator::new(hot.clone(), cold, 3);
        let result = migrator.run_once().await;

        assert!(matches!(result, Err(SkyvaultError::VerificationFailed(_))));
        assert_eq!(migrator.verification_failures(), 1);
        // nothing was deleted
        for i in 0..5u128 {
            assert_eq!(hot.get_by_uuid(Uuid::from_u128(i)).await.unwrap().len(), 1);
        }
    }
}
