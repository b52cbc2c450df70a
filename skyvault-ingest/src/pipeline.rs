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

//! Write ingestion: the live bus consumer and the historical migrator.
//!
//! Both paths converge on per-tag micro-batches into the hot store, with
//! bids flattened and re-grouped by bidder. The historical migrator pages
//! the legacy relational source and checkpoints the import offset five
//! batches behind in-flight work, so a crash resumes safely before
//! anything that might not have landed.

use crate::bus::{MessageBus, CONSUMER_GROUP};
use crate::offset::ImportOffset;
use crate::queue::WorkQueue;
use crate::source::SourceRows;
use futures::stream::{self, StreamExt};
use skyvault_core::{Auction, Bid, IngestConfig, Result, TopicsConfig};
use skyvault_storage::HotStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Tags handled by one fan-out work item.
const TAGS_PER_GROUP: usize = 10;
/// Bidders handled by one fan-out work item.
const BIDDERS_PER_GROUP: usize = 20;
/// Auctions per same-tag micro-batch in the historical path.
pub const AUCTION_MICRO_BATCH: usize = 12;
/// Bidder groups per bid micro-batch in the historical path.
pub const BID_MICRO_BATCH: usize = 3;
/// The checkpoint trails the cursor by this many batches.
pub const CHECKPOINT_LAG_BATCHES: i64 = 5;

fn group_by_tag(auctions: Vec<Auction>) -> BTreeMap<String, Vec<Auction>> {
    let mut by_tag: BTreeMap<String, Vec<Auction>> = BTreeMap::new();
    for auction in auctions {
        by_tag
            .entry(auction.tag_or_unknown().to_string())
            .or_default()
            .push(auction);
    }
    by_tag
}

fn bids_by_bidder<'a>(
    auctions: impl Iterator<Item = &'a Auction>,
) -> BTreeMap<u128, Vec<(Uuid, Bid)>> {
    let mut by_bidder: BTreeMap<u128, Vec<(Uuid, Bid)>> = BTreeMap::new();
    for auction in auctions {
        for bid in &auction.bids {
            by_bidder
                .entry(bid.bidder.as_u128())
                .or_default()
                .push((auction.uuid, bid.clone()));
        }
    }
    by_bidder
}

fn chunked<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    for item in items {
        current.push(item);
        if current.len() == size {
            groups.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Batch writer shared by the live consumer: two bounded fan-outs, one
/// over tag groups and one over bidder groups.
pub struct InsertSells {
    hot: Arc<dyn HotStore>,
    parallelism: usize,
}

impl InsertSells {
    pub fn new(hot: Arc<dyn HotStore>, parallelism: usize) -> Self {
        Self {
            hot,
            parallelism: parallelism.max(1),
        }
    }

    /// Insert one bus batch. A failing group logs and the first error is
    /// rethrown so the bus redelivers the batch.
    pub async fn insert_batch(&self, auctions: Vec<Auction>) -> Result<()> {
        let by_bidder = bids_by_bidder(auctions.iter());
        let by_tag = group_by_tag(auctions);

        let tag_groups = chunked(by_tag.into_iter().collect(), TAGS_PER_GROUP);
        let mut first_error: Option<skyvault_core::SkyvaultError> = None;

        let mut results = stream::iter(tag_groups.into_iter().map(|group| {
            let hot = self.hot.clone();
            async move {
                for (tag, batch) in group {
                    if let Err(e) = hot.insert_batch_same_tag(batch).await {
                        error!(tag = %tag, error = %e, "tag group insert failed");
                        return Err(e);
                    }
                }
                Ok(())
            }
        }))
        .buffer_unordered(self.parallelism);
        while let Some(result) = results.next().await {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        drop(results);

        let bidder_groups = chunked(by_bidder.into_values().collect(), BIDDERS_PER_GROUP);
        let mut results = stream::iter(bidder_groups.into_iter().map(|group| {
            let hot = self.hot.clone();
            async move {
                let bids: Vec<(Uuid, Bid)> = group.into_iter().flatten().collect();
                if let Err(e) = hot.insert_bids(bids).await {
                    error!(error = %e, "bidder group insert failed");
                    return Err(e);
                }
                Ok(())
            }
        }))
        .buffer_unordered(self.parallelism);
        while let Some(result) = results.next().await {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Live consumer over the bus topics, active once the historical migrator
/// has drained.
pub struct LiveConsumer {
    bus: Arc<dyn MessageBus>,
    inserter: InsertSells,
    topics: Vec<String>,
    batch: usize,
}

impl LiveConsumer {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        inserter: InsertSells,
        topics: &TopicsConfig,
        batch: usize,
    ) -> Self {
        Self {
            bus,
            inserter,
            topics: vec![topics.sold_auction.clone(), topics.new_auction.clone()],
            batch,
        }
    }

    /// Poll and process one batch. Returns records consumed; a failed
    /// batch is returned to the bus for redelivery before the error
    /// propagates.
    pub async fn run_once(&self) -> Result<usize> {
        let records = self
            .bus
            .poll(CONSUMER_GROUP, &self.topics, self.batch)
            .await?;
        if records.is_empty() {
            return Ok(0);
        }
        let count = records.len();

        let mut auctions = Vec::with_capacity(count);
        for record in &records {
            match serde_json::from_value::<Auction>(record.body.clone()) {
                Ok(auction) => auctions.push(auction),
                Err(e) => {
                    warn!(topic = record.topic.as_str(), error = %e, "dropping undecodable bus record")
                }
            }
        }

        if let Err(e) = self.inserter.insert_batch(auctions).await {
            self.bus.nack(CONSUMER_GROUP, records).await?;
            return Err(e);
        }
        Ok(count)
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(topics = ?self.topics, batch = self.batch, "live consumer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.run_once() => match result {
                    Ok(0) => tokio::time::sleep(Duration::from_millis(200)).await,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "bus batch failed, backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }
        info!("live consumer stopped");
    }
}

/// Drains the legacy relational database into the hot store through the
/// thunk queues.
pub struct HistoricalMigrator {
    source: Arc<dyn SourceRows>,
    hot: Arc<dyn HotStore>,
    offset: Arc<ImportOffset>,
    auction_queue: WorkQueue,
    bid_queue: WorkQueue,
    config: IngestConfig,
}

impl HistoricalMigrator {
    pub fn new(
        source: Arc<dyn SourceRows>,
        hot: Arc<dyn HotStore>,
        offset: Arc<ImportOffset>,
        auction_queue: WorkQueue,
        bid_queue: WorkQueue,
        config: IngestConfig,
    ) -> Self {
        Self {
            source,
            hot,
            offset,
            auction_queue,
            bid_queue,
            config,
        }
    }

    /// Page the source until empty. Returns rows enqueued.
    pub async fn run(&self, cancel: CancellationToken) -> Result<u64> {
        let batch = self.config.source_batch;
        let mut cursor = self.offset.current().max(0);
        let mut total = 0u64;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let rows = self.source.page(cursor, batch).await?;
            let next = match rows.last() {
                Some((id, _)) => id + 1,
                None => {
                    info!(cursor, total, "historical source drained");
                    break;
                }
            };
            total += rows.len() as u64;

            let auctions: Vec<Auction> = rows.into_iter().map(|(_, auction)| auction).collect();
            let by_bidder = bids_by_bidder(auctions.iter());

            for (_, tag_rows) in group_by_tag(auctions) {
                for micro_batch in chunked(tag_rows, AUCTION_MICRO_BATCH) {
                    let hot = self.hot.clone();
                    self.auction_queue.submit(move || {
                        let hot = hot.clone();
                        let micro_batch = micro_batch.clone();
                        async move { hot.insert_batch_same_tag(micro_batch).await.map(|_| ()) }
                    });
                }
            }

            for bidder_group in chunked(by_bidder.into_values().collect(), BID_MICRO_BATCH) {
                let hot = self.hot.clone();
                let bids: Vec<(Uuid, Bid)> = bidder_group.into_iter().flatten().collect();
                self.bid_queue.submit(move || {
                    let hot = hot.clone();
                    let bids = bids.clone();
                    async move { hot.insert_bids(bids).await }
                });
            }

            // Checkpoint five batches behind so the offset never points past
            // work that is still in the queues.
            let checkpoint = next - CHECKPOINT_LAG_BATCHES * batch as i64;
            let offset = self.offset.clone();
            self.auction_queue.submit(move || {
                let offset = offset.clone();
                async move { offset.set(checkpoint).await.map(|_| ()) }
            });

            while self.auction_queue.depth() > self.config.auction_watermark
                || self.bid_queue.depth() > self.config.bid_watermark
            {
                if cancel.is_cancelled() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }

            cursor = next;
        }

        Ok(total)
    }

    /// Final checkpoint once the queues have drained.
    pub async fn finalize(&self, cursor: i64) -> Result<()> {
        self.offset.force(cursor).await?;
        Ok(())
    }
}
