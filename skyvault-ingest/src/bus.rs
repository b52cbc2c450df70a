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

//! Message bus seam.
//!
//! Production consumes Kafka topics; the archive only needs batched polls
//! with redelivery on failure. Payloads stay opaque JSON until the
//! pipeline decodes them.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use skyvault_core::Result;
use std::collections::VecDeque;

/// Consumer group of the auction archive.
pub const CONSUMER_GROUP: &str = "sky-auctions";

/// One bus record, not yet decoded.
#[derive(Debug, Clone)]
pub struct BusRecord {
    pub topic: String,
    pub body: serde_json::Value,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, body: serde_json::Value) -> Result<()>;

    /// Up to `max` records across `topics`, in arrival order.
    async fn poll(&self, group: &str, topics: &[String], max: usize) -> Result<Vec<BusRecord>>;

    /// Return records for redelivery after a failed batch.
    async fn nack(&self, group: &str, records: Vec<BusRecord>) -> Result<()>;
}

/// In-process bus for tests and embedded use. Groups share one cursor per
/// topic, which is all the archive's single consumer group needs.
#[derive(Debug, Default)]
pub struct MemoryBus {
    topics: DashMap<String, Mutex<VecDeque<serde_json::Value>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, body: serde_json::Value) -> Result<()> {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .lock()
            .push_back(body);
        Ok(())
    }

    async fn poll(&self, _group: &str, topics: &[String], max: usize) -> Result<Vec<BusRecord>> {
        let mut out = Vec::new();
        for topic in topics {
            if out.len() >= max {
                break;
            }
            if let Some(queue) = self.topics.get(topic.as_str()) {
                let mut queue = queue.lock();
                while out.len() < max {
                    match queue.pop_front() {
                        Some(body) => out.push(BusRecord {
                            topic: topic.clone(),
                            body,
                        }),
                        None => break,
                    }
                }
            }
        }
        Ok(out)
    }

    async fn nack(&self, _group: &str, records: Vec<BusRecord>) -> Result<()> {
        for record in records.into_iter().rev() {
            self.topics
                .entry(record.topic)
                .or_default()
                .lock()
                .push_front(record.body);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_poll_order() {
        let bus = MemoryBus::new();
        for i in 0..5 {
            bus.publish("SOLD_AUCTION", json!({ "i": i })).await.unwrap();
        }

        let records = bus
            .poll(CONSUMER_GROUP, &["SOLD_AUCTION".to_string()], 3)
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].body["i"], 0);

        let rest = bus
            .poll(CONSUMER_GROUP, &["SOLD_AUCTION".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn nack_redelivers_in_order() {
        let bus = MemoryBus::new();
        bus.publish("NEW_AUCTION", json!({ "i": 0 })).await.unwrap();
        bus.publish("NEW_AUCTION", json!({ "i": 1 })).await.unwrap();

        let topics = vec!["NEW_AUCTION".to_string()];
        let records = bus.poll(CONSUMER_GROUP, &topics, 10).await.unwrap();
        assert_eq!(records.len(), 2);

        bus.nack(CONSUMER_GROUP, records).await.unwrap();
        let redelivered = bus.poll(CONSUMER_GROUP, &topics, 10).await.unwrap();
        assert_eq!(redelivered.len(), 2);
        assert_eq!(redelivered[0].body["i"], 0);
    }

    #[tokio::test]
    async fn poll_spans_topics() {
        let bus = MemoryBus::new();
        bus.publish("SOLD_AUCTION", json!({ "t": "sold" })).await.unwrap();
        bus.publish("NEW_AUCTION", json!({ "t": "new" })).await.unwrap();

        let records = bus
            .poll(
                CONSUMER_GROUP,
                &["SOLD_AUCTION".to_string(), "NEW_AUCTION".to_string()],
                10,
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }
}
