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

//! Canonical conversion between the ingest record and the stored record.
//!
//! Encoding computes every derived field the hot store partitions or indexes
//! on: the time key, the sold flag, the item color, the numeric item uid,
//! the item uuid, and the highest bidder. The hot store disallows an
//! all-zero secondary index value, so bid-less auctions get a deterministic
//! synthetic bidder derived from the auction uuid.

use crate::auction::{Auction, Bid, SENTINEL_PROFILE_ID};
use crate::time_bucket;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Xor mask for the synthetic highest bidder of bid-less auctions.
const SYNTHETIC_BIDDER_MASK: u128 = 0x5356_4255_4c54_0000_0000_0000_0000_0001;

/// The record shape persisted in the hot store and in cold archive blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAuction {
    pub uuid: Uuid,
    pub tag: String,
    pub time_key: i16,
    pub is_sold: bool,
    pub end: DateTime<Utc>,
    pub item_uid: i64,
    pub item_uuid: Uuid,
    pub item_name: String,
    pub category: String,
    pub tier: String,
    pub color: String,
    pub bin: bool,
    pub count: i32,
    pub starting_bid: i64,
    pub highest_bid_amount: i64,
    pub seller: Uuid,
    pub profile_id: Uuid,
    pub highest_bidder: Uuid,
    pub coop_members: Vec<Uuid>,
    pub start: DateTime<Utc>,
    pub item_created_at: DateTime<Utc>,
    pub item_bytes: Vec<u8>,
    pub flat_nbt: BTreeMap<String, String>,
    pub enchantments: BTreeMap<String, i32>,
    pub bids: Vec<Bid>,
}

impl StoredAuction {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Build an enchantment map from raw pairs, keeping the maximum level when a
/// name collides. The `unknown` enchantment is the usual collider.
pub fn fold_enchantments(pairs: impl IntoIterator<Item = (String, i32)>) -> BTreeMap<String, i32> {
    let mut map = BTreeMap::new();
    for (name, level) in pairs {
        map.entry(name)
            .and_modify(|existing: &mut i32| *existing = (*existing).max(level))
            .or_insert(level);
    }
    map
}

pub struct AuctionCodec;

impl AuctionCodec {
    /// Encode an ingest record into the stored shape, evaluating `is_sold`
    /// against `now`.
    pub fn encode(auction: &Auction, now: DateTime<Utc>) -> StoredAuction {
        let tag = auction.tag_or_unknown().to_string();
        let item_uid = Self::derive_item_uid(&auction.flat_nbt);
        let bids: Vec<Bid> = auction.bids.iter().cloned().map(Bid::normalized).collect();

        let highest_bidder = bids
            .iter()
            .max_by_key(|b| b.amount)
            .map(|b| b.bidder)
            .unwrap_or_else(|| Self::synthetic_bidder(auction.uuid));

        let profile_id = if auction.profile_id.is_nil() {
            SENTINEL_PROFILE_ID
        } else {
            auction.profile_id
        };

        StoredAuction {
            uuid: auction.uuid,
            time_key: time_bucket::bucket(&tag, auction.end),
            is_sold: auction.highest_bid_amount > 0 && auction.end <= now,
            end: auction.end,
            item_uid,
            item_uuid: Self::derive_item_uuid(&auction.flat_nbt, item_uid),
            item_name: auction.item_name.clone(),
            category: auction.category.clone(),
            tier: auction.tier.clone(),
            color: auction.flat_nbt.get("color").cloned().unwrap_or_default(),
            bin: auction.bin,
            count: auction.count,
            starting_bid: auction.starting_bid,
            highest_bid_amount: auction.highest_bid_amount,
            seller: auction.seller,
            profile_id,
            highest_bidder,
            coop_members: auction.coop_members.clone(),
            start: auction.start,
            item_created_at: auction.item_created_at,
            item_bytes: auction.item_bytes.clone(),
            flat_nbt: auction.flat_nbt.clone(),
            enchantments: auction.enchantments.clone(),
            bids,
            tag,
        }
    }

    /// Recover the ingest shape from a stored record.
    pub fn decode(stored: StoredAuction) -> Auction {
        Auction {
            uuid: stored.uuid,
            tag: stored.tag,
            item_name: stored.item_name,
            category: stored.category,
            tier: stored.tier,
            bin: stored.bin,
            starting_bid: stored.starting_bid,
            highest_bid_amount: stored.highest_bid_amount,
            seller: stored.seller,
            profile_id: stored.profile_id,
            coop_members: stored.coop_members,
            start: stored.start,
            end: stored.end,
            item_created_at: stored.item_created_at,
            item_bytes: stored.item_bytes,
            flat_nbt: stored.flat_nbt,
            enchantments: stored.enchantments,
            count: stored.count,
            bids: stored.bids,
        }
    }

    /// Numeric item uid: the low 12 hex digits of the `uid` attribute, or a
    /// small positive random when the attribute is absent or malformed.
    fn derive_item_uid(flat_nbt: &BTreeMap<String, String>) -> i64 {
        flat_nbt
            .get("uid")
            .and_then(|uid| {
                let tail = if uid.len() > 12 { &uid[uid.len() - 12..] } else { uid };
                i64::from_str_radix(tail, 16).ok()
            })
            .filter(|v| *v > 0)
            .unwrap_or_else(|| rand::thread_rng().gen_range(1..i32::MAX as i64))
    }

    /// Item uuid from the `uuid` attribute, or synthesized as
    /// `00000000-...-{uid}` when the item predates item uuids.
    fn derive_item_uuid(flat_nbt: &BTreeMap<String, String>, item_uid: i64) -> Uuid {
        flat_nbt
            .get("uuid")
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(|| Uuid::from_u128(item_uid as u128))
    }

    fn synthetic_bidder(auction_uuid: Uuid) -> Uuid {
        let folded = Uuid::from_u128(auction_uuid.as_u128() ^ SYNTHETIC_BIDDER_MASK);
        if folded.is_nil() {
            Uuid::from_u128(SYNTHETIC_BIDDER_MASK)
        } else {
            folded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn sample() -> Auction {
        let mut flat_nbt = BTreeMap::new();
        flat_nbt.insert("uid".to_string(), "a1b2c3d4e5f6".to_string());
        flat_nbt.insert("color".to_string(), "255:0:0".to_string());
        let mut enchantments = BTreeMap::new();
        enchantments.insert("sharpness".to_string(), 5);

        Auction {
            uuid: Uuid::from_u128(0xdead_beef),
            tag: "DIAMOND_SWORD".into(),
            item_name: "Sword".into(),
            category: "weapon".into(),
            tier: "EPIC".into(),
            bin: false,
            starting_bid: 100,
            highest_bid_amount: 500,
            seller: Uuid::from_u128(11),
            profile_id: Uuid::from_u128(12),
            coop_members: vec![],
            start: ts(1_718_000_000),
            end: ts(1_718_400_000),
            item_created_at: ts(1_700_000_000),
            item_bytes: vec![1, 2, 3],
            flat_nbt,
            enchantments,
            count: 1,
            bids: vec![Bid {
                bidder: Uuid::from_u128(21),
                profile_id: Uuid::from_u128(21),
                amount: 500,
                timestamp: ts(1_718_300_000),
            }],
        }
    }

    #[test]
    fn round_trip_preserves_the_record() {
        let auction = sample();
        let stored = AuctionCodec::encode(&auction, ts(1_719_000_000));
        let decoded = AuctionCodec::decode(stored);
        assert_eq!(decoded, auction);
    }

    #[test]
    fn derived_fields_are_computed() {
        let auction = sample();
        let stored = AuctionCodec::encode(&auction, ts(1_719_000_000));

        assert_eq!(stored.item_uid, 0xa1b2c3d4e5f6);
        assert_eq!(stored.item_uuid, Uuid::from_u128(0xa1b2c3d4e5f6));
        assert_eq!(stored.color, "255:0:0");
        assert!(stored.is_sold);
        assert_eq!(stored.highest_bidder, Uuid::from_u128(21));
        assert_eq!(stored.time_key, time_bucket::bucket("DIAMOND_SWORD", auction.end));
    }

    #[test]
    fn unsold_when_end_in_future() {
        let auction = sample();
        let stored = AuctionCodec::encode(&auction, ts(1_718_000_001));
        assert!(!stored.is_sold);
    }

    #[test]
    fn unsold_when_no_bid_amount() {
        let mut auction = sample();
        auction.highest_bid_amount = 0;
        auction.bids.clear();
        let stored = AuctionCodec::encode(&auction, ts(1_719_000_000));
        assert!(!stored.is_sold);
    }

    #[test]
    fn bidless_auction_gets_deterministic_synthetic_bidder() {
        let mut auction = sample();
        auction.bids.clear();
        let a = AuctionCodec::encode(&auction, ts(1_719_000_000));
        let b = AuctionCodec::encode(&auction, ts(1_719_000_000));
        assert!(!a.highest_bidder.is_nil());
        assert_eq!(a.highest_bidder, b.highest_bidder);
    }

    #[test]
    fn missing_uid_falls_back_to_small_positive_random() {
        let mut auction = sample();
        auction.flat_nbt.remove("uid");
        let stored = AuctionCodec::encode(&auction, ts(1_719_000_000));
        assert!(stored.item_uid > 0);
        assert!(stored.item_uid < i32::MAX as i64);
    }

    #[test]
    fn empty_tag_encodes_as_unknown() {
        let mut auction = sample();
        auction.tag.clear();
        let stored = AuctionCodec::encode(&auction, ts(1_719_000_000));
        assert_eq!(stored.tag, "unknown");
    }

    #[test]
    fn nil_profile_encodes_as_sentinel() {
        let mut auction = sample();
        auction.profile_id = Uuid::nil();
        let stored = AuctionCodec::encode(&auction, ts(1_719_000_000));
        assert_eq!(stored.profile_id, SENTINEL_PROFILE_ID);
    }

    #[test]
    fn stored_bytes_round_trip() {
        let stored = AuctionCodec::encode(&sample(), ts(1_719_000_000));
        let bytes = stored.to_bytes().unwrap();
        assert_eq!(StoredAuction::from_bytes(&bytes).unwrap(), stored);
    }

    #[test]
    fn enchantment_fold_keeps_max_level_on_collision() {
        let map = fold_enchantments(vec![
            ("unknown".to_string(), 3),
            ("sharpness".to_string(), 5),
            ("unknown".to_string(), 7),
            ("unknown".to_string(), 2),
        ]);
        assert_eq!(map.get("unknown"), Some(&7));
        assert_eq!(map.get("sharpness"), Some(&5));
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            uuid in any::<u128>(),
            seller in 1..u128::MAX,
            end_offset in 0i64..100_000_000,
            price in 0i64..1_000_000_000,
            count in 1i32..64,
            uid in 1i64..0xffff_ffff_ffffi64,
        ) {
            let mut auction = sample();
            auction.uuid = Uuid::from_u128(uuid);
            auction.seller = Uuid::from_u128(seller);
            auction.end = ts(1_600_000_000 + end_offset);
            auction.start = ts(1_600_000_000);
            auction.highest_bid_amount = price;
            auction.bids = if price > 0 {
                vec![Bid {
                    bidder: Uuid::from_u128(seller ^ 1),
                    profile_id: Uuid::from_u128(seller ^ 1),
                    amount: price,
                    timestamp: auction.end,
                }]
            } else {
                Vec::new()
            };
            auction.flat_nbt.insert("uid".to_string(), format!("{uid:x}"));

            let stored = AuctionCodec::encode(&auction, ts(1_800_000_000));
            let decoded = AuctionCodec::decode(stored);
            prop_assert_eq!(decoded, auction);
        }
    }
}
