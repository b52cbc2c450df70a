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

//! Auction and bid domain model.
//!
//! An auction arrives either as a "listed" event (full listing metadata, no
//! sale yet) or as a "sold" event (price and bids, sparse listing metadata).
//! Both are represented by [`Auction`]; sparse sold events carry default
//! values in the listing fields until retrofit fills them in.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Tag used for items whose tag is missing from the ingest record.
pub const UNKNOWN_TAG: &str = "unknown";

/// Profile id stored when a bid's profile is absent or the literal "unknown".
pub const SENTINEL_PROFILE_ID: Uuid = Uuid::from_u128(1);

/// A single bid on an auction.
///
/// Bid identity is `(auction_uuid, amount, timestamp)`; there is no separate
/// bid id on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub bidder: Uuid,
    #[serde(default)]
    pub profile_id: Uuid,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

impl Bid {
    /// Apply the profile defaulting rule: absent (nil) or the literal
    /// "unknown" profile collapses to the sentinel.
    pub fn normalized(mut self) -> Self {
        if self.profile_id.is_nil() {
            self.profile_id = SENTINEL_PROFILE_ID;
        }
        self
    }
}

/// Rebase a timestamp that arrived with a non-UTC offset by subtracting the
/// local offset, i.e. reinterpret the wall-clock reading as UTC.
pub fn rebase_to_utc(dt: DateTime<FixedOffset>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&dt.naive_local())
}

/// The primary entity: one auction-house listing with its bids, item
/// metadata, enchantments, and flattened NBT attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auction {
    pub uuid: Uuid,
    /// Item tag, e.g. `ENCHANTED_BOOK`. Missing tags ingest as [`UNKNOWN_TAG`].
    pub tag: String,
    pub item_name: String,
    pub category: String,
    pub tier: String,
    pub bin: bool,
    pub starting_bid: i64,
    pub highest_bid_amount: i64,
    pub seller: Uuid,
    pub profile_id: Uuid,
    pub coop_members: Vec<Uuid>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub item_created_at: DateTime<Utc>,
    /// Raw item payload, opaque to the archive.
    #[serde(default)]
    pub item_bytes: Vec<u8>,
    /// Flattened NBT view, string to string. Includes synthetic keys such as
    /// `uid`, `uuid`, `color`, `modifier`, `anvil_uses`.
    #[serde(default)]
    pub flat_nbt: BTreeMap<String, String>,
    /// Enchantment name to level.
    #[serde(default)]
    pub enchantments: BTreeMap<String, i32>,
    pub count: i32,
    #[serde(default)]
    pub bids: Vec<Bid>,
}

impl Default for Auction {
    fn default() -> Self {
        Self {
            uuid: Uuid::nil(),
            tag: String::new(),
            item_name: String::new(),
            category: String::new(),
            tier: String::new(),
            bin: false,
            starting_bid: 0,
            highest_bid_amount: 0,
            seller: Uuid::nil(),
            profile_id: Uuid::nil(),
            coop_members: Vec::new(),
            start: DateTime::<Utc>::UNIX_EPOCH,
            end: DateTime::<Utc>::UNIX_EPOCH,
            item_created_at: DateTime::<Utc>::UNIX_EPOCH,
            item_bytes: Vec::new(),
            flat_nbt: BTreeMap::new(),
            enchantments: BTreeMap::new(),
            count: 0,
            bids: Vec::new(),
        }
    }
}

impl Auction {
    /// The effective tag, mapping an empty tag to [`UNKNOWN_TAG`].
    pub fn tag_or_unknown(&self) -> &str {
        if self.tag.is_empty() {
            UNKNOWN_TAG
        } else {
            &self.tag
        }
    }

    /// A sold event that never saw its listing carries a default start.
    pub fn is_sparse_sold_event(&self) -> bool {
        self.start == DateTime::<Utc>::UNIX_EPOCH && self.highest_bid_amount > 0
    }

    /// The bid with the highest amount, if any.
    pub fn highest_bid(&self) -> Option<&Bid> {
        self.bids.iter().max_by_key(|b| b.amount)
    }

    /// Check the structural invariants of a well-formed auction.
    pub fn validate(&self) -> crate::Result<()> {
        if self.end < self.start {
            return Err(crate::SkyvaultError::InvalidInput(format!(
                "auction {} ends before it starts",
                self.uuid
            )));
        }
        if self.bids.iter().any(|b| b.amount <= 0) {
            return Err(crate::SkyvaultError::InvalidInput(format!(
                "auction {} has a non-positive bid",
                self.uuid
            )));
        }
        if let Some(top) = self.highest_bid() {
            if self.highest_bid_amount != top.amount {
                return Err(crate::SkyvaultError::InvalidInput(format!(
                    "auction {} highest bid mismatch: {} != {}",
                    self.uuid, self.highest_bid_amount, top.amount
                )));
            }
        }
        Ok(())
    }
}

/// Fold multiple stored versions of the same auction into one.
///
/// Both a "listed" and a "sold" event may have been ingested for the same
/// uuid, yielding two rows. Versions where `seller == uuid` are a known
/// corruption marker and are excluded. Bids are unioned under the dedup key
/// `amount` (equal amounts are assumed to be the same bid replayed), and the
/// listing fields are filled from the first non-default value encountered in
/// fold order.
pub fn combine_versions(versions: Vec<Auction>) -> Option<Auction> {
    let mut iter = versions
        .into_iter()
        .filter(|a| a.seller != a.uuid || a.seller.is_nil());

    let mut combined = iter.next()?;

    for version in iter {
        for bid in version.bids {
            if !combined.bids.iter().any(|b| b.amount == bid.amount) {
                combined.bids.push(bid);
            }
        }

        if combined.coop_members.is_empty() && !version.coop_members.is_empty() {
            combined.coop_members = version.coop_members;
        }
        if combined.starting_bid == 0 && version.starting_bid != 0 {
            combined.starting_bid = version.starting_bid;
        }
        if combined.category.is_empty() && !version.category.is_empty() {
            combined.category = version.category;
        }
        if combined.start == DateTime::<Utc>::UNIX_EPOCH
            && version.start != DateTime::<Utc>::UNIX_EPOCH
        {
            combined.start = version.start;
        }
        if (combined.profile_id.is_nil() || combined.profile_id == SENTINEL_PROFILE_ID)
            && !version.profile_id.is_nil()
            && version.profile_id != SENTINEL_PROFILE_ID
        {
            combined.profile_id = version.profile_id;
        }
        if combined.highest_bid_amount < version.highest_bid_amount {
            combined.highest_bid_amount = version.highest_bid_amount;
        }
        if combined.item_name.is_empty() && !version.item_name.is_empty() {
            combined.item_name = version.item_name;
        }
    }

    combined.bids.sort_by_key(|b| b.timestamp);
    Some(combined)
}
