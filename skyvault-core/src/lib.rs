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

//! Skyvault Core
//!
//! Domain model and pure logic for the auction archive: auctions and bids,
//! time bucketing, the stored-record codec, the filter contract, and
//! configuration. No I/O lives in this crate.

pub mod auction;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod time_bucket;

pub use auction::{
    combine_versions, rebase_to_utc, Auction, Bid, SENTINEL_PROFILE_ID, UNKNOWN_TAG,
};
pub use codec::{fold_enchantments, AuctionCodec, StoredAuction};
pub use config::{
    CacheConfig, ColdStoreConfig, HotStoreConfig, IngestConfig, SkyvaultConfig, TopicsConfig,
    DEFAULT_RETENTION_MONTHS,
};
pub use error::{Result, SkyvaultError};
pub use filter::{
    filter_key, parse_time_filter, EqualityFilterCompiler, FilterCompiler, Predicate,
    FILTER_END_AFTER, FILTER_END_BEFORE,
};
pub use time_bucket::{bucket, bucket_epoch, bucket_range, date_of, is_high_volume_tag, width};
