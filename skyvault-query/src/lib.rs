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

//! Skyvault Query Layer
//!
//! High-level query API over the two storage tiers: the tier router that
//! fans a range out over hot and cold buckets, the query engine with its
//! memoized daily aggregates, and the aggregate arithmetic.

pub mod aggregation;
pub mod engine;
pub mod router;

pub use aggregation::{fold_records, PriceSummary};
pub use engine::{AuctionPreview, PlayerNameResolver, QueryEngine, StaticNameResolver};
pub use router::TierRouter;
