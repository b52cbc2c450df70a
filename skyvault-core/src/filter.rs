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

//! Filter contract.
//!
//! The filter-expression compiler is an external collaborator; the archive
//! only consumes a compiled predicate. What the archive owns is the raw
//! `key=value` map, the two reserved time keys, and the canonical
//! `filter_key` the summary cache partitions on. The `filter_key` derives
//! purely from the raw map, never from the compiled form.

use crate::auction::Auction;
use crate::error::{Result, SkyvaultError};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reserved filter key: lower bound on auction end.
pub const FILTER_END_AFTER: &str = "EndAfter";
/// Reserved filter key: upper bound on auction end.
pub const FILTER_END_BEFORE: &str = "EndBefore";

/// A compiled filter.
pub type Predicate = Arc<dyn Fn(&Auction) -> bool + Send + Sync>;

/// Compiles a raw `key=value` filter map into a predicate.
pub trait FilterCompiler: Send + Sync {
    fn compile(&self, filters: &BTreeMap<String, String>) -> Result<Predicate>;
}

/// Canonical summary-cache key: filter keys and values concatenated in key
/// order, with the reserved time bounds excluded.
pub fn filter_key(filters: &BTreeMap<String, String>) -> String {
    let mut key = String::new();
    for (k, v) in filters {
        if k == FILTER_END_AFTER || k == FILTER_END_BEFORE {
            continue;
        }
        key.push_str(k);
        key.push_str(v);
    }
    key
}

/// Parse a reserved time-filter value: unix seconds or an RFC 3339 date.
pub fn parse_time_filter(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = value.parse::<i64>() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Reference compiler: exact matching against the well-known fields, then
/// flattened NBT, then enchantment levels. Production deployments plug in
/// the full filter engine behind the same trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct EqualityFilterCompiler;

impl FilterCompiler for EqualityFilterCompiler {
    fn compile(&self, filters: &BTreeMap<String, String>) -> Result<Predicate> {
        let mut clauses: Vec<(String, String)> = Vec::new();
        for (k, v) in filters {
            if k == FILTER_END_AFTER || k == FILTER_END_BEFORE {
                continue;
            }
            if k.is_empty() {
                return Err(SkyvaultError::InvalidInput("empty filter key".into()));
            }
            clauses.push((k.clone(), v.clone()));
        }

        Ok(Arc::new(move |auction: &Auction| {
            clauses.iter().all(|(k, v)| match k.as_str() {
                "Tier" => auction.tier.eq_ignore_ascii_case(v),
                "Category" => auction.category.eq_ignore_ascii_case(v),
                "ItemName" => auction.item_name == *v,
                "Bin" => v.parse::<bool>().map(|b| b == auction.bin).unwrap_or(false),
                "Seller" => auction.seller.to_string() == *v,
                _ => {
                    if let Some(nbt) = auction.flat_nbt.get(k) {
                        nbt == v
                    } else if let Some(level) = auction.enchantments.get(k) {
                        v.parse::<i32>().map(|l| l == *level).unwrap_or(false)
                    } else {
                        false
                    }
                }
            })
        }))
    }
}
