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

//! Historical source seam.
//!
//! The relational database being phased out is paged by primary-key
//! window; the migrator never sees the driver, only this trait.

use async_trait::async_trait;
use skyvault_core::{Auction, Result};

#[async_trait]
pub trait SourceRows: Send + Sync {
    /// Rows with primary key in `[offset, offset + limit)`, ascending.
    async fn page(&self, offset: i64, limit: usize) -> Result<Vec<(i64, Auction)>>;
}

/// Vec-backed source; row ids are `1..=len`.
#[derive(Debug, Default)]
pub struct MemorySource {
    rows: Vec<Auction>,
}

impl MemorySource {
    pub fn new(rows: Vec<Auction>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl SourceRows for MemorySource {
    async fn page(&self, offset: i64, limit: usize) -> Result<Vec<(i64, Auction)>> {
        let start = offset.max(1) as usize;
        Ok(self
            .rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (idx as i64 + 1, row.clone()))
            .filter(|(id, _)| *id >= start as i64 && *id < start as i64 + limit as i64)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_by_id_window() {
        let source = MemorySource::new(vec![Auction::default(); 10]);

        let page = source.page(0, 4).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        let page = source.page(5, 4).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![5, 6, 7, 8]);

        assert!(source.page(11, 4).await.unwrap().is_empty());
    }
}
