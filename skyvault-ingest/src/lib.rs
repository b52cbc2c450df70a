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

//! Skyvault Ingest Layer
//!
//! The write side of the archive: a worker pool over in-memory thunk
//! queues, the live bus consumer, the historical source migrator with its
//! durable import offset, and the hot-to-cold archive migrator.
//!
//! Every service here is a free-standing task constructed with explicit
//! handles to its collaborators; there is no background-service registry.

pub mod archive;
pub mod bus;
pub mod offset;
pub mod pipeline;
pub mod queue;
pub mod source;

pub use archive::{ArchiveMigrator, ARCHIVE_START_YEAR};
pub use bus::{BusRecord, MemoryBus, MessageBus, CONSUMER_GROUP};
pub use offset::ImportOffset;
pub use pipeline::{HistoricalMigrator, InsertSells, LiveConsumer};
pub use queue::{WorkQueue, WorkerPool};
pub use source::{MemorySource, SourceRows};
