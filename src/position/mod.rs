// SPDX-License-Identifier: Apache-2.0

//! Durable per-file byte-offset ledger.
//!
//! The tail reader resumes every file from the offset recorded here. Offsets only
//! move forward through [`PositionStore::commit_offset`]; a truncated or replaced
//! file must be reset explicitly with [`PositionStore::reset_offset`].

mod error;
mod generation;
mod schema;
mod store;

pub use error::{Error, Result};
pub use generation::FileGeneration;
pub use schema::{KNOWN_FILES_KEY, PERSISTED_POSITIONS_VERSION, PersistedPositionsV1, PositionEntry};
pub use store::{JsonPositionStore, MemoryPositionStore, PositionStore};
