// SPDX-License-Identifier: Apache-2.0

//! Gzip archive replay.
//!
//! Archives found under the archive roots are decompressed in bounded batches
//! into a temporary directory the tail reader consumes like any other log root.
//! The processing state document is the single source of truth for every
//! archive's lifecycle (`pending -> completed -> cleaned`, or `pending -> failed`).

mod cleanup;
mod config;
mod error;
mod lock;
mod mapping;
mod marker;
mod overlap;
mod processor;
mod state;

pub use cleanup::cleanup;
pub use config::ArchiveConfig;
pub use error::{Error, Result};
pub use lock::StateLock;
pub use mapping::{PathMapping, temp_filename};
pub use marker::CompletionMarker;
pub use overlap::{normalize, overlap, paths_overlap};
pub use processor::{ArchiveProcessor, ArchiveTick, BatchResult};
pub use state::{
    ArchiveRecord, ArchiveStatus, Counters, PROCESSING_STATE_VERSION, ProcessingState,
};
