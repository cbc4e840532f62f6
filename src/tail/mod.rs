// SPDX-License-Identifier: Apache-2.0

//! Incremental reading of growing log files.
//!
//! Each tracked file moves through `Unseen -> Tailing -> (Truncated -> Tailing) | Gone`.
//! The reader never blocks waiting for data: every tick reads what is currently on
//! disk, bounded per file, and leaves trailing partial lines for the next tick.

mod config;
mod multiline;
mod reader;
mod tailer;

pub use config::TailConfig;
pub use multiline::{Assembled, LineAggregator};
pub use reader::{Line, ReadResult, read_lines};
pub use tailer::{FileState, TailReader, TailedRecord, file_id_for};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid tail configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Discovery(#[from] crate::discovery::Error),

    #[error(transparent)]
    Position(#[from] crate::position::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
