// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

use super::ArchiveStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid archive transition for {path}: {from} -> {to}")]
    InvalidTransition {
        path: String,
        from: ArchiveStatus,
        to: ArchiveStatus,
    },

    #[error("unknown archive {0}")]
    UnknownArchive(String),

    #[error("processing state at {0} is locked by another process")]
    Locked(PathBuf),

    #[error("archive exceeds the decompressed size limit of {0} bytes")]
    DecompressedTooLarge(u64),

    #[error("invalid archive configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Persistence(#[from] crate::persistence::Error),

    #[error(transparent)]
    Discovery(#[from] crate::discovery::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
