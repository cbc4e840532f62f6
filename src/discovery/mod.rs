// SPDX-License-Identifier: Apache-2.0

//! Bounded-depth enumeration of candidate files under configured roots.

mod finder;

pub use finder::{DiscoveredFile, DiscoveryRoot, FileFinder, Files, check_roots, discover};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),
}

pub type Result<T> = std::result::Result<T, Error>;
