// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Corrupt document {0:?}: {1}")]
    Corrupt(PathBuf, String),
}

pub type Result<T> = std::result::Result<T, Error>;
