// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("offset for {file_id} cannot move backwards from {current} to {requested}")]
    OffsetRegression {
        file_id: String,
        current: u64,
        requested: u64,
    },

    #[error("position store is corrupted and cannot be loaded: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Persistence(#[from] crate::persistence::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
