// SPDX-License-Identifier: Apache-2.0

//! Durable JSON documents shared by the position store, the archive processing
//! state and the status file.
//!
//! Every write goes to a uniquely named temporary file which is then renamed over
//! the target, so readers only ever observe a complete document.

mod error;
mod json_file;

pub use error::{Error, Result};
pub use json_file::{JsonFileDatabase, JsonFilePersister, atomic_write_json, read_json};
