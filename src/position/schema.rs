// SPDX-License-Identifier: Apache-2.0

//! On-disk layout of the position ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::FileGeneration;

/// Key under which the ledger is stored inside the persister scope
pub const KNOWN_FILES_KEY: &str = "knownFiles";

/// Current schema version
pub const PERSISTED_POSITIONS_VERSION: u32 = 1;

/// A single file's committed position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    /// Byte offset just past the last line that was handed downstream
    pub offset: u64,
    /// Identity of the file the offset belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<FileGeneration>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedPositionsV1 {
    pub version: u32,
    /// Keyed by file identifier (the canonical path of the file)
    pub files: BTreeMap<String, PositionEntry>,
}

impl Default for PersistedPositionsV1 {
    fn default() -> Self {
        Self {
            version: PERSISTED_POSITIONS_VERSION,
            files: BTreeMap::new(),
        }
    }
}
