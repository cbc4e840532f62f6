// SPDX-License-Identifier: Apache-2.0

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::error::{Error, Result};
use super::schema::{KNOWN_FILES_KEY, PERSISTED_POSITIONS_VERSION, PersistedPositionsV1, PositionEntry};
use super::FileGeneration;
use crate::persistence::{self, JsonFileDatabase, JsonFilePersister};

const POSITIONS_SCOPE: &str = "positions";

/// Per-file offset ledger.
///
/// Identifiers are opaque strings, callers use the canonical path of the file.
/// Unknown identifiers report offset 0.
pub trait PositionStore: Send {
    /// Last committed offset for `file_id`, 0 when the file has never been seen.
    fn get_offset(&self, file_id: &str) -> u64;

    /// Generation recorded with the last commit or reset.
    fn generation(&self, file_id: &str) -> Option<FileGeneration>;

    /// Record `offset` as consumed. Fails with [`Error::OffsetRegression`] when the
    /// offset would move backwards; use [`PositionStore::reset_offset`] for that.
    fn commit_offset(&mut self, file_id: &str, offset: u64) -> Result<()>;

    /// Set the offset back to 0 and associate the entry with `generation`.
    fn reset_offset(&mut self, file_id: &str, generation: Option<FileGeneration>) -> Result<()>;

    /// Remember the generation of a file without touching its offset.
    fn track(&mut self, file_id: &str, generation: FileGeneration);

    /// Drop the entry for a file that no longer exists.
    fn forget(&mut self, file_id: &str);

    /// All tracked identifiers.
    fn file_ids(&self) -> Vec<String>;

    /// Make all commits so far durable.
    fn sync(&mut self) -> Result<()>;
}

/// Shared bookkeeping between the in-memory and file-backed stores
#[derive(Debug, Default)]
struct Ledger {
    files: BTreeMap<String, PositionEntry>,
    dirty: bool,
}

impl Ledger {
    fn get_offset(&self, file_id: &str) -> u64 {
        self.files.get(file_id).map(|e| e.offset).unwrap_or(0)
    }

    fn generation(&self, file_id: &str) -> Option<FileGeneration> {
        self.files.get(file_id).and_then(|e| e.generation)
    }

    fn commit_offset(&mut self, file_id: &str, offset: u64) -> Result<()> {
        let current = self.get_offset(file_id);
        if offset < current {
            return Err(Error::OffsetRegression {
                file_id: file_id.to_string(),
                current,
                requested: offset,
            });
        }

        match self.files.get_mut(file_id) {
            Some(entry) => {
                if entry.offset == offset {
                    return Ok(());
                }
                entry.offset = offset;
                entry.updated_at = Utc::now();
            }
            None => {
                self.files.insert(
                    file_id.to_string(),
                    PositionEntry {
                        offset,
                        generation: None,
                        updated_at: Utc::now(),
                    },
                );
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn reset_offset(&mut self, file_id: &str, generation: Option<FileGeneration>) {
        self.files.insert(
            file_id.to_string(),
            PositionEntry {
                offset: 0,
                generation,
                updated_at: Utc::now(),
            },
        );
        self.dirty = true;
    }

    fn track(&mut self, file_id: &str, generation: FileGeneration) {
        let entry = self
            .files
            .entry(file_id.to_string())
            .or_insert_with(|| PositionEntry {
                offset: 0,
                generation: None,
                updated_at: Utc::now(),
            });
        if entry.generation != Some(generation) {
            entry.generation = Some(generation);
            entry.updated_at = Utc::now();
            self.dirty = true;
        }
    }

    fn forget(&mut self, file_id: &str) {
        if self.files.remove(file_id).is_some() {
            self.dirty = true;
        }
    }
}

/// Position store that lives only for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    ledger: Ledger,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionStore for MemoryPositionStore {
    fn get_offset(&self, file_id: &str) -> u64 {
        self.ledger.get_offset(file_id)
    }

    fn generation(&self, file_id: &str) -> Option<FileGeneration> {
        self.ledger.generation(file_id)
    }

    fn commit_offset(&mut self, file_id: &str, offset: u64) -> Result<()> {
        self.ledger.commit_offset(file_id, offset)
    }

    fn reset_offset(&mut self, file_id: &str, generation: Option<FileGeneration>) -> Result<()> {
        self.ledger.reset_offset(file_id, generation);
        Ok(())
    }

    fn track(&mut self, file_id: &str, generation: FileGeneration) {
        self.ledger.track(file_id, generation)
    }

    fn forget(&mut self, file_id: &str) {
        self.ledger.forget(file_id)
    }

    fn file_ids(&self) -> Vec<String> {
        self.ledger.files.keys().cloned().collect()
    }

    fn sync(&mut self) -> Result<()> {
        self.ledger.dirty = false;
        Ok(())
    }
}

/// Position store persisted to a JSON document with atomic replace.
pub struct JsonPositionStore {
    ledger: Ledger,
    persister: JsonFilePersister,
}

impl JsonPositionStore {
    /// Open the store at `path`.
    ///
    /// An unreadable document is an error unless `reset_on_corruption` is set, in
    /// which case it is moved aside to `<path>.corrupt` and the store starts empty.
    pub fn open(path: impl AsRef<Path>, reset_on_corruption: bool) -> Result<Self> {
        let path = path.as_ref();
        let db = match JsonFileDatabase::open(path) {
            Ok(db) => db,
            Err(persistence::Error::Corrupt(p, reason)) => {
                if !reset_on_corruption {
                    return Err(Error::Corrupt(format!("{}: {}", p.display(), reason)));
                }
                let aside = corrupt_path(path);
                warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    reason = %reason,
                    "Position store is corrupted, starting with empty positions"
                );
                std::fs::rename(path, &aside).map_err(|e| {
                    Error::Corrupt(format!("failed to move corrupted store aside: {}", e))
                })?;
                JsonFileDatabase::open(path)?
            }
            Err(e) => return Err(e.into()),
        };

        Self::from_database(&db, reset_on_corruption)
    }

    /// Build a store on top of an already opened database.
    pub fn from_database(db: &JsonFileDatabase, reset_on_corruption: bool) -> Result<Self> {
        let mut persister = db.persister(POSITIONS_SCOPE);
        persister.load()?;

        let files = match persister.try_get_raw_json::<PersistedPositionsV1>(KNOWN_FILES_KEY) {
            Ok(Some(state)) if state.version == PERSISTED_POSITIONS_VERSION => state.files,
            Ok(Some(state)) => {
                let reason = format!("unsupported positions version {}", state.version);
                if !reset_on_corruption {
                    return Err(Error::Corrupt(reason));
                }
                warn!(reason = %reason, "Discarding persisted positions");
                BTreeMap::new()
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                if !reset_on_corruption {
                    return Err(Error::Corrupt(e.to_string()));
                }
                warn!(error = %e, "Discarding undecodable persisted positions");
                BTreeMap::new()
            }
        };

        debug!(files = files.len(), "Loaded persisted positions");

        Ok(Self {
            ledger: Ledger {
                files,
                dirty: false,
            },
            persister,
        })
    }
}

impl PositionStore for JsonPositionStore {
    fn get_offset(&self, file_id: &str) -> u64 {
        self.ledger.get_offset(file_id)
    }

    fn generation(&self, file_id: &str) -> Option<FileGeneration> {
        self.ledger.generation(file_id)
    }

    fn commit_offset(&mut self, file_id: &str, offset: u64) -> Result<()> {
        self.ledger.commit_offset(file_id, offset)
    }

    fn reset_offset(&mut self, file_id: &str, generation: Option<FileGeneration>) -> Result<()> {
        self.ledger.reset_offset(file_id, generation);
        Ok(())
    }

    fn track(&mut self, file_id: &str, generation: FileGeneration) {
        self.ledger.track(file_id, generation)
    }

    fn forget(&mut self, file_id: &str) {
        self.ledger.forget(file_id)
    }

    fn file_ids(&self) -> Vec<String> {
        self.ledger.files.keys().cloned().collect()
    }

    fn sync(&mut self) -> Result<()> {
        if !self.ledger.dirty {
            return Ok(());
        }

        let state = PersistedPositionsV1 {
            version: PERSISTED_POSITIONS_VERSION,
            files: self.ledger.files.clone(),
        };
        self.persister.set_raw_json(KNOWN_FILES_KEY, &state)?;
        self.persister.sync()?;
        self.ledger.dirty = false;

        debug!(files = state.files.len(), "Synced positions");
        Ok(())
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}
