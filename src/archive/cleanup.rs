// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::error::Result;
use super::state::ProcessingState;
use crate::position::PositionStore;
use crate::tail::file_id_for;

/// Extension of decompressed output that has not been renamed into place yet
pub(super) const PARTIAL_SUFFIX: &str = "partial";

/// `<final>.partial`
pub(super) fn partial_path_for(final_path: &Path) -> PathBuf {
    let mut partial = final_path.as_os_str().to_os_string();
    partial.push(".");
    partial.push(PARTIAL_SUFFIX);
    PathBuf::from(partial)
}

/// Delete decompressed files the tail reader has fully consumed.
///
/// A completed record whose temp file has a committed offset at or beyond its
/// size is deleted and moved to cleaned. When the temp file is missing but its
/// `.partial` output is present the rename is finished and the record stays
/// completed so it gets tailed. A temp file that is gone entirely is moved to
/// cleaned. Files with unread bytes are never touched. Returns the number of
/// files removed.
pub fn cleanup(state: &mut ProcessingState, store: &mut dyn PositionStore) -> Result<usize> {
    let candidates: Vec<(String, String)> = state
        .completed()
        .filter_map(|r| {
            r.temp_file_path
                .clone()
                .map(|t| (r.original_path.clone(), t))
        })
        .collect();

    let mut removed = 0;
    for (original, temp) in candidates {
        let temp_path = Path::new(&temp);
        let file_id = file_id_for(temp_path);

        let size = match std::fs::metadata(temp_path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let partial = partial_path_for(temp_path);
                if partial.exists() {
                    match std::fs::rename(&partial, temp_path) {
                        Ok(()) => info!(
                            original = %original,
                            temp = %temp,
                            "Finished interrupted rename of decompressed file"
                        ),
                        Err(e) => warn!(
                            original = %original,
                            temp = %temp,
                            error = %e,
                            "Failed to rename decompressed file, will retry"
                        ),
                    }
                    continue;
                }
                warn!(
                    original = %original,
                    temp = %temp,
                    "Decompressed file is missing, marking archive cleaned"
                );
                state.mark_cleaned(&original)?;
                store.forget(&file_id);
                continue;
            }
            Err(e) => {
                debug!("Failed to stat {}: {}", temp, e);
                continue;
            }
        };

        let offset = store.get_offset(&file_id);
        if size == 0 || offset < size {
            continue;
        }

        if let Err(e) = std::fs::remove_file(temp_path) {
            warn!("Failed to remove consumed file {}: {}", temp, e);
            continue;
        }
        state.mark_cleaned(&original)?;
        store.forget(&file_id);
        removed += 1;
        info!(original = %original, temp = %temp, "Removed fully consumed decompressed file");
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::state::{ArchiveRecord, ArchiveStatus};
    use crate::position::MemoryPositionStore;
    use tempfile::TempDir;

    fn completed_state(dir: &TempDir, names: &[&str]) -> ProcessingState {
        let mut state = ProcessingState::new(dir.path().to_path_buf(), 3, 100, 60);
        for name in names {
            let original = format!("/archives/{}.gz", name);
            state.merge(vec![ArchiveRecord::pending(&original, "/archives", 10, None)]);
            let temp = dir.path().join(format!("{}.log", name));
            std::fs::write(&temp, "0123456789\n").unwrap();
            state
                .mark_completed(&original, temp.to_string_lossy().into_owned())
                .unwrap();
        }
        state
    }

    #[test]
    fn test_only_fully_consumed_files_are_removed() {
        let dir = TempDir::new().unwrap();
        let mut state = completed_state(&dir, &["done", "partial", "unread"]);
        let mut store = MemoryPositionStore::new();

        let done = dir.path().join("done.log");
        let partial = dir.path().join("partial.log");
        store.commit_offset(&file_id_for(&done), 11).unwrap();
        store.commit_offset(&file_id_for(&partial), 5).unwrap();

        let removed = cleanup(&mut state, &mut store).unwrap();
        assert_eq!(removed, 1);
        assert!(!done.exists());
        assert!(partial.exists());
        assert!(dir.path().join("unread.log").exists());

        assert_eq!(state.get("/archives/done.gz").unwrap().status, ArchiveStatus::Cleaned);
        assert_eq!(state.get("/archives/partial.gz").unwrap().status, ArchiveStatus::Completed);
        assert_eq!(store.get_offset(&file_id_for(&done)), 0);
        assert_eq!(state.counters.cleaned, 1);
    }

    #[test]
    fn test_missing_temp_file_is_marked_cleaned() {
        let dir = TempDir::new().unwrap();
        let mut state = completed_state(&dir, &["gone"]);
        std::fs::remove_file(dir.path().join("gone.log")).unwrap();

        let mut store = MemoryPositionStore::new();
        let removed = cleanup(&mut state, &mut store).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(state.get("/archives/gone.gz").unwrap().status, ArchiveStatus::Cleaned);
    }

    #[test]
    fn test_unrenamed_output_is_recovered_not_cleaned() {
        let dir = TempDir::new().unwrap();
        let mut state = completed_state(&dir, &["late"]);
        let temp = dir.path().join("late.log");
        let partial = partial_path_for(&temp);
        std::fs::rename(&temp, &partial).unwrap();

        let mut store = MemoryPositionStore::new();
        assert_eq!(cleanup(&mut state, &mut store).unwrap(), 0);
        assert_eq!(state.get("/archives/late.gz").unwrap().status, ArchiveStatus::Completed);
        assert!(temp.exists());
        assert!(!partial.exists());

        // Once read to the end it is cleaned like any other file
        store.commit_offset(&file_id_for(&temp), 11).unwrap();
        assert_eq!(cleanup(&mut state, &mut store).unwrap(), 1);
        assert_eq!(state.get("/archives/late.gz").unwrap().status, ArchiveStatus::Cleaned);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut state = completed_state(&dir, &["done"]);
        let mut store = MemoryPositionStore::new();
        store
            .commit_offset(&file_id_for(&dir.path().join("done.log")), 11)
            .unwrap();

        assert_eq!(cleanup(&mut state, &mut store).unwrap(), 1);
        assert_eq!(cleanup(&mut state, &mut store).unwrap(), 0);
    }
}
