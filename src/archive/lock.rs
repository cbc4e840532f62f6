// SPDX-License-Identifier: Apache-2.0

//! Advisory single-writer lock for the processing state document.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use super::error::{Error, Result};

/// Held for as long as this process owns the processing state.
///
/// The OS releases the lock when the handle closes, including when the process
/// dies, so a lock file left on disk never blocks the next start.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    file: File,
}

impl StateLock {
    /// Try to take the lock without blocking.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(Error::Locked(path));
            }
            return Err(e.into());
        }

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        // Closing the handle would release it too; unlock explicitly so the
        // order is obvious. The file stays on disk.
        let _ = FileExt::unlock(&self.file);
    }
}
