// SPDX-License-Identifier: Apache-2.0

//! Platform-independent file generation marker.
//!
//! Device + inode (Unix) or volume serial + file index (Windows), plus the creation
//! time when the platform reports one. When any of these change for a path that is
//! already tracked, the file was replaced and its offset no longer applies.

use serde::{Deserialize, Serialize};
use std::fs::{File, Metadata};
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileGeneration {
    /// Device ID (Unix) or volume serial number (Windows)
    pub dev: u64,
    /// Inode number (Unix) or file index (Windows)
    pub ino: u64,
    /// Creation time in nanoseconds since the epoch, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u128>,
}

impl FileGeneration {
    pub fn new(dev: u64, ino: u64, created: Option<u128>) -> Self {
        Self { dev, ino, created }
    }

    /// Read the generation marker of an open file.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = file.metadata()?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
            created: created_nanos(&metadata),
        })
    }

    /// Read the generation marker of an open file.
    #[cfg(windows)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        let file_index = ((info.nFileIndexHigh as u64) << 32) | (info.nFileIndexLow as u64);
        let metadata = file.metadata()?;

        Ok(Self {
            dev: info.dwVolumeSerialNumber as u64,
            ino: file_index,
            created: created_nanos(&metadata),
        })
    }

    /// Read the generation marker of the file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    /// Whether `other` describes a different file than `self`.
    ///
    /// Creation times are only compared when both sides carry one, so a marker
    /// persisted on a filesystem without birth times still matches.
    pub fn is_replaced_by(&self, other: &FileGeneration) -> bool {
        if self.dev != other.dev || self.ino != other.ino {
            return true;
        }
        matches!((self.created, other.created), (Some(a), Some(b)) if a != b)
    }
}

impl std::fmt::Display for FileGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

fn created_nanos(metadata: &Metadata) -> Option<u128> {
    metadata
        .created()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
}
