// SPDX-License-Identifier: Apache-2.0

//! Configuration for the archive processor.

use std::path::PathBuf;
use std::time::Duration;

use crate::discovery::{DiscoveryRoot, check_roots};

/// Configuration for the archive processor
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Directories searched for `*.gz` archives
    pub roots: Vec<DiscoveryRoot>,
    /// Directory levels searched below each root
    pub max_depth: usize,
    /// Where decompressed files are written; tailed as an extra root
    pub temp_dir: PathBuf,
    /// Processing state document
    pub state_path: PathBuf,
    /// `temp_filename=original_path` projection
    pub mapping_path: PathBuf,
    /// Directory holding completion markers
    pub markers_dir: PathBuf,
    /// Maximum archives decompressed in one batch
    pub batch_size: usize,
    /// Maximum cumulative compressed bytes in one batch
    pub batch_byte_ceiling: u64,
    /// Archives larger than this are failed without being opened
    pub max_file_bytes: u64,
    /// Decompressed output beyond this size fails the archive
    pub max_decompressed_bytes: u64,
    /// Time between archive ticks
    pub interval: Duration,
}

impl ArchiveConfig {
    /// Defaults rooted under a state directory
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            roots: Vec::new(),
            max_depth: 2,
            temp_dir: state_dir.join("decompressed"),
            state_path: state_dir.join("archive_state.json"),
            mapping_path: state_dir.join("path_mapping.txt"),
            markers_dir: state_dir.join("markers"),
            batch_size: 3,
            batch_byte_ceiling: 100 * 1024 * 1024,
            max_file_bytes: 1024 * 1024 * 1024,
            max_decompressed_bytes: 10 * 1024 * 1024 * 1024,
            interval: Duration::from_secs(60),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.state_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        check_roots(&self.roots, "Archive")?;
        if self.batch_size == 0 {
            return Err("Archive batch size must be greater than zero".to_string());
        }
        if self.batch_byte_ceiling == 0 {
            return Err("Archive batch byte ceiling must be greater than zero".to_string());
        }
        if self.max_file_bytes == 0 || self.max_decompressed_bytes == 0 {
            return Err("Archive size limits must be greater than zero".to_string());
        }
        Ok(())
    }
}
