// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::Result;
use super::overlap::normalize;
use crate::persistence::atomic_write_json;

/// Durable record that an overlapping archive root has been fully drained.
///
/// Presence of the file is what matters; the contents are for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub archive_root: String,
    pub tailing_root: String,
    pub completed_at: DateTime<Utc>,
    pub completed: usize,
    pub failed: usize,
}

impl CompletionMarker {
    /// Location of the marker for one (archive_root, tailing_root) pair
    pub fn path_for(markers_dir: &Path, archive_root: &str, tailing_root: &str) -> PathBuf {
        let name = format!("{}__{}.json", slug(archive_root), slug(tailing_root));
        markers_dir.join(name)
    }

    pub fn exists(markers_dir: &Path, archive_root: &str, tailing_root: &str) -> bool {
        Self::path_for(markers_dir, archive_root, tailing_root).is_file()
    }

    pub fn write(&self, markers_dir: &Path) -> Result<PathBuf> {
        let path = Self::path_for(markers_dir, &self.archive_root, &self.tailing_root);
        atomic_write_json(&path, self)?;
        Ok(path)
    }
}

fn slug(path: &str) -> String {
    let joined = normalize(path).join("_");
    let slug: String = joined
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    if slug.is_empty() { "root".to_string() } else { slug }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_marker_presence() {
        let dir = TempDir::new().unwrap();
        let markers = dir.path().join("markers");

        assert!(!CompletionMarker::exists(&markers, r"D:\logs\archive", r"D:\logs"));

        let marker = CompletionMarker {
            archive_root: r"D:\logs\archive".to_string(),
            tailing_root: r"D:\logs".to_string(),
            completed_at: Utc::now(),
            completed: 4,
            failed: 1,
        };
        let path = marker.write(&markers).unwrap();

        assert!(CompletionMarker::exists(&markers, r"d:/logs/archive", r"D:\logs"));
        assert!(!CompletionMarker::exists(&markers, r"D:\logs\archive", r"E:\other"));

        let loaded: CompletionMarker =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(loaded, marker);
    }

    #[test]
    fn test_slug_is_filesystem_safe() {
        assert_eq!(slug(r"D:\logs\archive"), "d__logs_archive");
        assert_eq!(slug("/"), "root");
    }
}
