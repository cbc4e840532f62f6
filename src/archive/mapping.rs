// SPDX-License-Identifier: Apache-2.0

//! `temp_filename=original_path` projection of the processing state.
//!
//! The file is append-only and may be rebuilt from the processing state at any
//! time. When a name appears more than once the last line wins.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::state::ProcessingState;

#[derive(Debug, Clone)]
pub struct PathMapping {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl PathMapping {
    /// Load the mapping at `path`; a missing file is an empty mapping.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let mut mapping = Self {
            path: path.into(),
            entries: HashMap::new(),
        };
        mapping.reload()?;
        Ok(mapping)
    }

    /// Re-read the file from disk
    pub fn reload(&mut self) -> io::Result<()> {
        self.entries.clear();
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Some((name, original)) = line.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    self.entries.insert(name.to_string(), original.trim().to_string());
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, temp_filename: &str) -> Option<&str> {
        self.entries.get(temp_filename).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append one entry and flush it to disk
    pub fn append(&mut self, temp_filename: &str, original_path: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}={}", temp_filename, original_path)?;
        file.sync_data()?;
        self.entries
            .insert(temp_filename.to_string(), original_path.to_string());
        Ok(())
    }

    /// Rewrite the file from the completed records of `state`
    pub fn rebuild(&mut self, state: &ProcessingState) -> io::Result<()> {
        let mut contents = String::new();
        self.entries.clear();
        for record in state.completed() {
            let Some(name) = record.temp_file_path.as_deref().and_then(temp_filename) else {
                continue;
            };
            contents.push_str(&format!("{}={}\n", name, record.original_path));
            self.entries.insert(name, record.original_path.clone());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// File name component used as the mapping key
pub fn temp_filename(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::state::ArchiveRecord;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("path_mapping.txt");

        let mut mapping = PathMapping::load(&path).unwrap();
        assert!(mapping.is_empty());
        mapping.append("app_1.log", "/logs/app.log.gz").unwrap();
        mapping.append("app_2.log", "D:\\logs\\x=y.gz").unwrap();

        let reloaded = PathMapping::load(&path).unwrap();
        assert_eq!(reloaded.get("app_1.log"), Some("/logs/app.log.gz"));
        assert_eq!(reloaded.get("app_2.log"), Some("D:\\logs\\x=y.gz"));
        assert_eq!(reloaded.get("other.log"), None);
    }

    #[test]
    fn test_rebuild_from_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("path_mapping.txt");
        std::fs::write(&path, "stale.log=/nowhere\n").unwrap();

        let mut state = ProcessingState::new(dir.path().to_path_buf(), 3, 100, 60);
        state.merge(vec![
            ArchiveRecord::pending("/a/1.gz", "/a", 1, None),
            ArchiveRecord::pending("/a/2.gz", "/a", 1, None),
        ]);
        state.mark_completed("/a/1.gz", "/t/one_x.log".into()).unwrap();

        let mut mapping = PathMapping::load(&path).unwrap();
        mapping.rebuild(&state).unwrap();

        let reloaded = PathMapping::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("one_x.log"), Some("/a/1.gz"));
    }
}
