// SPDX-License-Identifier: Apache-2.0

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::config::TailConfig;
use super::multiline::{Assembled, LineAggregator};
use super::reader::read_lines;
use super::{Error, Result};
use crate::discovery::FileFinder;
use crate::position::{FileGeneration, PositionStore};

/// A record read from a tailed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailedRecord {
    pub path: PathBuf,
    /// Position store identifier of the source file
    pub file_id: String,
    pub tag: String,
    pub text: String,
    /// Offset just past the record's last line, committable once the record is accepted
    pub end_offset: u64,
}

/// Lifecycle of a tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Tailing,
    /// Not seen by discovery since `since`
    Gone { since: Instant },
}

struct TrackedFile {
    path: PathBuf,
    file_id: String,
    tag: String,
    generation: FileGeneration,
    /// Where the next read starts; at or beyond the committed offset
    read_offset: u64,
    state: FileState,
    aggregator: LineAggregator,
}

/// Tails every file discovered under the configured roots.
pub struct TailReader {
    config: TailConfig,
    finder: FileFinder,
    start_pattern: Option<Regex>,
    tracked: HashMap<String, TrackedFile>,
    first_check: bool,
}

impl TailReader {
    pub fn new(config: TailConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let start_pattern = config
            .multiline_start_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| Error::Config(e.to_string()))?;

        let finder = FileFinder::new(config.roots.clone(), config.max_depth, &config.extension)
            .with_exclude(&config.exclude)?;

        Ok(Self {
            config,
            finder,
            start_pattern,
            tracked: HashMap::new(),
            first_check: true,
        })
    }

    /// Add a root after construction, used for the archive temp directory.
    pub fn add_root(&mut self, root: crate::discovery::DiscoveryRoot) -> Result<()> {
        self.config.roots.push(root);
        self.finder = FileFinder::new(
            self.config.roots.clone(),
            self.config.max_depth,
            &self.config.extension,
        )
        .with_exclude(&self.config.exclude)?;
        Ok(())
    }

    /// Number of tracked files, including gone ones still within the grace period
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn state(&self, file_id: &str) -> Option<FileState> {
        self.tracked.get(file_id).map(|t| t.state)
    }

    /// Run one discovery + read pass and return the records that became complete.
    ///
    /// Offsets are not committed here; the caller commits each record's
    /// `end_offset` after the record has been accepted downstream.
    pub fn poll(&mut self, store: &mut dyn PositionStore, now: Instant) -> Vec<TailedRecord> {
        let discovered = self.finder.find_files();
        if self.first_check && discovered.is_empty() {
            warn!(
                "No files found under the configured tail roots: {:?}",
                self.config.roots.iter().map(|r| &r.path).collect::<Vec<_>>()
            );
        }
        self.first_check = false;

        let mut seen = HashSet::with_capacity(discovered.len());
        for file in discovered {
            let file_id = file_id_for(&file.path);
            seen.insert(file_id.clone());

            match self.tracked.get_mut(&file_id) {
                Some(tracked) => {
                    if let FileState::Gone { .. } = tracked.state {
                        debug!("File {:?} reappeared", tracked.path);
                    }
                    tracked.state = FileState::Tailing;
                }
                None => {
                    if let Some(tracked) = self.start_tracking(file.path, file_id, file.tag, store) {
                        self.tracked.insert(tracked.file_id.clone(), tracked);
                    }
                }
            }
        }

        let mut records = Vec::new();
        let grace_period = self.config.grace_period;
        self.tracked.retain(|file_id, tracked| {
            if seen.contains(file_id) {
                return true;
            }
            match tracked.state {
                FileState::Tailing => {
                    debug!("File {:?} is no longer discoverable", tracked.path);
                    tracked.state = FileState::Gone { since: now };
                    true
                }
                FileState::Gone { since } => {
                    if now.saturating_duration_since(since) < grace_period {
                        return true;
                    }
                    if let Some(rec) = tracked.aggregator.flush() {
                        records.push(tracked.record(rec));
                    }
                    debug!("Evicting {:?} after grace period", tracked.path);
                    false
                }
            }
        });

        let mut ids: Vec<String> = self
            .tracked
            .iter()
            .filter(|(_, t)| t.state == FileState::Tailing)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();

        for id in ids {
            if let Some(tracked) = self.tracked.get_mut(&id) {
                read_file(tracked, &self.config, store, now, &mut records);
            }
        }

        records
    }

    fn start_tracking(
        &self,
        path: PathBuf,
        file_id: String,
        tag: String,
        store: &mut dyn PositionStore,
    ) -> Option<TrackedFile> {
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                debug!("Failed to open {:?}, will retry: {}", path, e);
                return None;
            }
        };
        let (generation, size) = match file_identity(&file) {
            Ok(v) => v,
            Err(e) => {
                debug!("Failed to stat {:?}, will retry: {}", path, e);
                return None;
            }
        };

        let mut offset = store.get_offset(&file_id);
        match store.generation(&file_id) {
            Some(previous) if previous.is_replaced_by(&generation) => {
                warn!(
                    path = %path.display(),
                    previous = %previous,
                    current = %generation,
                    "File was replaced, reading from the beginning"
                );
                reset(store, &file_id, generation);
                offset = 0;
            }
            Some(_) => {}
            None => store.track(&file_id, generation),
        }

        if size < offset {
            warn!(
                path = %path.display(),
                size,
                offset,
                "File is smaller than its stored offset, reading from the beginning"
            );
            reset(store, &file_id, generation);
            offset = 0;
        }

        info!(path = %path.display(), tag = %tag, offset, "Tailing file");

        Some(TrackedFile {
            path,
            file_id,
            tag,
            generation,
            read_offset: offset,
            state: FileState::Tailing,
            aggregator: LineAggregator::new(
                self.start_pattern.clone(),
                self.config.multiline_flush_timeout,
                self.config.max_line_bytes,
            ),
        })
    }
}

impl TrackedFile {
    fn record(&self, rec: Assembled) -> TailedRecord {
        TailedRecord {
            path: self.path.clone(),
            file_id: self.file_id.clone(),
            tag: self.tag.clone(),
            text: rec.text,
            end_offset: rec.end_offset,
        }
    }
}

fn read_file(
    tracked: &mut TrackedFile,
    config: &TailConfig,
    store: &mut dyn PositionStore,
    now: Instant,
    records: &mut Vec<TailedRecord>,
) {
    let mut file = match File::open(&tracked.path) {
        Ok(f) => f,
        Err(e) => {
            debug!("Failed to open {:?}, will retry: {}", tracked.path, e);
            return;
        }
    };
    let (generation, size) = match file_identity(&file) {
        Ok(v) => v,
        Err(e) => {
            debug!("Failed to stat {:?}, will retry: {}", tracked.path, e);
            return;
        }
    };

    if tracked.generation.is_replaced_by(&generation) {
        warn!(
            path = %tracked.path.display(),
            previous = %tracked.generation,
            current = %generation,
            "File was replaced, reading from the beginning"
        );
        tracked.restart(generation);
        reset(store, &tracked.file_id, generation);
    } else if size < tracked.read_offset {
        warn!(
            path = %tracked.path.display(),
            size,
            offset = tracked.read_offset,
            "File was truncated, reading from the beginning"
        );
        tracked.restart(generation);
        reset(store, &tracked.file_id, generation);
    }

    let result = match read_lines(
        &mut file,
        tracked.read_offset,
        size,
        config.max_bytes_per_tick,
        config.max_line_bytes,
    ) {
        Ok(r) => r,
        Err(e) => {
            warn!("Error reading {:?}, will retry: {}", tracked.path, e);
            return;
        }
    };

    if result.limited {
        debug!(
            "Read limit reached for {:?} at offset {}",
            tracked.path, result.next_offset
        );
    }

    tracked.read_offset = result.next_offset;
    for line in result.lines {
        if let Some(rec) = tracked.aggregator.push(line, now) {
            records.push(tracked.record(rec));
        }
    }
    if let Some(rec) = tracked.aggregator.flush_stale(now) {
        records.push(tracked.record(rec));
    }
}

impl TrackedFile {
    fn restart(&mut self, generation: FileGeneration) {
        self.generation = generation;
        self.read_offset = 0;
        self.aggregator.clear();
    }
}

fn reset(store: &mut dyn PositionStore, file_id: &str, generation: FileGeneration) {
    if let Err(e) = store.reset_offset(file_id, Some(generation)) {
        warn!("Failed to reset offset for {}: {}", file_id, e);
    }
}

fn file_identity(file: &File) -> std::io::Result<(FileGeneration, u64)> {
    let generation = FileGeneration::from_file(file)?;
    let size = file.metadata()?.len();
    Ok((generation, size))
}

/// Position store identifier for a path
pub fn file_id_for(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryRoot;
    use crate::position::MemoryPositionStore;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &Path) -> TailConfig {
        TailConfig {
            roots: vec![DiscoveryRoot::new(dir, "app")],
            max_depth: 1,
            grace_period: Duration::from_secs(10),
            ..Default::default()
        }
    }

    fn append(path: &Path, data: &str) {
        let mut f = OpenOptions::new().create(true).append(true).open(path).unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    fn commit_all(store: &mut dyn PositionStore, records: &[TailedRecord]) {
        for r in records {
            store.commit_offset(&r.file_id, r.end_offset).unwrap();
        }
    }

    fn texts(records: &[TailedRecord]) -> Vec<&str> {
        records.iter().map(|r| r.text.as_str()).collect()
    }

    #[test]
    fn test_tails_new_and_appended_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "one\ntwo\n");

        let mut store = MemoryPositionStore::new();
        let mut reader = TailReader::new(config(dir.path())).unwrap();
        let now = Instant::now();

        let records = reader.poll(&mut store, now);
        assert_eq!(texts(&records), vec!["one", "two"]);
        assert_eq!(records[0].tag, "app.d0");
        commit_all(&mut store, &records);

        append(&path, "three\npartial");
        let records = reader.poll(&mut store, now);
        assert_eq!(texts(&records), vec!["three"]);
        commit_all(&mut store, &records);
        assert_eq!(store.get_offset(&file_id_for(&path)), 14);

        assert!(reader.poll(&mut store, now).is_empty());
    }

    #[test]
    fn test_restart_resumes_from_committed_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "one\ntwo\n");

        let mut store = MemoryPositionStore::new();
        let now = Instant::now();
        {
            let mut reader = TailReader::new(config(dir.path())).unwrap();
            let records = reader.poll(&mut store, now);
            commit_all(&mut store, &records);
        }

        append(&path, "three\n");
        let mut reader = TailReader::new(config(dir.path())).unwrap();
        let records = reader.poll(&mut store, now);
        assert_eq!(texts(&records), vec!["three"]);
    }

    #[test]
    fn test_uncommitted_records_are_redelivered_after_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "one\ntwo\n");

        let mut store = MemoryPositionStore::new();
        let now = Instant::now();
        {
            let mut reader = TailReader::new(config(dir.path())).unwrap();
            let records = reader.poll(&mut store, now);
            commit_all(&mut store, &records[..1]);
        }

        let mut reader = TailReader::new(config(dir.path())).unwrap();
        assert_eq!(texts(&reader.poll(&mut store, now)), vec!["two"]);
    }

    #[test]
    fn test_truncation_resets_to_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "first line\nsecond line\n");

        let mut store = MemoryPositionStore::new();
        let mut reader = TailReader::new(config(dir.path())).unwrap();
        let now = Instant::now();

        let records = reader.poll(&mut store, now);
        commit_all(&mut store, &records);

        // Truncate in place so the generation stays the same
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(0).unwrap();
        drop(f);
        append(&path, "new\n");

        let records = reader.poll(&mut store, now);
        assert_eq!(texts(&records), vec!["new"]);
        commit_all(&mut store, &records);
        assert_eq!(store.get_offset(&file_id_for(&path)), 4);
    }

    #[test]
    fn test_truncation_detected_on_startup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "short\n");

        let mut store = MemoryPositionStore::new();
        store.commit_offset(&file_id_for(&path), 1000).unwrap();

        let mut reader = TailReader::new(config(dir.path())).unwrap();
        let records = reader.poll(&mut store, Instant::now());
        assert_eq!(texts(&records), vec!["short"]);
        assert_eq!(store.get_offset(&file_id_for(&path)), 0);
    }

    #[test]
    fn test_replaced_file_is_read_from_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "old content that is long\n");

        let mut store = MemoryPositionStore::new();
        let mut reader = TailReader::new(config(dir.path())).unwrap();
        let now = Instant::now();
        let records = reader.poll(&mut store, now);
        commit_all(&mut store, &records);

        // Create the replacement before removing the original so the inode differs
        let replacement = dir.path().join("app.log.tmp");
        fs::write(&replacement, "fresh file, longer than before!!\n").unwrap();
        fs::rename(&replacement, &path).unwrap();

        let records = reader.poll(&mut store, now);
        assert_eq!(texts(&records), vec!["fresh file, longer than before!!"]);
    }

    #[test]
    fn test_gone_file_is_evicted_after_grace_period() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "line\n");

        let mut store = MemoryPositionStore::new();
        let mut reader = TailReader::new(config(dir.path())).unwrap();
        let start = Instant::now();
        let records = reader.poll(&mut store, start);
        commit_all(&mut store, &records);

        fs::remove_file(&path).unwrap();
        reader.poll(&mut store, start);
        let id = file_id_for(&path);
        assert!(matches!(reader.state(&id), Some(FileState::Gone { .. })));

        reader.poll(&mut store, start + Duration::from_secs(5));
        assert_eq!(reader.tracked_count(), 1);

        reader.poll(&mut store, start + Duration::from_secs(11));
        assert_eq!(reader.tracked_count(), 0);
        assert_eq!(store.get_offset(&id), 5);
    }

    #[test]
    fn test_multiline_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(
            &path,
            "2024-01-01 10:00:00 boom\n  at a\n  at b\n2024-01-01 10:00:01 ok\n",
        );

        let cfg = TailConfig {
            multiline_start_pattern: Some(r"^\d{4}-\d{2}-\d{2}".to_string()),
            multiline_flush_timeout: Duration::from_secs(2),
            ..config(dir.path())
        };
        let mut store = MemoryPositionStore::new();
        let mut reader = TailReader::new(cfg).unwrap();
        let start = Instant::now();

        let records = reader.poll(&mut store, start);
        assert_eq!(texts(&records), vec!["2024-01-01 10:00:00 boom\n  at a\n  at b"]);
        assert_eq!(records[0].end_offset, 39);

        let records = reader.poll(&mut store, start + Duration::from_secs(3));
        assert_eq!(texts(&records), vec!["2024-01-01 10:00:01 ok"]);
    }

    #[test]
    fn test_nested_files_get_depth_tags() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("svc")).unwrap();
        append(&dir.path().join("svc/nested.log"), "deep\n");

        let mut store = MemoryPositionStore::new();
        let mut reader = TailReader::new(config(dir.path())).unwrap();
        let records = reader.poll(&mut store, Instant::now());
        assert_eq!(records[0].tag, "app.d1");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let cfg = TailConfig {
            multiline_start_pattern: Some("(".to_string()),
            ..Default::default()
        };
        assert!(matches!(TailReader::new(cfg), Err(Error::Config(_))));
    }
}
