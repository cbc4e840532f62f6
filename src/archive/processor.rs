// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use flate2::read::MultiGzDecoder;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cleanup::{PARTIAL_SUFFIX, cleanup, partial_path_for};
use super::config::ArchiveConfig;
use super::error::{Error, Result};
use super::lock::StateLock;
use super::mapping::{PathMapping, temp_filename};
use super::marker::CompletionMarker;
use super::overlap::paths_overlap;
use super::state::{ArchiveRecord, ArchiveStatus, ProcessingState};
use crate::discovery::{DiscoveryRoot, FileFinder};
use crate::position::PositionStore;

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub processed: usize,
    pub failed: usize,
}

impl BatchResult {
    fn add(&mut self, other: BatchResult) {
        self.processed += other.processed;
        self.failed += other.failed;
    }
}

/// Outcome of one archive tick across all roots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveTick {
    pub discovered: usize,
    pub batch: BatchResult,
    pub cleaned: usize,
    pub roots_skipped: usize,
}

/// Owns the processing state and turns gzip archives into tailable files.
pub struct ArchiveProcessor {
    config: ArchiveConfig,
    state: ProcessingState,
    mapping: PathMapping,
    _lock: StateLock,
}

impl ArchiveProcessor {
    /// Take the state lock, load (or start) the processing state, and repair
    /// decompression work interrupted by a crash.
    pub fn open(config: ArchiveConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let lock = StateLock::acquire(config.lock_path())?;
        std::fs::create_dir_all(&config.temp_dir)?;

        let mut state = match ProcessingState::load(&config.state_path)? {
            Some(state) => state,
            None => {
                info!(
                    path = %config.state_path.display(),
                    "No processing state found, starting fresh"
                );
                ProcessingState::new(
                    config.temp_dir.clone(),
                    config.batch_size,
                    config.batch_byte_ceiling,
                    config.interval.as_secs(),
                )
            }
        };
        state.temp_dir = config.temp_dir.clone();
        state.batch_size = config.batch_size;
        state.batch_byte_ceiling = config.batch_byte_ceiling;
        state.interval_secs = config.interval.as_secs();

        recover_temp_dir(&state, &config.temp_dir);

        let mut mapping = PathMapping::load(&config.mapping_path)?;
        mapping.rebuild(&state)?;
        state.save(&config.state_path)?;

        debug!(
            pending = state.counters.pending,
            completed = state.counters.completed,
            failed = state.counters.failed,
            cleaned = state.counters.cleaned,
            "Loaded processing state"
        );

        Ok(Self {
            config,
            state,
            mapping,
            _lock: lock,
        })
    }

    pub fn state(&self) -> &ProcessingState {
        &self.state
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn mapping(&self) -> &PathMapping {
        &self.mapping
    }

    /// Discover archives and merge them into the processing state as pending.
    /// Returns the newly added records.
    pub fn scan(&mut self, roots: &[DiscoveryRoot], max_depth: usize) -> Result<Vec<ArchiveRecord>> {
        let mut scanned = Vec::new();
        for root in roots {
            let root_str = root.path.to_string_lossy().into_owned();
            let finder = FileFinder::new(vec![root.clone()], max_depth, "gz");
            for file in finder.discover() {
                let metadata = match std::fs::metadata(&file.path) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("Failed to stat archive {:?}: {}", file.path, e);
                        continue;
                    }
                };
                scanned.push(ArchiveRecord::pending(
                    file.path.to_string_lossy(),
                    root_str.clone(),
                    metadata.len(),
                    metadata.modified().ok().map(DateTime::<Utc>::from),
                ));
            }
        }

        let before = self.state.archives.len();
        let added = self.state.merge(scanned);
        if added > 0 {
            info!(added, "Discovered new archives");
            self.save()?;
        }
        Ok(self.state.archives[before..].to_vec())
    }

    /// Decompress up to `max_files` pending archives totalling at most
    /// `max_total_bytes` of compressed input.
    pub fn process_batch(
        &mut self,
        max_files: usize,
        max_total_bytes: u64,
        cancel: &CancellationToken,
    ) -> Result<BatchResult> {
        self.process_root_batch(None, max_files, max_total_bytes, cancel)
    }

    /// Like [`ArchiveProcessor::process_batch`], restricted to one archive root.
    ///
    /// The first eligible archive is always taken even if it alone exceeds
    /// `max_total_bytes`, so a batch is never empty while work remains. Archives over
    /// the per-file limit are failed without being opened and do not count towards
    /// the batch. Cancellation is honoured between archives.
    pub fn process_root_batch(
        &mut self,
        root: Option<&str>,
        max_files: usize,
        max_total_bytes: u64,
        cancel: &CancellationToken,
    ) -> Result<BatchResult> {
        let mut result = BatchResult::default();

        let candidates: Vec<(String, u64)> = self
            .state
            .pending(root)
            .map(|r| (r.original_path.clone(), r.size))
            .collect();

        let mut selected = Vec::new();
        let mut total: u64 = 0;
        for (path, size) in candidates {
            if selected.len() >= max_files {
                break;
            }
            if size > self.config.max_file_bytes {
                warn!(
                    path = %path,
                    size,
                    limit = self.config.max_file_bytes,
                    "Archive exceeds the per-file size limit"
                );
                self.state.mark_failed(
                    &path,
                    format!("archive size {} exceeds limit {}", size, self.config.max_file_bytes),
                )?;
                self.save()?;
                result.failed += 1;
                continue;
            }
            if !selected.is_empty() && total.saturating_add(size) > max_total_bytes {
                break;
            }
            total = total.saturating_add(size);
            selected.push(path);
        }

        for path in selected {
            if cancel.is_cancelled() {
                debug!("Cancellation requested, stopping archive batch");
                break;
            }
            if self.process_one(&path)? {
                result.processed += 1;
            } else {
                result.failed += 1;
            }
        }

        Ok(result)
    }

    /// Returns whether the archive was decompressed successfully.
    fn process_one(&mut self, original: &str) -> Result<bool> {
        let decompressed = decompress(
            Path::new(original),
            &self.config.temp_dir,
            self.config.max_decompressed_bytes,
        );

        let output = match decompressed {
            Ok(output) => output,
            Err(e) => {
                warn!(path = %original, error = %e, "Failed to decompress archive");
                self.state.mark_failed(original, e.to_string())?;
                self.save()?;
                return Ok(false);
            }
        };

        let final_str = output.final_path.to_string_lossy().into_owned();
        if output.bytes == 0 {
            let _ = std::fs::remove_file(&output.partial_path);
            self.state.mark_completed(original, final_str)?;
            self.state.mark_cleaned(original)?;
            self.save()?;
            info!(path = %original, "Archive decompressed to nothing, marked cleaned");
            return Ok(true);
        }

        self.state.mark_completed(original, final_str.clone())?;
        self.save()?;
        if let Err(e) = std::fs::rename(&output.partial_path, &output.final_path) {
            // The record is already completed; cleanup finishes the rename
            warn!(
                path = %original,
                temp = %final_str,
                error = %e,
                "Failed to rename decompressed output, will retry"
            );
        }

        if let Some(name) = temp_filename(&final_str) {
            if let Err(e) = self.mapping.append(&name, original) {
                warn!("Failed to append path mapping for {}: {}", name, e);
            }
        }

        info!(
            path = %original,
            temp = %final_str,
            bytes = output.bytes,
            "Decompressed archive"
        );
        Ok(true)
    }

    /// Delete fully consumed decompressed files
    pub fn cleanup(&mut self, store: &mut dyn PositionStore) -> Result<usize> {
        let removed = cleanup(&mut self.state, store)?;
        self.save()?;
        if removed > 0 {
            debug!(
                removed,
                cleaned = self.state.counters.cleaned,
                "Archive cleanup finished"
            );
        }
        Ok(removed)
    }

    /// One archive tick: scan and process every archive root according to its
    /// overlap with the tailing roots, then clean up.
    ///
    /// Roots overlapping a tailing root are drained completely and then marked, so
    /// later ticks skip them. Other roots get one batch per tick.
    pub fn run_tick<S: AsRef<str>>(
        &mut self,
        tailing_roots: &[S],
        store: &mut dyn PositionStore,
        cancel: &CancellationToken,
    ) -> Result<ArchiveTick> {
        let mut tick = ArchiveTick::default();
        let roots = self.config.roots.clone();
        let max_depth = self.config.max_depth;
        let batch_size = self.config.batch_size;
        let ceiling = self.config.batch_byte_ceiling;

        for root in &roots {
            if cancel.is_cancelled() {
                break;
            }
            let root_str = root.path.to_string_lossy().into_owned();
            let overlapping: Vec<&str> = tailing_roots
                .iter()
                .map(|t| t.as_ref())
                .filter(|t| paths_overlap(&root_str, t))
                .collect();

            if overlapping.is_empty() {
                tick.discovered += self.scan(std::slice::from_ref(root), max_depth)?.len();
                let batch =
                    self.process_root_batch(Some(&root_str), batch_size, ceiling, cancel)?;
                tick.batch.add(batch);
                continue;
            }

            let markers_dir = &self.config.markers_dir;
            if overlapping
                .iter()
                .all(|t| CompletionMarker::exists(markers_dir, &root_str, t))
            {
                debug!(root = %root_str, "Archive root already drained, skipping scan");
                tick.roots_skipped += 1;
                continue;
            }

            tick.discovered += self.scan(std::slice::from_ref(root), max_depth)?.len();
            while !cancel.is_cancelled() && self.state.pending(Some(&root_str)).next().is_some() {
                let batch =
                    self.process_root_batch(Some(&root_str), batch_size, ceiling, cancel)?;
                tick.batch.add(batch);
            }

            if self.state.pending(Some(&root_str)).next().is_none() {
                self.write_markers(&root_str, &overlapping)?;
            }
        }

        tick.cleaned = self.cleanup(store)?;
        Ok(tick)
    }

    fn write_markers(&self, root: &str, tailing_roots: &[&str]) -> Result<()> {
        let (mut completed, mut failed) = (0, 0);
        for r in self.state.archives.iter().filter(|r| r.archive_root == root) {
            match r.status {
                ArchiveStatus::Completed | ArchiveStatus::Cleaned => completed += 1,
                ArchiveStatus::Failed => failed += 1,
                ArchiveStatus::Pending => {}
            }
        }

        for tailing_root in tailing_roots {
            let marker = CompletionMarker {
                archive_root: root.to_string(),
                tailing_root: tailing_root.to_string(),
                completed_at: Utc::now(),
                completed,
                failed,
            };
            let path = marker.write(&self.config.markers_dir)?;
            info!(
                archive_root = %root,
                tailing_root = %tailing_root,
                completed,
                failed,
                marker = %path.display(),
                "Overlapping archive root fully processed"
            );
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.state.save(&self.config.state_path)
    }
}

struct Decompressed {
    partial_path: PathBuf,
    final_path: PathBuf,
    bytes: u64,
}

/// Decompress `src` into a uniquely named `.partial` file under `temp_dir`.
///
/// Output that does not end in a newline gets one appended so the last line
/// becomes readable. The partial file is removed on any failure.
fn decompress(src: &Path, temp_dir: &Path, max_bytes: u64) -> Result<Decompressed> {
    let file = File::open(src)?;
    let final_path = unique_temp_path(src, temp_dir);
    let partial_path = partial_path_for(&final_path);

    let result = write_decompressed(file, &partial_path, max_bytes);
    match result {
        Ok(bytes) => Ok(Decompressed {
            partial_path,
            final_path,
            bytes,
        }),
        Err(e) => {
            let _ = std::fs::remove_file(&partial_path);
            Err(e)
        }
    }
}

fn write_decompressed(src: File, dest: &Path, max_bytes: u64) -> Result<u64> {
    let mut decoder = MultiGzDecoder::new(BufReader::new(src));
    let out = File::create(dest)?;
    let mut writer = BufWriter::new(out);

    let mut buf = vec![0u8; 64 * 1024];
    let mut written: u64 = 0;
    let mut last_byte = None;
    loop {
        let n = decoder.read(&mut buf)?;
        if n == 0 {
            break;
        }
        written += n as u64;
        if written > max_bytes {
            return Err(Error::DecompressedTooLarge(max_bytes));
        }
        writer.write_all(&buf[..n])?;
        last_byte = Some(buf[n - 1]);
    }

    if last_byte.is_some_and(|b| b != b'\n') {
        writer.write_all(b"\n")?;
        written += 1;
    }

    let out = writer.into_inner().map_err(|e| e.into_error())?;
    out.sync_all()?;
    Ok(written)
}

/// `<stem>_<yyyymmddHHMMSS>_<6 alnum>.log`, not yet present in `temp_dir`
fn unique_temp_path(src: &Path, temp_dir: &Path) -> PathBuf {
    let name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(".gz").unwrap_or(&name);
    let stem = stem.strip_suffix(".log").unwrap_or(stem);
    let stem = if stem.is_empty() { "archive" } else { stem };

    loop {
        let suffix: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        let candidate = temp_dir.join(format!(
            "{}_{}_{}.log",
            stem,
            Utc::now().format("%Y%m%d%H%M%S"),
            suffix
        ));
        if !candidate.exists() && !partial_path_for(&candidate).exists() {
            return candidate;
        }
    }
}

/// Finish renames interrupted after the state was saved and drop stray partial output.
fn recover_temp_dir(state: &ProcessingState, temp_dir: &Path) {
    for record in state.completed() {
        let Some(temp) = record.temp_file_path.as_deref() else {
            continue;
        };
        let final_path = Path::new(temp);
        let partial = partial_path_for(final_path);

        if !final_path.exists() && partial.exists() {
            match std::fs::rename(&partial, final_path) {
                Ok(()) => info!(temp = %temp, "Recovered interrupted decompression"),
                Err(e) => warn!("Failed to recover {}: {}", temp, e),
            }
        }
    }

    let entries = match std::fs::read_dir(temp_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Failed to list {:?}: {}", temp_dir, e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == PARTIAL_SUFFIX) {
            debug!("Removing stray partial output {:?}", path);
            let _ = std::fs::remove_file(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::MemoryPositionStore;
    use crate::tail::file_id_for;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    fn write_gz(path: &Path, contents: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        enc.write_all(contents).unwrap();
        enc.finish().unwrap();
    }

    fn config(base: &Path) -> ArchiveConfig {
        let mut config = ArchiveConfig::with_state_dir(base.join("state"));
        config.roots = vec![DiscoveryRoot::new(base.join("archives"), "archive")];
        config
    }

    fn temp_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_decompress_batch() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        write_gz(&dir.path().join("archives/app.log.gz"), b"line 1\nline 2");

        let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();
        let added = processor.scan(&cfg.roots, cfg.max_depth).unwrap();
        assert_eq!(added.len(), 1);

        let result = processor
            .process_batch(3, 1024, &CancellationToken::new())
            .unwrap();
        assert_eq!(result, BatchResult { processed: 1, failed: 0 });

        let record = &processor.state().archives[0];
        assert_eq!(record.status, ArchiveStatus::Completed);
        let temp = PathBuf::from(record.temp_file_path.clone().unwrap());
        let name = temp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("app_"));
        assert!(name.ends_with(".log"));
        assert_eq!(std::fs::read_to_string(&temp).unwrap(), "line 1\nline 2\n");
        assert_eq!(
            processor.mapping().get(&name),
            Some(dir.path().join("archives/app.log.gz").to_str().unwrap())
        );
        assert_eq!(temp_files(&cfg.temp_dir).len(), 1);
    }

    #[test]
    fn test_batch_ceiling_respected() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        for i in 0..5 {
            write_gz(&dir.path().join(format!("archives/f{}.gz", i)), b"data\n");
        }

        let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();
        processor.scan(&cfg.roots, cfg.max_depth).unwrap();

        let result = processor
            .process_batch(3, 100 * 1024 * 1024, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.processed, 3);
        assert_eq!(processor.state().counters.pending, 2);
    }

    #[test]
    fn test_byte_ceiling_truncates_batch_but_never_empties_it() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        for i in 0..3 {
            write_gz(&dir.path().join(format!("archives/f{}.gz", i)), b"data\n");
        }

        let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();
        processor.scan(&cfg.roots, cfg.max_depth).unwrap();
        let size = processor.state().archives[0].size;

        // Room for one archive and a half
        let result = processor
            .process_batch(3, size + size / 2, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.processed, 1);

        // A ceiling smaller than any single archive still processes one
        let result = processor
            .process_batch(3, 1, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.processed, 1);
        assert_eq!(processor.state().counters.pending, 1);
    }

    #[test]
    fn test_oversized_and_corrupt_archives_fail_without_blocking_siblings() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_file_bytes = 200;
        write_gz(&dir.path().join("archives/a_good.gz"), b"fine\n");
        std::fs::write(dir.path().join("archives/b_corrupt.gz"), b"not gzip at all").unwrap();
        std::fs::write(dir.path().join("archives/c_huge.gz"), vec![0u8; 500]).unwrap();

        let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();
        processor.scan(&cfg.roots, cfg.max_depth).unwrap();
        let result = processor
            .process_batch(3, 1024 * 1024, &CancellationToken::new())
            .unwrap();

        assert_eq!(result, BatchResult { processed: 1, failed: 2 });
        let state = processor.state();
        let corrupt = state
            .get(dir.path().join("archives/b_corrupt.gz").to_str().unwrap())
            .unwrap();
        assert_eq!(corrupt.status, ArchiveStatus::Failed);
        assert_eq!(corrupt.extraction_attempts, 1);
        assert!(corrupt.last_error.is_some());
        // Failed output never lingers
        assert_eq!(temp_files(&cfg.temp_dir).len(), 1);
    }

    #[test]
    fn test_decompressed_size_guard() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_decompressed_bytes = 16;
        write_gz(&dir.path().join("archives/bomb.gz"), &[b'a'; 4096]);

        let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();
        processor.scan(&cfg.roots, cfg.max_depth).unwrap();
        let result = processor
            .process_batch(1, 1024, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.failed, 1);
        assert!(temp_files(&cfg.temp_dir).is_empty());
    }

    #[test]
    fn test_empty_archive_is_cleaned_immediately() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        write_gz(&dir.path().join("archives/empty.gz"), b"");

        let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();
        processor.scan(&cfg.roots, cfg.max_depth).unwrap();
        processor
            .process_batch(1, 1024, &CancellationToken::new())
            .unwrap();

        assert_eq!(processor.state().archives[0].status, ArchiveStatus::Cleaned);
        assert!(temp_files(&cfg.temp_dir).is_empty());
    }

    #[test]
    fn test_cancellation_stops_between_files() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        write_gz(&dir.path().join("archives/a.gz"), b"a\n");

        let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();
        processor.scan(&cfg.roots, cfg.max_depth).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = processor.process_batch(3, 1024, &cancel).unwrap();
        assert_eq!(result.processed, 0);
        assert_eq!(processor.state().counters.pending, 1);
    }

    #[test]
    fn test_idempotent_convergence() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        for i in 0..7 {
            write_gz(
                &dir.path().join(format!("archives/sub/f{}.log.gz", i)),
                format!("archive {}\n", i).as_bytes(),
            );
        }
        std::fs::write(dir.path().join("archives/broken.gz"), b"junk").unwrap();

        let mut store = MemoryPositionStore::new();
        let cancel = CancellationToken::new();

        for _ in 0..10 {
            // Every iteration reopens, like a fresh process
            let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();
            processor.scan(&cfg.roots, cfg.max_depth).unwrap();
            processor.process_batch(3, 1024 * 1024, &cancel).unwrap();

            // Simulate the tail reader consuming everything decompressed so far
            for record in processor.state().completed() {
                let temp = record.temp_file_path.clone().unwrap();
                let size = std::fs::metadata(&temp).unwrap().len();
                store.commit_offset(&file_id_for(Path::new(&temp)), size).unwrap();
            }
            processor.cleanup(&mut store).unwrap();
        }

        let processor = ArchiveProcessor::open(cfg.clone()).unwrap();
        let state = processor.state();
        assert_eq!(state.archives.len(), 8);
        assert_eq!(state.counters.cleaned, 7);
        assert_eq!(state.counters.failed, 1);
        assert_eq!(state.counters.pending, 0);
        for record in &state.archives {
            assert!(record.status.is_terminal());
        }
        assert!(temp_files(&cfg.temp_dir).is_empty());
    }

    #[test]
    fn test_overlapping_root_is_drained_and_marked() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.batch_size = 1;
        for i in 0..4 {
            write_gz(&dir.path().join(format!("archives/f{}.gz", i)), b"x\n");
        }
        let tailing = [dir.path().to_string_lossy().into_owned()];

        let mut store = MemoryPositionStore::new();
        let cancel = CancellationToken::new();
        let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();

        let tick = processor.run_tick(&tailing, &mut store, &cancel).unwrap();
        assert_eq!(tick.batch.processed, 4);
        assert_eq!(processor.state().counters.completed, 4);
        assert!(CompletionMarker::exists(
            &cfg.markers_dir,
            &cfg.roots[0].path.to_string_lossy(),
            &tailing[0]
        ));

        // New archives under a marked root are not picked up
        write_gz(&dir.path().join("archives/late.gz"), b"late\n");
        let tick = processor.run_tick(&tailing, &mut store, &cancel).unwrap();
        assert_eq!(tick.roots_skipped, 1);
        assert_eq!(tick.discovered, 0);
    }

    #[test]
    fn test_non_overlapping_root_gets_one_batch_per_tick() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.batch_size = 2;
        for i in 0..5 {
            write_gz(&dir.path().join(format!("archives/f{}.gz", i)), b"x\n");
        }
        let tailing = ["/somewhere/else".to_string()];

        let mut store = MemoryPositionStore::new();
        let cancel = CancellationToken::new();
        let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();

        let tick = processor.run_tick(&tailing, &mut store, &cancel).unwrap();
        assert_eq!(tick.batch.processed, 2);
        assert_eq!(processor.state().counters.pending, 3);
        assert!(!cfg.markers_dir.exists());
    }

    #[test]
    fn test_second_processor_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let _first = ArchiveProcessor::open(cfg.clone()).unwrap();
        assert!(matches!(
            ArchiveProcessor::open(cfg),
            Err(Error::Locked(_))
        ));
    }

    #[test]
    fn test_interrupted_rename_is_recovered() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        write_gz(&dir.path().join("archives/a.gz"), b"a\n");

        let temp = {
            let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();
            processor.scan(&cfg.roots, cfg.max_depth).unwrap();
            processor
                .process_batch(1, 1024, &CancellationToken::new())
                .unwrap();
            processor.state().archives[0].temp_file_path.clone().unwrap()
        };

        // Put the file back into its pre-rename state and add a stray partial
        let partial = format!("{}.partial", temp);
        std::fs::rename(&temp, &partial).unwrap();
        std::fs::write(cfg.temp_dir.join("stray.log.partial"), b"junk").unwrap();

        let _processor = ArchiveProcessor::open(cfg.clone()).unwrap();
        assert!(Path::new(&temp).exists());
        assert!(!Path::new(&partial).exists());
        assert!(!cfg.temp_dir.join("stray.log.partial").exists());
    }

    #[test]
    fn test_unrenamed_output_is_tailed_before_cleanup() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        write_gz(&dir.path().join("archives/a.gz"), b"a\n");

        let mut processor = ArchiveProcessor::open(cfg.clone()).unwrap();
        processor.scan(&cfg.roots, cfg.max_depth).unwrap();
        processor
            .process_batch(1, 1024, &CancellationToken::new())
            .unwrap();
        let temp = processor.state().archives[0].temp_file_path.clone().unwrap();

        // State a failed rename leaves behind in a running process
        let partial = partial_path_for(Path::new(&temp));
        std::fs::rename(&temp, &partial).unwrap();

        let mut store = MemoryPositionStore::new();
        assert_eq!(processor.cleanup(&mut store).unwrap(), 0);
        assert_eq!(processor.state().archives[0].status, ArchiveStatus::Completed);
        assert!(Path::new(&temp).exists());
        assert!(!partial.exists());

        store.commit_offset(&file_id_for(Path::new(&temp)), 2).unwrap();
        assert_eq!(processor.cleanup(&mut store).unwrap(), 1);
        assert_eq!(processor.state().archives[0].status, ArchiveStatus::Cleaned);
    }

    #[test]
    fn test_leftover_lock_file_does_not_block_open() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        std::fs::create_dir_all(cfg.lock_path().parent().unwrap()).unwrap();
        std::fs::write(cfg.lock_path(), b"").unwrap();

        assert!(ArchiveProcessor::open(cfg).is_ok());
    }
}
