// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::context::PipelineContext;
use super::record::{FIELD_LOG_PATH, Record};
use super::{Stage, StageOutcome};
use crate::archive::PathMapping;

/// Sets `source_file_path`, resolving decompressed files back to the archive they
/// came from.
#[derive(Debug)]
pub struct SourcePathStage {
    /// Records whose tag starts with this came from the decompression directory
    archive_tag: String,
    mapping_path: PathBuf,
}

impl SourcePathStage {
    pub fn new(archive_tag: impl Into<String>, mapping_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_tag: archive_tag.into(),
            mapping_path: mapping_path.into(),
        }
    }

    fn is_archive_record(&self, tag: &str) -> bool {
        tag == self.archive_tag
            || tag
                .strip_prefix(self.archive_tag.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    }

    fn resolve(&self, temp_name: &str, ctx: &mut PipelineContext) -> Option<String> {
        if ctx.path_mapping.is_none() {
            match PathMapping::load(&self.mapping_path) {
                Ok(mapping) => ctx.path_mapping = Some(mapping),
                Err(e) => {
                    warn!("Failed to load path mapping {:?}: {}", self.mapping_path, e);
                    return None;
                }
            }
        }
        let mapping = ctx.path_mapping.as_mut()?;

        if let Some(original) = mapping.get(temp_name) {
            return Some(original.to_string());
        }

        // One forced reload per miss; the archive processor may have appended since
        if let Err(e) = mapping.reload() {
            warn!("Failed to reload path mapping {:?}: {}", self.mapping_path, e);
            return None;
        }
        mapping.get(temp_name).map(str::to_string)
    }
}

impl Stage for SourcePathStage {
    fn name(&self) -> &'static str {
        "source_path"
    }

    fn process(&self, mut record: Record, ctx: &mut PipelineContext) -> StageOutcome {
        let Some(log_path) = record.raw_str(FIELD_LOG_PATH).map(str::to_string) else {
            return StageOutcome::Forward(record);
        };

        if !self.is_archive_record(&record.tag) {
            record.enrichment.source_file_path = Some(log_path);
            return StageOutcome::Forward(record);
        }

        let temp_name = Path::new(&log_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match self.resolve(&temp_name, ctx) {
            Some(original) => record.enrichment.source_file_path = Some(original),
            None => {
                debug!(
                    temp = %temp_name,
                    "No original path known for decompressed file, leaving it unresolved"
                );
                record.enrichment.source_file_path = Some(log_path);
            }
        }
        StageOutcome::Forward(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn source_path(stage: &SourcePathStage, tag: &str, log_path: &str, ctx: &mut PipelineContext) -> Option<String> {
        let record = Record::new(tag, Utc::now()).with_field(FIELD_LOG_PATH, log_path);
        match stage.process(record, ctx) {
            StageOutcome::Forward(r) => r.enrichment.source_file_path,
            StageOutcome::Drop => panic!("record was dropped"),
        }
    }

    #[test]
    fn test_live_files_keep_their_path() {
        let dir = TempDir::new().unwrap();
        let stage = SourcePathStage::new("archive", dir.path().join("path_mapping.txt"));
        let mut ctx = PipelineContext::new();

        assert_eq!(
            source_path(&stage, "app.d0", "/logs/app.log", &mut ctx).as_deref(),
            Some("/logs/app.log")
        );
        assert!(ctx.path_mapping.is_none());
    }

    #[test]
    fn test_archive_files_resolve_to_original() {
        let dir = TempDir::new().unwrap();
        let mapping_path = dir.path().join("path_mapping.txt");
        std::fs::write(&mapping_path, "app_1_abc.log=/archives/app.log.gz\n").unwrap();

        let stage = SourcePathStage::new("archive", &mapping_path);
        let mut ctx = PipelineContext::new();

        assert_eq!(
            source_path(&stage, "archive.d0", "/tmp/dec/app_1_abc.log", &mut ctx).as_deref(),
            Some("/archives/app.log.gz")
        );
    }

    #[test]
    fn test_miss_forces_one_reload() {
        let dir = TempDir::new().unwrap();
        let mapping_path = dir.path().join("path_mapping.txt");
        std::fs::write(&mapping_path, "first.log=/a/first.gz\n").unwrap();

        let stage = SourcePathStage::new("archive", &mapping_path);
        let mut ctx = PipelineContext::new();
        source_path(&stage, "archive.d0", "/t/first.log", &mut ctx);

        let mut mapping = PathMapping::load(&mapping_path).unwrap();
        mapping.append("second.log", "/a/second.gz").unwrap();

        assert_eq!(
            source_path(&stage, "archive.d0", "/t/second.log", &mut ctx).as_deref(),
            Some("/a/second.gz")
        );
    }

    #[test]
    fn test_unresolved_is_left_as_temp_path() {
        let dir = TempDir::new().unwrap();
        let stage = SourcePathStage::new("archive", dir.path().join("path_mapping.txt"));
        let mut ctx = PipelineContext::new();

        assert_eq!(
            source_path(&stage, "archive.d0", "/t/unknown.log", &mut ctx).as_deref(),
            Some("/t/unknown.log")
        );
    }

    #[test]
    fn test_tag_prefix_must_end_at_segment() {
        let stage = SourcePathStage::new("archive", "/nonexistent");
        assert!(stage.is_archive_record("archive.d0"));
        assert!(stage.is_archive_record("archive"));
        assert!(!stage.is_archive_record("archived.d0"));
    }
}
