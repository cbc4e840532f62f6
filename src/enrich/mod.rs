// SPDX-License-Identifier: Apache-2.0

//! Record enrichment.
//!
//! A pipeline is an ordered list of [`Stage`]s. Each stage either forwards a
//! (possibly modified) record or drops it; a drop ends processing for that record.
//! Process-lifetime caches live on the [`PipelineContext`] owned by the pipeline.

mod context;
mod host;
mod normalize;
mod parse;
mod probe;
mod record;
mod source_path;
mod timestamp;

pub use context::PipelineContext;
pub use host::{HostMetadataStage, local_hostname};
pub use normalize::TimestampStage;
pub use parse::{DEFAULT_TIMESTAMP_PATTERN, LineParser};
pub use probe::{DEFAULT_INTERNAL_PREFIX, InternalFilterStage, NETINFO_SUFFIX, NetworkProbe};
pub use record::{
    Enrichment, FIELD_LOG_PATH, FIELD_MESSAGE, FIELD_RAW_TIMESTAMP, HostInfo, NetworkInfo,
    Provenance, Record,
};
pub use source_path::SourcePathStage;
pub use timestamp::{parse_offset, parse_timestamp};

use chrono::{FixedOffset, Offset, Utc};
use std::path::PathBuf;
use tracing::trace;

/// Result of a single stage
#[derive(Debug)]
pub enum StageOutcome {
    Forward(Record),
    Drop,
}

pub trait Stage: Send {
    fn name(&self) -> &'static str;

    fn process(&self, record: Record, ctx: &mut PipelineContext) -> StageOutcome;
}

/// Settings for the standard stage chain
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// Tag of the decompressed-archive tail root
    pub archive_tag: String,
    pub mapping_path: PathBuf,
    /// Offset applied to timestamps that carry none
    pub timezone: FixedOffset,
    pub internal_prefix: String,
    pub hostname_override: Option<String>,
}

impl EnrichConfig {
    pub fn new(mapping_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_tag: "archive".to_string(),
            mapping_path: mapping_path.into(),
            timezone: Utc.fix(),
            internal_prefix: DEFAULT_INTERNAL_PREFIX.to_string(),
            hostname_override: None,
        }
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    ctx: PipelineContext,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            ctx: PipelineContext::new(),
        }
    }

    /// Host metadata, source path resolution, timestamp normalization and
    /// internal-record filtering, in that order.
    pub fn standard(config: &EnrichConfig) -> Self {
        Self::new(vec![
            Box::new(HostMetadataStage::new(config.hostname_override.clone())),
            Box::new(SourcePathStage::new(
                config.archive_tag.clone(),
                config.mapping_path.clone(),
            )),
            Box::new(TimestampStage::new(config.timezone)),
            Box::new(InternalFilterStage::new(config.internal_prefix.clone())),
        ])
    }

    /// Run a record through every stage. `None` means it was dropped.
    pub fn process(&mut self, record: Record) -> Option<Record> {
        let mut record = record;
        for stage in &self.stages {
            match stage.process(record, &mut self.ctx) {
                StageOutcome::Forward(r) => record = r,
                StageOutcome::Drop => {
                    trace!(stage = stage.name(), "Record dropped");
                    return None;
                }
            }
        }
        Some(record)
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }
}
