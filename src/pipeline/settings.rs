// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use crate::archive::ArchiveConfig;
use crate::enrich::{DEFAULT_TIMESTAMP_PATTERN, EnrichConfig};
use crate::forwarder::ForwarderConfig;
use crate::tail::TailConfig;

/// Everything the coordinator and the forwarder need to run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub state_dir: PathBuf,
    pub positions_path: PathBuf,
    /// Start with an empty ledger instead of failing on a corrupt positions file
    pub reset_positions_on_corruption: bool,
    pub status_path: PathBuf,
    pub status_interval: Duration,
    pub tail: TailConfig,
    pub tail_interval: Duration,
    /// Regex with a named group `ts` locating the raw timestamp in a line
    pub timestamp_pattern: String,
    /// `None` disables archive processing
    pub archive: Option<ArchiveConfig>,
    pub enrich: EnrichConfig,
    /// `None` disables the network probe
    pub probe_interval: Option<Duration>,
    pub probe_route_target: Option<String>,
    pub forwarder: ForwarderConfig,
}

impl PipelineSettings {
    /// Defaults with every state file under `state_dir` and archives disabled
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        let archive = ArchiveConfig::with_state_dir(&state_dir);
        Self {
            positions_path: state_dir.join("positions.json"),
            reset_positions_on_corruption: false,
            status_path: state_dir.join("status.json"),
            status_interval: Duration::from_secs(10),
            tail: TailConfig::default(),
            tail_interval: Duration::from_secs(1),
            timestamp_pattern: DEFAULT_TIMESTAMP_PATTERN.to_string(),
            enrich: EnrichConfig::new(archive.mapping_path.clone()),
            archive: None,
            probe_interval: Some(Duration::from_secs(300)),
            probe_route_target: None,
            forwarder: ForwarderConfig::default(),
            state_dir,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.tail.validate()?;
        if let Some(archive) = &self.archive {
            archive.validate()?;
            if archive.mapping_path != self.enrich.mapping_path {
                return Err("enrichment must read the archive path mapping".to_string());
            }
        }
        self.forwarder.validate()?;
        if self.tail_interval.is_zero() || self.status_interval.is_zero() {
            return Err("tick intervals must be greater than zero".to_string());
        }
        if self.probe_interval.is_some_and(|d| d.is_zero()) {
            return Err("probe interval must be greater than zero".to_string());
        }
        Ok(())
    }
}
