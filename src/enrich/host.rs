// SPDX-License-Identifier: Apache-2.0

use super::context::PipelineContext;
use super::record::{HostInfo, Record};
use super::{Stage, StageOutcome};

/// Stamps host identity and the latest network details on every record.
#[derive(Debug, Default)]
pub struct HostMetadataStage {
    hostname_override: Option<String>,
}

impl HostMetadataStage {
    pub fn new(hostname_override: Option<String>) -> Self {
        Self { hostname_override }
    }

    fn host_info(&self) -> HostInfo {
        let hostname = self
            .hostname_override
            .clone()
            .unwrap_or_else(local_hostname);
        HostInfo {
            hostname,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Stage for HostMetadataStage {
    fn name(&self) -> &'static str {
        "host_metadata"
    }

    fn process(&self, mut record: Record, ctx: &mut PipelineContext) -> StageOutcome {
        let host = ctx.host.get_or_insert_with(|| self.host_info());
        record.enrichment.host = Some(host.clone());
        record.enrichment.network = ctx.network.clone();
        StageOutcome::Forward(record)
    }
}

pub fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}
