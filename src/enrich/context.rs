// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};

use super::record::{HostInfo, NetworkInfo};
use crate::archive::PathMapping;

/// Process-lifetime state shared by the enrichment stages.
///
/// Each pipeline owns its own context, so independent pipelines never observe
/// each other's caches.
#[derive(Debug, Default)]
pub struct PipelineContext {
    /// Host identity, computed on first use and then fixed
    pub host: Option<HostInfo>,
    /// Latest network details absorbed from probe records
    pub network: Option<NetworkInfo>,
    /// Last successfully parsed event time
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Cached decompressed-file mapping, loaded on first use
    pub path_mapping: Option<PathMapping>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }
}
