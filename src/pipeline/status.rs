// SPDX-License-Identifier: Apache-2.0

//! Operator-facing status document, rewritten atomically on every status tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::archive::Counters;
use crate::forwarder::ForwarderEvent;
use crate::persistence::{self, atomic_write_json, read_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailStatus {
    pub tracked_files: usize,
    /// Records read from tailed files
    pub records_read: u64,
    /// Records accepted into the forwarder buffer
    pub records_buffered: u64,
    /// Records dropped by the enrichment pipeline
    pub records_filtered: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStatus {
    pub records: usize,
    pub bytes: usize,
    /// Records dropped because the buffer was full
    pub dropped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderStatus {
    pub delivered_records: u64,
    pub delivered_bytes: u64,
    pub retries: u64,
    pub last_error: Option<String>,
    pub last_delivery: Option<DateTime<Utc>>,
    /// Set once the collector rejects a batch; forwarding stays stopped until restart
    pub halted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub state: RunState,
    pub version: String,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tail: TailStatus,
    pub buffer: BufferStatus,
    pub forwarder: ForwarderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archives: Option<Counters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_ip: Option<String>,
}

impl Status {
    pub fn new(hostname: String, now: DateTime<Utc>) -> Self {
        Self {
            state: RunState::Running,
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname,
            started_at: now,
            updated_at: now,
            tail: TailStatus::default(),
            buffer: BufferStatus::default(),
            forwarder: ForwarderStatus::default(),
            archives: None,
            network_ip: None,
        }
    }

    /// Fold a forwarder event into the status
    pub fn apply(&mut self, event: ForwarderEvent, now: DateTime<Utc>) {
        let fwd = &mut self.forwarder;
        match event {
            ForwarderEvent::Delivered { records, bytes } => {
                fwd.delivered_records += records as u64;
                fwd.delivered_bytes += bytes as u64;
                fwd.last_delivery = Some(now);
                fwd.last_error = None;
            }
            ForwarderEvent::Retrying { reason, .. } => {
                fwd.retries += 1;
                fwd.last_error = Some(reason);
            }
            ForwarderEvent::Halted { reason } => {
                fwd.last_error = Some(reason.clone());
                fwd.halted = Some(reason);
            }
        }
    }

    pub fn write(&self, path: &Path) -> persistence::Result<()> {
        atomic_write_json(path, self)
    }

    pub fn read(path: &Path) -> persistence::Result<Option<Self>> {
        read_json(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_events_update_forwarder_status() {
        let now = Utc::now();
        let mut status = Status::new("host-a".to_string(), now);

        status.apply(
            ForwarderEvent::Retrying {
                reason: "collector responded 503".to_string(),
                attempt: 1,
            },
            now,
        );
        assert_eq!(status.forwarder.retries, 1);
        assert!(status.forwarder.last_error.is_some());

        status.apply(ForwarderEvent::Delivered { records: 3, bytes: 90 }, now);
        assert_eq!(status.forwarder.delivered_records, 3);
        assert_eq!(status.forwarder.last_error, None);

        status.apply(
            ForwarderEvent::Halted {
                reason: "authentication rejected".to_string(),
            },
            now,
        );
        assert_eq!(
            status.forwarder.halted.as_deref(),
            Some("authentication rejected")
        );
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.json");
        let mut status = Status::new("host-a".to_string(), Utc::now());
        status.archives = Some(Counters {
            completed: 2,
            ..Default::default()
        });

        status.write(&path).unwrap();
        let loaded = Status::read(&path).unwrap().unwrap();
        assert_eq!(loaded, status);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["state"], "running");
        assert!(raw.get("network_ip").is_none());
    }
}
