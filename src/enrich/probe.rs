// SPDX-License-Identifier: Apache-2.0

//! Internal side-channel records.
//!
//! The network probe periodically produces records tagged under the internal
//! prefix. The filter stage absorbs them into the pipeline context and drops
//! them, so they never reach the collector.

use chrono::{DateTime, Utc};
use std::net::{IpAddr, UdpSocket};
use tracing::debug;

use super::context::PipelineContext;
use super::record::{NetworkInfo, Record};
use super::{Stage, StageOutcome};

pub const DEFAULT_INTERNAL_PREFIX: &str = "internal.";
pub const NETINFO_SUFFIX: &str = "netinfo";

const FIELD_IP: &str = "ip";
const FIELD_HOSTNAME: &str = "hostname";

/// Produces `internal.netinfo` records
#[derive(Debug, Clone)]
pub struct NetworkProbe {
    prefix: String,
    /// Address used to select the outbound interface; no packet is sent
    route_target: String,
}

impl NetworkProbe {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            route_target: "8.8.8.8:80".to_string(),
        }
    }

    pub fn with_route_target(mut self, target: impl Into<String>) -> Self {
        self.route_target = target.into();
        self
    }

    pub fn tag(&self) -> String {
        format!("{}{}", self.prefix, NETINFO_SUFFIX)
    }

    /// Build a probe record, `None` when no local address can be determined
    pub fn probe(&self, now: DateTime<Utc>) -> Option<Record> {
        let ip = match local_ip(&self.route_target) {
            Ok(ip) => ip,
            Err(e) => {
                debug!("Network probe could not determine a local address: {}", e);
                return None;
            }
        };
        Some(
            Record::new(self.tag(), now)
                .with_field(FIELD_IP, ip.to_string())
                .with_field(FIELD_HOSTNAME, super::host::local_hostname()),
        )
    }
}

fn local_ip(route_target: &str) -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(route_target)?;
    Ok(socket.local_addr()?.ip())
}

/// Drops internal records, absorbing network details first.
#[derive(Debug)]
pub struct InternalFilterStage {
    prefix: String,
}

impl InternalFilterStage {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Stage for InternalFilterStage {
    fn name(&self) -> &'static str {
        "internal_filter"
    }

    fn process(&self, record: Record, ctx: &mut PipelineContext) -> StageOutcome {
        let Some(kind) = record.tag.strip_prefix(self.prefix.as_str()) else {
            return StageOutcome::Forward(record);
        };

        if kind == NETINFO_SUFFIX {
            if let Some(ip) = record.raw_str(FIELD_IP) {
                ctx.network = Some(NetworkInfo {
                    ip: ip.to_string(),
                    hostname: record.raw_str(FIELD_HOSTNAME).map(str::to_string),
                });
            }
        }
        StageOutcome::Drop
    }
}
