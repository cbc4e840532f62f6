// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw field holding the log line
pub const FIELD_MESSAGE: &str = "message";
/// Raw field holding the path the line was read from
pub const FIELD_LOG_PATH: &str = "log_path";
/// Raw field holding the timestamp text extracted from the line
pub const FIELD_RAW_TIMESTAMP: &str = "raw_timestamp";

/// A record flowing from the tail reader to the forwarder.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub tag: String,
    pub arrival: DateTime<Utc>,
    /// Open-ended fields produced by parsing
    pub raw: Map<String, Value>,
    pub enrichment: Enrichment,
    /// Where the record came from, used for offset commits. Never serialized.
    pub provenance: Option<Provenance>,
}

/// Fields added by the enrichment stages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    /// Normalized event time, `_timestamp`
    pub timestamp: Option<DateTime<Utc>>,
    /// Wall-clock time of enrichment, `_ingest_time`
    pub ingest_time: Option<DateTime<Utc>>,
    pub host: Option<HostInfo>,
    pub network: Option<NetworkInfo>,
    pub source_file_path: Option<String>,
}

/// Host identity, fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub agent_version: String,
}

/// Last network details reported by the probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Position store identifier of the source file
    pub file_id: String,
    /// Offset just past the record in the source file
    pub end_offset: u64,
}

impl Record {
    pub fn new(tag: impl Into<String>, arrival: DateTime<Utc>) -> Self {
        Self {
            tag: tag.into(),
            arrival,
            raw: Map::new(),
            enrichment: Enrichment::default(),
            provenance: None,
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.raw.insert(key.to_string(), value.into());
        self
    }

    pub fn raw_str(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(Value::as_str)
    }

    /// Flatten into the JSON object sent to the collector. Enrichment fields take
    /// precedence over raw fields of the same name.
    pub fn to_json(&self) -> Value {
        let mut obj = self.raw.clone();
        obj.insert("tag".to_string(), Value::String(self.tag.clone()));

        let e = &self.enrichment;
        if let Some(ts) = e.timestamp {
            obj.insert("_timestamp".to_string(), format_time(ts).into());
        }
        if let Some(ts) = e.ingest_time {
            obj.insert("_ingest_time".to_string(), format_time(ts).into());
        }
        if let Some(host) = &e.host {
            obj.insert("hostname".to_string(), host.hostname.clone().into());
            obj.insert("os".to_string(), host.os.clone().into());
            obj.insert("arch".to_string(), host.arch.clone().into());
            obj.insert("agent_version".to_string(), host.agent_version.clone().into());
        }
        if let Some(net) = &e.network {
            obj.insert("ip".to_string(), net.ip.clone().into());
        }
        if let Some(path) = &e.source_file_path {
            obj.insert("source_file_path".to_string(), path.clone().into());
        }
        Value::Object(obj)
    }
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_to_json_flattens_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut record = Record::new("app.d0", ts)
            .with_field(FIELD_MESSAGE, "hello")
            .with_field("source_file_path", "raw value loses");
        record.enrichment.timestamp = Some(ts);
        record.enrichment.source_file_path = Some("/logs/a.log".to_string());
        record.provenance = Some(Provenance {
            file_id: "/logs/a.log".to_string(),
            end_offset: 6,
        });

        let json = record.to_json();
        assert_eq!(json["message"], "hello");
        assert_eq!(json["tag"], "app.d0");
        assert_eq!(json["_timestamp"], "2024-03-01T12:00:00.000Z");
        assert_eq!(json["source_file_path"], "/logs/a.log");
        assert!(json.get("provenance").is_none());
        assert!(json.get("end_offset").is_none());
    }
}
