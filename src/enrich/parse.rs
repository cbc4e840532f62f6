// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use regex::Regex;

use super::record::{FIELD_LOG_PATH, FIELD_MESSAGE, FIELD_RAW_TIMESTAMP, Provenance, Record};
use crate::tail::TailedRecord;

/// Leading timestamp in any of the layouts the timestamp stage understands
pub const DEFAULT_TIMESTAMP_PATTERN: &str = r"^(?P<ts>\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?|\[?\d{2}/[A-Z][a-z]{2}/\d{4}:\d{2}:\d{2}:\d{2} [+-]\d{4}\]?|[A-Z][a-z]{2} +\d{1,2} \d{2}:\d{2}:\d{2}|\d{13}|\d{10})";

/// Turns tailed lines into records
#[derive(Debug, Clone)]
pub struct LineParser {
    timestamp_pattern: Regex,
}

impl LineParser {
    /// `pattern` must contain a named group `ts`
    pub fn new(pattern: &str) -> Result<Self, String> {
        let timestamp_pattern = Regex::new(pattern).map_err(|e| e.to_string())?;
        if !timestamp_pattern.capture_names().any(|n| n == Some("ts")) {
            return Err("timestamp pattern must contain a named group `ts`".to_string());
        }
        Ok(Self { timestamp_pattern })
    }

    pub fn parse(&self, line: TailedRecord, arrival: DateTime<Utc>) -> Record {
        let log_path = line.path.to_string_lossy().into_owned();
        let mut record = Record::new(line.tag, arrival).with_field(FIELD_LOG_PATH, log_path);

        if let Some(ts) = self
            .timestamp_pattern
            .captures(&line.text)
            .and_then(|c| c.name("ts"))
        {
            let ts = ts.as_str().trim_start_matches('[').trim_end_matches(']');
            record = record.with_field(FIELD_RAW_TIMESTAMP, ts);
        }

        record.provenance = Some(Provenance {
            file_id: line.file_id,
            end_offset: line.end_offset,
        });
        record.with_field(FIELD_MESSAGE, line.text)
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self {
            timestamp_pattern: Regex::new(DEFAULT_TIMESTAMP_PATTERN).expect("valid default pattern"),
        }
    }
}
