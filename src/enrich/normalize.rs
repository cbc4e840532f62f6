// SPDX-License-Identifier: Apache-2.0

use chrono::{FixedOffset, Utc};

use super::context::PipelineContext;
use super::record::{FIELD_RAW_TIMESTAMP, Record};
use super::timestamp::parse_timestamp;
use super::{Stage, StageOutcome};

/// Sets `_timestamp` from the record's raw timestamp and `_ingest_time` to now.
///
/// When the raw timestamp is missing or unparsable the last successfully parsed
/// timestamp is reused, or the current time if none has been seen yet.
#[derive(Debug)]
pub struct TimestampStage {
    field: String,
    tz: FixedOffset,
}

impl TimestampStage {
    pub fn new(tz: FixedOffset) -> Self {
        Self {
            field: FIELD_RAW_TIMESTAMP.to_string(),
            tz,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }
}

impl Stage for TimestampStage {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn process(&self, mut record: Record, ctx: &mut PipelineContext) -> StageOutcome {
        let now = Utc::now();
        let parsed = record
            .raw_str(&self.field)
            .and_then(|raw| parse_timestamp(raw, self.tz, now));

        let timestamp = match parsed {
            Some(ts) => {
                ctx.last_timestamp = Some(ts);
                ts
            }
            None => ctx.last_timestamp.unwrap_or(now),
        };

        record.enrichment.timestamp = Some(timestamp);
        record.enrichment.ingest_time = Some(now);
        StageOutcome::Forward(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};

    fn run(stage: &TimestampStage, raw: Option<&str>, ctx: &mut PipelineContext) -> Record {
        let mut record = Record::new("app.d0", Utc::now());
        if let Some(raw) = raw {
            record = record.with_field(FIELD_RAW_TIMESTAMP, raw);
        }
        match stage.process(record, ctx) {
            StageOutcome::Forward(r) => r,
            StageOutcome::Drop => panic!("record was dropped"),
        }
    }

    fn ts(record: &Record) -> DateTime<Utc> {
        record.enrichment.timestamp.unwrap()
    }

    #[test]
    fn test_unparsable_reuses_previous_timestamp() {
        let stage = TimestampStage::new(FixedOffset::east_opt(0).unwrap());
        let mut ctx = PipelineContext::new();

        let first = run(&stage, Some("2024-01-02 03:04:05.123"), &mut ctx);
        assert_eq!(
            ts(&first),
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap() + chrono::Duration::milliseconds(123)
        );

        let second = run(&stage, Some("garbage"), &mut ctx);
        assert_eq!(ts(&second), ts(&first));

        let third = run(&stage, None, &mut ctx);
        assert_eq!(ts(&third), ts(&first));
        assert!(third.enrichment.ingest_time.unwrap() > ts(&first));
    }

    #[test]
    fn test_no_previous_timestamp_uses_now() {
        let stage = TimestampStage::new(FixedOffset::east_opt(0).unwrap());
        let mut ctx = PipelineContext::new();

        let before = Utc::now();
        let record = run(&stage, Some("garbage"), &mut ctx);
        assert!(ts(&record) >= before);
        assert!(ctx.last_timestamp.is_none());
    }

    #[test]
    fn test_ingest_time_is_always_set() {
        let stage = TimestampStage::new(FixedOffset::east_opt(0).unwrap());
        let mut ctx = PipelineContext::new();

        let record = run(&stage, Some("1700000000"), &mut ctx);
        assert!(record.enrichment.ingest_time.is_some());
        assert_eq!(ts(&record), DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    }
}
