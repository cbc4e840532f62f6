// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::settings::PipelineSettings;
use super::status::{BufferStatus, RunState, Status};
use super::{Error, Result};
use crate::archive::ArchiveProcessor;
use crate::bounded_channel::{BoundedReceiver, BoundedSender};
use crate::discovery::DiscoveryRoot;
use crate::enrich::{LineParser, NetworkProbe, Pipeline, local_hostname};
use crate::forwarder::{ForwarderEvent, SharedBuffer, lock_buffer};
use crate::position::{JsonPositionStore, PositionStore};
use crate::tail::TailReader;

// Upper bound on how long the loop waits before re-checking cancellation
const MAX_WAIT: Duration = Duration::from_millis(100);

/// Counts from one tail tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailTick {
    pub read: usize,
    pub buffered: usize,
    pub filtered: usize,
}

/// Owns every piece of blocking state and runs the periodic ticks on a
/// dedicated OS thread.
///
/// Offsets are committed only after the records read from them were pushed into
/// the forwarder buffer.
pub struct Coordinator {
    settings: PipelineSettings,
    store: Box<dyn PositionStore>,
    tail: TailReader,
    archive: Option<ArchiveProcessor>,
    tailing_roots: Vec<String>,
    parser: LineParser,
    pipeline: Pipeline,
    probe: Option<NetworkProbe>,
    buffer: SharedBuffer,
    nudges: BoundedSender<()>,
    events: BoundedReceiver<ForwarderEvent>,
    status: Status,
}

impl Coordinator {
    pub fn new(
        settings: PipelineSettings,
        buffer: SharedBuffer,
        nudges: BoundedSender<()>,
        events: BoundedReceiver<ForwarderEvent>,
    ) -> Result<Self> {
        settings.validate().map_err(Error::Config)?;
        std::fs::create_dir_all(&settings.state_dir)?;

        let store = JsonPositionStore::open(
            &settings.positions_path,
            settings.reset_positions_on_corruption,
        )?;
        Self::with_store(settings, Box::new(store), buffer, nudges, events)
    }

    /// Build with an already opened position store
    pub fn with_store(
        settings: PipelineSettings,
        store: Box<dyn PositionStore>,
        buffer: SharedBuffer,
        nudges: BoundedSender<()>,
        events: BoundedReceiver<ForwarderEvent>,
    ) -> Result<Self> {
        let tailing_roots: Vec<String> = settings
            .tail
            .roots
            .iter()
            .map(|r| r.path.to_string_lossy().into_owned())
            .collect();

        let mut tail = TailReader::new(settings.tail.clone())?;
        let archive = match &settings.archive {
            Some(config) => {
                let processor = ArchiveProcessor::open(config.clone())?;
                tail.add_root(DiscoveryRoot::new(
                    config.temp_dir.clone(),
                    settings.enrich.archive_tag.clone(),
                ))?;
                Some(processor)
            }
            None => None,
        };

        let parser = LineParser::new(&settings.timestamp_pattern).map_err(Error::Config)?;
        let pipeline = Pipeline::standard(&settings.enrich);
        let probe = settings.probe_interval.map(|_| {
            let probe = NetworkProbe::new(settings.enrich.internal_prefix.clone());
            match &settings.probe_route_target {
                Some(target) => probe.with_route_target(target.clone()),
                None => probe,
            }
        });

        let hostname = settings
            .enrich
            .hostname_override
            .clone()
            .unwrap_or_else(local_hostname);
        let status = Status::new(hostname, Utc::now());

        Ok(Self {
            settings,
            store,
            tail,
            archive,
            tailing_roots,
            parser,
            pipeline,
            probe,
            buffer,
            nudges,
            events,
            status,
        })
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn store(&self) -> &dyn PositionStore {
        self.store.as_ref()
    }

    /// Read new records from every tailed file, enrich them, buffer them and
    /// then commit their offsets.
    pub fn tail_tick(&mut self, now: Instant) -> TailTick {
        let tailed = self.tail.poll(self.store.as_mut(), now);
        let mut tick = TailTick {
            read: tailed.len(),
            ..Default::default()
        };
        if tailed.is_empty() {
            return tick;
        }

        let arrival = Utc::now();
        let mut commits: HashMap<String, u64> = HashMap::new();
        let mut encoded = Vec::with_capacity(tailed.len());
        for line in tailed {
            let file_id = line.file_id.clone();
            let end_offset = line.end_offset;

            let record = self.parser.parse(line, arrival);
            match self.pipeline.process(record) {
                Some(record) => match serde_json::to_vec(&record.to_json()) {
                    Ok(bytes) => encoded.push(Bytes::from(bytes)),
                    Err(e) => warn!(file_id = %file_id, "Failed to encode record: {}", e),
                },
                None => tick.filtered += 1,
            }

            let committed = commits.entry(file_id).or_insert(end_offset);
            *committed = (*committed).max(end_offset);
        }

        tick.buffered = encoded.len();
        let dropped: usize = {
            let mut buffer = lock_buffer(&self.buffer);
            encoded.into_iter().map(|b| buffer.push(b)).sum()
        };
        if dropped > 0 {
            warn!(dropped, "Forwarder buffer full, dropped oldest records");
        }

        for (file_id, offset) in commits {
            if let Err(e) = self.store.commit_offset(&file_id, offset) {
                warn!(file_id = %file_id, "Failed to commit offset: {}", e);
            }
        }
        if let Err(e) = self.store.sync() {
            warn!("Failed to persist positions, will retry: {}", e);
        }

        if tick.buffered > 0 {
            // A full channel already has a flush pending
            let _ = self.nudges.try_send(());
        }

        self.status.tail.records_read += tick.read as u64;
        self.status.tail.records_buffered += tick.buffered as u64;
        self.status.tail.records_filtered += tick.filtered as u64;
        tick
    }

    /// Scan, decompress and clean up archives according to the overlap policy.
    pub fn archive_tick(&mut self, cancel: &CancellationToken) {
        let Some(archive) = self.archive.as_mut() else {
            return;
        };

        match archive.run_tick(&self.tailing_roots, self.store.as_mut(), cancel) {
            Ok(tick) => {
                if tick.discovered > 0 || tick.batch.processed > 0 || tick.batch.failed > 0 {
                    info!(
                        discovered = tick.discovered,
                        processed = tick.batch.processed,
                        failed = tick.batch.failed,
                        cleaned = tick.cleaned,
                        skipped_roots = tick.roots_skipped,
                        "Archive tick finished"
                    );
                }
            }
            Err(e) => warn!("Archive tick failed, will retry: {}", e),
        }

        if let Err(e) = archive.save() {
            warn!("Failed to save processing state: {}", e);
        }
        if let Err(e) = self.store.sync() {
            warn!("Failed to persist positions, will retry: {}", e);
        }
        self.status.archives = Some(archive.state().counters.clone());
    }

    /// Feed a network probe record through the pipeline, where it is absorbed
    /// into the context and dropped.
    pub fn probe_tick(&mut self) {
        let Some(probe) = &self.probe else {
            return;
        };
        let Some(record) = probe.probe(Utc::now()) else {
            return;
        };
        if self.pipeline.process(record).is_some() {
            warn!("Probe record was not filtered, check the internal prefix");
        }
        self.status.network_ip = self
            .pipeline
            .context()
            .network
            .as_ref()
            .map(|n| n.ip.clone());
    }

    /// Apply queued forwarder events and write the status file
    pub fn status_tick(&mut self) {
        self.drain_events();
        self.status.updated_at = Utc::now();
        self.status.tail.tracked_files = self.tail.tracked_count();
        {
            let buffer = lock_buffer(&self.buffer);
            self.status.buffer = BufferStatus {
                records: buffer.len(),
                bytes: buffer.bytes(),
                dropped: buffer.dropped(),
            };
        }
        if let Err(e) = self.status.write(&self.settings.status_path) {
            warn!("Failed to write status file: {}", e);
        }
    }

    fn drain_events(&mut self) {
        let now = Utc::now();
        for event in self.events.drain() {
            self.status.apply(event, now);
        }
    }

    /// Run ticks until `cancel` fires, then persist everything.
    pub fn run(mut self, cancel: CancellationToken) {
        info!(
            roots = self.tailing_roots.len(),
            archives = self.archive.is_some(),
            "Coordinator started"
        );

        let tail_interval = self.settings.tail_interval;
        let status_interval = self.settings.status_interval;
        let archive_interval = self.settings.archive.as_ref().map(|a| a.interval);
        let probe_interval = self.settings.probe_interval;

        let start = Instant::now();
        let mut next_probe = start;
        let mut next_tail = start;
        let mut next_archive = start;
        let mut next_status = start;

        loop {
            if cancel.is_cancelled() {
                debug!("Cancellation received, beginning orderly shutdown");
                break;
            }

            let now = Instant::now();
            if let Some(interval) = probe_interval {
                if now >= next_probe {
                    self.probe_tick();
                    next_probe = now + interval;
                }
            }
            if now >= next_tail {
                self.tail_tick(now);
                next_tail = Instant::now() + tail_interval;
            }
            if let Some(interval) = archive_interval {
                if now >= next_archive {
                    self.archive_tick(&cancel);
                    next_archive = Instant::now() + interval;
                }
            }
            if now >= next_status {
                self.status_tick();
                next_status = Instant::now() + status_interval;
            }

            let mut wake = next_tail.min(next_status);
            if probe_interval.is_some() {
                wake = wake.min(next_probe);
            }
            if archive_interval.is_some() {
                wake = wake.min(next_archive);
            }
            let wait = wake.saturating_duration_since(Instant::now()).min(MAX_WAIT);
            if let Some(event) = self.events.recv_timeout(wait) {
                self.status.apply(event, Utc::now());
            }
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.store.sync() {
            error!("Failed to persist positions on shutdown: {}", e);
        }
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.save() {
                error!("Failed to save processing state on shutdown: {}", e);
            }
        }
        self.status.state = RunState::Stopped;
        self.status_tick();
        info!("Coordinator stopped");
    }
}
