// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Buffer shared between the coordinator (producer) and the forwarder task
pub type SharedBuffer = Arc<Mutex<RecordBuffer>>;

/// Lock the shared buffer. A panic while holding the lock cannot leave the
/// buffer half-updated, so a poisoned lock is recovered.
pub fn lock_buffer(buffer: &SharedBuffer) -> MutexGuard<'_, RecordBuffer> {
    buffer.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    payload: Bytes,
}

/// A contiguous run of records from the front of the buffer
#[derive(Debug, Clone)]
pub struct Batch {
    pub records: Vec<Bytes>,
    pub bytes: usize,
    /// Sequence number of the last record in the batch
    pub last_seq: u64,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Bounded FIFO of encoded records.
///
/// When a push would exceed `max_bytes`, the oldest records are dropped. Records
/// leave the buffer only when a batch containing them is acknowledged or when they
/// are dropped for space.
#[derive(Debug)]
pub struct RecordBuffer {
    entries: VecDeque<Entry>,
    bytes: usize,
    max_bytes: usize,
    next_seq: u64,
    dropped: u64,
}

impl RecordBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            bytes: 0,
            max_bytes,
            next_seq: 0,
            dropped: 0,
        }
    }

    pub fn shared(max_bytes: usize) -> SharedBuffer {
        Arc::new(Mutex::new(Self::new(max_bytes)))
    }

    /// Append a record. Returns how many records were dropped to make room.
    pub fn push(&mut self, payload: Bytes) -> usize {
        if payload.len() > self.max_bytes {
            warn!(
                size = payload.len(),
                limit = self.max_bytes,
                "Record larger than the whole buffer, dropping it"
            );
            self.dropped += 1;
            return 1;
        }

        let mut dropped = 0;
        while self.bytes + payload.len() > self.max_bytes {
            match self.entries.pop_front() {
                Some(old) => {
                    self.bytes -= old.payload.len();
                    dropped += 1;
                }
                None => break,
            }
        }
        if dropped > 0 {
            self.dropped += dropped as u64;
        }

        self.bytes += payload.len();
        self.entries.push_back(Entry {
            seq: self.next_seq,
            payload,
        });
        self.next_seq += 1;
        dropped
    }

    /// Records from the front, up to `max_records` and `max_bytes`. The first
    /// record is always included so an oversized record cannot wedge the buffer.
    pub fn peek_batch(&self, max_records: usize, max_bytes: usize) -> Option<Batch> {
        let mut records = Vec::new();
        let mut bytes = 0;
        let mut last_seq = 0;
        for entry in self.entries.iter().take(max_records.max(1)) {
            if !records.is_empty() && bytes + entry.payload.len() > max_bytes {
                break;
            }
            bytes += entry.payload.len();
            last_seq = entry.seq;
            records.push(entry.payload.clone());
        }
        if records.is_empty() {
            return None;
        }
        Some(Batch {
            records,
            bytes,
            last_seq,
        })
    }

    /// Remove every record up to and including the batch's last record. Records
    /// already dropped for space are simply gone.
    pub fn ack(&mut self, batch: &Batch) -> usize {
        let mut removed = 0;
        while let Some(front) = self.entries.front() {
            if front.seq > batch.last_seq {
                break;
            }
            self.bytes -= front.payload.len();
            self.entries.pop_front();
            removed += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Total records dropped for space since start
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
