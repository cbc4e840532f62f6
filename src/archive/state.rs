// SPDX-License-Identifier: Apache-2.0

//! The processing state document: every known archive and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::error::{Error, Result};
use crate::persistence::{self, atomic_write_json, read_json};

pub const PROCESSING_STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveStatus {
    Pending,
    Completed,
    Failed,
    Cleaned,
}

impl ArchiveStatus {
    /// Forward-only lifecycle; failed archives are never re-queued
    pub fn can_transition_to(self, next: ArchiveStatus) -> bool {
        matches!(
            (self, next),
            (ArchiveStatus::Pending, ArchiveStatus::Completed)
                | (ArchiveStatus::Pending, ArchiveStatus::Failed)
                | (ArchiveStatus::Completed, ArchiveStatus::Cleaned)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ArchiveStatus::Failed | ArchiveStatus::Cleaned)
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArchiveStatus::Pending => "pending",
            ArchiveStatus::Completed => "completed",
            ArchiveStatus::Failed => "failed",
            ArchiveStatus::Cleaned => "cleaned",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub original_path: String,
    /// Archive root the file was discovered under
    pub archive_root: String,
    pub size: u64,
    pub modified_time: Option<DateTime<Utc>>,
    pub status: ArchiveStatus,
    pub extraction_attempts: u32,
    /// Set only while completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ArchiveRecord {
    pub fn pending(
        original_path: impl Into<String>,
        archive_root: impl Into<String>,
        size: u64,
        modified_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            original_path: original_path.into(),
            archive_root: archive_root.into(),
            size,
            modified_time,
            status: ArchiveStatus::Pending,
            extraction_attempts: 0,
            temp_file_path: None,
            last_error: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub cleaned: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingState {
    pub version: u32,
    pub initialization_timestamp: DateTime<Utc>,
    pub temp_dir: PathBuf,
    pub batch_size: usize,
    pub batch_byte_ceiling: u64,
    pub interval_secs: u64,
    pub archives: Vec<ArchiveRecord>,
    pub counters: Counters,
}

impl ProcessingState {
    pub fn new(temp_dir: PathBuf, batch_size: usize, batch_byte_ceiling: u64, interval_secs: u64) -> Self {
        Self {
            version: PROCESSING_STATE_VERSION,
            initialization_timestamp: Utc::now(),
            temp_dir,
            batch_size,
            batch_byte_ceiling,
            interval_secs,
            archives: Vec::new(),
            counters: Counters::default(),
        }
    }

    /// Load the document at `path`.
    ///
    /// A missing document yields `None`. An unreadable or unsupported one is moved
    /// aside to `<path>.corrupt` and also yields `None`, so the caller starts fresh.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let reason = match read_json::<ProcessingState>(path) {
            Ok(None) => return Ok(None),
            Ok(Some(state)) if state.version == PROCESSING_STATE_VERSION => {
                return Ok(Some(state));
            }
            Ok(Some(state)) => format!("unsupported version {}", state.version),
            Err(persistence::Error::Corrupt(_, reason)) => reason,
            Err(e) => return Err(e.into()),
        };

        let mut aside = path.as_os_str().to_os_string();
        aside.push(".corrupt");
        warn!(
            path = %path.display(),
            reason = %reason,
            "Processing state is unreadable, moving it aside and starting a fresh scan"
        );
        std::fs::rename(path, PathBuf::from(aside))?;
        Ok(None)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)?;
        Ok(())
    }

    pub fn get(&self, original_path: &str) -> Option<&ArchiveRecord> {
        self.archives.iter().find(|r| r.original_path == original_path)
    }

    /// Merge scanned archives by original path. Known archives are left untouched.
    /// Returns the number of new pending records.
    pub fn merge(&mut self, scanned: impl IntoIterator<Item = ArchiveRecord>) -> usize {
        let mut known: HashSet<String> =
            self.archives.iter().map(|r| r.original_path.clone()).collect();
        let mut added = 0;
        for record in scanned {
            if known.insert(record.original_path.clone()) {
                self.archives.push(record);
                added += 1;
            }
        }
        if added > 0 {
            self.recount();
        }
        added
    }

    pub fn mark_completed(&mut self, original_path: &str, temp_file_path: String) -> Result<()> {
        if self.archives.iter().any(|r| {
            r.status == ArchiveStatus::Completed
                && r.temp_file_path.as_deref() == Some(temp_file_path.as_str())
        }) {
            return Err(Error::InvalidTransition {
                path: original_path.to_string(),
                from: ArchiveStatus::Pending,
                to: ArchiveStatus::Completed,
            });
        }
        let record = self.transition(original_path, ArchiveStatus::Completed)?;
        record.temp_file_path = Some(temp_file_path);
        record.completed_at = Some(Utc::now());
        record.last_error = None;
        self.recount();
        Ok(())
    }

    pub fn mark_failed(&mut self, original_path: &str, error: String) -> Result<()> {
        let record = self.transition(original_path, ArchiveStatus::Failed)?;
        record.extraction_attempts += 1;
        record.last_error = Some(error);
        self.recount();
        Ok(())
    }

    pub fn mark_cleaned(&mut self, original_path: &str) -> Result<()> {
        let record = self.transition(original_path, ArchiveStatus::Cleaned)?;
        record.temp_file_path = None;
        self.recount();
        Ok(())
    }

    /// Pending records, optionally limited to one archive root, in discovery order
    pub fn pending<'a>(&'a self, root: Option<&'a str>) -> impl Iterator<Item = &'a ArchiveRecord> + 'a {
        self.archives.iter().filter(move |r| {
            r.status == ArchiveStatus::Pending && root.is_none_or(|root| r.archive_root == root)
        })
    }

    pub fn completed(&self) -> impl Iterator<Item = &ArchiveRecord> {
        self.archives
            .iter()
            .filter(|r| r.status == ArchiveStatus::Completed)
    }

    fn transition(&mut self, original_path: &str, to: ArchiveStatus) -> Result<&mut ArchiveRecord> {
        let record = self
            .archives
            .iter_mut()
            .find(|r| r.original_path == original_path)
            .ok_or_else(|| Error::UnknownArchive(original_path.to_string()))?;

        if !record.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                path: original_path.to_string(),
                from: record.status,
                to,
            });
        }
        record.status = to;
        Ok(record)
    }

    fn recount(&mut self) {
        let mut counters = Counters::default();
        for r in &self.archives {
            match r.status {
                ArchiveStatus::Pending => counters.pending += 1,
                ArchiveStatus::Completed => counters.completed += 1,
                ArchiveStatus::Failed => counters.failed += 1,
                ArchiveStatus::Cleaned => counters.cleaned += 1,
            }
        }
        self.counters = counters;
    }
}
