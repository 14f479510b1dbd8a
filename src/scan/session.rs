use chrono::Utc;
use std::collections::{BTreeSet, HashMap};

use super::model::{ProcessedFile, QueuedFile, Row};
use crate::jobs::{SessionSnapshot, SNAPSHOT_VERSION};
use crate::security::FALLBACK_CATEGORY;

/// Traversal state of one scan.
///
/// `files` is frozen when the scan starts; `processed` only grows and
/// `processed[i]` always belongs to `files[i]`.
#[derive(Debug, Clone, Default)]
pub struct ScanSession {
    pub session_id: String,
    pub directories: Vec<String>,
    pub files: Vec<QueuedFile>,
    pub current_index: usize,
    pub processed: Vec<ProcessedFile>,
    pub used_destinations: BTreeSet<String>,
    pub stopped: bool,
}

impl ScanSession {
    pub fn new(directories: Vec<String>, files: Vec<QueuedFile>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            directories,
            files,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.processed.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.current_index >= self.files.len()
    }

    pub fn next_file(&self) -> Option<&QueuedFile> {
        self.files.get(self.current_index)
    }

    /// Append the record for the file under the cursor and advance.
    pub fn record(&mut self, processed: ProcessedFile) {
        self.processed.push(processed);
        self.current_index += 1;
    }

    pub fn find(&self, source_path: &str) -> Option<&ProcessedFile> {
        self.processed.iter().find(|p| p.source_path == source_path)
    }

    /// Distinct categories of readable, actually classified files, sorted, at most `cap`.
    pub fn category_hints(&self, cap: usize) -> Vec<String> {
        self.processed
            .iter()
            .filter(|p| p.readable && p.category != FALLBACK_CATEGORY)
            .filter(|p| !p.classification.as_ref().is_some_and(|c| c.is_fallback()))
            .map(|p| p.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .take(cap)
            .collect()
    }

    /// Merge user edits from the visible rows back into the records.
    ///
    /// Returns how many records changed.
    pub fn merge_rows(&mut self, rows: &[Row]) -> usize {
        let by_source: HashMap<&str, &Row> =
            rows.iter().map(|r| (r.source_path.as_str(), r)).collect();

        self.processed
            .iter_mut()
            .filter_map(|record| {
                by_source
                    .get(record.source_path.as_str())
                    .map(|row| record.merge_row(row))
            })
            .filter(|changed| *changed)
            .count()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.processed.iter().map(ProcessedFile::to_row).collect()
    }

    pub fn to_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: self.session_id.clone(),
            saved_at: Utc::now(),
            directories: self.directories.clone(),
            files: self.files.clone(),
            current_index: self.current_index,
            processed: self.processed.clone(),
            used_destinations: self.used_destinations.iter().cloned().collect(),
            stopped: self.stopped,
        }
    }

    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        // The records decide the cursor; a stored index can lag or run ahead of them
        let mut processed = snapshot.processed;
        processed.truncate(snapshot.files.len());
        let current_index = processed.len();
        if current_index != snapshot.current_index {
            tracing::warn!(
                stored = snapshot.current_index,
                records = current_index,
                "Session cursor disagrees with its records"
            );
        }

        Self {
            session_id: snapshot.session_id,
            directories: snapshot.directories,
            files: snapshot.files,
            current_index,
            processed,
            used_destinations: snapshot.used_destinations.into_iter().collect(),
            stopped: snapshot.stopped,
        }
    }
}
