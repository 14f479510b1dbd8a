use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ai::ClassificationResult;

/// Why a file could not be classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No reader for this file type
    Unsupported,
    /// PDF text extraction failed or produced nothing
    Pdf,
    /// Word document could not be parsed
    Docx,
    /// Spreadsheet could not be parsed
    Xlsx,
    /// Plain text file was unreadable or not UTF-8
    Text,
    /// Image that the configured backend cannot look at
    Image,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Unsupported => "unsupported",
            SkipReason::Pdf => "pdf",
            SkipReason::Docx => "docx",
            SkipReason::Xlsx => "xlsx",
            SkipReason::Text => "text",
            SkipReason::Image => "image",
        }
    }
}

/// A file queued for the scan, together with the selected directory it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedFile {
    pub path: String,
    pub root: String,
}

/// Outcome of processing one queued file. Append-only within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedFile {
    pub source_path: String,
    pub root: String,
    pub readable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Raw backend output, kept for display and diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
    pub category: String,
    pub proposed_name: String,
    pub extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessedFile {
    pub fn to_row(&self) -> Row {
        Row {
            source_path: self.source_path.clone(),
            readable: self.readable,
            skip_reason: self.skip_reason,
            category: self.category.clone(),
            proposed_name: self.proposed_name.clone(),
            extension: self.extension.clone(),
            destination: self.destination.clone(),
            enabled: self.enabled,
        }
    }

    /// Copy user-editable fields from a visible row back into this record.
    ///
    /// Returns true if anything changed.
    pub fn merge_row(&mut self, row: &Row) -> bool {
        let changed = self.category != row.category
            || self.proposed_name != row.proposed_name
            || self.enabled != row.enabled
            || self.destination != row.destination;

        self.category = row.category.clone();
        self.proposed_name = row.proposed_name.clone();
        self.enabled = row.enabled;
        self.destination = row.destination.clone();
        changed
    }
}

/// One visible proposal, keyed by `source_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub source_path: String,
    pub readable: bool,
    pub skip_reason: Option<SkipReason>,
    pub category: String,
    pub proposed_name: String,
    pub extension: String,
    pub destination: Option<String>,
    /// Selected for the apply phase; only meaningful with a destination
    pub enabled: bool,
}

/// User edits to a row before apply. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowEdit {
    pub category: Option<String>,
    pub proposed_name: Option<String>,
    pub enabled: Option<bool>,
}

/// Lifecycle of the scan engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
    Stopped,
    Completed,
    Organizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanProgress {
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Entry in the user-visible event log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// How a call to `start`/`resume` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed,
    Stopped,
}

/// Result of applying the enabled rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeSummary {
    pub moved: usize,
    pub failed: usize,
    pub skipped: usize,
    /// (source, error) for each failed move
    pub failures: Vec<(String, String)>,
}
