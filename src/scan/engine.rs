//! Scan engine
//!
//! Drives `idle → scanning → {stopped, completed} → organizing → idle`.
//! Files are processed strictly one after another: read, classify, sanitize,
//! resolve, record. The visible rows are updated after every file.
//!
//! Cancellation is cooperative. The stop flag is checked between files, so an
//! in-flight classification always finishes first.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use super::events::{NoopObserver, ScanObserver, StopHandle};
use super::model::{
    LogEntry, LogLevel, OrganizeSummary, ProcessedFile, QueuedFile, Row, RowEdit, ScanOutcome,
    ScanProgress, ScanState, SkipReason,
};
use super::session::ScanSession;
use crate::ai::{
    accepts_images, CategoryBranch, CategoryOptimization, CategoryOptimizer, ClassificationAdapter,
    ImageAttachment, ProviderConfig,
};
use crate::error::{OrganizerError, ReadError, Result};
use crate::execution::{DestinationResolver, MoveExecutor, MoveOutcome};
use crate::fs::FileAccess;
use crate::jobs::{SessionSnapshot, SessionStore};
use crate::security::{PathSanitizer, FALLBACK_CATEGORY};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Descend into subdirectories
    pub recursive: bool,
    /// Persist the session every N processed files; 0 disables
    pub checkpoint_interval: usize,
    /// Upper bound on existing categories offered to the backend
    pub max_category_hints: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            checkpoint_interval: 10,
            max_category_hints: 50,
        }
    }
}

pub struct ScanEngine {
    adapter: Arc<ClassificationAdapter>,
    files: Arc<dyn FileAccess>,
    store: Arc<dyn SessionStore>,
    observer: Arc<dyn ScanObserver>,
    options: ScanOptions,
    state: ScanState,
    session: ScanSession,
    rows: Vec<Row>,
    log: Vec<LogEntry>,
    stop: StopHandle,
}

impl ScanEngine {
    pub fn new(
        adapter: Arc<ClassificationAdapter>,
        files: Arc<dyn FileAccess>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            adapter,
            files,
            store,
            observer: Arc::new(NoopObserver),
            options: ScanOptions::default(),
            state: ScanState::Idle,
            session: ScanSession::default(),
            rows: Vec::new(),
            log: Vec::new(),
            stop: StopHandle::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn adapter(&self) -> &Arc<ClassificationAdapter> {
        &self.adapter
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn progress(&self) -> ScanProgress {
        ScanProgress {
            current: self.session.current_index,
            total: self.session.files.len(),
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    /// Handle that can stop the scan from another task or from an observer
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Discover files under `directories` and scan them.
    ///
    /// Overlapping selections are collapsed so each file is queued once,
    /// under the outermost selected directory that contains it.
    pub async fn start(
        &mut self,
        config: &ProviderConfig,
        directories: &[PathBuf],
    ) -> Result<ScanOutcome> {
        if self.state != ScanState::Idle {
            return Err(OrganizerError::InvalidState(format!(
                "Cannot start a scan while {:?}; start a new scan first",
                self.state
            )));
        }

        if let Err(e) = config.validate() {
            self.push_log(LogLevel::Error, e.to_string());
            return Err(e);
        }

        let roots = collapse_directories(directories);
        if roots.is_empty() {
            return Err(OrganizerError::Config("No directories selected".to_string()));
        }

        let mut queue = Vec::new();
        let mut seen = HashSet::new();
        for root in &roots {
            let root_key = root.to_string_lossy().to_string();
            match self.files.read_directory(root, self.options.recursive).await {
                Ok(paths) => {
                    for path in paths {
                        let key = path.to_string_lossy().to_string();
                        if seen.insert(key.clone()) {
                            queue.push(QueuedFile {
                                path: key,
                                root: root_key.clone(),
                            });
                        }
                    }
                }
                Err(e) => {
                    self.push_log(LogLevel::Error, format!("Failed to read {}: {}", root_key, e));
                }
            }
        }

        let directories: Vec<String> = roots
            .iter()
            .map(|r| r.to_string_lossy().to_string())
            .collect();
        self.push_log(
            LogLevel::Info,
            format!("Found {} files in {} folder(s)", queue.len(), directories.len()),
        );

        self.session = ScanSession::new(directories, queue);
        self.rows.clear();
        self.stop.reset();
        self.set_state(ScanState::Scanning);
        self.emit_progress();

        self.run(config).await
    }

    /// Continue a stopped scan from its cursor.
    ///
    /// Row edits made while stopped are merged into the records first so the
    /// resumed run never overwrites manual corrections.
    pub async fn resume(&mut self, config: &ProviderConfig) -> Result<ScanOutcome> {
        if self.state != ScanState::Stopped {
            return Err(OrganizerError::InvalidState(format!(
                "Only a stopped scan can be resumed (current state: {:?})",
                self.state
            )));
        }

        let merged = self.session.merge_rows(&self.rows);
        if merged > 0 {
            tracing::debug!(merged, "Merged row edits before resume");
        }

        if let Err(e) = config.validate() {
            self.push_log(LogLevel::Error, e.to_string());
            self.checkpoint();
            return Err(e);
        }

        self.session.stopped = false;
        self.stop.reset();
        self.push_log(
            LogLevel::Info,
            format!(
                "Resuming at file {} of {}",
                self.session.current_index + 1,
                self.session.files.len()
            ),
        );
        self.set_state(ScanState::Scanning);

        self.run(config).await
    }

    async fn run(&mut self, config: &ProviderConfig) -> Result<ScanOutcome> {
        loop {
            if self.stop.is_requested() {
                self.session.stopped = true;
                self.push_log(
                    LogLevel::Info,
                    format!(
                        "Scan stopped after {} of {} files",
                        self.session.current_index,
                        self.session.files.len()
                    ),
                );
                self.set_state(ScanState::Stopped);
                self.checkpoint();
                return Ok(ScanOutcome::Stopped);
            }

            let Some(file) = self.session.next_file().cloned() else {
                break;
            };

            let record = match self.process_file(config, &file).await {
                Ok(record) => record,
                Err(e) => {
                    // Only configuration problems get here; keep the cursor for a resume
                    self.session.stopped = true;
                    self.push_log(LogLevel::Error, format!("Scan aborted: {}", e));
                    self.set_state(ScanState::Stopped);
                    self.checkpoint();
                    return Err(e);
                }
            };

            let row = record.to_row();
            self.session.record(record);
            self.observer.on_row_added(&row);
            self.rows.push(row);
            self.emit_progress();

            let interval = self.options.checkpoint_interval;
            if interval > 0 && self.session.current_index % interval == 0 {
                self.checkpoint();
            }
        }

        self.session.stopped = false;
        let unreadable = self.session.processed.iter().filter(|p| !p.readable).count();
        self.push_log(
            LogLevel::Info,
            format!(
                "Scan complete: {} files, {} unreadable",
                self.session.processed.len(),
                unreadable
            ),
        );
        self.set_state(ScanState::Completed);
        self.checkpoint();
        Ok(ScanOutcome::Completed)
    }

    async fn process_file(&mut self, config: &ProviderConfig, file: &QueuedFile) -> Result<ProcessedFile> {
        let path = Path::new(&file.path);
        let original_filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.path.clone());
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| original_filename.clone());
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let content = match self.files.read_file_content(path).await {
            Ok(content) => content,
            Err(err) => return Ok(self.unreadable(file, &stem, &extension, err)),
        };

        let hints = self.session.category_hints(self.options.max_category_hints);
        let classification = match content.image_data {
            Some(data) => {
                if !accepts_images(config) {
                    let err = ReadError::new(
                        SkipReason::Image,
                        format!("{} is not configured for images", config.provider.label()),
                    );
                    return Ok(self.unreadable(file, &stem, &extension, err));
                }
                let image = ImageAttachment {
                    data,
                    mime_type: content
                        .mime_type
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                };
                self.adapter
                    .classify_image(config, &image, &original_filename, &hints)
                    .await?
            }
            None => {
                let text = content.text.unwrap_or_default();
                self.adapter
                    .classify(config, &text, &original_filename, &hints)
                    .await?
            }
        };

        if let Some(error) = classification.error() {
            self.push_log(LogLevel::Warn, format!("{}: {}", original_filename, error));
        }

        let category = PathSanitizer::sanitize_dir_path(&classification.category_path);
        let proposed_name = proposed_name(&classification.suggested_filename, &extension, &stem);
        let destination = DestinationResolver::resolve(
            Path::new(&file.root),
            &category,
            &proposed_name,
            &extension,
            &mut self.session.used_destinations,
        );

        tracing::debug!(
            file = %original_filename,
            category = %category,
            destination = %destination.display(),
            "Planned destination"
        );

        Ok(ProcessedFile {
            source_path: file.path.clone(),
            root: file.root.clone(),
            readable: true,
            skip_reason: None,
            error: classification.error().map(str::to_string),
            classification: Some(classification),
            category,
            proposed_name,
            extension,
            destination: Some(DestinationResolver::key(&destination)),
            enabled: true,
        })
    }

    fn unreadable(&mut self, file: &QueuedFile, stem: &str, extension: &str, err: ReadError) -> ProcessedFile {
        self.push_log(
            LogLevel::Warn,
            format!("Skipped {} ({}): {}", file.path, err.reason.as_str(), err.message),
        );

        ProcessedFile {
            source_path: file.path.clone(),
            root: file.root.clone(),
            readable: false,
            skip_reason: Some(err.reason),
            classification: None,
            category: FALLBACK_CATEGORY.to_string(),
            proposed_name: PathSanitizer::sanitize_filename(stem),
            extension: extension.to_string(),
            destination: None,
            enabled: false,
            error: Some(err.message),
        }
    }

    /// Apply a user edit to one row.
    ///
    /// Edited values are sanitized; a changed category or name re-resolves the
    /// destination after releasing the old one. A row without a destination
    /// cannot be enabled.
    pub fn edit_row(&mut self, source_path: &str, edit: RowEdit) -> Result<Row> {
        self.ensure_not_busy("edit rows")?;

        let idx = self
            .rows
            .iter()
            .position(|r| r.source_path == source_path)
            .ok_or_else(|| OrganizerError::InvalidState(format!("No row for {}", source_path)))?;
        let root = self
            .session
            .find(source_path)
            .map(|p| p.root.clone())
            .ok_or_else(|| OrganizerError::InvalidState(format!("No record for {}", source_path)))?;

        let row = &mut self.rows[idx];
        let mut relocate = false;

        if let Some(category) = edit.category {
            let category = PathSanitizer::sanitize_dir_path(&category);
            if category != row.category {
                row.category = category;
                relocate = true;
            }
        }

        if let Some(name) = edit.proposed_name {
            let name = PathSanitizer::sanitize_filename(&name);
            if name != row.proposed_name {
                row.proposed_name = name;
                relocate = true;
            }
        }

        if relocate {
            if let Some(old) = row.destination.take() {
                DestinationResolver::release(Path::new(&old), &mut self.session.used_destinations);
            }
            let destination = DestinationResolver::resolve(
                Path::new(&root),
                &row.category,
                &row.proposed_name,
                &row.extension,
                &mut self.session.used_destinations,
            );
            row.destination = Some(DestinationResolver::key(&destination));
        }

        if let Some(enabled) = edit.enabled {
            row.enabled = enabled && row.destination.is_some();
        }

        let updated = row.clone();
        self.observer.on_row_updated(&updated);
        self.checkpoint();
        Ok(updated)
    }

    /// Category → files over the current rows
    pub fn category_tree(&self) -> BTreeMap<String, CategoryBranch> {
        crate::ai::category_tree(&self.rows)
    }

    /// Rename categories across all rows and re-resolve affected destinations.
    pub fn apply_category_optimizations(
        &mut self,
        optimizations: &[CategoryOptimization],
    ) -> Result<usize> {
        self.ensure_not_busy("change categories")?;

        let before: Vec<String> = self.rows.iter().map(|r| r.category.clone()).collect();
        let changed = crate::ai::apply_optimizations(&mut self.rows, optimizations);
        if changed == 0 {
            return Ok(0);
        }

        let affected: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(i, r)| r.category != before[*i] && r.destination.is_some())
            .map(|(i, _)| i)
            .collect();

        // Release everything first so renamed rows can reuse each other's slots
        for &i in &affected {
            if let Some(old) = self.rows[i].destination.take() {
                DestinationResolver::release(Path::new(&old), &mut self.session.used_destinations);
            }
        }

        for &i in &affected {
            let source = self.rows[i].source_path.clone();
            let Some(root) = self.session.find(&source).map(|p| p.root.clone()) else {
                continue;
            };
            let row = &mut self.rows[i];
            let destination = DestinationResolver::resolve(
                Path::new(&root),
                &row.category,
                &row.proposed_name,
                &row.extension,
                &mut self.session.used_destinations,
            );
            row.destination = Some(DestinationResolver::key(&destination));
            self.observer.on_row_updated(&self.rows[i]);
        }

        self.push_log(
            LogLevel::Info,
            format!("Applied {} category change(s) to {} row(s)", optimizations.len(), changed),
        );
        self.checkpoint();
        Ok(changed)
    }

    /// Ask the backend for category merges and apply them.
    pub async fn optimize_categories(
        &mut self,
        config: &ProviderConfig,
    ) -> Result<Vec<CategoryOptimization>> {
        self.ensure_not_busy("optimize categories")?;

        let tree = self.category_tree();
        let optimizations = CategoryOptimizer::new(Arc::clone(&self.adapter))
            .optimize(config, &tree)
            .await?;
        self.apply_category_optimizations(&optimizations)?;
        Ok(optimizations)
    }

    /// Move every enabled row, then discard the session.
    pub async fn organize(&mut self) -> Result<OrganizeSummary> {
        if !matches!(self.state, ScanState::Completed | ScanState::Stopped) {
            return Err(OrganizerError::InvalidState(format!(
                "Nothing to organize while {:?}",
                self.state
            )));
        }

        self.session.merge_rows(&self.rows);
        self.set_state(ScanState::Organizing);

        let rows = self.rows.clone();
        let files = Arc::clone(&self.files);
        let mut failures = Vec::new();
        let summary = MoveExecutor::new(files.as_ref())
            .apply_all(&rows, |row, outcome| {
                if let MoveOutcome::Failed(error) = outcome {
                    failures.push(format!("Failed to move {}: {}", row.source_path, error));
                }
            })
            .await;

        for message in failures {
            self.push_log(LogLevel::Error, message);
        }
        self.push_log(
            LogLevel::Info,
            format!(
                "Organized: {} moved, {} failed, {} skipped",
                summary.moved, summary.failed, summary.skipped
            ),
        );

        self.reset_session();
        self.set_state(ScanState::Idle);
        Ok(summary)
    }

    /// Drop the current session and its persisted blob.
    pub fn new_scan(&mut self) -> Result<()> {
        self.ensure_not_busy("start a new scan")?;
        self.reset_session();
        self.set_state(ScanState::Idle);
        Ok(())
    }

    /// Load a persisted session, if any.
    ///
    /// Returns false when nothing usable was stored. Corrupt or unknown blobs
    /// are logged and cleared.
    pub fn restore(&mut self) -> Result<bool> {
        if self.state != ScanState::Idle {
            return Err(OrganizerError::InvalidState(format!(
                "Cannot restore a session while {:?}",
                self.state
            )));
        }

        let blob = match self.store.load() {
            Ok(Some(blob)) => blob,
            Ok(None) => return Ok(false),
            Err(e) => {
                self.push_log(LogLevel::Warn, format!("Failed to load saved session: {}", e));
                return Ok(false);
            }
        };

        let snapshot = match SessionSnapshot::from_blob(&blob) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.push_log(LogLevel::Warn, format!("Discarding saved session: {}", e));
                if let Err(e) = self.store.clear() {
                    tracing::warn!("Failed to clear saved session: {}", e);
                }
                return Ok(false);
            }
        };

        self.session = ScanSession::from_snapshot(snapshot);
        self.rows = self.session.rows();
        for row in &self.rows {
            self.observer.on_row_added(row);
        }

        let state = if self.session.is_finished() {
            ScanState::Completed
        } else {
            ScanState::Stopped
        };
        self.session.stopped = state == ScanState::Stopped;

        self.push_log(
            LogLevel::Info,
            format!(
                "Restored session: {} of {} files processed",
                self.session.current_index,
                self.session.files.len()
            ),
        );
        self.set_state(state);
        self.emit_progress();
        Ok(true)
    }

    fn ensure_not_busy(&self, action: &str) -> Result<()> {
        if matches!(self.state, ScanState::Scanning | ScanState::Organizing) {
            return Err(OrganizerError::InvalidState(format!(
                "Cannot {} while {:?}",
                action, self.state
            )));
        }
        Ok(())
    }

    fn reset_session(&mut self) {
        self.session = ScanSession::default();
        self.rows.clear();
        self.stop.reset();
        if let Err(e) = self.store.clear() {
            self.push_log(LogLevel::Warn, format!("Failed to clear saved session: {}", e));
        }
        self.emit_progress();
    }

    /// Persist the session; failure is logged, never fatal.
    fn checkpoint(&mut self) {
        self.session.merge_rows(&self.rows);
        let result = self
            .session
            .to_snapshot()
            .to_blob()
            .and_then(|blob| self.store.save(&blob));
        if let Err(e) = result {
            self.push_log(LogLevel::Warn, format!("Failed to save scan session: {}", e));
        }
    }

    fn set_state(&mut self, state: ScanState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "Scan state changed");
            self.state = state;
            self.observer.on_state_changed(state);
        }
    }

    fn emit_progress(&self) {
        self.observer.on_progress(self.progress());
    }

    fn push_log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        };
        self.observer.on_log(&entry);
        self.log.push(entry);
    }
}

/// Drop duplicates and directories nested inside another selection.
fn collapse_directories(directories: &[PathBuf]) -> Vec<PathBuf> {
    let mut kept: Vec<PathBuf> = Vec::new();
    for dir in directories {
        if dir.as_os_str().is_empty() || kept.iter().any(|k| dir.starts_with(k)) {
            continue;
        }
        kept.retain(|k| !k.starts_with(dir));
        kept.push(dir.clone());
    }
    kept
}

/// Model suggestion minus a repeated extension, or the original stem.
fn proposed_name(suggested: &str, extension: &str, stem: &str) -> String {
    let mut name = suggested.trim();
    if !extension.is_empty() && name.len() >= extension.len() {
        let cut = name.len() - extension.len();
        if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(extension) {
            name = &name[..cut];
        }
    }

    if name.trim().is_empty() {
        PathSanitizer::sanitize_filename(stem)
    } else {
        PathSanitizer::sanitize_filename(name)
    }
}
