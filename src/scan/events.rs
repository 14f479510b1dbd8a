use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::model::{LogEntry, Row, ScanProgress, ScanState};

/// Cooperative stop flag, checked by the engine once per file
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Receives engine updates as they happen (file by file, not batched).
pub trait ScanObserver: Send + Sync {
    fn on_row_added(&self, _row: &Row) {}
    fn on_row_updated(&self, _row: &Row) {}
    fn on_progress(&self, _progress: ScanProgress) {}
    fn on_state_changed(&self, _state: ScanState) {}
    fn on_log(&self, _entry: &LogEntry) {}
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct NoopObserver;

impl ScanObserver for NoopObserver {}
