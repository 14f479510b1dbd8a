//! Content-aware file organizer core
//!
//! Scans directories, asks a text-generation backend for a category and a
//! filename per file, and builds a reviewable move plan. The host (desktop
//! shell, CLI) supplies configuration and renders rows; everything else
//! lives here.

pub mod ai;
pub mod error;
pub mod execution;
pub mod fs;
pub mod jobs;
pub mod scan;
pub mod security;

#[cfg(test)]
mod test_support;

pub use ai::{
    CategoryOptimization, CategoryOptimizer, ClassificationAdapter, ClassificationResult,
    HttpTransport, ProviderConfig, ProviderKind, ReqwestTransport,
};
pub use error::{ClassifyError, OrganizerError, ReadError, Result};
pub use fs::{FileAccess, FileContent, LocalFileAccess};
pub use jobs::{FileSessionStore, MemorySessionStore, SessionSnapshot, SessionStore};
pub use scan::{
    OrganizeSummary, Row, RowEdit, ScanEngine, ScanObserver, ScanOptions, ScanOutcome,
    ScanProgress, ScanState, StopHandle,
};
pub use security::PathSanitizer;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to warnings for dependencies and info for this
/// crate. Calling it again is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,file_organizer=info")),
        )
        .try_init();
}
