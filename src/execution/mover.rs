//! Apply phase: move every enabled row to its destination.
//!
//! Failures are per row. One failed move never stops the remaining rows.

use std::path::Path;

use crate::fs::FileAccess;
use crate::scan::model::{OrganizeSummary, Row};

/// Result of one attempted row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// Destination equals the source; nothing to do
    AlreadyInPlace,
    Skipped,
    Failed(String),
}

pub struct MoveExecutor<'a> {
    files: &'a dyn FileAccess,
}

impl<'a> MoveExecutor<'a> {
    pub fn new(files: &'a dyn FileAccess) -> Self {
        Self { files }
    }

    pub async fn apply_row(&self, row: &Row) -> MoveOutcome {
        let Some(destination) = row.destination.as_deref().filter(|_| row.enabled) else {
            return MoveOutcome::Skipped;
        };

        let source = Path::new(&row.source_path);
        let destination = Path::new(destination);
        if source == destination {
            return MoveOutcome::AlreadyInPlace;
        }

        match self.files.move_file(source, destination).await {
            Ok(()) => {
                tracing::debug!(
                    source = %source.display(),
                    destination = %destination.display(),
                    "Moved file"
                );
                MoveOutcome::Moved
            }
            Err(e) => {
                tracing::warn!(source = %source.display(), "Move failed: {}", e);
                MoveOutcome::Failed(e.to_string())
            }
        }
    }

    /// Apply all rows in order, calling `on_outcome` after each one.
    pub async fn apply_all<F>(&self, rows: &[Row], mut on_outcome: F) -> OrganizeSummary
    where
        F: FnMut(&Row, &MoveOutcome),
    {
        let mut summary = OrganizeSummary::default();

        for row in rows {
            let outcome = self.apply_row(row).await;
            match &outcome {
                MoveOutcome::Moved | MoveOutcome::AlreadyInPlace => summary.moved += 1,
                MoveOutcome::Skipped => summary.skipped += 1,
                MoveOutcome::Failed(error) => {
                    summary.failed += 1;
                    summary.failures.push((row.source_path.clone(), error.clone()));
                }
            }
            on_outcome(row, &outcome);
        }

        summary
    }
}
