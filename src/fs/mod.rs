//! File-system capability used by the scan engine
//!
//! The engine only talks to [`FileAccess`]; [`LocalFileAccess`] is the
//! default implementation on the real file system.

pub mod document;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{OrganizerError, ReadError, Result};
use crate::scan::model::SkipReason;
use document::DocumentKind;

/// Content of one file as handed to classification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileContent {
    pub text: Option<String>,
    pub image_data: Option<Vec<u8>>,
    pub mime_type: Option<String>,
}

impl FileContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image_data: None,
            mime_type: Some("text/plain".to_string()),
        }
    }

    pub fn image(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            text: None,
            image_data: Some(data),
            mime_type: Some(mime_type.into()),
        }
    }
}

#[async_trait]
pub trait FileAccess: Send + Sync {
    /// List files under `path`, in a stable order
    async fn read_directory(&self, path: &Path, recursive: bool) -> Result<Vec<PathBuf>>;

    /// Extract classifiable content or say why it cannot be extracted
    async fn read_file_content(&self, path: &Path) -> std::result::Result<FileContent, ReadError>;

    /// Move `from` to `to`; must not overwrite an existing file
    async fn move_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Open with the platform's default application
    async fn open_file(&self, path: &Path) -> Result<()>;
}

/// [`FileAccess`] on the local file system
#[derive(Debug, Clone, Default)]
pub struct LocalFileAccess;

impl LocalFileAccess {
    pub fn new() -> Self {
        Self
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

#[async_trait]
impl FileAccess for LocalFileAccess {
    async fn read_directory(&self, path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
        if !path.is_dir() {
            return Err(OrganizerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Not a directory: {}", path.display()),
            )));
        }

        let root = path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || {
            let max_depth = if recursive { usize::MAX } else { 1 };
            WalkDir::new(&root)
                .max_depth(max_depth)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_hidden(e))
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable entry: {}", e);
                        None
                    }
                })
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| OrganizerError::General(format!("Directory walk failed: {}", e)))?;

        tracing::debug!(path = %path.display(), count = files.len(), "Listed directory");
        Ok(files)
    }

    async fn read_file_content(&self, path: &Path) -> std::result::Result<FileContent, ReadError> {
        let kind = DocumentKind::detect(path);
        let owned = path.to_path_buf();

        match kind {
            DocumentKind::Unsupported => Err(ReadError::new(
                SkipReason::Unsupported,
                "No reader for this file type",
            )),
            DocumentKind::Image => {
                let data = tokio::fs::read(path).await.map_err(|e| {
                    ReadError::new(SkipReason::Image, format!("Failed to read image: {}", e))
                })?;
                if data.is_empty() {
                    return Err(ReadError::new(SkipReason::Image, "Image file is empty"));
                }
                let mime = mime_guess::from_path(path)
                    .first_raw()
                    .unwrap_or("application/octet-stream");
                Ok(FileContent::image(data, mime))
            }
            _ => {
                let text = tokio::task::spawn_blocking(move || match kind {
                    DocumentKind::Pdf => document::extract_pdf(&owned),
                    DocumentKind::Docx => document::extract_docx(&owned),
                    DocumentKind::Xlsx | DocumentKind::Xls => {
                        document::extract_spreadsheet(&owned, kind)
                    }
                    _ => document::read_plain_text(&owned),
                })
                .await
                .map_err(|e| ReadError::new(kind.skip_reason(), format!("Extraction task failed: {}", e)))??;

                Ok(FileContent::text(text))
            }
        }
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        if tokio::fs::try_exists(to).await? {
            return Err(OrganizerError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("Destination already exists: {}", to.display()),
            )));
        }

        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Rename first, copy+remove across file systems
        if let Err(rename_err) = tokio::fs::rename(from, to).await {
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                "Rename failed ({}), falling back to copy",
                rename_err
            );
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await?;
        }

        Ok(())
    }

    async fn open_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(OrganizerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", path.display()),
            )));
        }

        let mut command = if cfg!(target_os = "macos") {
            std::process::Command::new("open")
        } else if cfg!(target_os = "windows") {
            let mut cmd = std::process::Command::new("cmd");
            cmd.args(["/C", "start", ""]);
            cmd
        } else {
            std::process::Command::new("xdg-open")
        };

        command
            .arg(path)
            .spawn()
            .map_err(|e| OrganizerError::General(format!("Failed to open {}: {}", path.display(), e)))?;
        Ok(())
    }
}
