//! Scan session persistence
//!
//! A scan can be interrupted at any point (stop button, app closed, crash).
//! The engine checkpoints a [`SessionSnapshot`] through a [`SessionStore`] so
//! the next start can pick up from the same cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{OrganizerError, Result};
use crate::scan::model::{ProcessedFile, QueuedFile};

/// Current snapshot layout
pub const SNAPSHOT_VERSION: u32 = 2;

const SESSION_DIR: &str = "file-organizer";
const SESSION_FILE: &str = "scan_session.json";

/// Key/value blob storage for one session
pub trait SessionStore: Send + Sync {
    fn save(&self, blob: &str) -> Result<()>;
    fn load(&self) -> Result<Option<String>>;
    fn clear(&self) -> Result<()>;
}

/// Serializable state of an interrupted scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub version: u32,
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub directories: Vec<String>,
    pub files: Vec<QueuedFile>,
    pub current_index: usize,
    #[serde(default)]
    pub processed: Vec<ProcessedFile>,
    #[serde(default)]
    pub used_destinations: Vec<String>,
    #[serde(default)]
    pub stopped: bool,
}

impl SessionSnapshot {
    pub fn to_blob(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a stored blob, upgrading older layouts first.
    pub fn from_blob(blob: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(blob)?;
        let upgraded = migrate(value)?;
        let snapshot: SessionSnapshot = serde_json::from_value(upgraded)?;

        if snapshot.current_index > snapshot.files.len() {
            return Err(OrganizerError::Session(format!(
                "Cursor {} is past the end of {} files",
                snapshot.current_index,
                snapshot.files.len()
            )));
        }
        Ok(snapshot)
    }
}

/// Bring any known blob layout up to [`SNAPSHOT_VERSION`].
///
/// Version-less blobs come in two shapes, told apart by their fields:
/// `{ directory, files: [path], ... }` from single-folder scans and
/// `{ directories: [..], files: [path], ... }` from multi-folder scans.
/// Both carry `currentIndex`, `processedFiles`, `usedDestinations`, `stopFlag`.
fn migrate(value: Value) -> Result<Value> {
    let Value::Object(mut map) = value else {
        return Err(OrganizerError::Session("Session blob is not an object".to_string()));
    };

    match map.get("version").and_then(Value::as_u64) {
        Some(v) if v == u64::from(SNAPSHOT_VERSION) => return Ok(Value::Object(map)),
        Some(v) => {
            return Err(OrganizerError::Session(format!(
                "Unsupported session version {}",
                v
            )))
        }
        None => {}
    }

    let directories = legacy_directories(&mut map)?;
    tracing::info!(directories = ?directories, "Migrating legacy scan session");

    let files: Vec<Value> = match map.remove("files") {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(path) => {
                    let root = root_for(&directories, &path);
                    Ok(json!({ "path": path, "root": root }))
                }
                Value::Object(mut file) => {
                    if !file.contains_key("root") {
                        let path = file.get("path").and_then(Value::as_str).unwrap_or_default();
                        let root = root_for(&directories, path);
                        file.insert("root".to_string(), json!(root));
                    }
                    Ok(Value::Object(file))
                }
                other => Err(OrganizerError::Session(format!(
                    "Unexpected file entry in legacy session: {}",
                    other
                ))),
            })
            .collect::<Result<_>>()?,
        _ => Vec::new(),
    };

    let processed: Vec<Value> = match map.remove("processedFiles").or_else(|| map.remove("processed")) {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|mut record| {
                if let Value::Object(fields) = &mut record {
                    if !fields.contains_key("root") {
                        let source = fields
                            .get("sourcePath")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let root = root_for(&directories, source);
                        fields.insert("root".to_string(), json!(root));
                    }
                }
                record
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut upgraded = Map::new();
    upgraded.insert("version".to_string(), json!(SNAPSHOT_VERSION));
    upgraded.insert(
        "sessionId".to_string(),
        map.remove("sessionId")
            .unwrap_or_else(|| json!(uuid::Uuid::new_v4().to_string())),
    );
    upgraded.insert(
        "savedAt".to_string(),
        map.remove("savedAt").unwrap_or_else(|| json!(Utc::now())),
    );
    upgraded.insert("directories".to_string(), json!(directories));
    upgraded.insert("files".to_string(), Value::Array(files));
    upgraded.insert(
        "currentIndex".to_string(),
        map.remove("currentIndex").unwrap_or_else(|| json!(0)),
    );
    upgraded.insert("processed".to_string(), Value::Array(processed));
    upgraded.insert(
        "usedDestinations".to_string(),
        map.remove("usedDestinations").unwrap_or_else(|| json!([])),
    );
    upgraded.insert(
        "stopped".to_string(),
        map.remove("stopFlag")
            .or_else(|| map.remove("stopped"))
            .unwrap_or_else(|| json!(false)),
    );

    Ok(Value::Object(upgraded))
}

/// `directories` list if present, else the singular `directory`.
fn legacy_directories(map: &mut Map<String, Value>) -> Result<Vec<String>> {
    if let Some(Value::Array(items)) = map.remove("directories") {
        let directories: Vec<String> = items
            .into_iter()
            .filter_map(|d| d.as_str().map(str::to_string))
            .filter(|d| !d.is_empty())
            .collect();
        if !directories.is_empty() {
            return Ok(directories);
        }
    }

    map.remove("directory")
        .and_then(|d| d.as_str().map(str::to_string))
        .filter(|d| !d.is_empty())
        .map(|d| vec![d])
        .ok_or_else(|| {
            OrganizerError::Session("Unversioned session blob has no directory".to_string())
        })
}

/// First listed directory containing `path`; the first directory otherwise.
fn root_for(directories: &[String], path: &str) -> String {
    directories
        .iter()
        .find(|d| Path::new(path).starts_with(d.as_str()))
        .or_else(|| directories.first())
        .cloned()
        .unwrap_or_default()
}

/// Session blob stored as a JSON file in the user config directory
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/file-organizer/scan_session.json`
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir().ok_or_else(|| {
            OrganizerError::Config("Could not determine config directory".to_string())
        })?;
        Ok(Self::new(dir.join(SESSION_DIR).join(SESSION_FILE)))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    /// Writes to a temp file first, then renames over the old blob.
    fn save(&self, blob: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, blob)?;
        fs::rename(&temp_path, &self.path)?;

        tracing::debug!(path = %self.path.display(), "Saved scan session");
        Ok(())
    }

    fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let blob = fs::read_to_string(&self.path)?;
        tracing::debug!(path = %self.path.display(), "Loaded scan session");
        Ok(Some(blob))
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            tracing::debug!(path = %self.path.display(), "Cleared scan session");
        }
        Ok(())
    }
}

/// In-process store, for tests and hosts that persist elsewhere
#[derive(Default)]
pub struct MemorySessionStore {
    blob: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.blob
            .lock()
            .map_err(|_| OrganizerError::Session("Session store lock poisoned".to_string()))
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, blob: &str) -> Result<()> {
        *self.slot()? = Some(blob.to_string());
        Ok(())
    }

    fn load(&self) -> Result<Option<String>> {
        Ok(self.slot()?.clone())
    }

    fn clear(&self) -> Result<()> {
        *self.slot()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: "s-1".to_string(),
            saved_at: Utc::now(),
            directories: vec!["/in".to_string()],
            files: vec![QueuedFile {
                path: "/in/a.txt".to_string(),
                root: "/in".to_string(),
            }],
            current_index: 0,
            processed: Vec::new(),
            used_destinations: Vec::new(),
            stopped: true,
        }
    }

    #[test]
    fn test_file_store_save_load_clear() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested/scan_session.json"));

        assert!(store.load().unwrap().is_none());
        store.save("{\"a\":1}").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(!store.path().with_extension("json.tmp").exists());

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_snapshot_blob_round_trip() {
        let snap = snapshot();
        let restored = SessionSnapshot::from_blob(&snap.to_blob().unwrap()).unwrap();
        assert_eq!(restored, snap);
    }

    #[test]
    fn test_legacy_blob_is_migrated() {
        let legacy = json!({
            "directory": "/home/me/Downloads",
            "files": ["/home/me/Downloads/a.txt", "/home/me/Downloads/b.pdf"],
            "currentIndex": 1,
            "processedFiles": [{
                "sourcePath": "/home/me/Downloads/a.txt",
                "readable": true,
                "category": "finance",
                "proposedName": "a",
                "extension": ".txt",
                "destination": "/home/me/Downloads/finance/a.txt",
                "enabled": true
            }],
            "usedDestinations": ["/home/me/Downloads/finance/a.txt"],
            "stopFlag": true
        });

        let snap = SessionSnapshot::from_blob(&legacy.to_string()).unwrap();
        assert_eq!(snap.version, SNAPSHOT_VERSION);
        assert_eq!(snap.directories, vec!["/home/me/Downloads"]);
        assert_eq!(snap.files.len(), 2);
        assert_eq!(snap.files[1].root, "/home/me/Downloads");
        assert_eq!(snap.current_index, 1);
        assert_eq!(snap.processed[0].root, "/home/me/Downloads");
        assert!(snap.stopped);
        assert!(!snap.session_id.is_empty());
    }

    #[test]
    fn test_unversioned_multi_directory_blob_is_migrated() {
        let legacy = json!({
            "directories": ["/a", "/b"],
            "files": ["/a/x.txt", "/b/sub/y.txt", "/elsewhere/z.txt"],
            "currentIndex": 1,
            "processedFiles": [{
                "sourcePath": "/a/x.txt",
                "readable": true,
                "category": "notes",
                "proposedName": "x",
                "extension": ".txt",
                "destination": "/a/notes/x.txt",
                "enabled": true
            }],
            "usedDestinations": ["/a/notes/x.txt"],
            "stopFlag": true
        });

        let snap = SessionSnapshot::from_blob(&legacy.to_string()).unwrap();
        assert_eq!(snap.version, SNAPSHOT_VERSION);
        assert_eq!(snap.directories, vec!["/a", "/b"]);
        let roots: Vec<&str> = snap.files.iter().map(|f| f.root.as_str()).collect();
        assert_eq!(roots, vec!["/a", "/b", "/a"]);
        assert_eq!(snap.processed[0].root, "/a");
        assert_eq!(snap.current_index, 1);
        assert!(snap.stopped);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut blob = serde_json::to_value(snapshot()).unwrap();
        blob["version"] = json!(99);
        let err = SessionSnapshot::from_blob(&blob.to_string()).unwrap_err();
        assert!(matches!(err, OrganizerError::Session(_)));
    }

    #[test]
    fn test_corrupt_blobs_rejected() {
        assert!(SessionSnapshot::from_blob("not json").is_err());
        assert!(SessionSnapshot::from_blob("[1,2]").is_err());
        assert!(SessionSnapshot::from_blob("{\"files\": []}").is_err());

        let mut blob = serde_json::to_value(snapshot()).unwrap();
        blob["currentIndex"] = json!(5);
        assert!(SessionSnapshot::from_blob(&blob.to_string()).is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySessionStore::with_blob("x");
        assert_eq!(store.load().unwrap().as_deref(), Some("x"));
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
