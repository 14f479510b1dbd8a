//! In-memory stand-ins for the HTTP and file-system capabilities.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::ai::http_client::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::{OrganizerError, ReadError, Result};
use crate::fs::{FileAccess, FileContent};
use crate::scan::model::SkipReason;

type Responder = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync>;

/// Replays queued responses, then falls back to a responder closure.
#[derive(Default)]
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<HttpResponse>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    pub fn push_ok(&self, status: u16, body: &str) {
        self.queue.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn push_err(&self, message: &str) {
        self.queue
            .lock()
            .unwrap()
            .push_back(Err(OrganizerError::Transport(message.to_string())));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(next) = self.queue.lock().unwrap().pop_front() {
            return next;
        }
        match &self.responder {
            Some(responder) => responder(&request),
            None => Err(OrganizerError::Transport("no scripted response".to_string())),
        }
    }
}

/// Ollama-shaped reply carrying a classification
pub fn ollama_classification(category: &str, filename: &str) -> HttpResponse {
    let content = json!({"category_path": category, "suggested_filename": filename}).to_string();
    HttpResponse {
        status: 200,
        body: json!({"response": content, "done": true}).to_string(),
    }
}

#[derive(Debug, Clone)]
pub enum MemoryEntry {
    Text(String),
    Image(Vec<u8>, String),
    Unreadable(SkipReason, String),
}

/// File system held in a map; moves just re-key entries.
#[derive(Default)]
pub struct MemoryFileAccess {
    entries: Mutex<BTreeMap<PathBuf, MemoryEntry>>,
    failing_moves: Mutex<HashSet<PathBuf>>,
    reads: Mutex<Vec<PathBuf>>,
    moves: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl MemoryFileAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_text(&self, path: &str, text: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), MemoryEntry::Text(text.to_string()));
    }

    pub fn add_image(&self, path: &str, mime: &str) {
        self.entries.lock().unwrap().insert(
            PathBuf::from(path),
            MemoryEntry::Image(vec![1, 2, 3], mime.to_string()),
        );
    }

    pub fn add_unreadable(&self, path: &str, reason: SkipReason) {
        self.entries.lock().unwrap().insert(
            PathBuf::from(path),
            MemoryEntry::Unreadable(reason, format!("cannot read {}", reason.as_str())),
        );
    }

    pub fn fail_move_of(&self, path: &str) {
        self.failing_moves.lock().unwrap().insert(PathBuf::from(path));
    }

    pub fn exists(&self, path: &str) -> bool {
        self.entries.lock().unwrap().contains_key(Path::new(path))
    }

    pub fn reads(&self) -> Vec<PathBuf> {
        self.reads.lock().unwrap().clone()
    }

    pub fn moves(&self) -> Vec<(PathBuf, PathBuf)> {
        self.moves.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileAccess for MemoryFileAccess {
    async fn read_directory(&self, path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|p| {
                if recursive {
                    p.starts_with(path)
                } else {
                    p.parent() == Some(path)
                }
            })
            .cloned()
            .collect())
    }

    async fn read_file_content(&self, path: &Path) -> std::result::Result<FileContent, ReadError> {
        self.reads.lock().unwrap().push(path.to_path_buf());
        match self.entries.lock().unwrap().get(path) {
            Some(MemoryEntry::Text(text)) => Ok(FileContent::text(text.clone())),
            Some(MemoryEntry::Image(data, mime)) => Ok(FileContent::image(data.clone(), mime.clone())),
            Some(MemoryEntry::Unreadable(reason, message)) => Err(ReadError::new(*reason, message.clone())),
            None => Err(ReadError::new(SkipReason::Text, "missing")),
        }
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        if self.failing_moves.lock().unwrap().contains(from) {
            return Err(OrganizerError::General(format!("permission denied: {}", from.display())));
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(to) {
            return Err(OrganizerError::General(format!("exists: {}", to.display())));
        }
        let entry = entries
            .remove(from)
            .ok_or_else(|| OrganizerError::General(format!("missing: {}", from.display())))?;
        entries.insert(to.to_path_buf(), entry);
        self.moves
            .lock()
            .unwrap()
            .push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    async fn open_file(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}
