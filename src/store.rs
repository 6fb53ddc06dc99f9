//! In-memory project file store.
//!
//! Holds every file of the previewed project, keyed by POSIX-style path
//! (no leading slash). Mutated synchronously by its owner; the editor
//! widget and uploader drive `put`/`delete`, the resolver only reads.

use std::collections::BTreeMap;

/// File content, exactly one of the two variants. This shape is the
/// binding contract with every collaborator that produces or consumes
/// project files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    pub fn is_text(&self) -> bool {
        matches!(self, FileContent::Text(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContent::Text(s) => s.as_bytes(),
            FileContent::Binary(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<String> for FileContent {
    fn from(s: String) -> Self {
        FileContent::Text(s)
    }
}

impl From<&str> for FileContent {
    fn from(s: &str) -> Self {
        FileContent::Text(s.to_string())
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(b: Vec<u8>) -> Self {
        FileContent::Binary(b)
    }
}

/// A single stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub content: FileContent,
}

impl FileRecord {
    /// MIME type derived from the path's extension.
    pub fn mime_type(&self) -> &'static str {
        guess_mime(&self.path)
    }

    /// Whether this path carries an HTML MIME type (valid render entry).
    pub fn is_html(&self) -> bool {
        self.mime_type() == "text/html"
    }
}

/// Extensions treated as text when importing files from disk.
pub const TEXT_EXTENSIONS: &[&str] = &["html", "htm", "css", "js", "json", "md", "txt", "svg", "xml"];

fn extension(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or("")
}

/// Whether a path should be read as text when loaded from outside the store.
pub fn is_text_path(path: &str) -> bool {
    TEXT_EXTENSIONS.contains(&extension(path).to_ascii_lowercase().as_str())
}

/// Guess a MIME type from a path's extension.
pub fn guess_mime(path: &str) -> &'static str {
    match extension(path).to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "md" => "text/markdown",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// The project's virtual filesystem: a path-unique mapping, listed in
/// path order. Insertion order is irrelevant.
#[derive(Debug, Default, Clone)]
pub struct VirtualFileStore {
    files: BTreeMap<String, FileRecord>,
}

impl VirtualFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a file. An existing record at the same path is silently
    /// overwritten.
    pub fn put(&mut self, path: impl Into<String>, content: impl Into<FileContent>) {
        let path = path.into();
        let record = FileRecord {
            path: path.clone(),
            content: content.into(),
        };
        self.files.insert(path, record);
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    /// Remove a file. No-op if the path is absent.
    pub fn delete(&mut self, path: &str) {
        self.files.remove(path);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// All records, ordered by path.
    pub fn list(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
