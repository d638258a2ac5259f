use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StorageError;

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "txt", "csv", "json", "py", "js", "jsx", "ts", "tsx", "html", "css", "md", "pdf", "jpg", "png",
];

#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Upload directory with an extension allow-list and a size cap.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    max_bytes: u64,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(root: P, max_bytes: u64) -> std::io::Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            max_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Stores `bytes` under a timestamped, uniquely tagged copy of the
    /// client-supplied name and returns the path written.
    pub async fn save(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let name = sanitize_name(name).ok_or(StorageError::InvalidName)?;

        let extension = extension_of(&name).unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(StorageError::DisallowedExtension(extension));
        }

        let size = bytes.len() as u64;
        if size > self.max_bytes {
            return Err(StorageError::TooLarge { size, max: self.max_bytes });
        }

        let tag = Uuid::new_v4().simple().to_string();
        let stamped = format!("{}_{}_{}", Utc::now().format("%Y%m%d%H%M%S%3f"), &tag[..8], name);
        let path = self.root.join(stamped);
        tokio::fs::write(&path, bytes).await?;

        tracing::info!(path = %path.display(), size, "file stored");
        Ok(path)
    }

    /// Text content of a stored file, or `None` when the path is outside the
    /// upload directory, missing, or not UTF-8.
    pub async fn read(&self, path: &Path) -> Option<String> {
        let root = tokio::fs::canonicalize(&self.root).await.ok()?;
        let path = if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) };
        let path = tokio::fs::canonicalize(&path).await.ok()?;
        if !path.starts_with(&root) {
            tracing::warn!(path = %path.display(), "refusing to read outside upload dir");
            return None;
        }

        let bytes = tokio::fs::read(&path).await.ok()?;
        String::from_utf8(bytes).ok()
    }

    /// Stored files, newest first.
    pub async fn list(&self) -> Result<Vec<StoredFile>, StorageError> {
        let mut files = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            files.push(StoredFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                modified_at: DateTime::<Utc>::from(modified),
            });
        }

        files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| a.name.cmp(&b.name)));
        Ok(files)
    }
}

/// Last path component of a client-supplied name, with both separator styles
/// handled. `None` for names that reduce to nothing or to a dot entry.
fn sanitize_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
