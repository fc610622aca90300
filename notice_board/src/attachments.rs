use std::{
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncRead};

use crate::error::BoardError;

/// Extensions that are never accepted as attachments.
pub const DENIED_EXTENSIONS: [&str; 14] = [
    "exe", "bat", "cmd", "sh", "js", "jsx", "ts", "tsx", "php", "py", "html", "css", "com", "msi",
];

pub type AttachmentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Object storage port.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Store `data` under `key`, overwriting, and return its public URL.
    async fn upload(&self, key: &str, data: Bytes) -> Result<String>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// `None` when nothing is stored under `key`.
    async fn open(&self, key: &str) -> Result<Option<AttachmentReader>>;
    fn public_url(&self, key: &str) -> String;
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Reject empty, oversized or executable uploads.
pub fn check_upload(filename: &str, size: u64, max_bytes: u64) -> Result<(), BoardError> {
    if size == 0 {
        return Err(BoardError::AttachmentRejected("file is empty".into()));
    }
    if size > max_bytes {
        return Err(BoardError::AttachmentRejected(format!(
            "file exceeds {} MB",
            max_bytes / (1024 * 1024)
        )));
    }
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if DENIED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(BoardError::AttachmentRejected(format!(
            ".{ext} files are not allowed"
        )));
    }
    Ok(())
}

fn sanitize(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Object key for a notice's attachment.
pub fn key_for(notice_id: i64, filename: &str) -> String {
    format!("{notice_id}_{}", sanitize(filename))
}

/// The object key is the last path segment of its public URL.
pub fn key_from_url(url: &str) -> Option<&str> {
    url.rsplit('/').next().filter(|k| !k.is_empty())
}

/// Keys produced by [`key_for`] never contain separators or parent refs.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Notice id a key was created for.
pub fn notice_id_of(key: &str) -> Option<i64> {
    key.split_once('_').and_then(|(id, _)| id.parse().ok())
}

/// Objects on the local disk, served by the board itself.
#[derive(Debug, Clone)]
pub struct LocalAttachmentStore {
    dir: PathBuf,
    base_url: String,
}

impl LocalAttachmentStore {
    pub async fn new(dir: impl Into<PathBuf>, public_url: &str) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self {
            dir,
            base_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if !is_valid_key(key) {
            anyhow::bail!("invalid attachment key {key:?}");
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl AttachmentStore for LocalAttachmentStore {
    async fn upload(&self, key: &str, data: Bytes) -> Result<String> {
        let path = self.path_for(key)?;
        fs::write(&path, data)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        fs::remove_file(&path)
            .await
            .with_context(|| format!("removing {}", path.display()))?;
        Ok(())
    }

    async fn open(&self, key: &str) -> Result<Option<AttachmentReader>> {
        let path = self.path_for(key)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("opening {}", path.display())),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/attachments/{key}", self.base_url)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}
