//! File attachments sent along with a chat prompt.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// How an attachment is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachmentKind {
    /// Text is inlined into the prompt as reference material
    RagDocument,
    /// Forwarded to the transport untouched
    Other,
}

/// Something with a name and readable content.
#[async_trait]
pub trait AttachmentFile: Send + Sync {
    fn name(&self) -> &str;

    /// Size in bytes, when known up front.
    fn size(&self) -> Option<u64>;

    async fn read_text(&self) -> Result<String>;
}

/// A file on local disk.
#[derive(Debug, Clone)]
pub struct DiskFile {
    path: PathBuf,
    name: String,
    size: Option<u64>,
}

impl DiskFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        let size = std::fs::metadata(&path).ok().map(|m| m.len());
        Self { path, name, size }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AttachmentFile for DiskFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    async fn read_text(&self) -> Result<String> {
        debug!("Reading attachment {:?}", self.path);
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Attachment content already held in memory (pasted text, drag-and-drop).
#[derive(Debug, Clone)]
pub struct InMemoryFile {
    name: String,
    bytes: Vec<u8>,
}

impl InMemoryFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
impl AttachmentFile for InMemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }

    async fn read_text(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.bytes).into_owned())
    }
}

#[derive(Clone)]
pub struct FileAttachment {
    pub kind: AttachmentKind,
    pub file: Arc<dyn AttachmentFile>,
}

impl FileAttachment {
    pub fn new(kind: AttachmentKind, file: impl AttachmentFile + 'static) -> Self {
        Self {
            kind,
            file: Arc::new(file),
        }
    }

    pub fn rag_document(file: impl AttachmentFile + 'static) -> Self {
        Self::new(AttachmentKind::RagDocument, file)
    }

    pub fn other(file: impl AttachmentFile + 'static) -> Self {
        Self::new(AttachmentKind::Other, file)
    }

    pub fn is_rag_document(&self) -> bool {
        self.kind == AttachmentKind::RagDocument
    }
}

impl fmt::Debug for FileAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAttachment")
            .field("kind", &self.kind)
            .field("name", &self.file.name())
            .field("size", &self.file.size())
            .finish()
    }
}
