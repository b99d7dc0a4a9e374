//! Inlining RAG documents into the outgoing prompt.

use futures::future::join_all;
use shared::attachment::{AttachmentFile, FileAttachment};
use tracing::{error, warn};

/// Prompt prefix built from document attachments, plus the attachments that
/// still need to go to the transport.
#[derive(Debug, Default)]
pub struct RagAssembly {
    pub content: String,
    pub other_attachments: Vec<FileAttachment>,
}

/// Read every RAG document concurrently and render them in attachment order.
/// A document that cannot be read contributes nothing.
pub async fn assemble(attachments: &[FileAttachment], max_bytes: usize) -> RagAssembly {
    let (documents, others): (Vec<_>, Vec<_>) = attachments
        .iter()
        .cloned()
        .partition(FileAttachment::is_rag_document);

    let blocks = join_all(
        documents
            .iter()
            .map(|doc| document_block(doc.file.as_ref(), max_bytes)),
    )
    .await;

    RagAssembly {
        content: blocks.concat(),
        other_attachments: others,
    }
}

async fn document_block(file: &dyn AttachmentFile, max_bytes: usize) -> String {
    let name = file.name();
    let text = match file.read_text().await {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to read attachment {}: {:#}", name, e);
            return String::new();
        }
    };

    let oversized = file.size().map_or(false, |s| s > max_bytes as u64) || text.len() > max_bytes;
    if oversized {
        warn!("Truncating large rag-document: {}", name);
        format!(
            "\n\n--- Document: {} ---\n{}\n--- End Document (truncated) ---\n\n",
            name,
            truncate_to_boundary(&text, max_bytes)
        )
    } else {
        format!(
            "\n\n--- Document: {} ---\n{}\n--- End Document ---\n\n",
            name, text
        )
    }
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a char.
fn truncate_to_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
