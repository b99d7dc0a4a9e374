//! Streaming chat transport.
//!
//! A transport takes the final prompt text and delivers a stream of
//! [`ChatStreamEvent`]s. Failing to even start the request is reported
//! through the returned `Result`; everything after that arrives as events.

use crate::ollama::{OllamaClient, StreamChunk};
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use shared::agent_api::{ComponentSelection, Message, Role};
use shared::attachment::FileAttachment;
use shared::events::{ChatResponseEnd, ChatStreamEvent};
use shared::ChatId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub chat_id: ChatId,
    pub redo: bool,
    /// Attachments that were not inlined into the prompt
    pub attachments: Vec<FileAttachment>,
    pub selected_component: Option<ComponentSelection>,
}

pub trait ChatTransport: Send + Sync {
    fn stream_message(
        &self,
        prompt: String,
        options: StreamOptions,
    ) -> Result<UnboundedReceiver<ChatStreamEvent>>;
}

/// Messages exchanged in one chat so far.
#[derive(Debug, Default)]
struct ChatHistory {
    messages: Vec<Message>,
    /// The last request failed and its user turn was dropped, so a redo
    /// has nothing to replace.
    last_turn_failed: bool,
}

type Histories = Arc<Mutex<HashMap<ChatId, ChatHistory>>>;

/// Streams completions from a local Ollama server, keeping each chat's
/// history in memory.
pub struct OllamaChatTransport {
    client: Arc<OllamaClient>,
    histories: Histories,
}

impl OllamaChatTransport {
    pub fn new(client: OllamaClient) -> Self {
        Self {
            client: Arc::new(client),
            histories: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn history(&self, chat_id: ChatId) -> Vec<Message> {
        self.histories
            .lock()
            .get(&chat_id)
            .map(|h| h.messages.clone())
            .unwrap_or_default()
    }
}

fn with_component_note(prompt: String, selection: Option<&ComponentSelection>) -> String {
    match selection {
        Some(c) => format!(
            "[Selected component: {} ({}:{}:{})]\n\n{}",
            c.name, c.relative_path, c.line_number, c.column_number, prompt
        ),
        None => prompt,
    }
}

impl ChatTransport for OllamaChatTransport {
    fn stream_message(
        &self,
        prompt: String,
        options: StreamOptions,
    ) -> Result<UnboundedReceiver<ChatStreamEvent>> {
        if self.client.model().trim().is_empty() {
            bail!("No local model selected");
        }
        let runtime = tokio::runtime::Handle::try_current()
            .context("Chat streaming needs a running async runtime")?;

        for attachment in &options.attachments {
            debug!(
                "Attachment {} is not sent to Ollama",
                attachment.file.name()
            );
        }

        let chat_id = options.chat_id;
        let prompt = with_component_note(prompt, options.selected_component.as_ref());

        let conversation = {
            let mut histories = self.histories.lock();
            let history = histories.entry(chat_id).or_default();
            if options.redo && !history.last_turn_failed {
                let messages = &mut history.messages;
                if messages.last().map(|m| m.role) == Some(Role::Assistant) {
                    messages.pop();
                }
                if messages.last().map(|m| m.role) == Some(Role::User) {
                    messages.pop();
                }
            }
            history.last_turn_failed = false;
            history.messages.push(Message::new(Role::User, prompt));
            history.messages.clone()
        };

        info!(
            "Streaming chat {} via Ollama ({} messages)",
            chat_id,
            conversation.len()
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let histories = self.histories.clone();
        runtime.spawn(run_stream(client, histories, chat_id, conversation, tx));
        Ok(rx)
    }
}

async fn run_stream(
    client: Arc<OllamaClient>,
    histories: Histories,
    chat_id: ChatId,
    conversation: Vec<Message>,
    events: UnboundedSender<ChatStreamEvent>,
) {
    let pending_id = conversation.last().map(|m| m.id);
    match relay_reply(client, conversation, &events).await {
        Ok(reply) => {
            histories
                .lock()
                .entry(chat_id)
                .or_default()
                .messages
                .push(reply);
            let _ = events.send(ChatStreamEvent::End(ChatResponseEnd::new(chat_id)));
        }
        Err(message) => {
            warn!("Chat {} stream failed: {}", chat_id, message);
            drop_failed_turn(&histories, chat_id, pending_id);
            let _ = events.send(ChatStreamEvent::Error(message));
        }
    }
}

/// Forward text chunks as `Update` snapshots and return the finished reply.
async fn relay_reply(
    client: Arc<OllamaClient>,
    conversation: Vec<Message>,
    events: &UnboundedSender<ChatStreamEvent>,
) -> std::result::Result<Message, String> {
    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
    let request = conversation.clone();
    let generation = tokio::spawn(async move { client.generate_stream(request, chunk_tx).await });

    let mut reply = Message::new(Role::Assistant, "");
    let mut finished = false;
    while let Some(chunk) = chunk_rx.recv().await {
        match chunk {
            StreamChunk::Text(text) => {
                reply.content.push_str(&text);
                let mut snapshot = conversation.clone();
                snapshot.push(reply.clone());
                let _ = events.send(ChatStreamEvent::Update(snapshot));
            }
            StreamChunk::Done => {
                finished = true;
                break;
            }
            StreamChunk::Error(message) => return Err(message),
        }
    }

    match generation.await {
        Ok(Ok(())) if finished => Ok(reply),
        Ok(Ok(())) => Err("Ollama closed the stream early".to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("Streaming task failed: {}", e)),
    }
}

/// Remove the user turn of a request that failed, so the next prompt does
/// not follow an unanswered one.
fn drop_failed_turn(histories: &Histories, chat_id: ChatId, pending_id: Option<i64>) {
    let mut histories = histories.lock();
    let Some(history) = histories.get_mut(&chat_id) else {
        return;
    };
    if pending_id.is_some() && history.messages.last().map(|m| m.id) == pending_id {
        history.messages.pop();
        history.last_turn_failed = true;
    }
}
