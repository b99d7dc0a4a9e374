//! Chat host - client-side chat orchestration
//!
//! This crate owns what the chat UI reads and writes:
//! - Per-chat state (messages, streaming flag, error) as versioned snapshots
//! - Sending a prompt through a streaming transport and folding the events in
//! - Inlining RAG documents into the outgoing prompt
//! - The prompt library, cached between mutations

pub mod chat_state;
pub mod hooks;
pub mod prompts;
pub mod rag;
pub mod stream_chat;

pub use chat_state::{ChatStateStore, SnapshotMap};
pub use hooks::{ChatUiHooks, NoopHooks};
pub use prompts::PromptManager;
pub use stream_chat::{ChatStreamer, StreamRequest};
