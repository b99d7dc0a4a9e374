//! Sending one prompt and folding the streamed reply into chat state.

use crate::chat_state::ChatStateStore;
use crate::hooks::ChatUiHooks;
use crate::rag;
use parking_lot::RwLock;
use providers::transport::{ChatTransport, StreamOptions};
use shared::agent_api::{ComponentSelection, Message};
use shared::attachment::FileAttachment;
use shared::events::{ChatResponseEnd, ChatStreamEvent};
use shared::settings::AppSettings;
use shared::ChatId;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    pub prompt: String,
    pub chat_id: ChatId,
    pub redo: bool,
    pub attachments: Vec<FileAttachment>,
    pub selected_component: Option<ComponentSelection>,
}

impl StreamRequest {
    pub fn new(chat_id: ChatId, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            chat_id,
            ..Default::default()
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<FileAttachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn redo(mut self) -> Self {
        self.redo = true;
        self
    }
}

/// Tracks one in-flight stream. The stream count is bumped on the first
/// update only; a fresh session starts unlatched.
struct StreamSession {
    chat_id: ChatId,
    counted: bool,
}

pub struct ChatStreamer {
    transport: Arc<dyn ChatTransport>,
    state: Arc<ChatStateStore>,
    hooks: Arc<dyn ChatUiHooks>,
    settings: Arc<RwLock<AppSettings>>,
}

impl ChatStreamer {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        state: Arc<ChatStateStore>,
        hooks: Arc<dyn ChatUiHooks>,
        settings: Arc<RwLock<AppSettings>>,
    ) -> Self {
        Self {
            transport,
            state,
            hooks,
            settings,
        }
    }

    pub fn state(&self) -> &Arc<ChatStateStore> {
        &self.state
    }

    /// Send a prompt and apply every streamed event to the chat's state.
    ///
    /// Never fails: problems end up in the chat's error slot.
    pub async fn stream_message(&self, request: StreamRequest) {
        let StreamRequest {
            prompt,
            chat_id,
            redo,
            attachments,
            selected_component,
        } = request;

        if (prompt.trim().is_empty() && attachments.is_empty()) || chat_id == 0 {
            debug!("Ignoring empty stream request for chat {}", chat_id);
            return;
        }

        let max_rag_bytes = self.settings.read().max_rag_bytes;
        let rag = rag::assemble(&attachments, max_rag_bytes).await;
        let full_prompt = format!("{}{}", rag.content, prompt);

        self.state.mark_recent_stream(chat_id);
        self.state.set_error(chat_id, None);
        self.state.set_streaming(chat_id, true);

        let options = StreamOptions {
            chat_id,
            redo,
            attachments: rag.other_attachments,
            selected_component,
        };

        let mut events = match self.transport.stream_message(full_prompt, options) {
            Ok(rx) => rx,
            Err(e) => {
                error!("Exception during streaming setup for chat {}: {:#}", chat_id, e);
                self.state.set_streaming(chat_id, false);
                self.state.set_error(chat_id, Some(e.to_string()));
                return;
            }
        };

        info!("Streaming chat {}", chat_id);
        let mut session = StreamSession {
            chat_id,
            counted: false,
        };

        while let Some(event) = events.recv().await {
            match event {
                ChatStreamEvent::Update(messages) => self.on_update(&mut session, messages),
                ChatStreamEvent::End(response) => {
                    self.on_end(chat_id, response);
                    return;
                }
                ChatStreamEvent::Error(message) => {
                    self.on_error(chat_id, message);
                    return;
                }
            }
        }

        warn!("Stream for chat {} closed without finishing", chat_id);
        self.on_error(chat_id, "Stream ended unexpectedly".to_string());
    }

    fn on_update(&self, session: &mut StreamSession, messages: Vec<Message>) {
        if !session.counted {
            self.state.increment_stream_count(session.chat_id);
            session.counted = true;
        }
        self.state.set_messages(session.chat_id, messages);
    }

    fn on_end(&self, chat_id: ChatId, response: ChatResponseEnd) {
        if response.updated_files {
            self.state.set_preview_open(true);
            self.hooks.refresh_app_iframe();
            if self.settings.read().enable_auto_fix_problems {
                self.hooks.check_problems();
            }
        }
        if let Some(files) = &response.extra_files {
            self.hooks
                .show_extra_files(files, response.extra_files_error.as_deref());
        }
        self.hooks.refresh_proposal(chat_id);
        self.hooks.refetch_user_budget();

        self.finish(chat_id);
        debug!("Chat {} stream finished", chat_id);
    }

    fn on_error(&self, chat_id: ChatId, message: String) {
        error!("Stream error for {}: {}", chat_id, message);
        self.state.set_error(chat_id, Some(message));
        self.finish(chat_id);
    }

    fn finish(&self, chat_id: ChatId) {
        self.state.set_streaming(chat_id, false);
        self.hooks.refresh_chats();
        self.hooks.refresh_app();
        self.hooks.refresh_versions();
        self.hooks.count_tokens(chat_id, "");
    }

    pub fn is_streaming(&self, chat_id: ChatId) -> bool {
        self.state.is_streaming(chat_id)
    }

    pub fn error(&self, chat_id: ChatId) -> Option<String> {
        self.state.error(chat_id)
    }

    pub fn set_error(&self, chat_id: ChatId, value: Option<String>) {
        self.state.set_error(chat_id, value);
    }

    pub fn set_is_streaming(&self, chat_id: ChatId, value: bool) {
        self.state.set_streaming(chat_id, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use parking_lot::Mutex;
    use shared::agent_api::Role;
    use shared::attachment::InMemoryFile;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    /// Replays a fixed list of events; optionally refuses to start.
    #[derive(Default)]
    struct ScriptedTransport {
        events: Vec<ChatStreamEvent>,
        setup_error: Option<String>,
        calls: Mutex<Vec<(String, StreamOptions)>>,
    }

    impl ScriptedTransport {
        fn with_events(events: Vec<ChatStreamEvent>) -> Self {
            Self {
                events,
                ..Default::default()
            }
        }
    }

    impl ChatTransport for ScriptedTransport {
        fn stream_message(
            &self,
            prompt: String,
            options: StreamOptions,
        ) -> Result<UnboundedReceiver<ChatStreamEvent>> {
            self.calls.lock().push((prompt, options));
            if let Some(message) = &self.setup_error {
                return Err(anyhow!(message.clone()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            for event in &self.events {
                tx.send(event.clone()).unwrap();
            }
            Ok(rx)
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingHooks {
        fn count(&self, name: &str) -> usize {
            self.calls.lock().iter().filter(|c| c.as_str() == name).count()
        }
    }

    impl ChatUiHooks for RecordingHooks {
        fn refresh_app_iframe(&self) {
            self.calls.lock().push("refresh_app_iframe".into());
        }
        fn check_problems(&self) {
            self.calls.lock().push("check_problems".into());
        }
        fn show_extra_files(&self, files: &[String], _error: Option<&str>) {
            self.calls
                .lock()
                .push(format!("show_extra_files:{}", files.join(",")));
        }
        fn refresh_proposal(&self, _chat_id: ChatId) {
            self.calls.lock().push("refresh_proposal".into());
        }
        fn refetch_user_budget(&self) {
            self.calls.lock().push("refetch_user_budget".into());
        }
        fn refresh_chats(&self) {
            self.calls.lock().push("refresh_chats".into());
        }
        fn refresh_app(&self) {
            self.calls.lock().push("refresh_app".into());
        }
        fn refresh_versions(&self) {
            self.calls.lock().push("refresh_versions".into());
        }
        fn count_tokens(&self, chat_id: ChatId, input: &str) {
            self.calls
                .lock()
                .push(format!("count_tokens:{}:{}", chat_id, input));
        }
    }

    struct Harness {
        streamer: ChatStreamer,
        transport: Arc<ScriptedTransport>,
        hooks: Arc<RecordingHooks>,
    }

    fn harness(transport: ScriptedTransport, settings: AppSettings) -> Harness {
        let transport = Arc::new(transport);
        let hooks = Arc::new(RecordingHooks::default());
        let streamer = ChatStreamer::new(
            transport.clone(),
            Arc::new(ChatStateStore::new()),
            hooks.clone(),
            Arc::new(RwLock::new(settings)),
        );
        Harness {
            streamer,
            transport,
            hooks,
        }
    }

    fn reply(text: &str) -> Vec<Message> {
        vec![
            Message::new(Role::User, "question"),
            Message::new(Role::Assistant, text),
        ]
    }

    #[tokio::test]
    async fn test_empty_prompt_is_a_no_op() {
        let h = harness(ScriptedTransport::default(), AppSettings::default());

        h.streamer.stream_message(StreamRequest::new(3, "   ")).await;
        h.streamer.stream_message(StreamRequest::new(0, "hello")).await;

        assert!(h.transport.calls.lock().is_empty());
        assert_eq!(h.streamer.state().revision(), 0);
        assert!(h.hooks.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_attachments_alone_are_enough_to_send() {
        let h = harness(
            ScriptedTransport::with_events(vec![ChatStreamEvent::End(ChatResponseEnd::new(3))]),
            AppSettings::default(),
        );
        let request = StreamRequest::new(3, "").with_attachments(vec![FileAttachment::other(
            InMemoryFile::new("shot.png", vec![1u8]),
        )]);

        h.streamer.stream_message(request).await;
        assert_eq!(h.transport.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_updates_then_end_with_updated_files() {
        let end = ChatResponseEnd {
            chat_id: 7,
            updated_files: true,
            ..Default::default()
        };
        let h = harness(
            ScriptedTransport::with_events(vec![
                ChatStreamEvent::Update(reply("He")),
                ChatStreamEvent::Update(reply("Hello")),
                ChatStreamEvent::Update(reply("Hello!")),
                ChatStreamEvent::End(end),
            ]),
            AppSettings::default(),
        );

        h.streamer.stream_message(StreamRequest::new(7, "hi")).await;

        let state = h.streamer.state();
        assert!(!h.streamer.is_streaming(7));
        assert!(h.streamer.error(7).is_none());
        assert_eq!(state.messages(7)[1].content, "Hello!");
        assert_eq!(state.stream_count(7), 1);
        assert!(state.is_preview_open());
        assert!(state.recent_stream_chat_ids().contains(&7));

        assert_eq!(h.hooks.count("refresh_app_iframe"), 1);
        assert_eq!(h.hooks.count("check_problems"), 0);
        assert_eq!(h.hooks.count("refetch_user_budget"), 1);
        assert_eq!(h.hooks.count("refresh_proposal"), 1);
        assert_eq!(h.hooks.count("refresh_chats"), 1);
        assert_eq!(h.hooks.count("refresh_app"), 1);
        assert_eq!(h.hooks.count("refresh_versions"), 1);
        assert_eq!(h.hooks.count("count_tokens:7:"), 1);
    }

    #[tokio::test]
    async fn test_auto_fix_runs_problem_check() {
        let end = ChatResponseEnd {
            chat_id: 7,
            updated_files: true,
            ..Default::default()
        };
        let settings = AppSettings {
            enable_auto_fix_problems: true,
            ..Default::default()
        };
        let h = harness(
            ScriptedTransport::with_events(vec![ChatStreamEvent::End(end)]),
            settings,
        );

        h.streamer.stream_message(StreamRequest::new(7, "hi")).await;
        assert_eq!(h.hooks.count("check_problems"), 1);
    }

    #[tokio::test]
    async fn test_end_without_file_changes_leaves_preview_alone() {
        let end = ChatResponseEnd {
            chat_id: 2,
            extra_files: Some(vec!["a.ts".into(), "b.ts".into()]),
            ..Default::default()
        };
        let h = harness(
            ScriptedTransport::with_events(vec![ChatStreamEvent::End(end)]),
            AppSettings::default(),
        );

        h.streamer.stream_message(StreamRequest::new(2, "hi")).await;

        assert!(!h.streamer.state().is_preview_open());
        assert_eq!(h.hooks.count("refresh_app_iframe"), 0);
        assert_eq!(h.hooks.count("show_extra_files:a.ts,b.ts"), 1);
    }

    #[tokio::test]
    async fn test_error_event_is_recorded() {
        let h = harness(
            ScriptedTransport::with_events(vec![
                ChatStreamEvent::Update(reply("partial")),
                ChatStreamEvent::Error("model crashed".into()),
            ]),
            AppSettings::default(),
        );

        h.streamer.stream_message(StreamRequest::new(9, "hi")).await;

        assert!(!h.streamer.is_streaming(9));
        assert_eq!(h.streamer.error(9).as_deref(), Some("model crashed"));
        assert_eq!(h.streamer.state().messages(9)[1].content, "partial");
        assert_eq!(h.hooks.count("refresh_chats"), 1);
        assert_eq!(h.hooks.count("refresh_versions"), 1);
        assert_eq!(h.hooks.count("count_tokens:9:"), 1);
        assert_eq!(h.hooks.count("refetch_user_budget"), 0);
        assert_eq!(h.hooks.count("refresh_app_iframe"), 0);
    }

    #[tokio::test]
    async fn test_setup_failure_records_error_without_hooks() {
        let transport = ScriptedTransport {
            setup_error: Some("IPC channel closed".into()),
            ..Default::default()
        };
        let h = harness(transport, AppSettings::default());

        h.streamer.stream_message(StreamRequest::new(4, "hi")).await;

        assert!(!h.streamer.is_streaming(4));
        assert_eq!(h.streamer.error(4).as_deref(), Some("IPC channel closed"));
        assert!(h.hooks.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_clears_streaming() {
        let h = harness(
            ScriptedTransport::with_events(vec![ChatStreamEvent::Update(reply("half"))]),
            AppSettings::default(),
        );

        h.streamer.stream_message(StreamRequest::new(5, "hi")).await;

        assert!(!h.streamer.is_streaming(5));
        assert_eq!(
            h.streamer.error(5).as_deref(),
            Some("Stream ended unexpectedly")
        );
    }

    #[tokio::test]
    async fn test_new_stream_clears_old_error_and_counts_again() {
        let h = harness(
            ScriptedTransport::with_events(vec![
                ChatStreamEvent::Update(reply("a")),
                ChatStreamEvent::Update(reply("ab")),
                ChatStreamEvent::End(ChatResponseEnd::new(6)),
            ]),
            AppSettings::default(),
        );
        h.streamer.set_error(6, Some("old failure".into()));

        h.streamer.stream_message(StreamRequest::new(6, "one")).await;
        h.streamer
            .stream_message(StreamRequest::new(6, "one").redo())
            .await;

        assert!(h.streamer.error(6).is_none());
        assert_eq!(h.streamer.state().stream_count(6), 2);
        assert!(h.transport.calls.lock()[1].1.redo);
    }

    #[tokio::test]
    async fn test_documents_are_inlined_ahead_of_prompt() {
        let h = harness(
            ScriptedTransport::with_events(vec![ChatStreamEvent::End(ChatResponseEnd::new(8))]),
            AppSettings {
                max_rag_bytes: 4,
                ..Default::default()
            },
        );
        let request = StreamRequest::new(8, "summarize").with_attachments(vec![
            FileAttachment::rag_document(InMemoryFile::new("brief.md", "abcdefgh")),
            FileAttachment::other(InMemoryFile::new("logo.png", vec![0u8])),
        ]);

        h.streamer.stream_message(request).await;

        let calls = h.transport.calls.lock();
        let (prompt, options) = &calls[0];
        assert_eq!(
            prompt,
            "\n\n--- Document: brief.md ---\nabcd\n--- End Document (truncated) ---\n\nsummarize"
        );
        assert_eq!(options.chat_id, 8);
        assert_eq!(options.attachments.len(), 1);
        assert_eq!(options.attachments[0].file.name(), "logo.png");
    }
}
