//! Terminal rendering of chat state.

use chat_host::{ChatStateStore, ChatUiHooks};
use shared::agent_api::Role;
use shared::ChatId;
use std::io::Write;
use tracing::{debug, info};

/// UI hooks for a terminal session. There is no preview pane or chat list to
/// refresh, so most hooks only log.
pub struct ConsoleHooks;

impl ChatUiHooks for ConsoleHooks {
    fn refresh_app_iframe(&self) {
        info!("App files changed; preview would reload");
    }

    fn check_problems(&self) {
        info!("Problem check requested");
    }

    fn show_extra_files(&self, files: &[String], error: Option<&str>) {
        eprintln!("\nThe response also wrote {} file(s):", files.len());
        for file in files {
            eprintln!("  {}", file);
        }
        if let Some(error) = error {
            eprintln!("(could not review them: {})", error);
        }
    }

    fn refresh_chats(&self) {
        debug!("refresh chats");
    }

    fn count_tokens(&self, chat_id: ChatId, _input: &str) {
        debug!("token count reset for chat {}", chat_id);
    }
}

/// Prints the growing assistant reply for one chat as new text arrives.
pub struct ReplyPrinter {
    chat_id: ChatId,
    printed: usize,
}

impl ReplyPrinter {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            printed: 0,
        }
    }

    /// Print whatever part of the latest assistant message is new.
    pub fn flush(&mut self, state: &ChatStateStore) {
        let messages = state.messages(self.chat_id);
        let Some(last) = messages.last().filter(|m| m.role == Role::Assistant) else {
            return;
        };
        if let Some(delta) = self.take_delta(&last.content) {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(delta.as_bytes());
            let _ = out.flush();
        }
    }

    fn take_delta<'a>(&mut self, content: &'a str) -> Option<&'a str> {
        if content.len() <= self.printed || !content.is_char_boundary(self.printed) {
            return None;
        }
        let delta = &content[self.printed..];
        self.printed = content.len();
        Some(delta)
    }

    pub fn printed_anything(&self) -> bool {
        self.printed > 0
    }
}
