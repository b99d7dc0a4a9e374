//! Events delivered by a chat streaming transport.

use serde::{Deserialize, Serialize};

use crate::agent_api::Message;
use crate::ChatId;

/// Final payload of a successful stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponseEnd {
    pub chat_id: ChatId,
    /// The response wrote files into the app
    #[serde(default)]
    pub updated_files: bool,
    /// Files written outside of what the response announced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_files_error: Option<String>,
}

impl ChatResponseEnd {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            ..Default::default()
        }
    }
}

/// One notification from the transport.
///
/// A stream produces any number of `Update`s followed by exactly one
/// `End` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    /// Full snapshot of the chat's messages
    Update(Vec<Message>),
    End(ChatResponseEnd),
    Error(String),
}

impl ChatStreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChatStreamEvent::Update(_))
    }
}
