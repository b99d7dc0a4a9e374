pub mod attachment;
pub mod events;
pub mod models;
pub mod prompt;

/// Opaque numeric conversation id. `0` means "no chat selected".
pub type ChatId = i64;

/// Random id suitable for a brand new chat or message.
pub fn random_number_id() -> i64 {
    use rand::Rng;
    rand::thread_rng().gen_range(1..1_000_000_000_000_000)
}

pub mod settings {
    use serde::{Deserialize, Serialize};
    use std::path::PathBuf;

    /// Default cap on inlined RAG document text, in bytes.
    pub const DEFAULT_MAX_RAG_BYTES: usize = 200_000;

    fn default_max_rag_bytes() -> usize {
        DEFAULT_MAX_RAG_BYTES
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AppSettings {
        /// Ollama host as typed by the user, e.g. "localhost:11434" or "http://gpu-box:11434".
        #[serde(default)]
        pub ollama_host: Option<String>,
        /// Model used for local chat, e.g. "llama3.2:3b"
        pub default_model: String,
        /// Run the problem checker after a stream that touched files
        #[serde(default)]
        pub enable_auto_fix_problems: bool,
        #[serde(default = "default_max_rag_bytes")]
        pub max_rag_bytes: usize,
        /// Where the prompt library lives. Falls back to the platform data dir.
        #[serde(default)]
        pub data_dir: Option<PathBuf>,
    }

    impl Default for AppSettings {
        fn default() -> Self {
            Self {
                ollama_host: None,
                default_model: "llama3.2:3b".into(),
                enable_auto_fix_problems: false,
                max_rag_bytes: DEFAULT_MAX_RAG_BYTES,
                data_dir: None,
            }
        }
    }
}

pub mod agent_api {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        User,
        Assistant,
    }

    impl Role {
        pub fn as_str(&self) -> &'static str {
            match self {
                Role::User => "user",
                Role::Assistant => "assistant",
            }
        }
    }

    /// One message in a chat as the UI renders it.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Message {
        pub id: i64,
        pub role: Role,
        pub content: String,
        pub created_at: DateTime<Utc>,
    }

    impl Message {
        pub fn new(role: Role, content: impl Into<String>) -> Self {
            Self {
                id: crate::random_number_id(),
                role,
                content: content.into(),
                created_at: Utc::now(),
            }
        }
    }

    /// A component the user picked in the preview pane.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ComponentSelection {
        pub id: String,
        pub name: String,
        pub relative_path: String,
        pub line_number: u32,
        pub column_number: u32,
    }
}
