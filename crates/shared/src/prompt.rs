//! Prompt library records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A saved prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptItem {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPrompt {
    pub title: String,
    pub description: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptUpdate {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub content: String,
}

/// Persistence for the prompt library.
#[async_trait::async_trait]
pub trait PromptBackend: Send + Sync {
    async fn list_prompts(&self) -> anyhow::Result<Vec<PromptItem>>;

    async fn create_prompt(&self, prompt: NewPrompt) -> anyhow::Result<PromptItem>;

    async fn update_prompt(&self, update: PromptUpdate) -> anyhow::Result<()>;

    async fn delete_prompt(&self, id: i64) -> anyhow::Result<()>;
}
