//! Prompt library access with a cached list.

use anyhow::Result;
use parking_lot::RwLock;
use shared::prompt::{NewPrompt, PromptBackend, PromptItem, PromptUpdate};
use std::sync::Arc;
use tracing::{debug, error};

/// Pass-through to a [`PromptBackend`]. Reads are served from a cached list
/// that every successful mutation throws away.
pub struct PromptManager {
    backend: Arc<dyn PromptBackend>,
    cache: RwLock<Option<Arc<Vec<PromptItem>>>>,
}

impl PromptManager {
    pub fn new(backend: Arc<dyn PromptBackend>) -> Self {
        Self {
            backend,
            cache: RwLock::new(None),
        }
    }

    /// Cached prompts, fetching them first if needed.
    pub async fn prompts(&self) -> Result<Arc<Vec<PromptItem>>> {
        let cached = self.cache.read().clone();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        self.refetch().await
    }

    pub async fn refetch(&self) -> Result<Arc<Vec<PromptItem>>> {
        let list = Arc::new(self.backend.list_prompts().await.map_err(|e| {
            error!("Failed to list prompts: {:#}", e);
            e
        })?);
        *self.cache.write() = Some(list.clone());
        debug!("Loaded {} prompts", list.len());
        Ok(list)
    }

    pub fn is_cached(&self) -> bool {
        self.cache.read().is_some()
    }

    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    pub async fn create_prompt(&self, prompt: NewPrompt) -> Result<PromptItem> {
        match self.backend.create_prompt(prompt).await {
            Ok(item) => {
                self.invalidate();
                Ok(item)
            }
            Err(e) => {
                error!("Failed to create prompt: {:#}", e);
                Err(e)
            }
        }
    }

    pub async fn update_prompt(&self, update: PromptUpdate) -> Result<()> {
        let id = update.id;
        match self.backend.update_prompt(update).await {
            Ok(()) => {
                self.invalidate();
                Ok(())
            }
            Err(e) => {
                error!("Failed to update prompt {}: {:#}", id, e);
                Err(e)
            }
        }
    }

    pub async fn delete_prompt(&self, id: i64) -> Result<()> {
        match self.backend.delete_prompt(id).await {
            Ok(()) => {
                self.invalidate();
                Ok(())
            }
            Err(e) => {
                error!("Failed to delete prompt {}: {:#}", id, e);
                Err(e)
            }
        }
    }
}
