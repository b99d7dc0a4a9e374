//! SQLite-backed prompt library.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use shared::prompt::{NewPrompt, PromptBackend, PromptItem, PromptUpdate};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum PromptStoreError {
    #[error("Prompt not found: {id}")]
    NotFound { id: i64 },

    #[error("Stored timestamp is invalid: {value}")]
    BadTimestamp { value: String },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Prompt library stored in `prompts.db` under the data directory.
#[derive(Clone)]
pub struct PromptStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl PromptStore {
    /// Open (or create) the store at `data_dir/prompts.db`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("prompts.db");

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }

        let conn = Connection::open(&db_path)?;
        Self::init_schema(&conn)?;
        info!("Prompt library at {:?}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    /// Store that lives only as long as the process. Used by tests and
    /// throwaway sessions.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS prompts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn list(&self) -> Result<Vec<PromptItem>, PromptStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, description, content, created_at, updated_at
             FROM prompts ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], raw_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawPrompt::into_item).collect()
    }

    pub fn get(&self, id: i64) -> Result<Option<PromptItem>, PromptStoreError> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT id, title, description, content, created_at, updated_at
                 FROM prompts WHERE id = ?1",
                params![id],
                raw_row,
            )
            .optional()?;
        raw.map(RawPrompt::into_item).transpose()
    }

    pub fn create(&self, prompt: NewPrompt) -> Result<PromptItem, PromptStoreError> {
        let now = Utc::now();
        let id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO prompts (title, description, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![prompt.title, prompt.description, prompt.content, now.to_rfc3339()],
            )?;
            conn.last_insert_rowid()
        };
        debug!("Created prompt {}", id);

        Ok(PromptItem {
            id,
            title: prompt.title,
            description: prompt.description,
            content: prompt.content,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update(&self, update: PromptUpdate) -> Result<(), PromptStoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE prompts SET title = ?1, description = ?2, content = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                update.title,
                update.description,
                update.content,
                Utc::now().to_rfc3339(),
                update.id
            ],
        )?;
        if changed == 0 {
            return Err(PromptStoreError::NotFound { id: update.id });
        }
        debug!("Updated prompt {}", update.id);
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<(), PromptStoreError> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM prompts WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(PromptStoreError::NotFound { id });
        }
        debug!("Deleted prompt {}", id);
        Ok(())
    }
}

struct RawPrompt {
    id: i64,
    title: String,
    description: Option<String>,
    content: String,
    created_at: String,
    updated_at: String,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawPrompt> {
    Ok(RawPrompt {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, PromptStoreError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| PromptStoreError::BadTimestamp { value })
}

impl RawPrompt {
    fn into_item(self) -> Result<PromptItem, PromptStoreError> {
        Ok(PromptItem {
            id: self.id,
            title: self.title,
            description: self.description,
            content: self.content,
            created_at: parse_timestamp(self.created_at)?,
            updated_at: parse_timestamp(self.updated_at)?,
        })
    }
}

async fn blocking<T, F>(store: &PromptStore, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(PromptStore) -> Result<T, PromptStoreError> + Send + 'static,
{
    let store = store.clone();
    let result = tokio::task::spawn_blocking(move || op(store))
        .await
        .context("Prompt store task panicked")??;
    Ok(result)
}

#[async_trait]
impl PromptBackend for PromptStore {
    async fn list_prompts(&self) -> Result<Vec<PromptItem>> {
        blocking(self, |s| s.list()).await
    }

    async fn create_prompt(&self, prompt: NewPrompt) -> Result<PromptItem> {
        blocking(self, move |s| s.create(prompt)).await
    }

    async fn update_prompt(&self, update: PromptUpdate) -> Result<()> {
        blocking(self, move |s| s.update(update)).await
    }

    async fn delete_prompt(&self, id: i64) -> Result<()> {
        blocking(self, move |s| s.delete(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_prompt(title: &str) -> NewPrompt {
        NewPrompt {
            title: title.to_string(),
            description: None,
            content: format!("{} content", title),
        }
    }

    #[test]
    fn test_create_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = PromptStore::new(temp_dir.path()).unwrap();
        assert!(store.list().unwrap().is_empty());

        let first = store.create(new_prompt("Refactor")).unwrap();
        let second = store
            .create(NewPrompt {
                description: Some("for reviews".into()),
                ..new_prompt("Review")
            })
            .unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[1].title, "Review");
        assert_eq!(all[1].description.as_deref(), Some("for reviews"));
        assert_eq!(all[1].id, second.id);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = PromptStore::new(temp_dir.path()).unwrap();
            store.create(new_prompt("Keep me")).unwrap();
        }
        let store = PromptStore::new(temp_dir.path()).unwrap();
        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Keep me");
    }

    #[test]
    fn test_update_changes_fields() {
        let store = PromptStore::in_memory().unwrap();
        let created = store.create(new_prompt("Draft")).unwrap();

        store
            .update(PromptUpdate {
                id: created.id,
                title: "Final".into(),
                description: Some("polished".into()),
                content: "new body".into(),
            })
            .unwrap();

        let item = store.get(created.id).unwrap().unwrap();
        assert_eq!(item.title, "Final");
        assert_eq!(item.content, "new body");
        assert_eq!(item.created_at, created.created_at);
        assert!(item.updated_at >= created.updated_at);
    }

    #[test]
    fn test_missing_ids() {
        let store = PromptStore::in_memory().unwrap();
        assert!(matches!(
            store.delete(42),
            Err(PromptStoreError::NotFound { id: 42 })
        ));
        assert!(matches!(
            store.update(PromptUpdate {
                id: 7,
                title: "x".into(),
                description: None,
                content: "y".into(),
            }),
            Err(PromptStoreError::NotFound { id: 7 })
        ));
        assert!(store.get(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_backend_round_trip() {
        let store = PromptStore::in_memory().unwrap();
        let backend: &dyn PromptBackend = &store;

        let created = backend.create_prompt(new_prompt("Async")).await.unwrap();
        assert_eq!(backend.list_prompts().await.unwrap().len(), 1);

        backend.delete_prompt(created.id).await.unwrap();
        assert!(backend.list_prompts().await.unwrap().is_empty());
        assert!(backend.delete_prompt(created.id).await.is_err());
    }
}
