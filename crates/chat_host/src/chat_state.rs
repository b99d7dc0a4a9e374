//! Per-chat UI state.
//!
//! Every map is an immutable snapshot behind an `Arc`. Writers clone the
//! current map, change one key and swap the new map in, so a reader holding
//! an older snapshot never sees a half-applied update.

use parking_lot::RwLock;
use shared::agent_api::Message;
use shared::ChatId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

struct Versioned<V> {
    version: u64,
    map: Arc<HashMap<ChatId, V>>,
}

/// A copy-on-write map keyed by chat id, with a version bumped on every write.
pub struct SnapshotMap<V> {
    inner: RwLock<Versioned<V>>,
}

impl<V: Clone> SnapshotMap<V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Versioned {
                version: 0,
                map: Arc::new(HashMap::new()),
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<HashMap<ChatId, V>> {
        self.inner.read().map.clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn get(&self, chat_id: ChatId) -> Option<V> {
        self.inner.read().map.get(&chat_id).cloned()
    }

    /// Replace the value for one chat. Returns the new version.
    pub fn set(&self, chat_id: ChatId, value: V) -> u64 {
        self.update(|map| {
            map.insert(chat_id, value);
        })
    }

    pub fn update(&self, f: impl FnOnce(&mut HashMap<ChatId, V>)) -> u64 {
        let mut guard = self.inner.write();
        let mut next = (*guard.map).clone();
        f(&mut next);
        guard.map = Arc::new(next);
        guard.version += 1;
        guard.version
    }
}

impl<V: Clone> Default for SnapshotMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// All state the chat UI renders, keyed by chat id.
pub struct ChatStateStore {
    messages: SnapshotMap<Vec<Message>>,
    streaming: SnapshotMap<bool>,
    errors: SnapshotMap<Option<String>>,
    stream_counts: SnapshotMap<u64>,
    recent_stream_chat_ids: RwLock<Arc<HashSet<ChatId>>>,
    preview_open: AtomicBool,
    changes: watch::Sender<u64>,
}

impl ChatStateStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            messages: SnapshotMap::new(),
            streaming: SnapshotMap::new(),
            errors: SnapshotMap::new(),
            stream_counts: SnapshotMap::new(),
            recent_stream_chat_ids: RwLock::new(Arc::new(HashSet::new())),
            preview_open: AtomicBool::new(false),
            changes,
        }
    }

    /// Receiver that ticks after every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Total number of changes so far.
    pub fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    fn changed(&self) {
        self.changes.send_modify(|rev| *rev += 1);
    }

    pub fn messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.messages.get(chat_id).unwrap_or_default()
    }

    pub fn messages_snapshot(&self) -> Arc<HashMap<ChatId, Vec<Message>>> {
        self.messages.snapshot()
    }

    pub fn set_messages(&self, chat_id: ChatId, messages: Vec<Message>) {
        self.messages.set(chat_id, messages);
        self.changed();
    }

    pub fn is_streaming(&self, chat_id: ChatId) -> bool {
        self.streaming.get(chat_id).unwrap_or(false)
    }

    pub fn set_streaming(&self, chat_id: ChatId, streaming: bool) {
        self.streaming.set(chat_id, streaming);
        self.changed();
    }

    pub fn error(&self, chat_id: ChatId) -> Option<String> {
        self.errors.get(chat_id).flatten()
    }

    pub fn set_error(&self, chat_id: ChatId, error: Option<String>) {
        self.errors.set(chat_id, error);
        self.changed();
    }

    pub fn stream_count(&self, chat_id: ChatId) -> u64 {
        self.stream_counts.get(chat_id).unwrap_or(0)
    }

    pub fn increment_stream_count(&self, chat_id: ChatId) {
        self.stream_counts.update(|map| {
            *map.entry(chat_id).or_insert(0) += 1;
        });
        self.changed();
    }

    pub fn mark_recent_stream(&self, chat_id: ChatId) {
        {
            let mut guard = self.recent_stream_chat_ids.write();
            let mut next = (**guard).clone();
            next.insert(chat_id);
            *guard = Arc::new(next);
        }
        self.changed();
    }

    pub fn recent_stream_chat_ids(&self) -> Arc<HashSet<ChatId>> {
        self.recent_stream_chat_ids.read().clone()
    }

    pub fn is_preview_open(&self) -> bool {
        self.preview_open.load(Ordering::SeqCst)
    }

    pub fn set_preview_open(&self, open: bool) {
        self.preview_open.store(open, Ordering::SeqCst);
        self.changed();
    }
}

impl Default for ChatStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::agent_api::Role;

    #[test]
    fn test_snapshot_is_unaffected_by_later_writes() {
        let map: SnapshotMap<bool> = SnapshotMap::new();
        map.set(1, true);
        let before = map.snapshot();

        map.set(1, false);
        map.set(2, true);

        assert_eq!(before.get(&1), Some(&true));
        assert!(before.get(&2).is_none());
        assert_eq!(map.get(1), Some(false));
        assert_eq!(map.version(), 3);
    }

    #[test]
    fn test_chats_do_not_interfere() {
        let store = ChatStateStore::new();
        store.set_streaming(1, true);
        store.set_error(2, Some("boom".into()));
        store.set_messages(1, vec![Message::new(Role::User, "hi")]);

        assert!(store.is_streaming(1));
        assert!(!store.is_streaming(2));
        assert_eq!(store.error(2).as_deref(), Some("boom"));
        assert!(store.error(1).is_none());
        assert_eq!(store.messages(1).len(), 1);
        assert!(store.messages(2).is_empty());
    }

    #[test]
    fn test_stream_count_and_recent_ids() {
        let store = ChatStateStore::new();
        store.increment_stream_count(4);
        store.increment_stream_count(4);
        store.mark_recent_stream(4);
        store.mark_recent_stream(4);

        assert_eq!(store.stream_count(4), 2);
        assert_eq!(store.stream_count(5), 0);
        assert_eq!(store.recent_stream_chat_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let store = ChatStateStore::new();
        let mut rx = store.subscribe();
        assert_eq!(store.revision(), 0);

        store.set_preview_open(true);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
        assert!(store.is_preview_open());
    }
}
