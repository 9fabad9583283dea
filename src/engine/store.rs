// RinChat Core — local message store.
// Durable per-session persistence of the message log, kept the way the
// browser client kept it: one serialized record per session plus a saved
// configuration record, in a small SQLite key-value database.

use crate::atoms::constants::{CONFIG_KEY, CONVERSATION_ID_KEY, STATE_DB_FILE, STATE_DIR};
use crate::atoms::error::ClientResult;
use crate::engine::types::{ChatConfig, Message, MessageKind};
use log::{info, warn};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ── State database ─────────────────────────────────────────────────────

fn state_db_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_default();
    let dir = home.join(STATE_DIR);
    std::fs::create_dir_all(&dir).ok();
    dir.join(STATE_DB_FILE)
}

/// Thread-safe key-value database backing all durable client state.
pub struct StateDb {
    conn: Mutex<Connection>,
}

impl StateDb {
    /// Open (or create) the state database at the default location.
    pub fn open() -> ClientResult<Self> {
        Self::open_at(&state_db_path())
    }

    pub fn open_at(path: &Path) -> ClientResult<Self> {
        info!("[store] Opening state db at {:?}", path);
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Volatile database for tests and throwaway sessions.
    pub fn open_in_memory() -> ClientResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> ClientResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS client_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;
        Ok(StateDb { conn: Mutex::new(conn) })
    }

    pub fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT value FROM client_state WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO client_state (key, value, updated_at)
             VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }
}

// ── Saved configuration record ─────────────────────────────────────────

/// Load the saved configuration, or defaults when absent or unreadable.
pub fn load_chat_config(db: &StateDb) -> ChatConfig {
    match db.get(CONFIG_KEY) {
        Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!("[store] Corrupt saved config: {}; using defaults", e);
            ChatConfig::default()
        }),
        Ok(None) => ChatConfig::default(),
        Err(e) => {
            warn!("[store] Failed to read saved config: {}; using defaults", e);
            ChatConfig::default()
        }
    }
}

pub fn save_chat_config(db: &StateDb, config: &ChatConfig) -> ClientResult<()> {
    let json = serde_json::to_string(config)?;
    db.set(CONFIG_KEY, &json)
}

/// The conversation id survives restarts; generate and persist one on
/// first use.
pub fn load_or_create_session_id(db: &StateDb) -> String {
    if let Ok(Some(existing)) = db.get(CONVERSATION_ID_KEY) {
        if !existing.is_empty() {
            return existing;
        }
    }
    let id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = db.set(CONVERSATION_ID_KEY, &id) {
        warn!("[store] Failed to persist conversation id: {}", e);
    }
    id
}

// ── Message store ──────────────────────────────────────────────────────

/// On-disk shape of one session's log. Messages are written in display
/// order so insertion sequence survives a reload.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedLog {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    high_water_mark: f64,
    #[serde(default)]
    saved_at: String,
}

struct Entry {
    message: Message,
    seq: u64,
}

/// The local message log for one session: exactly one message per id, a
/// monotone high-water mark, and synchronous persistence on every mutation.
pub struct MessageStore {
    session_id: String,
    entries: HashMap<String, Entry>,
    next_seq: u64,
    high_water_mark: f64,
    db: Arc<StateDb>,
}

impl MessageStore {
    /// Load the persisted log for a session, or start empty. Corrupt or
    /// unreadable state degrades to an empty store rather than erroring.
    pub fn load(db: Arc<StateDb>, session_id: &str) -> Self {
        let mut store = MessageStore {
            session_id: session_id.to_string(),
            entries: HashMap::new(),
            next_seq: 0,
            high_water_mark: 0.0,
            db,
        };
        let key = store.storage_key();
        match store.db.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedLog>(&raw) {
                Ok(log) => {
                    for message in log.messages {
                        store.insert(message);
                    }
                    if log.high_water_mark > store.high_water_mark {
                        store.high_water_mark = log.high_water_mark;
                    }
                    info!(
                        "[store] Loaded {} message(s) for {}, high-water mark {}",
                        store.entries.len(),
                        session_id,
                        store.high_water_mark
                    );
                }
                Err(e) => {
                    warn!("[store] Corrupt log for {}: {}; starting empty", session_id, e);
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!("[store] Failed to read log for {}: {}; starting empty", session_id, e);
            }
        }
        store
    }

    fn storage_key(&self) -> String {
        format!("messages_{}", self.session_id)
    }

    /// Shared insert path; replacement keeps the original insertion
    /// sequence so tied timestamps stay stable.
    fn insert(&mut self, message: Message) {
        if message.timestamp > self.high_water_mark {
            self.high_water_mark = message.timestamp;
        }
        match self.entries.get_mut(&message.id) {
            Some(entry) => entry.message = message,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(message.id.clone(), Entry { message, seq });
            }
        }
    }

    /// Insert or replace by id. Returns true when the id was unseen, which
    /// is what decides whether a UI delta is needed.
    pub fn upsert(&mut self, message: Message) -> bool {
        let newly_seen = !self.entries.contains_key(&message.id);
        self.insert(message);
        self.persist();
        newly_seen
    }

    /// Recall transition: `kind` and `content` are overwritten, timestamp
    /// and metadata retained. An absent id is a tolerated gap (the message
    /// may not have synced locally yet), not an error. Returns whether the
    /// message was present.
    pub fn mark_recalled(&mut self, id: &str) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.message.kind = MessageKind::Recalled;
        entry.message.content.clear();
        self.persist();
        true
    }

    /// Destructive local clear: empties the log and resets the high-water
    /// mark to 0.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_seq = 0;
        self.high_water_mark = 0.0;
        self.persist();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.entries.get(id).map(|e| &e.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Maximum timestamp ever accepted; the resume point for incremental
    /// sync. Never decreases except via `clear`.
    pub fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }

    /// Messages ordered by `(timestamp, insertion sequence)` ascending.
    /// Stable for tied timestamps; call again for a fresh pass.
    pub fn snapshot_ordered(&self) -> impl Iterator<Item = &Message> {
        let mut refs: Vec<&Entry> = self.entries.values().collect();
        refs.sort_by(|a, b| {
            a.message
                .timestamp
                .total_cmp(&b.message.timestamp)
                .then(a.seq.cmp(&b.seq))
        });
        refs.into_iter().map(|e| &e.message)
    }

    /// Opportunistic re-persist (the visibility-loss analog).
    pub fn flush(&self) {
        self.persist();
    }

    /// Serialize the whole log. Failures are logged and swallowed; the
    /// store keeps serving from memory.
    fn persist(&self) {
        let record = PersistedLog {
            messages: self.snapshot_ordered().cloned().collect(),
            high_water_mark: self.high_water_mark,
            saved_at: chrono::Utc::now().to_rfc3339(),
        };
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!("[store] Failed to serialize log for {}: {}", self.session_id, e);
                return;
            }
        };
        if let Err(e) = self.db.set(&self.storage_key(), &json) {
            warn!("[store] Failed to persist log for {}: {}", self.session_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::Metadata;

    fn message(id: &str, timestamp: f64) -> Message {
        Message {
            id: id.to_string(),
            session_id: "s1".to_string(),
            sender_id: "rin".to_string(),
            kind: MessageKind::Text,
            content: format!("body of {}", id),
            metadata: Metadata::new(),
            timestamp,
        }
    }

    fn fresh_store() -> MessageStore {
        let db = Arc::new(StateDb::open_in_memory().unwrap());
        MessageStore::load(db, "s1")
    }

    #[test]
    fn upsert_reports_newly_seen() {
        let mut store = fresh_store();
        assert!(store.upsert(message("m1", 10.0)));
        assert!(!store.upsert(message("m1", 10.0)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn high_water_mark_is_monotone() {
        let mut store = fresh_store();
        store.upsert(message("m1", 10.0));
        assert_eq!(store.high_water_mark(), 10.0);
        store.upsert(message("m2", 5.0));
        assert_eq!(store.high_water_mark(), 10.0);
        store.upsert(message("m3", 20.0));
        assert_eq!(store.high_water_mark(), 20.0);
    }

    #[test]
    fn recall_keeps_timestamp_and_metadata() {
        let mut store = fresh_store();
        let mut msg = message("m1", 10.0);
        msg.metadata.insert("emotion".into(), serde_json::json!("calm"));
        store.upsert(msg);

        assert!(store.mark_recalled("m1"));
        let recalled = store.get("m1").unwrap();
        assert_eq!(recalled.kind, MessageKind::Recalled);
        assert!(recalled.content.is_empty());
        assert_eq!(recalled.timestamp, 10.0);
        assert_eq!(recalled.metadata.get("emotion"), Some(&serde_json::json!("calm")));
        assert_eq!(store.high_water_mark(), 10.0);
    }

    #[test]
    fn recall_of_absent_id_is_a_noop() {
        let mut store = fresh_store();
        assert!(!store.mark_recalled("ghost"));
        assert!(store.is_empty());
    }

    #[test]
    fn clear_resets_everything() {
        let mut store = fresh_store();
        for i in 0..5 {
            store.upsert(message(&format!("m{}", i), i as f64));
        }
        assert_eq!(store.len(), 5);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.high_water_mark(), 0.0);
    }

    #[test]
    fn ordering_breaks_ties_by_insertion() {
        let mut store = fresh_store();
        store.upsert(message("b", 10.0));
        store.upsert(message("a", 10.0));
        store.upsert(message("c", 5.0));

        let ids: Vec<&str> = store.snapshot_ordered().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        // Restartable: a second pass sees the same order.
        let again: Vec<&str> = store.snapshot_ordered().map(|m| m.id.as_str()).collect();
        assert_eq!(again, vec!["c", "b", "a"]);
    }

    #[test]
    fn replacement_keeps_insertion_order() {
        let mut store = fresh_store();
        store.upsert(message("b", 10.0));
        store.upsert(message("a", 10.0));
        store.upsert(message("b", 10.0));

        let ids: Vec<&str> = store.snapshot_ordered().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn log_survives_reload() {
        let db = Arc::new(StateDb::open_in_memory().unwrap());
        {
            let mut store = MessageStore::load(Arc::clone(&db), "s1");
            store.upsert(message("m1", 10.0));
            store.upsert(message("m2", 20.0));
            store.mark_recalled("m1");
        }
        let store = MessageStore::load(db, "s1");
        assert_eq!(store.len(), 2);
        assert_eq!(store.high_water_mark(), 20.0);
        assert_eq!(store.get("m1").unwrap().kind, MessageKind::Recalled);
    }

    #[test]
    fn corrupt_log_degrades_to_empty() {
        let db = Arc::new(StateDb::open_in_memory().unwrap());
        db.set("messages_s1", "{ this is not json").unwrap();
        let store = MessageStore::load(db, "s1");
        assert!(store.is_empty());
        assert_eq!(store.high_water_mark(), 0.0);
    }

    #[test]
    fn sessions_are_isolated() {
        let db = Arc::new(StateDb::open_in_memory().unwrap());
        let mut first = MessageStore::load(Arc::clone(&db), "s1");
        first.upsert(message("m1", 10.0));

        let other = MessageStore::load(db, "s2");
        assert!(other.is_empty());
    }

    #[test]
    fn config_record_roundtrip() {
        let db = StateDb::open_in_memory().unwrap();
        let mut cfg = ChatConfig::default();
        cfg.character_name = "Mori".to_string();
        cfg.llm.model = "gpt-4o-mini".to_string();
        save_chat_config(&db, &cfg).unwrap();

        let loaded = load_chat_config(&db);
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn session_id_is_created_once() {
        let db = StateDb::open_in_memory().unwrap();
        let first = load_or_create_session_id(&db);
        let second = load_or_create_session_id(&db);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }
}
