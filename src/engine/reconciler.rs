// RinChat Core — sync reconciler.
// Merges server-authoritative events into the local store. Every rule is
// idempotent: replaying an event with the same input never double-applies.
// Each inbound event is all-or-nothing; no partial store mutation escapes.

use crate::engine::protocol::{ClientEvent, ServerEvent, TypingData};
use crate::engine::store::MessageStore;
use crate::engine::types::{Message, MessageKind};
use log::{debug, info};
use serde_json::Value;

/// One UI-visible consequence of applying an inbound event. The client
/// maps these onto the renderer / theme / status collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum UiDelta {
    Append(Message),
    Remove { id: String },
    Notice(String),
    ApplyTheme(Value),
    ClearTheme,
    ClearAll,
    Typing { active: bool },
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Sender id the persona uses on the wire.
    pub agent_id: String,
    /// Display name used in recall notices.
    pub character_name: String,
    /// Whether agent messages drive the emotion theme.
    pub emotion_theme: bool,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        ReconcilerSettings {
            agent_id: crate::atoms::constants::DEFAULT_AGENT_ID.to_string(),
            character_name: crate::atoms::constants::DEFAULT_CHARACTER_NAME.to_string(),
            emotion_theme: true,
        }
    }
}

pub struct Reconciler {
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(settings: ReconcilerSettings) -> Self {
        Reconciler { settings }
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    pub fn update_settings(&mut self, settings: ReconcilerSettings) {
        self.settings = settings;
    }

    /// Apply one inbound event against the store, returning the UI deltas
    /// it produced.
    pub fn apply(&self, store: &mut MessageStore, event: ServerEvent) -> Vec<UiDelta> {
        match event {
            ServerEvent::History { data } => self.apply_history(store, data.messages),
            ServerEvent::Message { data } => self.apply_message(store, data),
            ServerEvent::Typing { data } => self.apply_typing(data),
            ServerEvent::Recall { data } => self.apply_recall(store, &data.message_id),
            ServerEvent::Clear { .. } => {
                info!("[sync] server clear for {}", store.session_id());
                store.clear();
                vec![UiDelta::ClearAll]
            }
            ServerEvent::DebugLog { data } => {
                debug!("[sync] debug_log: {}", data);
                vec![]
            }
        }
    }

    /// Bulk catch-up. Only unseen ids are merged; already-seen ids stay
    /// untouched even if the incoming copy differs, because the server
    /// never mutates historical content outside the dedicated recall event.
    fn apply_history(&self, store: &mut MessageStore, messages: Vec<Message>) -> Vec<UiDelta> {
        let mut deltas = Vec::new();
        let mut merged = 0usize;
        for message in messages {
            if store.contains(&message.id) {
                continue;
            }
            let arrived_recalled = message.kind == MessageKind::Recalled;
            store.upsert(message.clone());
            merged += 1;
            if arrived_recalled {
                // Replayed in recalled form; never resurrect content.
                deltas.push(UiDelta::Notice(self.recall_notice()));
            } else {
                deltas.push(UiDelta::Append(message));
            }
        }
        if merged > 0 {
            info!(
                "[sync] history merged {} new message(s), high-water mark {}",
                merged,
                store.high_water_mark()
            );
        }
        deltas
    }

    /// Push delivery. The transport is at-least-once; per-id dedup makes
    /// delivery exactly-once at the store layer.
    fn apply_message(&self, store: &mut MessageStore, message: Message) -> Vec<UiDelta> {
        if store.contains(&message.id) {
            debug!("[sync] duplicate delivery of {} ignored", message.id);
            return vec![];
        }

        let mut deltas = vec![UiDelta::Append(message.clone())];
        if message.sender_id == self.settings.agent_id && self.settings.emotion_theme {
            match message.emotion_map() {
                Some(emotions) => deltas.push(UiDelta::ApplyTheme(emotions.clone())),
                None => deltas.push(UiDelta::ClearTheme),
            }
        }
        store.upsert(message);
        deltas
    }

    fn apply_typing(&self, data: TypingData) -> Vec<UiDelta> {
        if data.user_id != self.settings.agent_id {
            return vec![];
        }
        vec![UiDelta::Typing { active: data.is_typing }]
    }

    fn apply_recall(&self, store: &mut MessageStore, id: &str) -> Vec<UiDelta> {
        if store.mark_recalled(id) {
            vec![
                UiDelta::Remove { id: id.to_string() },
                UiDelta::Notice(self.recall_notice()),
            ]
        } else {
            // Not synced locally yet. The server guarantees that a later
            // history replay of this id already reflects the recalled
            // state, so there is nothing to record here.
            debug!("[sync] recall for unknown id {}", id);
            vec![]
        }
    }

    /// System notice naming the current persona.
    pub fn recall_notice(&self) -> String {
        format!("\"{}\" recalled a message", self.settings.character_name)
    }

    /// Catch-up request carrying the store's resume point. Issued on every
    /// connection open, including reconnects.
    pub fn sync_request(&self, store: &MessageStore) -> ClientEvent {
        ClientEvent::Sync { after_timestamp: store.high_water_mark() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::protocol::{HistoryData, RecallData};
    use crate::engine::store::StateDb;
    use crate::engine::types::Metadata;
    use std::sync::Arc;

    fn fresh_store() -> MessageStore {
        MessageStore::load(Arc::new(StateDb::open_in_memory().unwrap()), "s1")
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(ReconcilerSettings::default())
    }

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

    fn history(messages: Vec<Message>) -> ServerEvent {
        ServerEvent::History { data: HistoryData { messages } }
    }

    #[test]
    fn history_merges_only_unseen_ids() {
        let mut store = fresh_store();
        let r = reconciler();
        store.upsert(message("m1", 10.0));

        let deltas = r.apply(&mut store, history(vec![message("m1", 10.0), message("m2", 20.0)]));

        assert_eq!(store.len(), 2);
        assert_eq!(store.high_water_mark(), 20.0);
        assert_eq!(deltas.len(), 1);
        assert!(matches!(&deltas[0], UiDelta::Append(m) if m.id == "m2"));
    }

    #[test]
    fn history_superset_replay_is_a_noop_for_seen_ids() {
        let mut store = fresh_store();
        let r = reconciler();
        r.apply(&mut store, history(vec![message("m1", 10.0), message("m2", 20.0)]));

        // Replay a superset; the seen copies differ but stay untouched.
        let mut altered = message("m1", 10.0);
        altered.content = "tampered".to_string();
        let deltas = r.apply(&mut store, history(vec![altered, message("m2", 20.0), message("m3", 30.0)]));

        assert_eq!(deltas.len(), 1);
        assert_eq!(store.get("m1").unwrap().content, "body of m1");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn duplicate_single_message_is_exactly_once() {
        let mut store = fresh_store();
        let r = reconciler();
        let event = || ServerEvent::Message { data: message("m3", 30.0) };

        let first = r.apply(&mut store, event());
        let second = r.apply(&mut store, event());

        assert_eq!(store.len(), 1);
        let renders = first.iter().chain(second.iter())
            .filter(|d| matches!(d, UiDelta::Append(_)))
            .count();
        assert_eq!(renders, 1);
    }

    #[test]
    fn agent_message_with_emotions_applies_theme() {
        let mut store = fresh_store();
        let r = reconciler();
        let mut msg = message("m1", 5.0);
        msg.metadata.insert("emotion_map".into(), serde_json::json!({"joy": 0.9}));

        let deltas = r.apply(&mut store, ServerEvent::Message { data: msg });
        assert!(deltas.iter().any(|d| matches!(d, UiDelta::ApplyTheme(_))));
    }

    #[test]
    fn agent_message_without_emotions_clears_theme() {
        let mut store = fresh_store();
        let r = reconciler();
        let deltas = r.apply(&mut store, ServerEvent::Message { data: message("m1", 5.0) });
        assert!(deltas.iter().any(|d| matches!(d, UiDelta::ClearTheme)));
    }

    #[test]
    fn user_echo_never_touches_theme() {
        let mut store = fresh_store();
        let r = reconciler();
        let mut msg = message("m1", 5.0);
        msg.sender_id = "user".to_string();

        let deltas = r.apply(&mut store, ServerEvent::Message { data: msg });
        assert_eq!(deltas.len(), 1);
        assert!(matches!(&deltas[0], UiDelta::Append(_)));
    }

    #[test]
    fn theme_disabled_suppresses_theme_deltas() {
        let mut store = fresh_store();
        let mut settings = ReconcilerSettings::default();
        settings.emotion_theme = false;
        let r = Reconciler::new(settings);

        let mut msg = message("m1", 5.0);
        msg.metadata.insert("emotion_map".into(), serde_json::json!({"joy": 0.9}));
        let deltas = r.apply(&mut store, ServerEvent::Message { data: msg });
        assert_eq!(deltas.len(), 1);
    }

    #[test]
    fn recall_of_rendered_message_removes_and_notices() {
        let mut store = fresh_store();
        let r = reconciler();
        r.apply(&mut store, ServerEvent::Message { data: message("m1", 5.0) });

        let deltas = r.apply(
            &mut store,
            ServerEvent::Recall { data: RecallData { message_id: "m1".into() } },
        );

        assert_eq!(store.get("m1").unwrap().kind, MessageKind::Recalled);
        assert!(matches!(&deltas[0], UiDelta::Remove { id } if id == "m1"));
        assert!(matches!(&deltas[1], UiDelta::Notice(text) if text.contains("Rin")));
    }

    #[test]
    fn unknown_recall_then_recalled_replay_resurrects_nothing() {
        let mut store = fresh_store();
        let r = reconciler();

        let deltas = r.apply(
            &mut store,
            ServerEvent::Recall { data: RecallData { message_id: "m7".into() } },
        );
        assert!(deltas.is_empty());

        let mut replayed = message("m7", 7.0);
        replayed.kind = MessageKind::Recalled;
        replayed.content = String::new();
        let deltas = r.apply(&mut store, history(vec![replayed]));

        assert!(store.get("m7").unwrap().content.is_empty());
        assert_eq!(store.get("m7").unwrap().kind, MessageKind::Recalled);
        assert!(deltas.iter().all(|d| !matches!(d, UiDelta::Append(_))));
        assert!(matches!(&deltas[0], UiDelta::Notice(_)));
    }

    #[test]
    fn clear_empties_store_and_resets_mark() {
        let mut store = fresh_store();
        let r = reconciler();
        for i in 0..5 {
            store.upsert(message(&format!("m{}", i), i as f64 + 1.0));
        }

        let deltas = r.apply(&mut store, ServerEvent::Clear { data: serde_json::json!({}) });
        assert!(store.is_empty());
        assert_eq!(store.high_water_mark(), 0.0);
        assert_eq!(deltas, vec![UiDelta::ClearAll]);
    }

    #[test]
    fn typing_is_render_only_and_agent_scoped() {
        let mut store = fresh_store();
        let r = reconciler();

        let deltas = r.apply(
            &mut store,
            ServerEvent::Typing { data: TypingData { user_id: "rin".into(), is_typing: true } },
        );
        assert_eq!(deltas, vec![UiDelta::Typing { active: true }]);
        assert!(store.is_empty());

        let deltas = r.apply(
            &mut store,
            ServerEvent::Typing { data: TypingData { user_id: "someone".into(), is_typing: true } },
        );
        assert!(deltas.is_empty());
    }

    #[test]
    fn sync_request_carries_high_water_mark() {
        let mut store = fresh_store();
        let r = reconciler();
        store.upsert(message("m1", 42.5));

        assert_eq!(r.sync_request(&store), ClientEvent::Sync { after_timestamp: 42.5 });
    }
}
