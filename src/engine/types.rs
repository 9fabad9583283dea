// RinChat Core — shared data types.
// These are the structures that flow through the entire engine. They are
// independent of transport and storage.

use crate::atoms::constants::{DEFAULT_CHARACTER_NAME, USER_SENDER_ID};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Open string-keyed annotation mapping carried by every message.
/// Opaque to the reconciler; the theming layer reads emotion keys out of it.
pub type Metadata = Map<String, Value>;

// ── Messages ───────────────────────────────────────────────────────────

/// Content kind of a message. Only `text` and `recalled` participate in the
/// reconciliation contract; the rest are render-only extensions and pass
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Recalled,
    Image,
    Video,
    Audio,
    #[serde(other)]
    Other,
}

/// One chat message. Exactly one per `id` exists in the local store; all
/// mutation is by full replacement keyed on `id`, except the recall
/// transition which overwrites `kind` and `content` in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Owning conversation. Older servers send this as `conversation_id`.
    #[serde(alias = "conversation_id")]
    pub session_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Seconds since epoch. Not assumed unique; display ties are broken by
    /// insertion order.
    #[serde(default)]
    pub timestamp: f64,
}

impl Message {
    pub fn is_from_user(&self) -> bool {
        self.sender_id == USER_SENDER_ID
    }

    /// Emotion annotations, if the server attached any. Both key spellings
    /// have been observed on the wire.
    pub fn emotion_map(&self) -> Option<&Value> {
        self.metadata
            .get("emotion_map")
            .or_else(|| self.metadata.get("emotionMap"))
    }
}

/// Current wall-clock time as f64 epoch seconds, the wire's timestamp unit.
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ── Saved configuration ────────────────────────────────────────────────

/// LLM connection settings forwarded to the server on `init_character`.
/// The engine never interprets these; it only carries them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub user_nickname: Option<String>,
}

impl LlmConfig {
    /// A config that has never been filled in is not worth sending.
    pub fn is_configured(&self) -> bool {
        !self.model.is_empty() || !self.api_key.is_empty()
    }
}

/// The saved configuration record, persisted under its own key separate
/// from the message logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub persona: String,
    #[serde(default = "default_character_name")]
    pub character_name: String,
    #[serde(default = "default_true")]
    pub enable_emotion_theme: bool,
}

fn default_character_name() -> String {
    DEFAULT_CHARACTER_NAME.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            llm: LlmConfig::default(),
            persona: String::new(),
            character_name: default_character_name(),
            enable_emotion_theme: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message_json() -> &'static str {
        r#"{"id":"m1","session_id":"s1","sender_id":"rin","type":"text","content":"hi","metadata":{},"timestamp":10.5}"#
    }

    #[test]
    fn message_roundtrip() {
        let msg: Message = serde_json::from_str(text_message_json()).unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(!msg.is_from_user());

        let back = serde_json::to_string(&msg).unwrap();
        let again: Message = serde_json::from_str(&back).unwrap();
        assert_eq!(msg, again);
    }

    #[test]
    fn conversation_id_alias_accepted() {
        let raw = r#"{"id":"m2","conversation_id":"s1","sender_id":"user","type":"text","content":"x","timestamp":1}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.session_id, "s1");
        assert!(msg.is_from_user());
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn unknown_kind_is_tolerated() {
        let raw = r#"{"id":"m3","session_id":"s1","sender_id":"rin","type":"sticker","content":"","timestamp":2}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind, MessageKind::Other);
    }

    #[test]
    fn emotion_map_reads_both_spellings() {
        let mut msg: Message = serde_json::from_str(text_message_json()).unwrap();
        assert!(msg.emotion_map().is_none());

        msg.metadata.insert("emotion_map".into(), serde_json::json!({"joy": 0.8}));
        assert!(msg.emotion_map().is_some());

        msg.metadata.clear();
        msg.metadata.insert("emotionMap".into(), serde_json::json!({"joy": 0.2}));
        assert!(msg.emotion_map().is_some());
    }

    #[test]
    fn chat_config_defaults() {
        let cfg: ChatConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.character_name, "Rin");
        assert!(cfg.enable_emotion_theme);
        assert!(!cfg.llm.is_configured());
    }
}
