// RinChat Core — WebSocket protocol.
// One tagged union per direction, with exhaustive handling at the dispatch
// boundary. Unknown or malformed inbound frames are dropped so an isolated
// bad frame never takes the transport down.

use crate::engine::types::{LlmConfig, Message, Metadata};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Outbound (client → server) ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Catch-up request. The server replies with a history batch holding
    /// only messages with a strictly greater timestamp.
    #[serde(rename = "sync")]
    Sync { after_timestamp: f64 },

    /// A user message, with its client-generated id.
    #[serde(rename = "send_message")]
    SendMessage {
        id: String,
        content: String,
        metadata: Metadata,
    },

    /// Ask the server to clear the session. The local clear happens only
    /// when the matching inbound clear event arrives.
    #[serde(rename = "clear_session")]
    ClearSession,

    #[serde(rename = "mark_read")]
    MarkRead { until_timestamp: f64 },

    /// (Re)introduce the persona configuration; sent on every open.
    #[serde(rename = "init_character")]
    InitCharacter { llm_config: LlmConfig },

    /// Control channel only.
    #[serde(rename = "set_debug")]
    SetDebug { enabled: bool },
}

// ── Inbound (server → client) ──────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "history")]
    History { data: HistoryData },

    #[serde(rename = "message")]
    Message { data: Message },

    #[serde(rename = "typing")]
    Typing { data: TypingData },

    #[serde(rename = "recall")]
    Recall { data: RecallData },

    #[serde(rename = "clear")]
    Clear {
        #[serde(default)]
        data: Value,
    },

    /// Control channel only; diagnostics stream.
    #[serde(rename = "debug_log")]
    DebugLog {
        #[serde(default)]
        data: Value,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryData {
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypingData {
    pub user_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecallData {
    pub message_id: String,
}

/// Parse one inbound frame. Unknown event types and malformed payloads
/// yield `None`; the transport stays alive.
pub fn parse_server_event(raw: &str) -> Option<ServerEvent> {
    match serde_json::from_str(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("[conn] Dropping unparseable frame: {}", e);
            None
        }
    }
}
