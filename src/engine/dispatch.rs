// RinChat Core — outbound dispatcher.
// User actions become protocol events here. Sending text inserts an
// optimistic local entry before the wire send; the server echo is
// deduplicated by id on the way back in.

use crate::atoms::constants::USER_SENDER_ID;
use crate::engine::connection::EventSink;
use crate::engine::protocol::ClientEvent;
use crate::engine::store::MessageStore;
use crate::engine::types::{now_timestamp, LlmConfig, Message, MessageKind, Metadata};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};

/// Why a user action was rejected at the dispatch boundary. These never
/// reach the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchReject {
    /// Content was empty after trimming.
    Empty,
    /// A send is already in flight for this composer.
    InFlight,
    /// The session connection is not open.
    NotOpen,
}

pub struct OutboundDispatcher {
    session_id: String,
    in_flight: AtomicBool,
}

impl OutboundDispatcher {
    pub fn new(session_id: &str) -> Self {
        OutboundDispatcher {
            session_id: session_id.to_string(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Validate, insert the optimistic entry, then send. Returns the
    /// optimistic message for immediate rendering. There is no rollback
    /// path: the entry is terminal even if the server never acknowledges.
    pub fn send_text(
        &self,
        sink: &dyn EventSink,
        store: &mut MessageStore,
        content: &str,
    ) -> Result<Message, DispatchReject> {
        let text = content.trim();
        if text.is_empty() {
            return Err(DispatchReject::Empty);
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(DispatchReject::InFlight);
        }
        if !sink.is_open() {
            self.in_flight.store(false, Ordering::SeqCst);
            return Err(DispatchReject::NotOpen);
        }

        let id = format!("msg-{}", uuid::Uuid::new_v4());
        let message = Message {
            id: id.clone(),
            session_id: self.session_id.clone(),
            sender_id: USER_SENDER_ID.to_string(),
            kind: MessageKind::Text,
            content: text.to_string(),
            metadata: Metadata::new(),
            timestamp: now_timestamp(),
        };
        store.upsert(message.clone());

        let accepted = sink.send(&ClientEvent::SendMessage {
            id: id.clone(),
            content: text.to_string(),
            metadata: Metadata::new(),
        });
        if !accepted {
            // The connection dropped between the open check and the send.
            // The optimistic entry stays; the next sync resolves it.
            debug!("[dispatch] {} dropped by transport", id);
        }
        self.in_flight.store(false, Ordering::SeqCst);
        info!("[dispatch] sent {} ({} chars)", id, text.len());
        Ok(message)
    }

    /// Request a server-side clear. Nothing is applied locally; the
    /// matching inbound clear event does that, so a clear requested right
    /// before a connection drop cannot half-apply.
    pub fn clear_conversation(&self, sink: &dyn EventSink) -> bool {
        if !sink.is_open() {
            return false;
        }
        info!("[dispatch] requesting session clear");
        sink.send(&ClientEvent::ClearSession)
    }

    pub fn mark_read(&self, sink: &dyn EventSink, until_timestamp: f64) -> bool {
        sink.send(&ClientEvent::MarkRead { until_timestamp })
    }

    /// Forward the persona configuration. Sent on demand and re-sent on
    /// every reconnect.
    pub fn init_character(&self, sink: &dyn EventSink, llm_config: &LlmConfig) -> bool {
        sink.send(&ClientEvent::InitCharacter { llm_config: llm_config.clone() })
    }
}
