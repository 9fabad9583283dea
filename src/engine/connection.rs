// RinChat Core — WebSocket connection wrapper.
// One Connection is one logical duplex channel. It owns only the transport
// handle and its event delivery; retry and backoff state belong to the
// reconnection supervisor.
//
// Everything a connection observes (open, close, inbound event) is
// published into the client's single event channel; error and close are
// coalesced to exactly one close notification per attempt.

use crate::engine::protocol::{parse_server_event, ClientEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Open,
}

/// What a connection publishes into the client event loop.
#[derive(Debug)]
pub enum TransportEvent {
    Opened { connection: String },
    Closed { connection: String },
    Inbound { connection: String, event: ServerEvent },
    /// Client-initiated loop shutdown; never produced by a transport.
    Shutdown,
}

/// Where outbound events go. The dispatcher and reconciler talk to this
/// seam so tests can record instead of hitting a socket.
pub trait EventSink: Send + Sync {
    fn is_open(&self) -> bool;
    /// Returns whether the event was accepted for delivery.
    fn send(&self, event: &ClientEvent) -> bool;
}

pub struct Connection {
    name: String,
    url: String,
    /// Control connections buffer sends made while not open instead of
    /// dropping them; the queue flushes in submission order on open.
    buffered: bool,
    state: Mutex<ConnState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Connection {
    /// Session-scoped channel: sends while not open are dropped, which is
    /// safe because sync is resumable via the high-water mark.
    pub fn new(
        name: &str,
        url: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<Self> {
        Self::build(name, url, events, false)
    }

    /// Control channel: commands are not self-correcting, so sends made
    /// before open are buffered and flushed exactly once on open.
    pub fn new_control(
        name: &str,
        url: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<Self> {
        Self::build(name, url, events, true)
    }

    fn build(
        name: &str,
        url: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
        buffered: bool,
    ) -> Arc<Self> {
        Arc::new(Connection {
            name: name.to_string(),
            url: url.to_string(),
            buffered,
            state: Mutex::new(ConnState::Disconnected),
            outbound: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock()
    }

    /// Start an attempt. No-op while already Connecting or Open; the
    /// supervisor is expected not to call this redundantly anyway.
    pub fn connect(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != ConnState::Disconnected {
                debug!("[conn] {}: connect ignored, already {:?}", self.name, *state);
                return;
            }
            *state = ConnState::Connecting;
        }
        let connection = Arc::clone(self);
        tokio::spawn(async move { connection.run().await });
    }

    /// One transport attempt, from dial to close. Ends in exactly one
    /// `finish_attempt` on every path.
    async fn run(self: Arc<Self>) {
        info!("[conn] {}: connecting to {}", self.name, self.url);
        let stream = match connect_async(&self.url).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!("[conn] {}: connect failed: {}", self.name, e);
                self.finish_attempt();
                return;
            }
        };

        let (mut write, mut read) = stream.split();

        // Outbound queue keeps send() synchronous for callers. Control
        // frames queued while closed are drained into it first, under the
        // same lock send() takes, so the flush order is exactly the
        // submission order.
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        {
            let mut outbound = self.outbound.lock();
            let mut pending = self.pending.lock();
            for frame in pending.drain(..) {
                let _ = tx.send(frame);
            }
            *outbound = Some(tx);
        }
        *self.state.lock() = ConnState::Open;
        info!("[conn] {}: open", self.name);
        let _ = self.events.send(TransportEvent::Opened { connection: self.name.clone() });

        let writer_name = self.name.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(frame)).await {
                    debug!("[conn] {}: write failed: {}", writer_name, e);
                    break;
                }
            }
        });

        while let Some(next) = read.next().await {
            let msg = match next {
                Ok(m) => m,
                Err(e) => {
                    warn!("[conn] {}: read error: {}", self.name, e);
                    break;
                }
            };
            match msg {
                WsMessage::Text(text) => {
                    if let Some(event) = parse_server_event(&text) {
                        let _ = self.events.send(TransportEvent::Inbound {
                            connection: self.name.clone(),
                            event,
                        });
                    }
                }
                WsMessage::Close(_) => {
                    info!("[conn] {}: closed by server", self.name);
                    break;
                }
                _ => {}
            }
        }

        writer.abort();
        self.finish_attempt();
    }

    /// Transition to Disconnected and emit the close notification. Error
    /// and close paths both land here, once per attempt.
    fn finish_attempt(&self) {
        *self.outbound.lock() = None;
        *self.state.lock() = ConnState::Disconnected;
        let _ = self.events.send(TransportEvent::Closed { connection: self.name.clone() });
    }
}

impl EventSink for Connection {
    fn is_open(&self) -> bool {
        *self.state.lock() == ConnState::Open
    }

    fn send(&self, event: &ClientEvent) -> bool {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[conn] {}: failed to encode event: {}", self.name, e);
                return false;
            }
        };
        let frame = {
            let outbound = self.outbound.lock();
            match outbound.as_ref() {
                Some(tx) => match tx.send(frame) {
                    Ok(()) => return true,
                    Err(returned) => returned.0,
                },
                None => frame,
            }
        };
        if self.buffered {
            debug!("[conn] {}: queueing event until open", self.name);
            self.pending.lock().push(frame);
            return true;
        }
        debug!("[conn] {}: dropping send while not open", self.name);
        false
    }
}
