// RinChat Core — client context.
// Explicitly constructed wiring for one chat session: two supervised
// connections (session + control), the message store, the reconciler, and
// the dispatcher, driven by a single event loop task. There is no global
// state; lifecycle is tied to this object.

use crate::atoms::constants::{CONTROL_CONN, DEFAULT_AGENT_ID, SESSION_CONN};
use crate::atoms::error::ClientResult;
use crate::engine::api::HttpApi;
use crate::engine::connection::{Connection, EventSink, TransportEvent};
use crate::engine::dispatch::{DispatchReject, OutboundDispatcher};
use crate::engine::protocol::{ClientEvent, HistoryData, ServerEvent};
use crate::engine::reconciler::{Reconciler, ReconcilerSettings, UiDelta};
use crate::engine::reconnect::{BackoffPolicy, ReconnectSupervisor};
use crate::engine::store::{self, MessageStore, StateDb};
use crate::engine::types::{ChatConfig, Message, MessageKind};
use crate::engine::ui::{Renderer, StatusSink, ThemeSink};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct ClientConfig {
    /// http(s) origin of the chat server, e.g. "http://127.0.0.1:8000".
    pub base_url: String,
    /// Fixed session id; when absent, the persisted one is reused or a new
    /// one is generated and stored.
    pub session_id: Option<String>,
    pub backoff: BackoffPolicy,
    /// Sender id the persona uses on the wire.
    pub agent_id: String,
    /// Override the state database location.
    pub db_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: "http://127.0.0.1:8000".to_string(),
            session_id: None,
            backoff: BackoffPolicy::default(),
            agent_id: DEFAULT_AGENT_ID.to_string(),
            db_path: None,
        }
    }
}

pub struct ChatClient {
    session_id: String,
    db: Arc<StateDb>,
    store: Mutex<MessageStore>,
    reconciler: Mutex<Reconciler>,
    dispatcher: OutboundDispatcher,
    supervisor: Arc<ReconnectSupervisor>,
    session_conn: Arc<Connection>,
    control_conn: Arc<Connection>,
    renderer: Arc<dyn Renderer>,
    theme: Arc<dyn ThemeSink>,
    api: HttpApi,
    chat_config: Mutex<ChatConfig>,
    desired_debug: AtomicBool,
    agent_id: String,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl ChatClient {
    pub fn new(
        config: ClientConfig,
        renderer: Arc<dyn Renderer>,
        theme: Arc<dyn ThemeSink>,
        status: Arc<dyn StatusSink>,
    ) -> ClientResult<Arc<Self>> {
        let db = Arc::new(match &config.db_path {
            Some(path) => StateDb::open_at(path)?,
            None => StateDb::open()?,
        });
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| store::load_or_create_session_id(&db));
        let chat_config = store::load_chat_config(&db);
        let message_store = MessageStore::load(Arc::clone(&db), &session_id);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session_conn = Connection::new(
            SESSION_CONN,
            &session_ws_url(&config.base_url, &session_id),
            events_tx.clone(),
        );
        let control_conn = Connection::new_control(
            CONTROL_CONN,
            &control_ws_url(&config.base_url),
            events_tx.clone(),
        );
        let supervisor = ReconnectSupervisor::new(config.backoff, status);
        let reconciler = Reconciler::new(settings_for(&config.agent_id, &chat_config));

        info!("[client] session {} against {}", session_id, config.base_url);
        Ok(Arc::new(ChatClient {
            dispatcher: OutboundDispatcher::new(&session_id),
            session_id,
            db,
            store: Mutex::new(message_store),
            reconciler: Mutex::new(reconciler),
            supervisor,
            session_conn,
            control_conn,
            renderer,
            theme,
            api: HttpApi::new(&config.base_url),
            chat_config: Mutex::new(chat_config),
            desired_debug: AtomicBool::new(false),
            agent_id: config.agent_id,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }))
    }

    /// Connect both channels and process transport events until shutdown.
    pub async fn run(self: Arc<Self>) {
        {
            let conn = Arc::clone(&self.session_conn);
            self.supervisor.register(SESSION_CONN, move || conn.connect());
            let conn = Arc::clone(&self.control_conn);
            self.supervisor.register(CONTROL_CONN, move || conn.connect());
        }
        self.session_conn.connect();
        self.control_conn.connect();

        let Some(mut events) = self.events_rx.lock().take() else {
            warn!("[client] run() called twice; ignoring");
            return;
        };

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Opened { connection } => self.on_opened(&connection),
                TransportEvent::Closed { connection } => {
                    self.supervisor.mark_disconnected(&connection)
                }
                TransportEvent::Inbound { connection, event } => {
                    self.on_inbound(&connection, event)
                }
                TransportEvent::Shutdown => break,
            }
        }
        info!("[client] event loop stopped");
    }

    /// Persist and stop the event loop. Connections are dropped with the
    /// client; there is no per-connection teardown beyond this.
    pub fn shutdown(&self) {
        self.flush();
        let _ = self.events_tx.send(TransportEvent::Shutdown);
    }

    fn on_opened(&self, connection: &str) {
        self.supervisor.mark_connected(connection);
        if connection == SESSION_CONN {
            // Resume: catch up from the high-water mark, then re-introduce
            // the persona configuration.
            let request = {
                let store = self.store.lock();
                self.reconciler.lock().sync_request(&store)
            };
            self.session_conn.send(&request);

            let llm = self.chat_config.lock().llm.clone();
            if llm.is_configured() {
                self.dispatcher.init_character(self.session_conn.as_ref(), &llm);
            }
        } else if connection == CONTROL_CONN && self.desired_debug.load(Ordering::Relaxed) {
            // Debug state must survive control-channel reconnects.
            self.control_conn.send(&ClientEvent::SetDebug { enabled: true });
        }
    }

    fn on_inbound(&self, connection: &str, event: ServerEvent) {
        if connection != SESSION_CONN {
            if let ServerEvent::DebugLog { data } = event {
                debug!("[client] debug_log: {}", data);
            }
            return;
        }
        let deltas = {
            let mut store = self.store.lock();
            self.reconciler.lock().apply(&mut store, event)
        };
        self.render(deltas);
    }

    fn render(&self, deltas: Vec<UiDelta>) {
        for delta in deltas {
            match delta {
                UiDelta::Append(message) => self.renderer.render_append(&message),
                UiDelta::Remove { id } => self.renderer.render_remove(&id),
                UiDelta::Notice(text) => self.renderer.render_notice(&text),
                UiDelta::ApplyTheme(emotions) => self.theme.apply_theme(&emotions),
                UiDelta::ClearTheme => self.theme.clear_theme(),
                UiDelta::ClearAll => {
                    self.renderer.render_clear();
                    self.theme.clear_theme();
                }
                UiDelta::Typing { active } => self.renderer.set_typing(active),
            }
        }
    }

    // ── User actions ───────────────────────────────────────────────────

    pub fn send_text(&self, content: &str) -> Result<Message, DispatchReject> {
        let message = {
            let mut store = self.store.lock();
            self.dispatcher
                .send_text(self.session_conn.as_ref(), &mut store, content)?
        };
        self.renderer.render_append(&message);
        Ok(message)
    }

    pub fn clear_conversation(&self) -> bool {
        self.dispatcher.clear_conversation(self.session_conn.as_ref())
    }

    pub fn mark_read(&self, until_timestamp: f64) -> bool {
        self.dispatcher.mark_read(self.session_conn.as_ref(), until_timestamp)
    }

    /// Toggle server-side debug streaming over the control channel. The
    /// control connection buffers this when not yet open.
    pub fn set_debug(&self, enabled: bool) {
        self.desired_debug.store(enabled, Ordering::Relaxed);
        self.control_conn.send(&ClientEvent::SetDebug { enabled });
    }

    /// Persist a new configuration record and apply it to the running
    /// reconciler; forwards the LLM settings when the session is open.
    pub fn save_config(&self, config: ChatConfig) -> ClientResult<()> {
        store::save_chat_config(&self.db, &config)?;
        self.reconciler
            .lock()
            .update_settings(settings_for(&self.agent_id, &config));
        if config.llm.is_configured() && self.session_conn.is_open() {
            self.dispatcher.init_character(self.session_conn.as_ref(), &config.llm);
        }
        *self.chat_config.lock() = config;
        Ok(())
    }

    pub fn config(&self) -> ChatConfig {
        self.chat_config.lock().clone()
    }

    /// Replay the persisted log into the renderer, oldest first.
    pub fn render_local(&self) {
        self.renderer.render_clear();
        let store = self.store.lock();
        let reconciler = self.reconciler.lock();
        for message in store.snapshot_ordered() {
            match message.kind {
                MessageKind::Recalled => self.renderer.render_notice(&reconciler.recall_notice()),
                _ => self.renderer.render_append(message),
            }
        }
    }

    /// Opportunistic persistence (the visibility-loss analog).
    pub fn flush(&self) {
        self.store.lock().flush();
    }

    /// Incremental catch-up over HTTP, merged exactly like a socket
    /// history batch. Returns how many messages the server returned.
    pub async fn resync_http(&self) -> ClientResult<usize> {
        let after = self.store.lock().high_water_mark();
        let messages = self.api.fetch_messages(&self.session_id, after).await?;
        let count = messages.len();
        let deltas = {
            let mut store = self.store.lock();
            self.reconciler
                .lock()
                .apply(&mut store, ServerEvent::History { data: HistoryData { messages } })
        };
        self.render(deltas);
        Ok(count)
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_degraded(&self) -> bool {
        self.supervisor.is_degraded()
    }

    pub fn supervisor(&self) -> &Arc<ReconnectSupervisor> {
        &self.supervisor
    }
}

fn settings_for(agent_id: &str, config: &ChatConfig) -> ReconcilerSettings {
    ReconcilerSettings {
        agent_id: agent_id.to_string(),
        character_name: config.character_name.clone(),
        emotion_theme: config.enable_emotion_theme,
    }
}

// ── URL helpers ────────────────────────────────────────────────────────

fn ws_base(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    }
}

fn session_ws_url(base: &str, session_id: &str) -> String {
    format!("{}/api/ws/{}?user_id=user", ws_base(base), session_id)
}

fn control_ws_url(base: &str) -> String {
    format!("{}/api/ws-global", ws_base(base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ui::{NullRenderer, NullStatus, NullTheme};

    #[test]
    fn ws_urls_follow_the_origin_scheme() {
        assert_eq!(
            session_ws_url("http://localhost:8000", "s1"),
            "ws://localhost:8000/api/ws/s1?user_id=user"
        );
        assert_eq!(
            session_ws_url("https://chat.example/", "s1"),
            "wss://chat.example/api/ws/s1?user_id=user"
        );
        assert_eq!(control_ws_url("https://chat.example"), "wss://chat.example/api/ws-global");
    }

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("rinchat-test-{}.db", uuid::Uuid::new_v4()))
    }

    fn test_client() -> Arc<ChatClient> {
        let config = ClientConfig {
            session_id: Some("s-test".to_string()),
            db_path: Some(temp_db_path()),
            ..ClientConfig::default()
        };
        ChatClient::new(config, Arc::new(NullRenderer), Arc::new(NullTheme), Arc::new(NullStatus))
            .unwrap()
    }

    #[test]
    fn construction_uses_the_given_session() {
        let client = test_client();
        assert_eq!(client.session_id(), "s-test");
        assert!(client.config().enable_emotion_theme);
    }

    #[test]
    fn send_text_requires_an_open_connection() {
        let client = test_client();
        assert_eq!(client.send_text("hello"), Err(DispatchReject::NotOpen));
        assert!(!client.clear_conversation());
    }

    #[test]
    fn saved_config_updates_the_reconciler() {
        let client = test_client();
        let mut config = ChatConfig::default();
        config.character_name = "Mori".to_string();
        config.enable_emotion_theme = false;
        client.save_config(config).unwrap();

        let reconciler = client.reconciler.lock();
        assert_eq!(reconciler.settings().character_name, "Mori");
        assert!(!reconciler.settings().emotion_theme);
    }

    #[test]
    fn render_local_handles_recalled_entries() {
        let client = test_client();
        {
            let mut store = client.store.lock();
            store.upsert(Message {
                id: "m1".into(),
                session_id: "s-test".into(),
                sender_id: "rin".into(),
                kind: MessageKind::Text,
                content: "hi".into(),
                metadata: Default::default(),
                timestamp: 1.0,
            });
            store.mark_recalled("m1");
        }
        // Must not panic and must not render recalled content.
        client.render_local();
    }
}
