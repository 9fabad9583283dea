// RinChat Core — client sync engine for the Rin persona chat app.
//
// The crate keeps a locally persisted message log consistent with a
// server-authoritative stream delivered over long-lived WebSocket
// connections. It tolerates connection loss and duplicate delivery, and
// exposes idempotent merge operations plus a multi-connection reconnection
// supervisor with backoff and user-visible status.
//
// Rendering, theming, and the status overlay live outside this crate; the
// engine reaches them through the narrow traits in `engine::ui`.

pub mod atoms;
pub mod engine;

pub use atoms::error::{ClientError, ClientResult};
pub use engine::client::{ChatClient, ClientConfig};
pub use engine::dispatch::DispatchReject;
pub use engine::reconciler::{Reconciler, ReconcilerSettings, UiDelta};
pub use engine::reconnect::{BackoffPolicy, ReconnectSupervisor};
pub use engine::store::{MessageStore, StateDb};
pub use engine::types::{ChatConfig, LlmConfig, Message, MessageKind};
pub use engine::ui::{ConnectionHealth, Renderer, StatusSink, ThemeSink};
