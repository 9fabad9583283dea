// RinChat Core — external collaborator seams.
// The engine calls the UI through these narrow traits; the real renderer,
// theming layer, and status overlay live outside this crate.

use crate::engine::types::Message;
use log::debug;
use serde_json::Value;

/// Health of one supervised connection, as shown in the status overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHealth {
    pub name: String,
    pub connected: bool,
    pub retries: u32,
    /// Retry ceiling reached; no further automatic attempts.
    pub failed: bool,
}

/// Message rendering surface.
pub trait Renderer: Send + Sync {
    fn render_append(&self, message: &Message);
    fn render_remove(&self, id: &str);
    fn render_notice(&self, text: &str);
    fn render_clear(&self);
    fn set_typing(&self, active: bool);
}

/// Emotion-driven theming surface.
pub trait ThemeSink: Send + Sync {
    fn apply_theme(&self, emotions: &Value);
    fn clear_theme(&self);
}

/// Connection status overlay.
pub trait StatusSink: Send + Sync {
    fn show_degraded(&self, connections: &[ConnectionHealth]);
    fn hide_degraded(&self);
}

// ── Headless implementations ───────────────────────────────────────────
// Log and discard. Useful for tools, tests, and embedding without a UI.

pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render_append(&self, message: &Message) {
        debug!("[ui] append {} from {}", message.id, message.sender_id);
    }
    fn render_remove(&self, id: &str) {
        debug!("[ui] remove {}", id);
    }
    fn render_notice(&self, text: &str) {
        debug!("[ui] notice: {}", text);
    }
    fn render_clear(&self) {
        debug!("[ui] clear");
    }
    fn set_typing(&self, active: bool) {
        debug!("[ui] typing={}", active);
    }
}

pub struct NullTheme;

impl ThemeSink for NullTheme {
    fn apply_theme(&self, _emotions: &Value) {}
    fn clear_theme(&self) {}
}

pub struct NullStatus;

impl StatusSink for NullStatus {
    fn show_degraded(&self, connections: &[ConnectionHealth]) {
        debug!("[ui] degraded: {} connection(s) down", connections.iter().filter(|c| !c.connected).count());
    }
    fn hide_degraded(&self) {
        debug!("[ui] degraded cleared");
    }
}
