// ── RinChat Atoms: Constants ───────────────────────────────────────────────
// Well-known identifiers shared across the engine.

/// Sender id the local user writes under.
pub const USER_SENDER_ID: &str = "user";

/// Sender id the persona uses on the wire.
pub const DEFAULT_AGENT_ID: &str = "rin";

/// Display name used in notices when no configuration is saved.
pub const DEFAULT_CHARACTER_NAME: &str = "Rin";

/// Supervisor name of the per-session chat channel.
pub const SESSION_CONN: &str = "session";

/// Supervisor name of the shared control channel.
pub const CONTROL_CONN: &str = "control";

/// State-database key of the saved configuration record.
pub const CONFIG_KEY: &str = "chat_config";

/// State-database key of the persisted conversation id.
pub const CONVERSATION_ID_KEY: &str = "conversation_id";

/// Directory under the user's home that holds the state database.
pub const STATE_DIR: &str = ".rinchat";

/// State database file name.
pub const STATE_DB_FILE: &str = "client.db";
