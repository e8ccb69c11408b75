// ── Cannoh Atoms: Constants ────────────────────────────────────────────────
// Named constants for the crate. Timing values are in the unit their name says.

// ── Storage ───────────────────────────────────────────────────────────────
pub const SETTINGS_FILE: &str = "bot_settings.json";
pub const TYPING_LOG_FILE: &str = "typing_logs.jsonl";

// ── Prefixes ──────────────────────────────────────────────────────────────
/// Longest accepted command prefix, counted in characters.
pub const MAX_PREFIX_CHARS: usize = 3;

// ── WhatsApp addressing ───────────────────────────────────────────────────
pub const USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SUFFIX: &str = "@g.us";
pub const STATUS_BROADCAST: &str = "status@broadcast";
pub const BROADCAST_SUFFIX: &str = "@broadcast";

// ── Gateway ───────────────────────────────────────────────────────────────
/// WhatsApp has no hard limit, but very long texts are split before sending.
pub const MAX_TEXT_CHUNK: usize = 4000;
pub const CONNECTION_POLL_SECS: u64 = 5;
/// Fixed delay before retrying a failed start or a closed connection.
pub const RECONNECT_DELAY_SECS: u64 = 5;

// ── Feature timers ────────────────────────────────────────────────────────
pub const KEEP_ONLINE_INTERVAL_SECS: u64 = 60;
pub const AUTO_BIO_INTERVAL_SECS: u64 = 300;

// ── Typing detection ──────────────────────────────────────────────────────
/// An open typing session with no closing presence is dropped after this long.
pub const TYPING_SESSION_TIMEOUT_SECS: u64 = 60;

// ── Anti-delete ───────────────────────────────────────────────────────────
pub const MESSAGE_CACHE_CAPACITY: usize = 1000;

// ── AI chat ───────────────────────────────────────────────────────────────
/// Messages kept per user (user + assistant turns), system prompt excluded.
pub const AI_HISTORY_LIMIT: usize = 10;

// ── Anti-ban ──────────────────────────────────────────────────────────────
/// Above this share of the per-minute budget, ban-safe mode drops optional sends.
pub const BAN_SAFE_LOAD_THRESHOLD: f64 = 0.8;

pub const STATUS_LIKE_EMOJI: &str = "💚";
