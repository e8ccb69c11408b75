// ── Cannoh Atoms: Traits ───────────────────────────────────────────────────
// The seam between the bot and whatever hosts the WhatsApp protocol.
// Production uses the Evolution API client; tests use an in-memory recorder.

use async_trait::async_trait;

use super::error::BotResult;
use super::types::{MessageKey, PresenceKind};

/// Outbound operations the bot needs from the WhatsApp gateway.
#[async_trait]
pub trait WaClient: Send + Sync {
    /// Send a text message to a user or group JID.
    async fn send_text(&self, to_jid: &str, text: &str) -> BotResult<()>;

    /// React to a message with a single emoji.
    async fn send_reaction(&self, key: &MessageKey, emoji: &str) -> BotResult<()>;

    /// Mark messages (including status updates) as read.
    async fn mark_read(&self, keys: &[MessageKey]) -> BotResult<()>;

    /// Show a chat-level presence such as "composing" or "recording".
    async fn send_presence(&self, to_jid: &str, presence: PresenceKind) -> BotResult<()>;

    /// Global online / offline presence.
    async fn set_online(&self, online: bool) -> BotResult<()>;

    /// Update the "about" text of the bot account.
    async fn update_profile_status(&self, status: &str) -> BotResult<()>;

    /// Switch gateway-side call rejection on or off. Rejected callers get `message`.
    async fn set_call_rejection(&self, enabled: bool, message: &str) -> BotResult<()>;
}
