// Cannoh Engine: Bot orchestrator
//
// Module layout:
//   mod           Bot state, event dispatch, connection lifecycle, outbound helpers
//   messages      inbound messages: status view, auto-read, commands, chatbot, auto-react
//   commands      prefixed command parsing and execution
//   typing        presence tracking, cooldowns, analytics
//   anti_delete   recent-message cache and deleted-message reports
//   features      anti-call and the periodic tasks (keep-online, auto-bio)

pub(crate) mod anti_delete;
pub(crate) mod commands;
pub(crate) mod features;
pub(crate) mod messages;
pub(crate) mod typing;

use crate::atoms::error::BotResult;
use crate::atoms::traits::WaClient;
use crate::atoms::types::{BotEvent, ConnectionState, Feature, InboundMessage, MessageKind, PresenceKind};
use crate::engine::ai::AiClient;
use crate::engine::antiban::OutboundLimiter;
use crate::engine::config::BotConfig;
use crate::engine::settings::SettingsStore;
use anti_delete::MessageCache;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use typing::TypingTracker;

pub struct Bot {
    pub config: BotConfig,
    pub settings: SettingsStore,
    client: Arc<dyn WaClient>,
    ai: AiClient,
    limiter: OutboundLimiter,
    cache: Mutex<MessageCache>,
    typing: Mutex<TypingTracker>,
    connected: AtomicBool,
    logged_out: AtomicBool,
    qr_code: Mutex<Option<String>>,
    started_at: Instant,
    /// Bumped on every connect/disconnect; periodic tasks exit when superseded.
    generation: AtomicU64,
    stop: Arc<AtomicBool>,
    message_count: AtomicU64,
}

impl Bot {
    pub fn new(config: BotConfig, client: Arc<dyn WaClient>) -> Self {
        let settings = SettingsStore::load(&config);
        let ai = AiClient::new(config.ai.clone(), config.openai_api_key.clone(), &config.bot_name);
        let limiter = OutboundLimiter::new(config.anti_ban.clone());
        Bot {
            settings,
            client,
            ai,
            limiter,
            cache: Mutex::new(MessageCache::default()),
            typing: Mutex::new(TypingTracker::default()),
            connected: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            qr_code: Mutex::new(None),
            started_at: Instant::now(),
            generation: AtomicU64::new(0),
            stop: Arc::new(AtomicBool::new(false)),
            message_count: AtomicU64::new(0),
            config,
        }
    }

    // ── State accessors ────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::Relaxed)
    }

    pub fn qr_code(&self) -> Option<String> {
        self.qr_code.lock().clone()
    }

    pub fn set_qr_code(&self, qr: String) {
        *self.qr_code.lock() = Some(qr);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Relaxed);
        info!("[bot] Stop signal sent");
    }

    /// True while the connection that started `generation` is still the live one.
    fn is_current(&self, generation: u64) -> bool {
        !self.is_stopping() && self.is_connected() && self.generation.load(Ordering::Relaxed) == generation
    }

    // ── Event dispatch ─────────────────────────────────────────────────

    pub async fn handle_event(self: &Arc<Self>, event: BotEvent) {
        match event {
            BotEvent::Qr(qr) => {
                info!("[bot] QR code updated, scan it at /qr");
                self.set_qr_code(qr);
            }
            BotEvent::Connection { state: ConnectionState::Open, .. } => self.on_connected().await,
            BotEvent::Connection { state: ConnectionState::Close, logged_out } => {
                self.on_disconnected(logged_out)
            }
            BotEvent::Connection { state: ConnectionState::Connecting, .. } => {
                debug!("[bot] Connecting...");
            }
            BotEvent::Messages(messages) => {
                for msg in messages {
                    self.handle_message(msg).await;
                }
            }
            BotEvent::Presence(update) => {
                if self.settings.is_enabled(Feature::TypingDetection) && self.config.typing.enabled {
                    self.handle_presence(update).await;
                }
            }
            BotEvent::Deleted(keys) => {
                if self.settings.is_enabled(Feature::AntiDelete) {
                    self.handle_deleted(keys).await;
                }
            }
            BotEvent::Calls(calls) => {
                if self.settings.is_enabled(Feature::AntiCall) {
                    self.handle_calls(calls).await;
                }
            }
        }
    }

    // ── Connection lifecycle ───────────────────────────────────────────

    /// Runs once per connection: banner, then the feature tasks.
    pub async fn on_connected(self: &Arc<Self>) {
        if self.connected.swap(true, Ordering::Relaxed) {
            return;
        }
        self.logged_out.store(false, Ordering::Relaxed);
        *self.qr_code.lock() = None;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        info!("[bot] Connected successfully");
        for line in self.welcome_banner().lines() {
            info!("{}", line);
        }
        self.start_feature_tasks(generation).await;
    }

    pub fn on_disconnected(&self, logged_out: bool) {
        let was_connected = self.connected.swap(false, Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Relaxed);
        if logged_out {
            self.logged_out.store(true, Ordering::Relaxed);
            warn!("[bot] Logged out from WhatsApp, link the device again to continue");
        } else if was_connected {
            warn!("[bot] Connection closed");
        }
    }

    pub fn welcome_banner(&self) -> String {
        let settings = self.settings.snapshot();
        let enabled: Vec<String> = settings.features.iter()
            .filter(|(_, on)| *on)
            .map(|(f, _)| format!("✅ {}", f))
            .collect();
        format!(
            "╔══════════════════════════════════════════════╗\n\
             ║  🤖 {} ACTIVATED\n\
             ╚══════════════════════════════════════════════╝\n\
             📛 Prefix: {}\n\
             🔒 Mode: {}\n\
             👑 Owner: {}\n\
             🔥 FEATURES ENABLED ({}/{}):\n{}\n\
             📝 Use {}help to see all commands\n\
             🔧 Use {}toggle <feature> to control features\n\
             🎨 Use {}menu for the menu",
            self.config.bot_name.to_uppercase(),
            settings.prefix,
            settings.mode.as_str().to_uppercase(),
            self.config.owner_number(),
            settings.features.enabled_count(),
            settings.features.total(),
            enabled.join("\n"),
            settings.prefix,
            settings.prefix,
            settings.prefix,
        )
    }

    // ── Outbound helpers ───────────────────────────────────────────────

    /// Every text the bot sends goes through here so anti-ban pacing applies.
    pub async fn send_text(&self, to_jid: &str, text: &str) -> BotResult<()> {
        if self.settings.is_enabled(Feature::AntiBan) {
            self.limiter.acquire().await;
        }
        self.client.send_text(to_jid, text).await
    }

    /// Reply in the message's chat, simulating typing or recording first.
    pub async fn reply(&self, msg: &InboundMessage, text: &str) {
        let presence = if msg.kind == MessageKind::Audio && self.settings.is_enabled(Feature::FakeRecording) {
            Some(PresenceKind::Recording)
        } else if self.settings.is_enabled(Feature::FakeTyping) {
            Some(PresenceKind::Composing)
        } else {
            None
        };
        if let Some(presence) = presence {
            if let Err(e) = self.client.send_presence(msg.chat(), presence).await {
                debug!("[bot] Presence {} failed: {}", presence.as_str(), e);
            }
        }
        if let Err(e) = self.send_text(msg.chat(), text).await {
            error!("[bot] Reply to {} failed: {}", msg.chat(), e);
        }
    }

    pub async fn notify_owner(&self, text: &str) {
        let owner = self.config.owner_jid();
        if let Err(e) = self.send_text(&owner, text).await {
            error!("[bot] Owner notification failed: {}", e);
        }
    }
}

// ── Test support ───────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::atoms::types::{MessageKey, MessageKind};
    use async_trait::async_trait;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Sent {
        Text { to: String, text: String },
        Reaction { id: String, emoji: String },
        Read(Vec<String>),
        Presence { to: String, presence: PresenceKind },
        Online(bool),
        ProfileStatus(String),
        CallRejection { enabled: bool, message: String },
    }

    /// Records every outbound call instead of talking to a gateway.
    #[derive(Default)]
    pub(crate) struct RecordingClient {
        pub sent: Mutex<Vec<Sent>>,
    }

    impl RecordingClient {
        pub fn texts(&self) -> Vec<(String, String)> {
            self.sent.lock().iter().filter_map(|s| match s {
                Sent::Text { to, text } => Some((to.clone(), text.clone())),
                _ => None,
            }).collect()
        }

        pub fn take(&self) -> Vec<Sent> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    #[async_trait]
    impl WaClient for RecordingClient {
        async fn send_text(&self, to_jid: &str, text: &str) -> BotResult<()> {
            self.sent.lock().push(Sent::Text { to: to_jid.into(), text: text.into() });
            Ok(())
        }
        async fn send_reaction(&self, key: &MessageKey, emoji: &str) -> BotResult<()> {
            self.sent.lock().push(Sent::Reaction { id: key.id.clone(), emoji: emoji.into() });
            Ok(())
        }
        async fn mark_read(&self, keys: &[MessageKey]) -> BotResult<()> {
            self.sent.lock().push(Sent::Read(keys.iter().map(|k| k.id.clone()).collect()));
            Ok(())
        }
        async fn send_presence(&self, to_jid: &str, presence: PresenceKind) -> BotResult<()> {
            self.sent.lock().push(Sent::Presence { to: to_jid.into(), presence });
            Ok(())
        }
        async fn set_online(&self, online: bool) -> BotResult<()> {
            self.sent.lock().push(Sent::Online(online));
            Ok(())
        }
        async fn update_profile_status(&self, status: &str) -> BotResult<()> {
            self.sent.lock().push(Sent::ProfileStatus(status.into()));
            Ok(())
        }
        async fn set_call_rejection(&self, enabled: bool, message: &str) -> BotResult<()> {
            self.sent.lock().push(Sent::CallRejection { enabled, message: message.into() });
            Ok(())
        }
    }

    pub(crate) const OWNER: &str = "111@s.whatsapp.net";
    pub(crate) const ALICE: &str = "222@s.whatsapp.net";

    /// A bot with no pacing delays, storage in a temp dir, and no randomness
    /// in auto-react unless the test turns it back on.
    pub(crate) fn test_bot(dir: &TempDir) -> (Arc<Bot>, Arc<RecordingClient>) {
        let mut config = crate::engine::settings::tests::test_config(dir);
        config.anti_ban.delay_between_messages = 0;
        config.anti_ban.random_delay = false;
        config.auto_react.probability = 0.0;
        let client = Arc::new(RecordingClient::default());
        let bot = Arc::new(Bot::new(config, client.clone()));
        (bot, client)
    }

    pub(crate) fn text_message(from: &str, chat: &str, id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            key: MessageKey {
                remote_jid: chat.to_string(),
                from_me: false,
                id: id.to_string(),
                participant: (from != chat).then(|| from.to_string()),
            },
            push_name: Some("Tester".into()),
            text: text.to_string(),
            kind: MessageKind::Text,
            timestamp: Some(chrono::Utc::now().timestamp()),
        }
    }
}
