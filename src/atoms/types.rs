// ── Cannoh Atoms: Pure Data Types ──────────────────────────────────────────
// Plain struct/enum definitions shared by the gateway and the bot.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::constants::{BROADCAST_SUFFIX, GROUP_SUFFIX, USER_SERVER};

// ── Bot mode ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    #[default]
    Public,
    Private,
}

impl BotMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Some(BotMode::Public),
            "private" => Some(BotMode::Private),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BotMode::Public => "public",
            BotMode::Private => "private",
        }
    }
}

impl fmt::Display for BotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Feature flags ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    AutoViewStatus,
    AntiDelete,
    DownloadMedia,
    ViewOnceDownload,
    FakeRecording,
    AlwaysOnline,
    FakeTyping,
    AutoLikeStatus,
    AiFeatures,
    #[serde(rename = "chatGPT")]
    ChatGpt,
    StatusDownloader,
    AntiCall,
    SmartChatbot,
    AutoBioUpdate,
    AutoReact,
    AutoRead,
    AutoSaveContacts,
    AntiBan,
    BanSafeMode,
    PrefixCustomization,
    ModeSwitch,
    TypingDetection,
    TypingNotification,
    TypingAnalytics,
}

impl Feature {
    pub const ALL: [Feature; 24] = [
        Feature::AutoViewStatus,
        Feature::AntiDelete,
        Feature::DownloadMedia,
        Feature::ViewOnceDownload,
        Feature::FakeRecording,
        Feature::AlwaysOnline,
        Feature::FakeTyping,
        Feature::AutoLikeStatus,
        Feature::AiFeatures,
        Feature::ChatGpt,
        Feature::StatusDownloader,
        Feature::AntiCall,
        Feature::SmartChatbot,
        Feature::AutoBioUpdate,
        Feature::AutoReact,
        Feature::AutoRead,
        Feature::AutoSaveContacts,
        Feature::AntiBan,
        Feature::BanSafeMode,
        Feature::PrefixCustomization,
        Feature::ModeSwitch,
        Feature::TypingDetection,
        Feature::TypingNotification,
        Feature::TypingAnalytics,
    ];

    /// Name as stored in the settings file and shown to users.
    pub fn name(&self) -> &'static str {
        match self {
            Feature::AutoViewStatus => "autoViewStatus",
            Feature::AntiDelete => "antiDelete",
            Feature::DownloadMedia => "downloadMedia",
            Feature::ViewOnceDownload => "viewOnceDownload",
            Feature::FakeRecording => "fakeRecording",
            Feature::AlwaysOnline => "alwaysOnline",
            Feature::FakeTyping => "fakeTyping",
            Feature::AutoLikeStatus => "autoLikeStatus",
            Feature::AiFeatures => "aiFeatures",
            Feature::ChatGpt => "chatGPT",
            Feature::StatusDownloader => "statusDownloader",
            Feature::AntiCall => "antiCall",
            Feature::SmartChatbot => "smartChatbot",
            Feature::AutoBioUpdate => "autoBioUpdate",
            Feature::AutoReact => "autoReact",
            Feature::AutoRead => "autoRead",
            Feature::AutoSaveContacts => "autoSaveContacts",
            Feature::AntiBan => "antiBan",
            Feature::BanSafeMode => "banSafeMode",
            Feature::PrefixCustomization => "prefixCustomization",
            Feature::ModeSwitch => "modeSwitch",
            Feature::TypingDetection => "typingDetection",
            Feature::TypingNotification => "typingNotification",
            Feature::TypingAnalytics => "typingAnalytics",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Feature> {
        let wanted = name.trim();
        Feature::ALL.iter().copied().find(|f| f.name().eq_ignore_ascii_case(wanted))
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The full set of feature toggles. Every feature is present; default is all on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FeatureFlags(BTreeMap<Feature, bool>);

impl Default for FeatureFlags {
    fn default() -> Self {
        FeatureFlags(Feature::ALL.iter().map(|f| (*f, true)).collect())
    }
}

impl FeatureFlags {
    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.0.get(&feature).copied().unwrap_or(false)
    }

    pub fn set(&mut self, feature: Feature, enabled: bool) {
        self.0.insert(feature, enabled);
    }

    /// Flip a flag and return its new value.
    pub fn toggle(&mut self, feature: Feature) -> bool {
        let next = !self.is_enabled(feature);
        self.set(feature, next);
        next
    }

    /// Overlay named values on top of the current flags. Unknown names are skipped.
    pub fn merge_named<'a, I>(&mut self, named: I)
    where
        I: IntoIterator<Item = (&'a String, &'a bool)>,
    {
        for (name, enabled) in named {
            if let Some(feature) = Feature::from_name(name) {
                self.set(feature, *enabled);
            }
        }
    }

    pub fn enabled_count(&self) -> usize {
        self.0.values().filter(|v| **v).count()
    }

    pub fn total(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, bool)> + '_ {
        self.0.iter().map(|(f, v)| (*f, *v))
    }
}

// ── JID helpers ────────────────────────────────────────────────────────────

/// Number part of a JID: everything before `@` (and before a device `:` suffix).
pub fn jid_number(jid: &str) -> &str {
    let user = jid.split('@').next().unwrap_or(jid);
    user.split(':').next().unwrap_or(user)
}

/// Normalize user input ("+254 781...", "254781...@s.whatsapp.net", "@254781...")
/// into a user JID. Returns `None` when no digits are present.
pub fn to_user_jid(input: &str) -> Option<String> {
    let trimmed = input.trim().trim_start_matches('@');
    if trimmed.contains('@') {
        return Some(trimmed.to_string());
    }
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(format!("{}@{}", digits, USER_SERVER))
    }
}

pub fn is_group_jid(jid: &str) -> bool {
    jid.ends_with(GROUP_SUFFIX)
}

pub fn is_broadcast_jid(jid: &str) -> bool {
    jid.ends_with(BROADCAST_SUFFIX)
}

// ── Gateway event payloads ─────────────────────────────────────────────────

/// Identifies one message in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Sticker,
    Document,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub key: MessageKey,
    pub push_name: Option<String>,
    pub text: String,
    pub kind: MessageKind,
    /// Seconds since the Unix epoch, as reported by WhatsApp.
    pub timestamp: Option<i64>,
}

impl InboundMessage {
    /// Chat the message belongs to.
    pub fn chat(&self) -> &str {
        &self.key.remote_jid
    }

    /// Author: the participant in groups, the chat itself otherwise.
    pub fn sender(&self) -> &str {
        self.key.participant.as_deref().unwrap_or(&self.key.remote_jid)
    }

    pub fn is_group(&self) -> bool {
        is_group_jid(&self.key.remote_jid)
    }

    pub fn display_name(&self) -> &str {
        self.push_name.as_deref().unwrap_or_else(|| jid_number(self.sender()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Composing,
    Recording,
    Paused,
    Available,
    Unavailable,
}

impl PresenceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "composing" => Some(PresenceKind::Composing),
            "recording" => Some(PresenceKind::Recording),
            "paused" => Some(PresenceKind::Paused),
            "available" => Some(PresenceKind::Available),
            "unavailable" => Some(PresenceKind::Unavailable),
            _ => None,
        }
    }

    /// Presence string the gateway expects when we send it.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceKind::Composing => "composing",
            PresenceKind::Recording => "recording",
            PresenceKind::Paused => "paused",
            PresenceKind::Available => "available",
            PresenceKind::Unavailable => "unavailable",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, PresenceKind::Composing | PresenceKind::Recording)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceUpdate {
    pub chat: String,
    /// (participant JID, presence) pairs.
    pub presences: Vec<(String, PresenceKind)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallOffer {
    pub id: String,
    pub from: String,
    pub status: String,
    pub is_video: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Connecting,
    Close,
}

impl ConnectionState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" | "connected" => Some(ConnectionState::Open),
            "connecting" => Some(ConnectionState::Connecting),
            "close" | "closed" | "disconnected" => Some(ConnectionState::Close),
            _ => None,
        }
    }
}

/// Everything the gateway can tell us that the bot reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    Qr(String),
    Connection { state: ConnectionState, logged_out: bool },
    Messages(Vec<InboundMessage>),
    Deleted(Vec<MessageKey>),
    Presence(PresenceUpdate),
    Calls(Vec<CallOffer>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_names_round_trip_case_insensitive() {
        for f in Feature::ALL {
            assert_eq!(Feature::from_name(f.name()), Some(f));
            assert_eq!(Feature::from_name(&f.name().to_uppercase()), Some(f));
        }
        assert_eq!(Feature::from_name("chatgpt"), Some(Feature::ChatGpt));
        assert_eq!(Feature::from_name("nope"), None);
    }

    #[test]
    fn feature_flags_default_all_enabled() {
        let flags = FeatureFlags::default();
        assert_eq!(flags.total(), 24);
        assert_eq!(flags.enabled_count(), 24);
    }

    #[test]
    fn feature_flags_serialize_with_stored_names() {
        let mut flags = FeatureFlags::default();
        flags.set(Feature::ChatGpt, false);
        let v = serde_json::to_value(&flags).unwrap();
        assert_eq!(v["chatGPT"], false);
        assert_eq!(v["autoViewStatus"], true);
    }

    #[test]
    fn feature_flags_merge_skips_unknown() {
        let mut flags = FeatureFlags::default();
        let mut saved = BTreeMap::new();
        saved.insert("antiCall".to_string(), false);
        saved.insert("teleport".to_string(), false);
        flags.merge_named(&saved);
        assert!(!flags.is_enabled(Feature::AntiCall));
        assert_eq!(flags.total(), 24);
        assert_eq!(flags.enabled_count(), 23);
    }

    #[test]
    fn toggle_flips() {
        let mut flags = FeatureFlags::default();
        assert!(!flags.toggle(Feature::AutoReact));
        assert!(flags.toggle(Feature::AutoReact));
    }

    #[test]
    fn jid_number_strips_server_and_device() {
        assert_eq!(jid_number("254781346242@s.whatsapp.net"), "254781346242");
        assert_eq!(jid_number("254781346242:12@s.whatsapp.net"), "254781346242");
        assert_eq!(jid_number("254781346242"), "254781346242");
    }

    #[test]
    fn to_user_jid_normalizes() {
        assert_eq!(to_user_jid("+254 781 346 242").as_deref(), Some("254781346242@s.whatsapp.net"));
        assert_eq!(to_user_jid("@254781346242").as_deref(), Some("254781346242@s.whatsapp.net"));
        assert_eq!(to_user_jid("1@s.whatsapp.net").as_deref(), Some("1@s.whatsapp.net"));
        assert_eq!(to_user_jid("abc"), None);
    }

    #[test]
    fn mode_parse() {
        assert_eq!(BotMode::parse("PUBLIC"), Some(BotMode::Public));
        assert_eq!(BotMode::parse("private"), Some(BotMode::Private));
        assert_eq!(BotMode::parse("secret"), None);
    }

    #[test]
    fn message_sender_prefers_participant() {
        let msg = InboundMessage {
            key: MessageKey {
                remote_jid: "123@g.us".into(),
                from_me: false,
                id: "A".into(),
                participant: Some("555@s.whatsapp.net".into()),
            },
            push_name: None,
            text: "hi".into(),
            kind: MessageKind::Text,
            timestamp: None,
        };
        assert_eq!(msg.sender(), "555@s.whatsapp.net");
        assert!(msg.is_group());
        assert_eq!(msg.display_name(), "555");
    }
}
