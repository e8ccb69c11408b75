// Cannoh Engine: Configuration
//
// Environment / command-line settings (clap, with `.env` support through
// dotenvy) plus optional TOML overrides for the tunable sections.
// Loaded once at start; the mutable runtime state lives in `settings`.

use crate::atoms::error::{BotError, BotResult};
use crate::atoms::types::{jid_number, BotMode, FeatureFlags};
use crate::atoms::constants::{MAX_PREFIX_CHARS, USER_SERVER};
use crate::engine::whatsapp::config::GatewayConfig;
use clap::Parser;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ── Command line / environment ─────────────────────────────────────────

#[derive(Debug, Clone, Parser)]
#[command(name = "cannoh-md", version, about = "WhatsApp automation bot")]
pub struct CliArgs {
    /// Owner phone number (international format, digits only)
    #[arg(long, env = "OWNER_NUMBER", default_value = "254781346242")]
    pub owner: String,

    /// Default command prefix
    #[arg(long, env = "PREFIX", default_value = "!")]
    pub prefix: String,

    /// Session name, used as the gateway instance name
    #[arg(long, env = "SESSION_NAME", default_value = "cannoh_md")]
    pub session_name: String,

    #[arg(long, env = "BOT_NAME", default_value = "Cannoh MD")]
    pub bot_name: String,

    /// "public" or "private"
    #[arg(long, env = "MODE", default_value = "public")]
    pub mode: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Port for the status page and the gateway webhook
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(long, env = "EVOLUTION_API_URL", default_value = "http://127.0.0.1:8085")]
    pub evolution_api_url: String,

    #[arg(long, env = "EVOLUTION_API_KEY", default_value = "", hide_env_values = true)]
    pub evolution_api_key: String,

    /// URL the gateway posts events to (default: host.docker.internal on PORT).
    /// The webhook token is appended as the last path segment.
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Secret path segment the gateway must post to. Generated when unset.
    #[arg(long, env = "WEBHOOK_TOKEN", hide_env_values = true)]
    pub webhook_token: Option<String>,

    #[arg(long, env = "STORAGE_DIR", default_value = "./storage")]
    pub storage_dir: PathBuf,

    /// Optional TOML file overriding the tunable sections
    #[arg(long = "config", env = "BOT_CONFIG")]
    pub config_file: Option<PathBuf>,
}

// ── Tunable sections ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrivateModeSettings {
    /// Commands anyone may run while the bot is private.
    pub allowed_commands: Vec<String>,
}

impl Default for PrivateModeSettings {
    fn default() -> Self {
        PrivateModeSettings {
            allowed_commands: ["help", "ping", "ai", "gpt", "menu"]
                .iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TypingSettings {
    pub enabled: bool,
    pub notify_owner: bool,
    pub notify_group: bool,
    pub save_logs: bool,
    pub track_patterns: bool,
    /// Minimum gap between two detections for the same user, in milliseconds.
    pub cooldown: u64,
    pub ignore_bots: bool,
    pub monitored_users: Vec<String>,
    pub ignored_users: Vec<String>,
    pub blacklist_words: Vec<String>,
    pub typing_speed_analysis: bool,
}

impl Default for TypingSettings {
    fn default() -> Self {
        TypingSettings {
            enabled: true,
            notify_owner: true,
            notify_group: false,
            save_logs: true,
            track_patterns: true,
            cooldown: 30_000,
            ignore_bots: true,
            monitored_users: vec![],
            ignored_users: vec![],
            blacklist_words: vec![],
            typing_speed_analysis: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoReactSettings {
    pub enabled: bool,
    pub reactions: Vec<String>,
    /// Chance in [0, 1] that a message gets a reaction.
    pub probability: f64,
}

impl Default for AutoReactSettings {
    fn default() -> Self {
        AutoReactSettings {
            enabled: true,
            reactions: ["❤️", "🔥", "😂", "😮", "😢", "👍"].iter().map(|s| s.to_string()).collect(),
            probability: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub base_url: String,
}

impl Default for AiSettings {
    fn default() -> Self {
        AiSettings {
            model: "gpt-3.5-turbo".into(),
            temperature: 0.7,
            max_tokens: 500,
            base_url: "https://api.openai.com/v1".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AntiBanSettings {
    pub max_messages_per_minute: u32,
    /// Pause after every outgoing message, in milliseconds.
    pub delay_between_messages: u64,
    pub random_delay: bool,
}

impl Default for AntiBanSettings {
    fn default() -> Self {
        AntiBanSettings { max_messages_per_minute: 30, delay_between_messages: 1000, random_delay: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationSettings {
    pub private_chat: bool,
    pub groups: bool,
    pub mention_user: bool,
    pub include_duration: bool,
    pub send_screenshot: bool,
    pub sound_alert: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        NotificationSettings {
            private_chat: true,
            groups: false,
            mention_user: true,
            include_duration: true,
            send_screenshot: false,
            sound_alert: false,
        }
    }
}

/// Shape of the optional TOML override file. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileOverrides {
    pub features: BTreeMap<String, bool>,
    pub private_mode: Option<PrivateModeSettings>,
    pub typing_detection: Option<TypingSettings>,
    pub auto_react: Option<AutoReactSettings>,
    pub ai: Option<AiSettings>,
    pub anti_ban: Option<AntiBanSettings>,
    pub notifications: Option<NotificationSettings>,
}

// ── Resolved config ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub owner: String,
    pub default_prefix: String,
    pub session_name: String,
    pub bot_name: String,
    pub default_mode: BotMode,
    pub openai_api_key: Option<String>,
    pub port: u16,
    pub storage_dir: PathBuf,
    /// Webhook requests without this path segment are rejected.
    pub webhook_token: String,
    pub gateway: GatewayConfig,
    /// Feature defaults before the persisted settings are applied.
    pub features: FeatureFlags,
    pub private_mode: PrivateModeSettings,
    pub typing: TypingSettings,
    pub auto_react: AutoReactSettings,
    pub ai: AiSettings,
    pub anti_ban: AntiBanSettings,
    pub notifications: NotificationSettings,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            owner: "254781346242".into(),
            default_prefix: "!".into(),
            session_name: "cannoh_md".into(),
            bot_name: "Cannoh MD".into(),
            default_mode: BotMode::Public,
            openai_api_key: None,
            port: 3000,
            storage_dir: PathBuf::from("./storage"),
            webhook_token: generate_webhook_token(),
            gateway: GatewayConfig::default(),
            features: FeatureFlags::default(),
            private_mode: PrivateModeSettings::default(),
            typing: TypingSettings::default(),
            auto_react: AutoReactSettings::default(),
            ai: AiSettings::default(),
            anti_ban: AntiBanSettings::default(),
            notifications: NotificationSettings::default(),
        }
    }
}

impl BotConfig {
    /// Read `.env`, then the command line / environment, then the TOML overrides.
    pub fn load() -> BotResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            info!("[config] Loaded environment from {}", path.display());
        }
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> BotResult<Self> {
        let default_mode = BotMode::parse(&args.mode)
            .ok_or_else(|| BotError::Config(format!("MODE must be public or private, got '{}'", args.mode)))?;

        let webhook_token = args.webhook_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(generate_webhook_token);
        let webhook_base = args.webhook_url.clone().unwrap_or_else(|| {
            format!("http://host.docker.internal:{}/webhook/whatsapp", args.port)
        });
        let webhook_url = format!("{}/{}", webhook_base.trim_end_matches('/'), webhook_token);

        let mut config = BotConfig {
            owner: args.owner.trim().to_string(),
            default_prefix: args.prefix,
            session_name: args.session_name.clone(),
            bot_name: args.bot_name,
            default_mode,
            openai_api_key: args.openai_api_key.filter(|k| !k.trim().is_empty()),
            port: args.port,
            storage_dir: args.storage_dir,
            webhook_token,
            gateway: GatewayConfig {
                instance_name: args.session_name,
                api_url: args.evolution_api_url.trim_end_matches('/').to_string(),
                api_key: args.evolution_api_key,
                webhook_url,
            },
            ..BotConfig::default()
        };

        if let Some(path) = &args.config_file {
            config.apply_file(path)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Merge a TOML override file into this config.
    pub fn apply_file(&mut self, path: &Path) -> BotResult<()> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BotError::Config(format!("Read {}: {}", path.display(), e)))?;
        let overrides: FileOverrides = toml::from_str(&text)?;
        self.apply_overrides(overrides);
        info!("[config] Applied overrides from {}", path.display());
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: FileOverrides) {
        self.features.merge_named(&overrides.features);
        if let Some(v) = overrides.private_mode { self.private_mode = v; }
        if let Some(v) = overrides.typing_detection { self.typing = v; }
        if let Some(v) = overrides.auto_react { self.auto_react = v; }
        if let Some(v) = overrides.ai { self.ai = v; }
        if let Some(v) = overrides.anti_ban { self.anti_ban = v; }
        if let Some(v) = overrides.notifications { self.notifications = v; }
    }

    pub fn validate(&self) -> BotResult<()> {
        if jid_number(&self.owner).is_empty() {
            return Err(BotError::Config("OWNER_NUMBER is empty".into()));
        }
        if !is_valid_prefix(&self.default_prefix) {
            return Err(BotError::Config(format!(
                "PREFIX must be 1 to {} non-space characters, got '{}'",
                MAX_PREFIX_CHARS, self.default_prefix
            )));
        }
        if !(0.0..=1.0).contains(&self.auto_react.probability) {
            return Err(BotError::Config("auto_react.probability must be within [0, 1]".into()));
        }
        if self.webhook_token.contains('/') {
            return Err(BotError::Config("WEBHOOK_TOKEN must not contain '/'".into()));
        }
        if self.anti_ban.max_messages_per_minute == 0 {
            return Err(BotError::Config("anti_ban.max_messages_per_minute must be positive".into()));
        }
        Ok(())
    }

    /// Owner's number without any server part.
    pub fn owner_number(&self) -> &str {
        jid_number(&self.owner)
    }

    pub fn owner_jid(&self) -> String {
        format!("{}@{}", self.owner_number(), USER_SERVER)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.storage_dir.join(crate::atoms::constants::SETTINGS_FILE)
    }

    pub fn typing_log_path(&self) -> PathBuf {
        self.storage_dir.join(crate::atoms::constants::TYPING_LOG_FILE)
    }
}

fn generate_webhook_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A prefix is 1..=3 characters with no whitespace.
pub fn is_valid_prefix(prefix: &str) -> bool {
    let count = prefix.chars().count();
    count > 0 && count <= MAX_PREFIX_CHARS && !prefix.chars().any(char::is_whitespace)
}
