// Prefixed commands
// parse_command, run_command (authorization), execute (one arm per command)

use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;

use super::Bot;
use crate::atoms::types::{jid_number, to_user_jid, Feature, InboundMessage};
use crate::engine::text::format_duration;

/// Commands only the owner may run, whatever the mode.
const OWNER_COMMANDS: [&str; 6] = ["mode", "prefix", "approve", "remove", "toggle", "approved"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedCommand {
    pub name: String,
    pub args: String,
}

/// `<prefix><name> <args>` → lower-cased name and trimmed args.
pub(crate) fn parse_command(text: &str, prefix: &str) -> Option<ParsedCommand> {
    if prefix.is_empty() {
        return None;
    }
    let rest = text.trim_start().strip_prefix(prefix)?;
    let rest = rest.trim_start();
    let (name, args) = match rest.find(char::is_whitespace) {
        Some(i) => (&rest[..i], rest[i..].trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        return None;
    }
    Some(ParsedCommand { name: name.to_lowercase(), args: args.to_string() })
}

impl Bot {
    pub(crate) async fn run_command(self: &Arc<Self>, msg: &InboundMessage, cmd: ParsedCommand) {
        let sender = msg.sender();

        if !self.settings.is_user_authorized(sender, Some(&cmd.name)) {
            info!("[bot] Denied {} to {} (private mode)", cmd.name, sender);
            self.reply(msg, "🔒 This bot is in private mode. Ask the owner for access.").await;
            return;
        }
        if OWNER_COMMANDS.contains(&cmd.name.as_str()) && !self.settings.is_owner(sender) {
            self.reply(msg, "👑 This command is for the owner only.").await;
            return;
        }

        info!("[bot] Command '{}' from {}", cmd.name, sender);
        let response = self.execute(msg, &cmd).await;
        self.reply(msg, &response).await;
    }

    async fn execute(&self, msg: &InboundMessage, cmd: &ParsedCommand) -> String {
        let sender = msg.sender();
        let p = self.settings.user_prefix(sender);
        let args = cmd.args.as_str();

        match cmd.name.as_str() {
            "help" | "menu" => self.help_text(&p),

            "ping" => {
                let latency_ms = msg.timestamp
                    .map(|ts| (Utc::now().timestamp_millis() - ts * 1000).max(0))
                    .unwrap_or(0);
                format!("🏓 Pong!\n⚡ Latency: {}ms", latency_ms)
            }

            "ai" | "gpt" => {
                if !self.settings.is_enabled(Feature::AiFeatures) || !self.settings.is_enabled(Feature::ChatGpt) {
                    return "❌ AI features are disabled".into();
                }
                if args.is_empty() {
                    return format!("❓ Usage: {}{} <question>", p, cmd.name);
                }
                if !self.ai.is_configured() {
                    return "❌ AI is not configured. Set OPENAI_API_KEY to enable it.".into();
                }
                match self.ai.chat(sender, args).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!("[ai] {} failed for {}: {}", cmd.name, sender, e);
                        "❌ AI request failed, try again later".into()
                    }
                }
            }

            "mode" => {
                if !self.settings.is_enabled(Feature::ModeSwitch) {
                    return "❌ Mode switching is disabled".into();
                }
                if args.is_empty() {
                    return format!(
                        "🔒 Current mode: *{}*\nUsage: {}mode public|private",
                        self.settings.mode().as_str().to_uppercase(),
                        p
                    );
                }
                if self.settings.set_mode(args) {
                    format!("✅ Mode changed to *{}*", self.settings.mode().as_str().to_uppercase())
                } else {
                    "❌ Invalid mode. Use public or private".into()
                }
            }

            "prefix" => {
                if args.is_empty() {
                    return format!("📛 Current prefix: {}\nUsage: {}prefix <new>", self.settings.prefix(), p);
                }
                if self.settings.set_prefix(args) {
                    format!("✅ Global prefix changed to {}", args)
                } else {
                    "❌ Prefix must be 1-3 characters without spaces".into()
                }
            }

            "setprefix" => {
                if !self.settings.is_enabled(Feature::PrefixCustomization) {
                    return "❌ Prefix customization is disabled".into();
                }
                if args.is_empty() {
                    return format!("❓ Usage: {}setprefix <new>", p);
                }
                if self.settings.set_user_prefix(sender, args) {
                    format!("✅ Your prefix is now {}", args)
                } else {
                    "❌ Prefix must be 1-3 characters without spaces".into()
                }
            }

            "resetprefix" => {
                let global = self.settings.prefix();
                if self.settings.clear_user_prefix(sender) {
                    format!("✅ Your prefix has been reset to {}", global)
                } else {
                    format!("ℹ️ You are already using the global prefix {}", global)
                }
            }

            "myprefix" => {
                let kind = if self.settings.has_custom_prefix(sender) { "custom" } else { "global" };
                format!("📛 Your prefix: {} ({})", p, kind)
            }

            "approve" => match to_user_jid(args) {
                Some(jid) => {
                    self.settings.approve_user(&jid);
                    format!("✅ Approved @{}", jid_number(&jid))
                }
                None => format!("❓ Usage: {}approve <number>", p),
            },

            "remove" => match to_user_jid(args) {
                Some(jid) if self.settings.remove_user(&jid) => format!("✅ Removed @{}", jid_number(&jid)),
                Some(jid) => format!("ℹ️ @{} was not approved", jid_number(&jid)),
                None => format!("❓ Usage: {}remove <number>", p),
            },

            "approved" => {
                let users = self.settings.approved_users();
                if users.is_empty() {
                    return "📋 No approved users".into();
                }
                let lines: Vec<String> = users.iter()
                    .enumerate()
                    .map(|(i, u)| format!("{}. @{}", i + 1, jid_number(u)))
                    .collect();
                format!("📋 *Approved users* ({})\n\n{}", users.len(), lines.join("\n"))
            }

            "toggle" => {
                if args.is_empty() {
                    return format!("❓ Usage: {}toggle <feature>\nUse {}features to see the list", p, p);
                }
                match self.settings.toggle_feature(args) {
                    Some((feature, on)) => {
                        if feature == Feature::AntiCall {
                            self.sync_call_rejection(on).await;
                        }
                        format!("✅ {} is now {}", feature, if on { "ON" } else { "OFF" })
                    }
                    None => format!("❌ Unknown feature: {}\nUse {}features to see the list", args, p),
                }
            }

            "features" => {
                let features = self.settings.features();
                let lines: Vec<String> = features.iter()
                    .map(|(f, on)| format!("{} {}", if on { "✅" } else { "❌" }, f))
                    .collect();
                format!(
                    "🔥 *Features* ({}/{})\n\n{}\n\nUse {}toggle <feature> to switch one",
                    features.enabled_count(),
                    features.total(),
                    lines.join("\n"),
                    p
                )
            }

            "status" => {
                let settings = self.settings.snapshot();
                let cached = self.cache.lock().len();
                format!(
                    "📊 *{} Status*\n\n🔌 Connected: {}\n🔒 Mode: {}\n📛 Prefix: {}\n⏱️ Uptime: {}\n🔥 Features: {}/{}\n💬 Messages: {}\n🗂️ Cached: {}",
                    self.config.bot_name,
                    if self.is_connected() { "yes" } else { "no" },
                    settings.mode,
                    settings.prefix,
                    format_duration(self.uptime().as_secs()),
                    settings.features.enabled_count(),
                    settings.features.total(),
                    self.message_count(),
                    cached,
                )
            }

            "typingstats" => {
                let target = if args.is_empty() { None } else { to_user_jid(args) };
                self.typing_stats_text(target.as_deref())
            }

            "clearai" => {
                if self.ai.clear_history(sender) {
                    "🧹 AI conversation cleared".into()
                } else {
                    "ℹ️ No AI conversation to clear".into()
                }
            }

            other => format!("❓ Unknown command: {}{}\nType {}help for the command list", p, other, p),
        }
    }

    pub(crate) fn help_text(&self, p: &str) -> String {
        format!(
            "╭─── *{name}* ───\n\
             │ 📛 Prefix: {p}   🔒 Mode: {mode}\n\
             │\n\
             │ *General*\n\
             │ {p}help, {p}menu\n\
             │ {p}ping\n\
             │ {p}status\n\
             │ {p}features\n\
             │\n\
             │ *AI*\n\
             │ {p}ai <question>, {p}gpt <question>\n\
             │ {p}clearai\n\
             │\n\
             │ *Prefix*\n\
             │ {p}myprefix\n\
             │ {p}setprefix <prefix>\n\
             │ {p}resetprefix\n\
             │\n\
             │ *Typing*\n\
             │ {p}typingstats [number]\n\
             │\n\
             │ *Owner*\n\
             │ {p}mode [public|private]\n\
             │ {p}prefix <prefix>\n\
             │ {p}approve <number>, {p}remove <number>\n\
             │ {p}approved\n\
             │ {p}toggle <feature>\n\
             ╰────────────",
            name = self.config.bot_name,
            p = p,
            mode = self.settings.mode().as_str().to_uppercase(),
        )
    }
}
