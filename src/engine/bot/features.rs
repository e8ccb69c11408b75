// Connection-scoped features: anti-call and the periodic tasks
// (keep-online, auto-bio). Tasks are tied to the connection generation
// that started them and exit once it is superseded.

use chrono::Local;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use super::Bot;
use crate::atoms::constants::{AUTO_BIO_INTERVAL_SECS, KEEP_ONLINE_INTERVAL_SECS};
use crate::atoms::types::{CallOffer, Feature};
use crate::engine::text::format_duration;

impl Bot {
    pub(crate) async fn start_feature_tasks(self: &Arc<Self>, generation: u64) {
        let features = self.settings.features();

        // Pushed either way: the gateway keeps the last value across restarts.
        self.sync_call_rejection(features.is_enabled(Feature::AntiCall)).await;

        self.spawn_keep_online(generation);
        self.spawn_auto_bio(generation);

        if features.is_enabled(Feature::TypingDetection) && self.config.typing.enabled {
            info!(
                "[typing] Detection active (cooldown {}s, notify owner: {})",
                self.config.typing.cooldown / 1000,
                self.config.typing.notify_owner
            );
        }
    }

    /// Mirror the `antiCall` flag into the gateway's call settings.
    pub(crate) async fn sync_call_rejection(&self, enabled: bool) {
        match self.client.set_call_rejection(enabled, &self.call_notice()).await {
            Ok(()) => info!("[bot] Anti-call {}", if enabled { "enabled" } else { "disabled" }),
            Err(e) => warn!("[bot] Could not update call rejection: {}", e),
        }
    }

    fn call_notice(&self) -> String {
        format!("📵 {} does not accept calls. Please send a message instead.", self.config.bot_name)
    }

    pub(crate) async fn handle_calls(self: &Arc<Self>, calls: Vec<CallOffer>) {
        for call in calls {
            if call.status != "offer" {
                continue;
            }
            info!(
                "[bot] Rejected {} call from {}",
                if call.is_video { "video" } else { "voice" },
                call.from
            );
            let notice = self.call_notice();
            if let Err(e) = self.send_text(&call.from, &notice).await {
                warn!("[bot] Call notice to {} failed: {}", call.from, e);
            }
        }
    }

    pub(crate) fn bio_text(&self) -> String {
        format!(
            "{} | Active {} | {}",
            self.config.bot_name,
            format_duration(self.uptime().as_secs()),
            Local::now().format("%H:%M")
        )
    }

    /// Keep the account shown as online while `alwaysOnline` is on.
    fn spawn_keep_online(self: &Arc<Self>, generation: u64) {
        let bot = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(KEEP_ONLINE_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                if !bot.is_current(generation) {
                    break;
                }
                if !bot.settings.is_enabled(Feature::AlwaysOnline) {
                    continue;
                }
                if let Err(e) = bot.client.set_online(true).await {
                    warn!("[bot] Keep-online failed: {}", e);
                }
            }
        });
    }

    fn spawn_auto_bio(self: &Arc<Self>, generation: u64) {
        let bot = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(AUTO_BIO_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                if !bot.is_current(generation) {
                    break;
                }
                if !bot.settings.is_enabled(Feature::AutoBioUpdate) {
                    continue;
                }
                let bio = bot.bio_text();
                match bot.client.update_profile_status(&bio).await {
                    Ok(()) => info!("[bot] Bio updated: {}", bio),
                    Err(e) => warn!("[bot] Bio update failed: {}", e),
                }
            }
        });
    }
}
