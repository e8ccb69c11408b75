// Inbound message handling
// handle_message, view_status, check_blacklist, chatbot_reply, auto_react

use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::commands::parse_command;
use super::Bot;
use crate::atoms::constants::{BAN_SAFE_LOAD_THRESHOLD, STATUS_BROADCAST, STATUS_LIKE_EMOJI};
use crate::atoms::types::{jid_number, Feature, FeatureFlags, InboundMessage};
use crate::engine::text::truncate_utf8;

impl Bot {
    pub(crate) async fn handle_message(self: &Arc<Self>, msg: InboundMessage) {
        if msg.key.from_me {
            return;
        }
        self.message_count.fetch_add(1, Ordering::Relaxed);
        let features = self.settings.features();

        if msg.chat() == STATUS_BROADCAST {
            self.view_status(&msg, &features).await;
            return;
        }

        if features.is_enabled(Feature::AntiDelete) {
            self.cache.lock().insert(&msg);
        }

        debug!(
            "[bot] Message from {} in {}: {}",
            msg.sender(),
            msg.chat(),
            truncate_utf8(&msg.text, 80)
        );

        if features.is_enabled(Feature::AutoRead) {
            if let Err(e) = self.client.mark_read(std::slice::from_ref(&msg.key)).await {
                debug!("[bot] Mark read failed: {}", e);
            }
        }

        if features.is_enabled(Feature::TypingDetection) && self.config.typing.enabled {
            self.check_blacklist(&msg).await;
        }

        let prefix = self.settings.user_prefix(msg.sender());
        if let Some(command) = parse_command(&msg.text, &prefix) {
            self.run_command(&msg, command).await;
            return;
        }

        if !msg.is_group()
            && features.is_enabled(Feature::SmartChatbot)
            && features.is_enabled(Feature::AiFeatures)
        {
            self.chatbot_reply(&msg).await;
        }

        if features.is_enabled(Feature::AutoReact) && self.config.auto_react.enabled {
            self.auto_react(&msg, &features).await;
        }
    }

    async fn view_status(&self, msg: &InboundMessage, features: &FeatureFlags) {
        if features.is_enabled(Feature::AutoViewStatus) {
            match self.client.mark_read(std::slice::from_ref(&msg.key)).await {
                Ok(()) => info!("[bot] Viewed status from {}", msg.display_name()),
                Err(e) => warn!("[bot] Status view failed: {}", e),
            }
        }
        if features.is_enabled(Feature::AutoLikeStatus) {
            if let Err(e) = self.client.send_reaction(&msg.key, STATUS_LIKE_EMOJI).await {
                warn!("[bot] Status like failed: {}", e);
            }
        }
    }

    async fn check_blacklist(&self, msg: &InboundMessage) {
        let Some(word) = find_blacklisted(&msg.text, &self.config.typing.blacklist_words) else {
            return;
        };
        info!("[typing] Blacklisted word '{}' from {}", word, msg.sender());
        let report = format!(
            "🚫 *Blacklisted word detected*\n\n👤 From: {} (@{})\n💬 Chat: {}\n🔤 Word: {}\n📝 Message: {}",
            msg.display_name(),
            jid_number(msg.sender()),
            msg.chat(),
            word,
            truncate_utf8(&msg.text, 500),
        );
        self.notify_owner(&report).await;
    }

    async fn chatbot_reply(&self, msg: &InboundMessage) {
        if msg.text.trim().is_empty() || !self.ai.is_configured() {
            return;
        }
        if !self.settings.is_user_authorized(msg.sender(), None) {
            return;
        }
        match self.ai.chat(msg.sender(), msg.text.trim()).await {
            Ok(answer) => self.reply(msg, &answer).await,
            Err(e) => warn!("[ai] Chatbot reply for {} failed: {}", msg.sender(), e),
        }
    }

    async fn auto_react(&self, msg: &InboundMessage, features: &FeatureFlags) {
        let settings = &self.config.auto_react;
        if settings.reactions.is_empty() || rand::random::<f64>() >= settings.probability {
            return;
        }
        if features.is_enabled(Feature::BanSafeMode) && self.limiter.load() > BAN_SAFE_LOAD_THRESHOLD {
            debug!("[bot] Ban-safe mode: skipping reaction");
            return;
        }
        let pick = (rand::random::<f64>() * settings.reactions.len() as f64) as usize;
        let emoji = &settings.reactions[pick.min(settings.reactions.len() - 1)];
        if let Err(e) = self.client.send_reaction(&msg.key, emoji).await {
            debug!("[bot] Reaction failed: {}", e);
        }
    }
}

/// First blacklisted word contained in `text`, compared case-insensitively.
pub(crate) fn find_blacklisted<'a>(text: &str, words: &'a [String]) -> Option<&'a str> {
    let lower = text.to_lowercase();
    words.iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .find(|w| lower.contains(&w.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::atoms::types::MessageKey;
    use tempfile::TempDir;

    #[tokio::test]
    async fn own_messages_are_ignored() {
        let dir = TempDir::new().unwrap();
        let (bot, client) = test_bot(&dir);
        let mut msg = text_message(ALICE, ALICE, "M1", "!ping");
        msg.key.from_me = true;
        bot.handle_message(msg).await;
        assert!(client.take().is_empty());
        assert_eq!(bot.message_count(), 0);
        assert!(bot.cache.lock().get("M1").is_none());
    }

    #[tokio::test]
    async fn status_is_viewed_and_liked_only() {
        let dir = TempDir::new().unwrap();
        let (bot, client) = test_bot(&dir);
        let msg = text_message(ALICE, STATUS_BROADCAST, "S1", "!ping");
        bot.handle_message(msg).await;
        assert_eq!(client.take(), vec![
            Sent::Read(vec!["S1".into()]),
            Sent::Reaction { id: "S1".into(), emoji: STATUS_LIKE_EMOJI.into() },
        ]);
    }

    #[tokio::test]
    async fn status_flags_off_means_nothing_sent() {
        let dir = TempDir::new().unwrap();
        let (bot, client) = test_bot(&dir);
        bot.settings.set_feature(Feature::AutoViewStatus, false);
        bot.settings.set_feature(Feature::AutoLikeStatus, false);
        bot.handle_message(text_message(ALICE, STATUS_BROADCAST, "S1", "hi")).await;
        assert!(client.take().is_empty());
    }

    #[tokio::test]
    async fn plain_message_is_read_and_cached() {
        let dir = TempDir::new().unwrap();
        let (bot, client) = test_bot(&dir);
        bot.handle_message(text_message(ALICE, ALICE, "M1", "hello")).await;
        assert_eq!(client.take(), vec![Sent::Read(vec!["M1".into()])]);
        assert_eq!(bot.cache.lock().get("M1").map(|c| c.text.clone()).as_deref(), Some("hello"));
        assert_eq!(bot.message_count(), 1);
    }

    #[tokio::test]
    async fn prefixed_message_runs_command() {
        let dir = TempDir::new().unwrap();
        let (bot, client) = test_bot(&dir);
        bot.settings.set_feature(Feature::AutoRead, false);
        bot.handle_message(text_message(ALICE, ALICE, "M1", "!ping")).await;
        let texts = client.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].1.starts_with("🏓 Pong!"));
    }

    #[tokio::test]
    async fn custom_prefix_replaces_global_for_that_user() {
        let dir = TempDir::new().unwrap();
        let (bot, client) = test_bot(&dir);
        bot.settings.set_feature(Feature::AutoRead, false);
        bot.settings.set_user_prefix(ALICE, ".");
        bot.handle_message(text_message(ALICE, ALICE, "M1", "!ping")).await;
        assert!(client.texts().is_empty());
        bot.handle_message(text_message(ALICE, ALICE, "M2", ".ping")).await;
        assert_eq!(client.texts().len(), 1);
    }

    #[tokio::test]
    async fn chatbot_without_key_stays_silent() {
        let dir = TempDir::new().unwrap();
        let (bot, client) = test_bot(&dir);
        bot.settings.set_feature(Feature::AutoRead, false);
        bot.handle_message(text_message(ALICE, ALICE, "M1", "how are you?")).await;
        assert!(client.take().is_empty());
    }

    #[tokio::test]
    async fn blacklisted_word_notifies_owner() {
        let dir = TempDir::new().unwrap();
        let mut config = crate::engine::settings::tests::test_config(&dir);
        config.anti_ban.delay_between_messages = 0;
        config.auto_react.probability = 0.0;
        config.typing.blacklist_words = vec!["Scam".into()];
        let client = Arc::new(RecordingClient::default());
        let bot = Arc::new(Bot::new(config, client.clone()));
        bot.settings.set_feature(Feature::AutoRead, false);

        bot.handle_message(text_message(ALICE, "123@g.us", "M1", "this is a SCAM link")).await;
        let texts = client.texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, OWNER);
        assert!(texts[0].1.contains("Word: Scam"));
        assert!(texts[0].1.contains("@222"));
    }

    #[tokio::test]
    async fn auto_react_always_fires_at_probability_one() {
        let dir = TempDir::new().unwrap();
        let mut config = crate::engine::settings::tests::test_config(&dir);
        config.anti_ban.delay_between_messages = 0;
        config.auto_react.probability = 1.0;
        config.auto_react.reactions = vec!["🔥".into()];
        let client = Arc::new(RecordingClient::default());
        let bot = Arc::new(Bot::new(config, client.clone()));
        bot.settings.set_feature(Feature::AutoRead, false);

        bot.handle_message(text_message(ALICE, "123@g.us", "G1", "nice")).await;
        assert_eq!(client.take(), vec![Sent::Reaction { id: "G1".into(), emoji: "🔥".into() }]);
    }

    #[tokio::test]
    async fn ban_safe_mode_skips_reactions_under_load() {
        let dir = TempDir::new().unwrap();
        let mut config = crate::engine::settings::tests::test_config(&dir);
        config.anti_ban.delay_between_messages = 0;
        config.anti_ban.max_messages_per_minute = 5;
        config.auto_react.probability = 1.0;
        config.auto_react.reactions = vec!["🔥".into()];
        let client = Arc::new(RecordingClient::default());
        let bot = Arc::new(Bot::new(config, client.clone()));
        bot.settings.set_feature(Feature::AutoRead, false);

        // 4 of 5 slots is exactly 80%: still allowed.
        let now = std::time::Instant::now();
        for _ in 0..4 {
            bot.limiter.try_acquire_at(now).unwrap();
        }
        bot.handle_message(text_message(ALICE, "123@g.us", "G1", "nice")).await;
        assert_eq!(client.take().len(), 1);

        bot.limiter.try_acquire_at(now).unwrap();
        bot.handle_message(text_message(ALICE, "123@g.us", "G2", "nice")).await;
        assert!(client.take().is_empty());

        bot.settings.set_feature(Feature::BanSafeMode, false);
        bot.handle_message(text_message(ALICE, "123@g.us", "G3", "nice")).await;
        assert_eq!(client.take(), vec![Sent::Reaction { id: "G3".into(), emoji: "🔥".into() }]);
    }

    #[test]
    fn blacklist_matching() {
        let words = vec!["  ".to_string(), "Spam".to_string()];
        assert_eq!(find_blacklisted("no SPAM please", &words), Some("Spam"));
        assert_eq!(find_blacklisted("clean", &words), None);
        assert_eq!(find_blacklisted("anything", &[]), None);
    }

    #[test]
    fn message_key_from_helper_has_participant_in_groups() {
        let msg = text_message(ALICE, "123@g.us", "G1", "x");
        assert_eq!(msg.key, MessageKey {
            remote_jid: "123@g.us".into(),
            from_me: false,
            id: "G1".into(),
            participant: Some(ALICE.into()),
        });
    }
}
