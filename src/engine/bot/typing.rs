// Typing detection
//
// Presence updates (`composing` / `recording`) open a session per (user, chat);
// `paused` / `available` closes it. Detections are rate limited per user by
// the configured cooldown, optionally logged as JSON lines, counted for
// analytics, and reported to the owner.

use chrono::{DateTime, Local, Utc};
use log::{debug, error, info};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

use super::Bot;
use crate::atoms::constants::TYPING_SESSION_TIMEOUT_SECS;
use crate::atoms::error::BotResult;
use crate::atoms::types::{is_broadcast_jid, is_group_jid, jid_number, Feature, PresenceKind, PresenceUpdate};
use crate::engine::config::TypingSettings;
use crate::engine::text::format_duration;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TypingOutcome {
    /// A new session passed every filter and the cooldown.
    Detected,
    /// A session closed. `notified` is true when its start was reported.
    Finished { kind: PresenceKind, duration: Duration, notified: bool },
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TypingStats {
    pub sessions: u64,
    pub composing: u64,
    pub recording: u64,
    pub measured: u64,
    pub total_ms: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

impl TypingStats {
    pub fn average(&self) -> Option<Duration> {
        (self.measured > 0).then(|| Duration::from_millis(self.total_ms / self.measured))
    }
}

struct ActiveSession {
    kind: PresenceKind,
    started: Instant,
    notified: bool,
}

#[derive(Default)]
pub(crate) struct TypingTracker {
    last_detected: HashMap<String, Instant>,
    active: HashMap<(String, String), ActiveSession>,
    stats: HashMap<String, TypingStats>,
}

impl TypingTracker {
    /// Feed one presence. `analytics` decides whether counters are updated.
    pub fn observe(
        &mut self,
        settings: &TypingSettings,
        user: &str,
        chat: &str,
        kind: PresenceKind,
        now: Instant,
        analytics: bool,
    ) -> TypingOutcome {
        let session_key = (user.to_string(), chat.to_string());
        self.expire_stale(now);

        if !kind.is_active() {
            let Some(session) = self.active.remove(&session_key) else {
                return TypingOutcome::Ignored;
            };
            let duration = now.saturating_duration_since(session.started);
            if analytics && settings.typing_speed_analysis {
                let stats = self.stats.entry(user.to_string()).or_default();
                stats.measured += 1;
                stats.total_ms += duration.as_millis() as u64;
            }
            return TypingOutcome::Finished { kind: session.kind, duration, notified: session.notified };
        }

        if self.active.contains_key(&session_key) {
            return TypingOutcome::Ignored;
        }

        let cooldown = Duration::from_millis(settings.cooldown);
        let cooling = self.last_detected.get(user)
            .is_some_and(|last| now.saturating_duration_since(*last) < cooldown);
        self.active.insert(session_key, ActiveSession { kind, started: now, notified: !cooling });
        if cooling {
            return TypingOutcome::Ignored;
        }

        self.last_detected.insert(user.to_string(), now);
        if analytics {
            let stats = self.stats.entry(user.to_string()).or_default();
            stats.sessions += 1;
            match kind {
                PresenceKind::Recording => stats.recording += 1,
                _ => stats.composing += 1,
            }
            stats.last_seen = Some(Utc::now());
        }
        TypingOutcome::Detected
    }

    /// Closing presences get lost, and webhook tasks can deliver `paused`
    /// before its `composing`. Sessions past the timeout are dropped unmeasured.
    fn expire_stale(&mut self, now: Instant) {
        let timeout = Duration::from_secs(TYPING_SESSION_TIMEOUT_SECS);
        self.active.retain(|_, s| now.saturating_duration_since(s.started) < timeout);
    }

    pub fn stats_for(&self, user: &str) -> Option<TypingStats> {
        self.stats.get(user).cloned()
    }

    /// Most active users by session count, ties broken by JID.
    pub fn top_users(&self, limit: usize) -> Vec<(String, TypingStats)> {
        let mut all: Vec<(String, TypingStats)> = self.stats.iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| b.1.sessions.cmp(&a.1.sessions).then_with(|| a.0.cmp(&b.0)));
        all.truncate(limit);
        all
    }

    pub fn active_sessions(&self) -> usize {
        self.active.len()
    }
}

/// Whether presences from `user` are looked at at all.
pub(crate) fn is_trackable(settings: &TypingSettings, owner_number: &str, user: &str) -> bool {
    let number = jid_number(user);
    if number == owner_number {
        return false;
    }
    if settings.ignore_bots && (is_broadcast_jid(user) || user.ends_with("@newsletter")) {
        return false;
    }
    let matches = |entry: &String| jid_number(entry.trim()) == number;
    if settings.ignored_users.iter().any(matches) {
        return false;
    }
    settings.monitored_users.is_empty() || settings.monitored_users.iter().any(matches)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TypingLogEntry<'a> {
    user: &'a str,
    chat: &'a str,
    kind: &'a str,
    at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
}

async fn append_log(path: &Path, entry: &TypingLogEntry<'_>) -> BotResult<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

fn activity(kind: PresenceKind) -> &'static str {
    match kind {
        PresenceKind::Recording => "recording audio",
        _ => "typing",
    }
}

pub(crate) fn format_stats(user: &str, stats: &TypingStats) -> String {
    let average = stats.average().map(|d| format_duration(d.as_secs())).unwrap_or_else(|| "n/a".into());
    let last = stats.last_seen
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".into());
    format!(
        "👤 @{}\n   ✍️ Sessions: {} ({} typing, {} recording)\n   ⏱️ Average: {}\n   🕒 Last seen: {}",
        jid_number(user),
        stats.sessions,
        stats.composing,
        stats.recording,
        average,
        last,
    )
}

impl Bot {
    pub(crate) async fn handle_presence(self: &Arc<Self>, update: PresenceUpdate) {
        let settings = &self.config.typing;
        let analytics = self.settings.is_enabled(Feature::TypingAnalytics) && settings.track_patterns;

        for (user, kind) in &update.presences {
            if !is_trackable(settings, self.config.owner_number(), user) {
                continue;
            }
            // tokio's clock so paused-time tests can advance it
            let now = tokio::time::Instant::now().into_std();
            let outcome = self.typing.lock().observe(settings, user, &update.chat, *kind, now, analytics);

            match outcome {
                TypingOutcome::Detected => {
                    info!("[typing] {} is {} in {}", user, activity(*kind), update.chat);
                    self.record_typing(user, &update.chat, *kind, None).await;
                    if self.should_notify(&update.chat) {
                        self.notify_owner(&self.typing_notice(user, &update.chat, *kind)).await;
                    }
                }
                TypingOutcome::Finished { kind, duration, notified } => {
                    debug!("[typing] {} stopped {} after {}", user, activity(kind), format_duration(duration.as_secs()));
                    if settings.typing_speed_analysis {
                        self.record_typing(user, &update.chat, kind, Some(duration)).await;
                    }
                    if notified
                        && self.config.notifications.include_duration
                        && duration >= Duration::from_secs(1)
                        && self.should_notify(&update.chat)
                    {
                        let text = format!(
                            "⏱️ {} stopped {} after {}",
                            self.mention(user),
                            activity(kind),
                            format_duration(duration.as_secs())
                        );
                        self.notify_owner(&text).await;
                    }
                }
                TypingOutcome::Ignored => {}
            }
        }
    }

    async fn record_typing(&self, user: &str, chat: &str, kind: PresenceKind, duration: Option<Duration>) {
        if !self.config.typing.save_logs {
            return;
        }
        let entry = TypingLogEntry {
            user,
            chat,
            kind: kind.as_str(),
            at: Utc::now().to_rfc3339(),
            duration_ms: duration.map(|d| d.as_millis() as u64),
        };
        let path = self.config.typing_log_path();
        if let Err(e) = append_log(&path, &entry).await {
            error!("[typing] Failed to write {}: {}", path.display(), e);
        }
    }

    fn should_notify(&self, chat: &str) -> bool {
        if !self.settings.is_enabled(Feature::TypingNotification) || !self.config.typing.notify_owner {
            return false;
        }
        if is_group_jid(chat) {
            self.config.notifications.groups || self.config.typing.notify_group
        } else {
            self.config.notifications.private_chat
        }
    }

    fn mention(&self, user: &str) -> String {
        if self.config.notifications.mention_user {
            format!("@{}", jid_number(user))
        } else {
            jid_number(user).to_string()
        }
    }

    fn typing_notice(&self, user: &str, chat: &str, kind: PresenceKind) -> String {
        let chat_label = if is_group_jid(chat) { chat } else { "Private chat" };
        format!(
            "✍️ *Typing detected*\n\n👤 User: {}\n💬 Chat: {}\n⌨️ Activity: {}\n🕒 Time: {}",
            self.mention(user),
            chat_label,
            activity(kind),
            Local::now().format("%H:%M:%S"),
        )
    }

    pub(crate) fn typing_stats_text(&self, user: Option<&str>) -> String {
        let tracker = self.typing.lock();
        match user {
            Some(user) => match tracker.stats_for(user) {
                Some(stats) => format!("📊 *Typing stats*\n\n{}", format_stats(user, &stats)),
                None => format!("📊 No typing activity recorded for @{}", jid_number(user)),
            },
            None => {
                let top = tracker.top_users(5);
                if top.is_empty() {
                    return "📊 No typing activity recorded yet".into();
                }
                let lines: Vec<String> = top.iter().map(|(u, s)| format_stats(u, s)).collect();
                format!(
                    "📊 *Typing stats* (top {}, {} active now)\n\n{}",
                    top.len(),
                    tracker.active_sessions(),
                    lines.join("\n\n")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::atoms::types::BotEvent;
    use tempfile::TempDir;

    fn settings(cooldown: u64) -> TypingSettings {
        TypingSettings { cooldown, ..TypingSettings::default() }
    }

    #[test]
    fn session_opens_and_closes_with_duration() {
        let mut tracker = TypingTracker::default();
        let s = settings(0);
        let t0 = Instant::now();
        assert_eq!(tracker.observe(&s, ALICE, ALICE, PresenceKind::Composing, t0, true), TypingOutcome::Detected);
        // Repeated composing while the session is open is not a new detection.
        assert_eq!(tracker.observe(&s, ALICE, ALICE, PresenceKind::Composing, t0, true), TypingOutcome::Ignored);
        let outcome = tracker.observe(&s, ALICE, ALICE, PresenceKind::Paused, t0 + Duration::from_secs(4), true);
        assert_eq!(outcome, TypingOutcome::Finished {
            kind: PresenceKind::Composing,
            duration: Duration::from_secs(4),
            notified: true,
        });
        let stats = tracker.stats_for(ALICE).unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.average(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn cooldown_suppresses_repeat_detections() {
        let mut tracker = TypingTracker::default();
        let s = settings(30_000);
        let t0 = Instant::now();
        assert_eq!(tracker.observe(&s, ALICE, ALICE, PresenceKind::Composing, t0, true), TypingOutcome::Detected);
        tracker.observe(&s, ALICE, ALICE, PresenceKind::Paused, t0 + Duration::from_secs(2), true);

        let again = t0 + Duration::from_secs(10);
        assert_eq!(tracker.observe(&s, ALICE, ALICE, PresenceKind::Recording, again, true), TypingOutcome::Ignored);
        match tracker.observe(&s, ALICE, ALICE, PresenceKind::Paused, again + Duration::from_secs(1), true) {
            TypingOutcome::Finished { notified, .. } => assert!(!notified),
            other => panic!("unexpected {:?}", other),
        }

        let later = t0 + Duration::from_secs(31);
        assert_eq!(tracker.observe(&s, ALICE, ALICE, PresenceKind::Recording, later, true), TypingOutcome::Detected);
        let stats = tracker.stats_for(ALICE).unwrap();
        assert_eq!((stats.sessions, stats.composing, stats.recording), (2, 1, 1));
    }

    #[test]
    fn stale_session_expires() {
        let mut tracker = TypingTracker::default();
        let s = settings(30_000);
        let t0 = Instant::now();
        assert_eq!(tracker.observe(&s, ALICE, ALICE, PresenceKind::Composing, t0, true), TypingOutcome::Detected);

        // Still inside the timeout: the open session swallows repeats.
        let soon = t0 + Duration::from_secs(TYPING_SESSION_TIMEOUT_SECS - 1);
        assert_eq!(tracker.observe(&s, ALICE, ALICE, PresenceKind::Composing, soon, true), TypingOutcome::Ignored);

        let day_later = t0 + Duration::from_secs(24 * 3600);
        assert_eq!(tracker.observe(&s, ALICE, ALICE, PresenceKind::Composing, day_later, true), TypingOutcome::Detected);
        assert_eq!(tracker.active_sessions(), 1);
        assert_eq!(tracker.stats_for(ALICE).unwrap().measured, 0);
    }

    #[test]
    fn stale_sessions_do_not_accumulate() {
        let mut tracker = TypingTracker::default();
        let s = settings(0);
        let t0 = Instant::now();
        for i in 0..50 {
            let chat = format!("{}@g.us", i);
            tracker.observe(&s, ALICE, &chat, PresenceKind::Composing, t0, false);
        }
        assert_eq!(tracker.active_sessions(), 50);
        let later = t0 + Duration::from_secs(TYPING_SESSION_TIMEOUT_SECS);
        tracker.observe(&s, ALICE, ALICE, PresenceKind::Available, later, false);
        assert_eq!(tracker.active_sessions(), 0);
    }

    #[test]
    fn paused_without_session_is_ignored() {
        let mut tracker = TypingTracker::default();
        let outcome = tracker.observe(&settings(0), ALICE, ALICE, PresenceKind::Available, Instant::now(), true);
        assert_eq!(outcome, TypingOutcome::Ignored);
    }

    #[test]
    fn analytics_off_keeps_no_stats() {
        let mut tracker = TypingTracker::default();
        tracker.observe(&settings(0), ALICE, ALICE, PresenceKind::Composing, Instant::now(), false);
        assert!(tracker.stats_for(ALICE).is_none());
        assert!(tracker.top_users(5).is_empty());
    }

    #[test]
    fn trackable_filters() {
        let mut s = TypingSettings::default();
        assert!(!is_trackable(&s, "111", OWNER));
        assert!(!is_trackable(&s, "111", "status@broadcast"));
        assert!(!is_trackable(&s, "111", "12345@newsletter"));
        assert!(is_trackable(&s, "111", ALICE));

        s.ignored_users = vec!["222".into()];
        assert!(!is_trackable(&s, "111", ALICE));

        s.ignored_users.clear();
        s.monitored_users = vec!["333@s.whatsapp.net".into()];
        assert!(!is_trackable(&s, "111", ALICE));
        assert!(is_trackable(&s, "111", "333@s.whatsapp.net"));
    }

    #[test]
    fn top_users_sorted_by_sessions() {
        let mut tracker = TypingTracker::default();
        let s = settings(0);
        let t0 = Instant::now();
        for i in 0..3u64 {
            let t = t0 + Duration::from_secs(i * 10);
            tracker.observe(&s, ALICE, ALICE, PresenceKind::Composing, t, true);
            tracker.observe(&s, ALICE, ALICE, PresenceKind::Paused, t + Duration::from_secs(1), true);
        }
        tracker.observe(&s, "333@s.whatsapp.net", "333@s.whatsapp.net", PresenceKind::Composing, t0, true);
        let top = tracker.top_users(5);
        assert_eq!(top[0].0, ALICE);
        assert_eq!(top[0].1.sessions, 3);
        assert_eq!(top.len(), 2);
    }

    #[tokio::test]
    async fn detection_notifies_owner_and_writes_log() {
        let dir = TempDir::new().unwrap();
        let (bot, client) = test_bot(&dir);
        let update = PresenceUpdate {
            chat: ALICE.into(),
            presences: vec![(ALICE.into(), PresenceKind::Composing)],
        };
        bot.handle_event(BotEvent::Presence(update)).await;

        let texts = client.texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, OWNER);
        assert!(texts[0].1.contains("User: @222"));
        assert!(texts[0].1.contains("Private chat"));

        let log = std::fs::read_to_string(bot.config.typing_log_path()).unwrap();
        let entry: serde_json::Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
        assert_eq!(entry["user"], ALICE);
        assert_eq!(entry["kind"], "composing");
        assert!(entry.get("durationMs").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_session_logs_duration_and_follows_up() {
        let dir = TempDir::new().unwrap();
        let (bot, client) = test_bot(&dir);
        let presence = |kind| PresenceUpdate { chat: ALICE.into(), presences: vec![(ALICE.into(), kind)] };

        bot.handle_event(BotEvent::Presence(presence(PresenceKind::Composing))).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        bot.handle_event(BotEvent::Presence(presence(PresenceKind::Paused))).await;

        let texts = client.texts();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[1], (OWNER.to_string(), "⏱️ @222 stopped typing after 5s".to_string()));

        let log = std::fs::read_to_string(bot.config.typing_log_path()).unwrap();
        let lines: Vec<serde_json::Value> = log.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].get("durationMs").is_none());
        assert_eq!(lines[1]["durationMs"], 5000);
        assert_eq!(bot.typing.lock().stats_for(ALICE).unwrap().average(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn group_typing_not_reported_by_default() {
        let dir = TempDir::new().unwrap();
        let (bot, client) = test_bot(&dir);
        let update = PresenceUpdate {
            chat: "123@g.us".into(),
            presences: vec![(ALICE.into(), PresenceKind::Composing)],
        };
        bot.handle_event(BotEvent::Presence(update)).await;
        assert!(client.texts().is_empty());
        assert_eq!(bot.typing.lock().stats_for(ALICE).map(|s| s.sessions), Some(1));
    }

    #[tokio::test]
    async fn typing_detection_flag_gates_everything() {
        let dir = TempDir::new().unwrap();
        let (bot, client) = test_bot(&dir);
        bot.settings.set_feature(Feature::TypingDetection, false);
        let update = PresenceUpdate {
            chat: ALICE.into(),
            presences: vec![(ALICE.into(), PresenceKind::Composing)],
        };
        bot.handle_event(BotEvent::Presence(update)).await;
        assert!(client.texts().is_empty());
        assert!(bot.typing.lock().stats_for(ALICE).is_none());
    }

    #[test]
    fn stats_text_for_unknown_user() {
        let dir = TempDir::new().unwrap();
        let (bot, _client) = test_bot(&dir);
        assert_eq!(bot.typing_stats_text(Some(ALICE)), "📊 No typing activity recorded for @222");
        assert_eq!(bot.typing_stats_text(None), "📊 No typing activity recorded yet");
    }
}
