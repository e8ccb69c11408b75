// WhatsApp Bridge: connection lifecycle
// run_bridge, run_session, poll_once

use log::{error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::evolution_api::EvolutionClient;
use crate::atoms::constants::{CONNECTION_POLL_SECS, RECONNECT_DELAY_SECS};
use crate::atoms::error::BotResult;
use crate::atoms::types::{BotEvent, ConnectionState};
use crate::engine::bot::Bot;

/// What the poll loop should do after one state check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollAction {
    Wait,
    Reconnect,
}

/// Keeps the gateway session alive until the bot's stop signal is set.
/// Initialization errors are logged and retried after a fixed delay.
pub async fn run_bridge(bot: Arc<Bot>, gateway: Arc<EvolutionClient>) {
    let stop = bot.stop_signal();
    info!("[bridge] Starting {} via Evolution API ({})", bot.config.bot_name, gateway.config().api_url);

    while !stop.load(Ordering::Relaxed) {
        if let Err(e) = run_session(&bot, &gateway).await {
            error!("[bridge] Initialization error: {}", e);
        }
        if stop.load(Ordering::Relaxed) {
            break;
        }
        info!("[bridge] Retrying in {}s", RECONNECT_DELAY_SECS);
        tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
    }

    info!("[bridge] Stopped");
}

/// One session: make sure the instance exists, then poll its state.
/// Returns `Ok(())` on stop; any gateway error ends the session.
async fn run_session(bot: &Arc<Bot>, gateway: &EvolutionClient) -> BotResult<()> {
    let stop = bot.stop_signal();

    let qr_code = gateway.ensure_instance().await?;
    if !qr_code.is_empty() {
        bot.handle_event(BotEvent::Qr(qr_code)).await;
        info!("[bridge] QR code generated, waiting for scan");
    }

    let mut check_interval = tokio::time::interval(Duration::from_secs(CONNECTION_POLL_SECS));
    while !stop.load(Ordering::Relaxed) {
        check_interval.tick().await;
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let state = gateway.connection_state().await?;
        if poll_once(bot, state).await == PollAction::Reconnect {
            info!("[bridge] Connection closed, reconnecting in {}s", RECONNECT_DELAY_SECS);
            tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
            let qr_code = gateway.connect_instance().await?;
            if !qr_code.is_empty() {
                bot.handle_event(BotEvent::Qr(qr_code)).await;
            }
        }
    }
    Ok(())
}

/// Feed one polled state into the bot and decide whether to reconnect.
pub(crate) async fn poll_once(bot: &Arc<Bot>, state: Option<ConnectionState>) -> PollAction {
    match state {
        Some(ConnectionState::Open) => {
            if !bot.is_connected() {
                bot.handle_event(BotEvent::Connection { state: ConnectionState::Open, logged_out: false }).await;
            }
            PollAction::Wait
        }
        Some(ConnectionState::Close) => {
            if bot.is_connected() {
                bot.handle_event(BotEvent::Connection { state: ConnectionState::Close, logged_out: false }).await;
            }
            if bot.is_logged_out() {
                warn!("[bridge] Session logged out, not reconnecting");
                PollAction::Wait
            } else {
                PollAction::Reconnect
            }
        }
        Some(ConnectionState::Connecting) | None => PollAction::Wait,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::bot::testing::test_bot;
    use tempfile::TempDir;

    #[tokio::test]
    async fn open_connects_once() {
        let dir = TempDir::new().unwrap();
        let (bot, _client) = test_bot(&dir);
        assert_eq!(poll_once(&bot, Some(ConnectionState::Open)).await, PollAction::Wait);
        assert!(bot.is_connected());
        assert_eq!(poll_once(&bot, Some(ConnectionState::Open)).await, PollAction::Wait);
        bot.shutdown();
    }

    #[tokio::test]
    async fn close_disconnects_and_reconnects() {
        let dir = TempDir::new().unwrap();
        let (bot, _client) = test_bot(&dir);
        poll_once(&bot, Some(ConnectionState::Open)).await;
        assert_eq!(poll_once(&bot, Some(ConnectionState::Close)).await, PollAction::Reconnect);
        assert!(!bot.is_connected());
        bot.shutdown();
    }

    #[tokio::test]
    async fn logged_out_session_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let (bot, _client) = test_bot(&dir);
        bot.handle_event(BotEvent::Connection { state: ConnectionState::Close, logged_out: true }).await;
        assert_eq!(poll_once(&bot, Some(ConnectionState::Close)).await, PollAction::Wait);
        assert_eq!(poll_once(&bot, Some(ConnectionState::Connecting)).await, PollAction::Wait);
    }
}
