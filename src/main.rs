use cannoh_md::atoms::error::BotResult;
use cannoh_md::atoms::traits::WaClient;
use cannoh_md::engine::server;
use cannoh_md::engine::whatsapp::{run_bridge, EvolutionClient};
use cannoh_md::{Bot, BotConfig};
use env_logger::Env;
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() -> BotResult<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config = match BotConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("[config] {}", e);
            return Err(e);
        }
    };
    info!("[main] Starting {} v{}", config.bot_name, env!("CARGO_PKG_VERSION"));

    let gateway = Arc::new(EvolutionClient::new(config.gateway.clone()));
    let client: Arc<dyn WaClient> = gateway.clone();
    let bot = Arc::new(Bot::new(config, client));

    let bridge = tokio::spawn(run_bridge(bot.clone(), gateway));

    let signal_bot = bot.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("[main] Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("[main] Shutting down");
        signal_bot.shutdown();
    };

    let served = server::serve(bot.clone(), shutdown).await;
    bot.shutdown();
    bridge.abort();
    served
}
