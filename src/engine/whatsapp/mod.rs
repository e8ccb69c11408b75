// Cannoh Engine: WhatsApp Gateway (via Evolution API)
//
// Module layout:
//   config          GatewayConfig, instance URLs
//   evolution_api   create/connect/ensure/delete instance, QR extraction,
//                   WaClient implementation (send text, react, read, presence)
//   webhook         parse_webhook: gateway JSON events → BotEvent
//   bridge          run_bridge: instance setup, state polling, reconnects

pub mod config;
pub mod evolution_api;
pub mod webhook;
pub mod bridge;

pub use bridge::run_bridge;
pub use config::GatewayConfig;
pub use evolution_api::EvolutionClient;
pub use webhook::parse_webhook;
