// Cannoh MD: a WhatsApp bot driven through the Evolution API gateway.
//
//   atoms    constants, errors, data types, the WaClient trait (no I/O)
//   engine   config, settings, gateway, bot, AI, HTTP server

pub mod atoms;
pub mod engine;

pub use engine::bot::Bot;
pub use engine::config::BotConfig;
