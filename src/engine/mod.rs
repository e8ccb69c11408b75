// Cannoh Engine: WhatsApp bot runtime
// Gateway bridge, event dispatch, feature handlers, AI chat and the HTTP
// status/webhook server. Shared state lives in one Arc<Bot>.

pub mod ai;
pub mod antiban;
pub mod bot;
pub mod config;
pub mod http;
pub mod server;
pub mod settings;
pub mod text;
pub mod whatsapp;
