// ── Cannoh Atoms: Error Types ──────────────────────────────────────────────
// Single error enum for the bot, built with `thiserror`.
//
// Variants are coarse-grained by domain (I/O, gateway, provider, config).
// No variant carries the gateway key or the OpenAI key in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BotError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The WhatsApp gateway rejected or failed an operation.
    #[error("Gateway error: {operation}: {message}")]
    Gateway { operation: String, message: String },

    /// AI provider HTTP or API-level failure.
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl BotError {
    pub fn gateway(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Gateway { operation: operation.into(), message: message.into() }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }
}

impl From<String> for BotError {
    fn from(s: String) -> Self {
        BotError::Other(s)
    }
}

impl From<&str> for BotError {
    fn from(s: &str) -> Self {
        BotError::Other(s.to_string())
    }
}

impl From<toml::de::Error> for BotError {
    fn from(e: toml::de::Error) -> Self {
        BotError::Config(format!("TOML: {}", e))
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// Every fallible bot operation returns this type.
pub type BotResult<T> = Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_display() {
        let e = BotError::gateway("sendText", "instance not found");
        assert_eq!(e.to_string(), "Gateway error: sendText: instance not found");
    }

    #[test]
    fn string_converts_to_other() {
        let e: BotError = "boom".into();
        assert!(matches!(e, BotError::Other(ref m) if m == "boom"));
    }
}
