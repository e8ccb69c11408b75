// Cannoh Engine: AI chat (OpenAI-compatible)
//
// Non-streaming /chat/completions with a short per-user history.
// Used by the `ai`/`gpt` commands and the private-chat chatbot.

use crate::atoms::constants::AI_HISTORY_LIMIT;
use crate::atoms::error::{BotError, BotResult};
use crate::engine::config::AiSettings;
use crate::engine::http::{is_retryable_status, parse_retry_after, retry_delay, CircuitBreaker, MAX_RETRIES};
use crate::engine::text::truncate_utf8;
use log::{info, warn};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

const PROVIDER: &str = "openai";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    fn new(role: &str, content: &str) -> Self {
        ChatTurn { role: role.to_string(), content: content.to_string() }
    }
}

pub struct AiClient {
    client: Client,
    settings: AiSettings,
    api_key: Option<String>,
    system_prompt: String,
    histories: Mutex<HashMap<String, Vec<ChatTurn>>>,
    circuit: CircuitBreaker,
}

impl AiClient {
    pub fn new(settings: AiSettings, api_key: Option<String>, bot_name: &str) -> Self {
        AiClient {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            settings,
            api_key,
            system_prompt: format!(
                "You are {}, a helpful WhatsApp assistant. Keep responses concise and mobile-friendly. \
                 Use WhatsApp formatting: *bold*, _italic_, ~strikethrough~, ```code```.",
                bot_name
            ),
            histories: Mutex::new(HashMap::new()),
            circuit: CircuitBreaker::new(5, Duration::from_secs(60)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Ask the model, remembering the exchange for `user`.
    pub async fn chat(&self, user: &str, prompt: &str) -> BotResult<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(BotError::Config("OPENAI_API_KEY is not set".into()));
        };

        let messages = self.build_messages(user, prompt);
        let body = json!({
            "model": self.settings.model,
            "messages": messages,
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });

        let reply = self.complete(api_key, &body).await?;
        self.remember(user, prompt, &reply);
        Ok(reply)
    }

    /// Forget `user`'s context. Returns false if there was none.
    pub fn clear_history(&self, user: &str) -> bool {
        self.histories.lock().remove(user).is_some()
    }

    pub fn history_len(&self, user: &str) -> usize {
        self.histories.lock().get(user).map(Vec::len).unwrap_or(0)
    }

    fn build_messages(&self, user: &str, prompt: &str) -> Vec<ChatTurn> {
        let mut messages = vec![ChatTurn::new("system", &self.system_prompt)];
        if let Some(history) = self.histories.lock().get(user) {
            messages.extend(history.iter().cloned());
        }
        messages.push(ChatTurn::new("user", prompt));
        messages
    }

    fn remember(&self, user: &str, prompt: &str, reply: &str) {
        let mut histories = self.histories.lock();
        let history = histories.entry(user.to_string()).or_default();
        history.push(ChatTurn::new("user", prompt));
        history.push(ChatTurn::new("assistant", reply));
        if history.len() > AI_HISTORY_LIMIT {
            let excess = history.len() - AI_HISTORY_LIMIT;
            history.drain(..excess);
        }
    }

    async fn complete(&self, api_key: &str, body: &Value) -> BotResult<String> {
        self.circuit.check().map_err(|remaining| {
            BotError::provider(PROVIDER, format!("Circuit breaker open, retry in {}s", remaining.as_secs().max(1)))
        })?;

        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        info!("[ai] Request to {} model={}", url, self.settings.model);

        let mut last_error = String::new();
        let mut retry_after: Option<u64> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1, retry_after.take()).await;
                warn!("[ai] Retry {}/{} after {}ms", attempt, MAX_RETRIES, delay.as_millis());
            }

            let response = match self.client
                .post(&url)
                .bearer_auth(api_key)
                .json(body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    self.circuit.record_failure();
                    last_error = format!("HTTP request failed: {}", e);
                    continue;
                }
            };

            let status = response.status().as_u16();
            if !response.status().is_success() {
                retry_after = response.headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let text = response.text().await.unwrap_or_default();
                last_error = format!("API error {}: {}", status, truncate_utf8(&text, 200));
                self.circuit.record_failure();

                if is_retryable_status(status) {
                    continue;
                }
                return Err(BotError::provider(PROVIDER, last_error));
            }

            let json: Value = response.json().await?;
            self.circuit.record_success();
            return parse_completion(&json);
        }

        Err(BotError::provider(PROVIDER, last_error))
    }
}

fn parse_completion(json: &Value) -> BotResult<String> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BotError::provider(PROVIDER, "empty completion"))
}
