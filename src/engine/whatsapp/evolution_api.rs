// WhatsApp Gateway: Evolution API client
// Instance management (create / connect / state / delete / settings),
// QR extraction, and the WaClient implementation for outbound traffic.

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::time::Duration;

use super::config::GatewayConfig;
use crate::atoms::constants::MAX_TEXT_CHUNK;
use crate::atoms::error::{BotError, BotResult};
use crate::atoms::traits::WaClient;
use crate::atoms::types::{ConnectionState, MessageKey, PresenceKind};
use crate::engine::text::{split_message, truncate_utf8};

/// Events the gateway should deliver to our webhook.
const WEBHOOK_EVENTS: [&str; 6] = [
    "QRCODE_UPDATED",
    "CONNECTION_UPDATE",
    "MESSAGES_UPSERT",
    "MESSAGES_DELETE",
    "PRESENCE_UPDATE",
    "CALL",
];

pub struct EvolutionClient {
    client: Client,
    config: GatewayConfig,
}

impl EvolutionClient {
    pub fn new(config: GatewayConfig) -> Self {
        EvolutionClient {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Send one request with the `apikey` header; non-2xx becomes a gateway error.
    async fn request(&self, operation: &str, method: Method, url: &str, body: Option<&Value>) -> BotResult<Value> {
        let mut req = self.client.request(method, url).header("apikey", &self.config.api_key);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        debug!("[gateway] {} [{}]: {}", operation, status, truncate_utf8(&text, 300));

        if !status.is_success() {
            return Err(BotError::gateway(operation, format!("{}: {}", status, truncate_utf8(&text, 300))));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn post(&self, operation: &str, path: &str, body: Value) -> BotResult<Value> {
        let url = self.config.instance_url(path);
        self.request(operation, Method::POST, &url, Some(&body)).await
    }

    // ── Instance Management ────────────────────────────────────────────

    fn create_body(&self) -> Value {
        // A unique token per attempt avoids "Token already exists" collisions.
        let token = format!("cannoh-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        json!({
            "instanceName": self.config.instance_name,
            "token": token,
            "qrcode": true,
            "webhook": self.config.webhook_url,
            "webhook_by_events": false,
            "events": WEBHOOK_EVENTS,
        })
    }

    /// Create the instance and return the QR code (empty if already paired).
    /// A name/token conflict deletes the old instance and retries once.
    pub async fn create_instance(&self) -> BotResult<String> {
        let url = format!("{}/instance/create", self.config.api_url);
        info!("[gateway] Creating instance '{}'", self.config.instance_name);

        match self.request("instance/create", Method::POST, &url, Some(&self.create_body())).await {
            Ok(resp) => Ok(extract_qr_from_response(&resp)),
            Err(BotError::Gateway { message, .. }) if is_conflict(&message) => {
                info!("[gateway] Instance/token conflict, deleting instance and recreating");
                self.delete_instance().await;
                let resp = self
                    .request("instance/create (retry)", Method::POST, &url, Some(&self.create_body()))
                    .await?;
                Ok(extract_qr_from_response(&resp))
            }
            Err(e) => Err(e),
        }
    }

    /// Ask an existing instance to reconnect; returns a fresh QR if pairing is needed.
    pub async fn connect_instance(&self) -> BotResult<String> {
        let url = self.config.instance_url("instance/connect");
        let resp = self.request("instance/connect", Method::GET, &url, None).await?;
        Ok(extract_qr_from_response(&resp))
    }

    pub async fn connection_state(&self) -> BotResult<Option<ConnectionState>> {
        let url = self.config.instance_url("instance/connectionState");
        let body = self.request("instance/connectionState", Method::GET, &url, None).await?;
        let state = body["instance"]["state"].as_str()
            .or_else(|| body["state"].as_str())
            .unwrap_or("");
        Ok(ConnectionState::parse(state))
    }

    fn webhook_body(&self) -> Value {
        json!({
            "enabled": true,
            "url": self.config.webhook_url,
            "webhook_by_events": false,
            "events": WEBHOOK_EVENTS,
        })
    }

    /// Point an existing instance at our current webhook URL and event list.
    pub async fn set_webhook(&self) -> BotResult<()> {
        self.post("webhook/set", "webhook/set", self.webhook_body()).await.map(|_| ())
    }

    /// Reuse the instance when the gateway already knows it: nothing to do if
    /// paired, reconnect (fresh QR) if not. Create it only when missing.
    /// A reused instance gets its webhook rewritten, since URL or token may have changed.
    pub async fn ensure_instance(&self) -> BotResult<String> {
        match self.connection_state().await {
            Ok(state) => {
                if let Err(e) = self.set_webhook().await {
                    warn!("[gateway] Could not update webhook on '{}': {}", self.config.instance_name, e);
                }
                if state == Some(ConnectionState::Open) {
                    info!("[gateway] Instance '{}' already paired", self.config.instance_name);
                    return Ok(String::new());
                }
                self.connect_instance().await
            }
            Err(BotError::Gateway { message, .. }) => {
                debug!("[gateway] No usable instance ({}), creating", message);
                self.create_instance().await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete_instance(&self) {
        let url = self.config.instance_url("instance/delete");
        if let Err(e) = self.request("instance/delete", Method::DELETE, &url, None).await {
            warn!("[gateway] Delete instance failed: {}", e);
        }
        // Let the gateway settle before the next create.
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn is_conflict(message: &str) -> bool {
    let lower = message.to_lowercase();
    let instance_exists = lower.contains("instance") && (lower.contains("already") || lower.contains("exists"));
    let token_exists = lower.contains("token") && lower.contains("already");
    instance_exists || token_exists
}

/// Extract the QR code from the gateway's response shapes:
/// `{qrcode: {base64}}` on create, `{base64}` on connect, or a bare data URL.
pub(crate) fn extract_qr_from_response(resp: &Value) -> String {
    resp["qrcode"]["base64"].as_str()
        .or_else(|| resp["base64"].as_str())
        .or_else(|| resp["qrcode"].as_str().filter(|s| s.starts_with("data:")))
        .unwrap_or("")
        .to_string()
}

fn key_json(key: &MessageKey) -> Value {
    json!({
        "remoteJid": key.remote_jid,
        "fromMe": key.from_me,
        "id": key.id,
    })
}

// ── Outbound traffic ───────────────────────────────────────────────────

#[async_trait]
impl WaClient for EvolutionClient {
    async fn send_text(&self, to_jid: &str, text: &str) -> BotResult<()> {
        for chunk in split_message(text, MAX_TEXT_CHUNK) {
            self.post("message/sendText", "message/sendText", json!({
                "number": to_jid,
                "text": chunk,
            })).await?;
        }
        Ok(())
    }

    async fn send_reaction(&self, key: &MessageKey, emoji: &str) -> BotResult<()> {
        self.post("message/sendReaction", "message/sendReaction", json!({
            "key": key_json(key),
            "reaction": emoji,
        })).await.map(|_| ())
    }

    async fn mark_read(&self, keys: &[MessageKey]) -> BotResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let read: Vec<Value> = keys.iter().map(key_json).collect();
        self.post("chat/markMessageAsRead", "chat/markMessageAsRead", json!({
            "readMessages": read,
        })).await.map(|_| ())
    }

    async fn send_presence(&self, to_jid: &str, presence: PresenceKind) -> BotResult<()> {
        self.post("chat/sendPresence", "chat/sendPresence", json!({
            "number": to_jid,
            "presence": presence.as_str(),
            "delay": 1200,
        })).await.map(|_| ())
    }

    async fn set_online(&self, online: bool) -> BotResult<()> {
        let presence = if online { PresenceKind::Available } else { PresenceKind::Unavailable };
        self.post("instance/setPresence", "instance/setPresence", json!({
            "presence": presence.as_str(),
        })).await.map(|_| ())
    }

    async fn update_profile_status(&self, status: &str) -> BotResult<()> {
        self.post("chat/updateProfileStatus", "chat/updateProfileStatus", json!({
            "status": status,
        })).await.map(|_| ())
    }

    async fn set_call_rejection(&self, enabled: bool, message: &str) -> BotResult<()> {
        self.post("settings/set", "settings/set", json!({
            "rejectCall": enabled,
            "msgCall": message,
            "groupsIgnore": false,
            "alwaysOnline": false,
            "readMessages": false,
            "readStatus": false,
            "syncFullHistory": false,
        })).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Bytes, extract::State, http::Uri, Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Calls = Arc<Mutex<Vec<(String, Value)>>>;

    #[derive(Clone)]
    struct StubGateway {
        state: &'static str,
        calls: Calls,
    }

    async fn stub_handler(State(gw): State<StubGateway>, uri: Uri, body: Bytes) -> Json<Value> {
        let path = uri.path().to_string();
        let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
        gw.calls.lock().push((path.clone(), body));
        if path.starts_with("/instance/connectionState") {
            Json(json!({"instance": {"instanceName": "cannoh_md", "state": gw.state}}))
        } else if path.starts_with("/instance/connect") {
            Json(json!({"code": "2@x", "base64": "data:image/png;base64,FRESH"}))
        } else {
            Json(json!({}))
        }
    }

    /// Serve a fake gateway on an ephemeral port that reports `state`.
    async fn stub_gateway(state: &'static str) -> (EvolutionClient, Calls) {
        let calls = Calls::default();
        let app = Router::new()
            .fallback(stub_handler)
            .with_state(StubGateway { state, calls: calls.clone() });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let client = EvolutionClient::new(GatewayConfig {
            api_url: format!("http://{}", addr),
            webhook_url: "http://bot:4000/webhook/whatsapp/newtoken".into(),
            ..GatewayConfig::default()
        });
        (client, calls)
    }

    fn paths(calls: &Calls) -> Vec<String> {
        calls.lock().iter().map(|(p, _)| p.clone()).collect()
    }

    #[tokio::test]
    async fn reused_paired_instance_gets_current_webhook() {
        let (client, calls) = stub_gateway("open").await;
        assert_eq!(client.ensure_instance().await.unwrap(), "");
        assert_eq!(
            paths(&calls),
            vec!["/instance/connectionState/cannoh_md", "/webhook/set/cannoh_md"]
        );
        let body = calls.lock()[1].1.clone();
        assert_eq!(body["url"], "http://bot:4000/webhook/whatsapp/newtoken");
        assert_eq!(body["enabled"], true);
        assert_eq!(body["events"].as_array().unwrap().len(), WEBHOOK_EVENTS.len());
    }

    #[tokio::test]
    async fn reused_unpaired_instance_reconnects_for_qr() {
        let (client, calls) = stub_gateway("close").await;
        assert_eq!(client.ensure_instance().await.unwrap(), "data:image/png;base64,FRESH");
        assert_eq!(
            paths(&calls),
            vec![
                "/instance/connectionState/cannoh_md",
                "/webhook/set/cannoh_md",
                "/instance/connect/cannoh_md",
            ]
        );
    }

    #[test]
    fn qr_from_create_response() {
        let resp = json!({"qrcode": {"code": "2@abc", "base64": "data:image/png;base64,AAA"}});
        assert_eq!(extract_qr_from_response(&resp), "data:image/png;base64,AAA");
    }

    #[test]
    fn qr_from_connect_response() {
        let resp = json!({"pairingCode": null, "code": "2@abc", "base64": "data:image/png;base64,BBB"});
        assert_eq!(extract_qr_from_response(&resp), "data:image/png;base64,BBB");
    }

    #[test]
    fn qr_bare_string_requires_data_url() {
        assert_eq!(extract_qr_from_response(&json!({"qrcode": "data:image/png;base64,C"})), "data:image/png;base64,C");
        assert_eq!(extract_qr_from_response(&json!({"qrcode": "2@raw"})), "");
        assert_eq!(extract_qr_from_response(&json!({"instance": {"state": "open"}})), "");
    }

    #[test]
    fn conflict_detection() {
        assert!(is_conflict("403 Forbidden: This instance name \"cannoh_md\" is already in use"));
        assert!(is_conflict("Token already exists"));
        assert!(!is_conflict("500 Internal Server Error"));
    }

    #[test]
    fn create_body_lists_events_and_webhook() {
        let client = EvolutionClient::new(GatewayConfig::default());
        let body = client.create_body();
        assert_eq!(body["instanceName"], "cannoh_md");
        assert_eq!(body["webhook"], "http://host.docker.internal:3000/webhook/whatsapp");
        assert_eq!(body["events"].as_array().unwrap().len(), WEBHOOK_EVENTS.len());
        assert!(body["token"].as_str().unwrap().starts_with("cannoh-"));
    }
}
