// Cannoh Engine: HTTP server
//
//   GET  /                       liveness + summary JSON
//   GET  /qr                     pairing page with the current QR code
//   GET  /status                 connection, mode, prefix, feature flags
//   POST /webhook/whatsapp/<token>  Evolution API events (also .../<token>/<event>)
//
// The webhook token is a secret path segment handed to the gateway; anything
// else gets 401. Only the read-only routes carry CORS headers.
// Webhook payloads are acknowledged immediately and processed on a spawned task.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::atoms::error::BotResult;
use crate::engine::bot::Bot;
use crate::engine::whatsapp::parse_webhook;

pub fn router(bot: Arc<Bot>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/qr", get(qr_page))
        .route("/status", get(status))
        .layer(CorsLayer::permissive())
        .route("/webhook/whatsapp", post(webhook_without_token))
        .route("/webhook/whatsapp/:token", post(webhook))
        .route("/webhook/whatsapp/:token/*event", post(webhook_by_event))
        .with_state(bot)
}

/// Bind on all interfaces and serve until `shutdown` resolves.
pub async fn serve<F>(bot: Arc<Bot>, shutdown: F) -> BotResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], bot.config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("[server] Listening on http://{}", addr);
    info!("[server] Scan the QR code at http://localhost:{}/qr", bot.config.port);
    warn!("[server] Bound to all interfaces; the gateway webhook only accepts requests carrying the webhook token");

    axum::serve(listener, router(bot))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("[server] Stopped");
    Ok(())
}

async fn index(State(bot): State<Arc<Bot>>) -> Json<Value> {
    let features = bot.settings.features();
    Json(json!({
        "status": "online",
        "bot": format!("{} WhatsApp Bot", bot.config.bot_name),
        "connected": bot.is_connected(),
        "version": env!("CARGO_PKG_VERSION"),
        "features": features.enabled_count(),
        "totalFeatures": features.total(),
    }))
}

async fn status(State(bot): State<Arc<Bot>>) -> Json<Value> {
    let settings = bot.settings.snapshot();
    Json(json!({
        "connected": bot.is_connected(),
        "mode": settings.mode,
        "prefix": settings.prefix,
        "features": settings.features,
    }))
}

async fn qr_page(State(bot): State<Arc<Bot>>) -> Response {
    match bot.qr_code().filter(|_| !bot.is_connected()) {
        Some(qr) => Html(render_qr_page(&bot.config.bot_name, &qr)).into_response(),
        None => "QR not available or already connected".into_response(),
    }
}

async fn webhook_without_token() -> StatusCode {
    warn!("[webhook] Rejected request without token");
    StatusCode::UNAUTHORIZED
}

async fn webhook(State(bot): State<Arc<Bot>>, Path(token): Path<String>, body: Bytes) -> StatusCode {
    handle_webhook(bot, &token, &body)
}

async fn webhook_by_event(
    State(bot): State<Arc<Bot>>,
    Path((token, _event)): Path<(String, String)>,
    body: Bytes,
) -> StatusCode {
    handle_webhook(bot, &token, &body)
}

fn handle_webhook(bot: Arc<Bot>, token: &str, body: &[u8]) -> StatusCode {
    if token != bot.config.webhook_token {
        warn!("[webhook] Rejected request with wrong token");
        return StatusCode::UNAUTHORIZED;
    }
    let payload: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            warn!("[webhook] Invalid JSON payload: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    match parse_webhook(&payload) {
        Some(event) => {
            tokio::spawn(async move { bot.handle_event(event).await });
        }
        None => debug!("[webhook] Ignored event {}", payload["event"].as_str().unwrap_or("?")),
    }
    StatusCode::OK
}

/// `qr` is either a data URL (shown as an image) or a raw pairing string.
fn render_qr_page(bot_name: &str, qr: &str) -> String {
    let image = if qr.starts_with("data:image") {
        format!(r#"<img src="{}" alt="WhatsApp QR code">"#, html_escape(qr))
    } else {
        format!("<pre>{}</pre>", html_escape(qr))
    };
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta http-equiv="refresh" content="20">
  <title>{name} - Scan QR</title>
  <style>
    body {{ font-family: sans-serif; text-align: center; padding: 40px;
           background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: #fff; }}
    .card {{ display: inline-block; background: #fff; color: #333; padding: 30px; border-radius: 16px; }}
    img {{ width: 300px; height: 300px; }}
  </style>
</head>
<body>
  <h1>🤖 {name}</h1>
  <div class="card">
    {image}
    <p>Open WhatsApp → Linked devices → Link a device, then scan.</p>
  </div>
</body>
</html>"#,
        name = html_escape(bot_name),
        image = image,
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
