// WhatsApp Gateway: Webhook payload parsing
// parse_webhook turns one Evolution API webhook body into a BotEvent.

use log::debug;
use serde_json::Value;

use crate::atoms::types::{
    BotEvent, CallOffer, ConnectionState, InboundMessage, MessageKey, MessageKind,
    PresenceKind, PresenceUpdate,
};

/// Baileys' `DisconnectReason.loggedOut`.
const LOGGED_OUT_STATUS: u64 = 401;

/// "MESSAGES_UPSERT" and "messages.upsert" both become "messages.upsert".
pub(crate) fn normalize_event_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('_', ".")
}

/// Parse a webhook body. Returns `None` for events the bot ignores.
pub fn parse_webhook(payload: &Value) -> Option<BotEvent> {
    let event = normalize_event_name(payload["event"].as_str().unwrap_or(""));
    let data = &payload["data"];

    match event.as_str() {
        "qrcode.updated" => {
            let qr = data["qrcode"]["base64"].as_str()
                .or_else(|| data["qrcode"].as_str())
                .unwrap_or("");
            (!qr.is_empty()).then(|| BotEvent::Qr(qr.to_string()))
        }
        "connection.update" => {
            let state = ConnectionState::parse(data["state"].as_str().unwrap_or(""))?;
            let logged_out = data["statusReason"].as_u64() == Some(LOGGED_OUT_STATUS);
            Some(BotEvent::Connection { state, logged_out })
        }
        "messages.upsert" => parse_upsert(data),
        "messages.delete" => {
            let keys: Vec<MessageKey> = as_list(data)
                .into_iter()
                .flat_map(|v| match v["keys"].as_array() {
                    Some(keys) => keys.iter().filter_map(parse_key).collect::<Vec<_>>(),
                    None => parse_key(v.get("key").unwrap_or(v)).into_iter().collect(),
                })
                .collect();
            (!keys.is_empty()).then_some(BotEvent::Deleted(keys))
        }
        "presence.update" => {
            let chat = data["id"].as_str()?.to_string();
            let presences = data["presences"].as_object()?
                .iter()
                .filter_map(|(jid, p)| {
                    let kind = PresenceKind::parse(p["lastKnownPresence"].as_str()?)?;
                    Some((jid.clone(), kind))
                })
                .collect::<Vec<_>>();
            (!presences.is_empty()).then_some(BotEvent::Presence(PresenceUpdate { chat, presences }))
        }
        "call" => {
            let calls: Vec<CallOffer> = as_list(data).into_iter().filter_map(parse_call).collect();
            (!calls.is_empty()).then_some(BotEvent::Calls(calls))
        }
        other => {
            debug!("[webhook] Ignoring event '{}'", other);
            None
        }
    }
}

fn as_list(data: &Value) -> Vec<&Value> {
    match data.as_array() {
        Some(arr) => arr.iter().collect(),
        None if data.is_null() => vec![],
        None => vec![data],
    }
}

fn parse_key(v: &Value) -> Option<MessageKey> {
    Some(MessageKey {
        remote_jid: v["remoteJid"].as_str()?.to_string(),
        from_me: v["fromMe"].as_bool().unwrap_or(false),
        id: v["id"].as_str()?.to_string(),
        participant: v["participant"].as_str().filter(|p| !p.is_empty()).map(str::to_string),
    })
}

/// A revoke ("delete for everyone") arrives as an upsert carrying a protocol message.
fn revoked_key(msg: &Value, outer: &MessageKey) -> Option<MessageKey> {
    let proto = &msg["message"]["protocolMessage"];
    let is_revoke = proto["type"].as_str() == Some("REVOKE") || proto["type"].as_u64() == Some(0);
    if !is_revoke {
        return None;
    }
    let mut key = parse_key(&proto["key"])?;
    if key.participant.is_none() && outer.participant.is_some() {
        key.participant = outer.participant.clone();
    }
    Some(key)
}

fn parse_upsert(data: &Value) -> Option<BotEvent> {
    let mut messages = Vec::new();
    let mut revoked = Vec::new();

    for msg in as_list(data) {
        let Some(key) = parse_key(&msg["key"]) else { continue };
        if let Some(deleted) = revoked_key(msg, &key) {
            revoked.push(deleted);
            continue;
        }
        let (text, kind) = extract_content(&msg["message"]);
        messages.push(InboundMessage {
            key,
            push_name: msg["pushName"].as_str().filter(|n| !n.is_empty()).map(str::to_string),
            text,
            kind,
            timestamp: parse_timestamp(&msg["messageTimestamp"]),
        });
    }

    if !revoked.is_empty() {
        // Revokes never share a webhook call with regular messages in practice.
        return Some(BotEvent::Deleted(revoked));
    }
    (!messages.is_empty()).then_some(BotEvent::Messages(messages))
}

fn extract_content(message: &Value) -> (String, MessageKind) {
    let text_of = |v: &Value| v.as_str().unwrap_or("").to_string();

    if let Some(s) = message["conversation"].as_str() {
        return (s.to_string(), MessageKind::Text);
    }
    if message["extendedTextMessage"].is_object() {
        return (text_of(&message["extendedTextMessage"]["text"]), MessageKind::Text);
    }
    if message["imageMessage"].is_object() {
        return (text_of(&message["imageMessage"]["caption"]), MessageKind::Image);
    }
    if message["videoMessage"].is_object() {
        return (text_of(&message["videoMessage"]["caption"]), MessageKind::Video);
    }
    if message["audioMessage"].is_object() {
        return (String::new(), MessageKind::Audio);
    }
    if message["stickerMessage"].is_object() {
        return (String::new(), MessageKind::Sticker);
    }
    if message["documentMessage"].is_object() {
        return (text_of(&message["documentMessage"]["caption"]), MessageKind::Document);
    }
    (String::new(), MessageKind::Other)
}

/// Timestamps come as numbers or numeric strings depending on the gateway version.
fn parse_timestamp(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn parse_call(v: &Value) -> Option<CallOffer> {
    Some(CallOffer {
        id: v["id"].as_str()?.to_string(),
        from: v["from"].as_str()?.to_string(),
        status: v["status"].as_str().unwrap_or("offer").to_string(),
        is_video: v["isVideo"].as_bool().unwrap_or(false),
    })
}
