// Anti-delete: bounded cache of recent messages, and the report sent to the
// owner when one of them is revoked.

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::Bot;
use crate::atoms::constants::MESSAGE_CACHE_CAPACITY;
use crate::atoms::types::{jid_number, InboundMessage, MessageKey, MessageKind};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CachedMessage {
    pub chat: String,
    pub sender: String,
    pub sender_name: String,
    pub text: String,
    pub kind: MessageKind,
    pub sent_at: DateTime<Utc>,
}

/// FIFO cache keyed by message id. The oldest entry goes first when full.
pub(crate) struct MessageCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, CachedMessage>,
}

impl Default for MessageCache {
    fn default() -> Self {
        MessageCache::with_capacity(MESSAGE_CACHE_CAPACITY)
    }
}

impl MessageCache {
    pub fn with_capacity(capacity: usize) -> Self {
        MessageCache { capacity: capacity.max(1), order: VecDeque::new(), entries: HashMap::new() }
    }

    pub fn insert(&mut self, msg: &InboundMessage) {
        let sent_at = msg.timestamp
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);
        let entry = CachedMessage {
            chat: msg.chat().to_string(),
            sender: msg.sender().to_string(),
            sender_name: msg.display_name().to_string(),
            text: msg.text.clone(),
            kind: msg.kind,
            sent_at,
        };
        if self.entries.insert(msg.key.id.clone(), entry).is_none() {
            self.order.push_back(msg.key.id.clone());
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&CachedMessage> {
        self.entries.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<CachedMessage> {
        let entry = self.entries.remove(id)?;
        self.order.retain(|k| k != id);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn kind_label(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::Image => "image",
        MessageKind::Video => "video",
        MessageKind::Audio => "audio",
        MessageKind::Sticker => "sticker",
        MessageKind::Document => "document",
        MessageKind::Other => "message",
    }
}

pub(crate) fn format_report(cached: &CachedMessage) -> String {
    let body = if cached.text.trim().is_empty() {
        format!("[{}]", kind_label(cached.kind))
    } else {
        cached.text.clone()
    };
    let chat = if cached.chat == cached.sender { "Private chat".to_string() } else { cached.chat.clone() };
    format!(
        "🗑️ *Anti-Delete*\n\n👤 From: {} (@{})\n💬 Chat: {}\n🕒 Sent: {}\n📝 Message: {}",
        cached.sender_name,
        jid_number(&cached.sender),
        chat,
        cached.sent_at.format("%Y-%m-%d %H:%M:%S UTC"),
        body,
    )
}

impl Bot {
    pub(crate) async fn handle_deleted(self: &Arc<Self>, keys: Vec<MessageKey>) {
        for key in keys {
            if key.from_me {
                continue;
            }
            let cached = self.cache.lock().remove(&key.id);
            match cached {
                Some(cached) => {
                    info!("[anti-delete] {} deleted a message in {}", cached.sender, cached.chat);
                    self.notify_owner(&format_report(&cached)).await;
                }
                None => debug!("[anti-delete] Deleted message {} not in cache", key.id),
            }
        }
    }
}
