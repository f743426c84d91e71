use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

/// Peer ids at or above this value are multi-user chats.
pub const CHAT_PEER_OFFSET: i64 = 2_000_000_000;

/// Long-poll event code for a new message.
pub const NEW_MESSAGE: i64 = 4;

/// Flag bit set on messages sent by the bot's own account.
pub const FLAG_OUTBOX: i64 = 2;

/// A single long-poll update.
///
/// Only new messages are decoded; every other code degrades to `Unknown`
/// so the bot keeps working when the server introduces new event kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message(MessageEvent),
    Unknown { code: i64 },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageEvent {
    pub message_id: i64,
    pub flags: i64,
    pub peer_id: Option<i64>,
    pub timestamp: Option<i64>,
    pub text: Option<String>,
    /// Service fields such as the chat title or `from` (the real sender in chats).
    pub extra: Option<Map<String, Value>>,
    pub attachments: Option<Map<String, Value>>,
}

impl Event {
    /// Decode one positional update record, e.g.
    /// `[4, 1234, 532481, 2000000007, 1540000000, "/poll", {"from": "42"}, {}]`.
    pub fn decode(record: &[Value]) -> Self {
        debug!("Raw update: {:?}", record);

        let code = int_at(record, 0).unwrap_or_default();
        if code != NEW_MESSAGE || record.len() < 3 {
            return Event::Unknown { code };
        }

        Event::Message(MessageEvent {
            message_id: int_at(record, 1).unwrap_or_default(),
            flags: int_at(record, 2).unwrap_or_default(),
            peer_id: int_at(record, 3),
            timestamp: int_at(record, 4),
            text: record.get(5).and_then(Value::as_str).map(str::to_string),
            extra: object_at(record, 6),
            attachments: object_at(record, 7),
        })
    }

    pub fn code(&self) -> i64 {
        match self {
            Event::Message(_) => NEW_MESSAGE,
            Event::Unknown { code } => *code,
        }
    }
}

impl MessageEvent {
    pub fn is_chat(&self) -> bool {
        self.peer_id.is_some_and(|peer| peer >= CHAT_PEER_OFFSET)
    }

    pub fn is_outbox(&self) -> bool {
        self.flags & FLAG_OUTBOX == FLAG_OUTBOX
    }

    /// Local chat id, only for chat-scoped messages.
    pub fn chat_id(&self) -> Option<i64> {
        self.peer_id
            .filter(|_| self.is_chat())
            .map(|peer| peer - CHAT_PEER_OFFSET)
    }

    /// The user who wrote the message. In chats the peer is the chat itself,
    /// so the author comes from the `from` extra field.
    pub fn sender_id(&self) -> Option<i64> {
        if !self.is_chat() {
            return self.peer_id;
        }
        self.extra
            .as_ref()
            .and_then(|extra| extra.get("from"))
            .and_then(loose_int)
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

fn int_at(record: &[Value], idx: usize) -> Option<i64> {
    record.get(idx).and_then(loose_int)
}

fn object_at(record: &[Value], idx: usize) -> Option<Map<String, Value>> {
    record.get(idx).and_then(Value::as_object).cloned()
}

/// The server sends some ids as strings (`"from": "42"`).
fn loose_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
