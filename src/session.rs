use std::fmt;

use serde::{Deserialize, Deserializer};

/// Opaque long-poll position. The server sends it either as a number or a
/// string depending on the endpoint, so both are accepted and kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Cursor::new(n.to_string()),
            Raw::Text(s) => Cursor::new(s),
        })
    }
}

/// A session handed out by `messages.getLongPollServer`.
///
/// The key and server are fixed for the lifetime of the session; only the
/// cursors move. When the server rejects the session it must be replaced by
/// a fresh one, never repaired.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LongPollSession {
    pub key: String,
    pub server: String,
    pub ts: Cursor,
    #[serde(default)]
    pub pts: Option<i64>,
}

impl LongPollSession {
    /// Replace the cursor with the one returned by the last poll.
    pub fn advance(&mut self, ts: Cursor, pts: Option<i64>) {
        self.ts = ts;
        if pts.is_some() {
            self.pts = pts;
        }
    }

    /// The server is returned without a scheme, e.g. `lp.vk.com/wh123`.
    pub fn url(&self) -> String {
        if self.server.starts_with("http://") || self.server.starts_with("https://") {
            self.server.clone()
        } else {
            format!("https://{}", self.server)
        }
    }
}
