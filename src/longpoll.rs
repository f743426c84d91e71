use std::sync::Arc;

use tracing::debug;

use crate::api::VkApi;
use crate::error::ApiError;
use crate::events::Event;
use crate::session::{Cursor, LongPollSession};

/// Result of a single long-poll round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub events: Vec<Event>,
    pub ts: Cursor,
    pub pts: Option<i64>,
}

pub struct LongPollClient {
    api: Arc<dyn VkApi>,
    mode: u32,
    need_pts: bool,
}

impl LongPollClient {
    pub fn new(api: Arc<dyn VkApi>, mode: u32, need_pts: bool) -> Self {
        Self {
            api,
            mode,
            need_pts,
        }
    }

    /// Handshake for a brand-new session. Retrying is the caller's call.
    pub async fn acquire_session(&self) -> Result<LongPollSession, ApiError> {
        let session = self.api.get_long_poll_server(self.need_pts).await?;
        debug!("Acquired long-poll session on {} at ts {}", session.server, session.ts);
        Ok(session)
    }

    /// Wait for the next batch of events. Blocks for up to the server's wait
    /// window; an empty batch just means the window expired.
    pub async fn poll_once(&self, session: &LongPollSession) -> Result<PollOutcome, ApiError> {
        let raw = self.api.check_long_poll(session, self.mode).await?;

        let events = raw
            .updates
            .iter()
            .map(|update| match update.as_array() {
                Some(record) => Event::decode(record),
                None => Event::decode(std::slice::from_ref(update)),
            })
            .collect();

        Ok(PollOutcome {
            events,
            ts: raw.ts,
            pts: raw.pts,
        })
    }
}
