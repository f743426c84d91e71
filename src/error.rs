//! Errors raised at the VK API boundary.

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("VK API error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("long-poll session rejected (failed={code})")]
    SessionExpired { code: i64 },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Network or HTTP-level failure, as opposed to an answer from the API.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Status { .. })
    }
}
