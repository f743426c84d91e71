use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{ApiConfig, LongPollConfig};
use crate::error::ApiError;
use crate::session::{Cursor, LongPollSession};

/// Extra time on top of the server-side wait before the HTTP request is
/// considered lost.
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Upper bound for ordinary method calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// The VK methods the bot relies on. Everything above this trait is
/// network-agnostic.
#[async_trait]
pub trait VkApi: Send + Sync {
    /// `messages.getLongPollServer`
    async fn get_long_poll_server(&self, need_pts: bool) -> Result<LongPollSession, ApiError>;

    /// One blocking `a_check` request against the session's server.
    async fn check_long_poll(
        &self,
        session: &LongPollSession,
        mode: u32,
    ) -> Result<RawPoll, ApiError>;

    /// `messages.send`; returns the id of the sent message.
    async fn send_message(
        &self,
        peer_id: i64,
        text: &str,
        attachments: &[String],
    ) -> Result<i64, ApiError>;

    /// `messages.delete`
    async fn delete_messages(&self, ids: &[i64], delete_for_all: bool) -> Result<(), ApiError>;

    /// `polls.create`
    async fn create_poll(
        &self,
        owner_id: Option<i64>,
        question: &str,
        answers: &[String],
    ) -> Result<Poll, ApiError>;

    /// `users.get`
    async fn get_users(&self, ids: &[i64]) -> Result<Vec<User>, ApiError>;

    /// `messages.getChat`
    async fn get_chat(&self, chat_id: i64) -> Result<Chat, ApiError>;
}

/// Undecoded long-poll answer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPoll {
    pub ts: Cursor,
    pub pts: Option<i64>,
    pub updates: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

impl User {
    /// Inline mention that notifies the user.
    pub fn mention(&self) -> String {
        let name = if self.first_name.is_empty() {
            format!("id{}", self.id)
        } else {
            self.first_name.clone()
        };
        format!("[id{}|{}]", self.id, name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub users: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Poll {
    pub id: i64,
    pub owner_id: i64,
    #[serde(default)]
    pub question: String,
}

impl Poll {
    pub fn attachment(&self) -> String {
        format!("poll{}_{}", self.owner_id, self.id)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: Option<T>,
    error: Option<RemoteError>,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct LongPollResponse {
    failed: Option<i64>,
    ts: Option<Cursor>,
    pts: Option<i64>,
    #[serde(default)]
    updates: Vec<Value>,
}

/// reqwest-backed VK client.
pub struct VkClient {
    client: reqwest::Client,
    token: String,
    api: ApiConfig,
    longpoll: LongPollConfig,
}

impl VkClient {
    pub fn new(token: impl Into<String>, api: ApiConfig, longpoll: LongPollConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            api,
            longpoll,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.api.base_url, method);
        params.push(("v", self.api.version.clone()));

        debug!("Calling VK method {}", method);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .form(&params)
            .timeout(API_TIMEOUT)
            .send()
            .await?;

        let body = checked_body(response).await?;
        parse_envelope(&body)
    }
}

/// Body of a 2xx response; anything else is a transport failure.
async fn checked_body(response: reqwest::Response) -> Result<Vec<u8>, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status { status, body });
    }
    Ok(response.bytes().await?.to_vec())
}

fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let envelope: Envelope<T> = serde_json::from_slice(body)?;
    match (envelope.response, envelope.error) {
        (_, Some(error)) => Err(ApiError::Remote {
            code: error.error_code,
            message: error.error_msg,
        }),
        (Some(response), None) => Ok(response),
        (None, None) => Err(ApiError::Remote {
            code: 0,
            message: "empty response".to_string(),
        }),
    }
}

fn parse_long_poll(body: &[u8]) -> Result<RawPoll, ApiError> {
    let response: LongPollResponse = serde_json::from_slice(body)?;
    if let Some(code) = response.failed {
        return Err(ApiError::SessionExpired { code });
    }
    let ts = response.ts.ok_or(ApiError::SessionExpired { code: 0 })?;
    Ok(RawPoll {
        ts,
        pts: response.pts,
        updates: response.updates,
    })
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl VkApi for VkClient {
    async fn get_long_poll_server(&self, need_pts: bool) -> Result<LongPollSession, ApiError> {
        self.call(
            "messages.getLongPollServer",
            vec![
                ("need_pts", u8::from(need_pts).to_string()),
                ("lp_version", self.longpoll.version.to_string()),
            ],
        )
        .await
    }

    async fn check_long_poll(
        &self,
        session: &LongPollSession,
        mode: u32,
    ) -> Result<RawPoll, ApiError> {
        let params = [
            ("act", "a_check".to_string()),
            ("key", session.key.clone()),
            ("ts", session.ts.to_string()),
            ("wait", self.longpoll.wait.to_string()),
            ("mode", mode.to_string()),
            ("version", self.longpoll.version.to_string()),
        ];

        let response = self
            .client
            .get(session.url())
            .query(&params)
            .timeout(Duration::from_secs(self.longpoll.wait) + POLL_GRACE)
            .send()
            .await?;

        let body = checked_body(response).await?;
        parse_long_poll(&body)
    }

    async fn send_message(
        &self,
        peer_id: i64,
        text: &str,
        attachments: &[String],
    ) -> Result<i64, ApiError> {
        info!("Sending message to {}: {}", peer_id, text);

        let mut params = vec![
            ("peer_id", peer_id.to_string()),
            ("message", text.to_string()),
            ("random_id", rand::random::<i32>().to_string()),
        ];
        if !attachments.is_empty() {
            params.push(("attachment", attachments.join(",")));
        }
        self.call("messages.send", params).await
    }

    async fn delete_messages(&self, ids: &[i64], delete_for_all: bool) -> Result<(), ApiError> {
        let _: Value = self
            .call(
                "messages.delete",
                vec![
                    ("message_ids", join_ids(ids)),
                    ("delete_for_all", u8::from(delete_for_all).to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn create_poll(
        &self,
        owner_id: Option<i64>,
        question: &str,
        answers: &[String],
    ) -> Result<Poll, ApiError> {
        let mut params = vec![
            ("question", question.to_string()),
            ("add_answers", serde_json::to_string(answers)?),
        ];
        if let Some(owner_id) = owner_id {
            params.push(("owner_id", owner_id.to_string()));
        }
        self.call("polls.create", params).await
    }

    async fn get_users(&self, ids: &[i64]) -> Result<Vec<User>, ApiError> {
        self.call("users.get", vec![("user_ids", join_ids(ids))])
            .await
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Chat, ApiError> {
        self.call("messages.getChat", vec![("chat_id", chat_id.to_string())])
            .await
    }
}
