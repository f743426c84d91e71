//! Scripted in-memory `VkApi` for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{Chat, Poll, RawPoll, User, VkApi};
use crate::error::ApiError;
use crate::session::{Cursor, LongPollSession};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Handshake,
    Poll { key: String, ts: String },
    Send(i64, String, Vec<String>),
    Delete(Vec<i64>),
    CreatePoll(String, Vec<String>),
    GetUsers(Vec<i64>),
    GetChat(i64),
}

#[derive(Default)]
pub struct MockApi {
    calls: Mutex<Vec<Call>>,
    handshakes: Mutex<VecDeque<Result<LongPollSession, ApiError>>>,
    polls: Mutex<VecDeque<Result<RawPoll, ApiError>>>,
    chat_users: Mutex<Vec<i64>>,
    fail_sends: Mutex<bool>,
    sessions_issued: Mutex<u32>,
}

pub fn session(key: &str, ts: &str) -> LongPollSession {
    LongPollSession {
        key: key.to_string(),
        server: "lp.example.com/wh1".to_string(),
        ts: Cursor::new(ts),
        pts: None,
    }
}

pub fn poll(ts: &str, updates: Vec<Value>) -> RawPoll {
    RawPoll {
        ts: Cursor::new(ts),
        pts: None,
        updates,
    }
}

pub fn transport_error() -> ApiError {
    ApiError::Status {
        status: reqwest::StatusCode::BAD_GATEWAY,
        body: "bad gateway".to_string(),
    }
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_handshake(&self, result: Result<LongPollSession, ApiError>) {
        self.handshakes.lock().unwrap().push_back(result);
    }

    /// Scripted poll results; once exhausted, polls hang like an idle server.
    pub fn push_poll(&self, result: Result<RawPoll, ApiError>) {
        self.polls.lock().unwrap().push_back(result);
    }

    pub fn set_chat_users(&self, users: Vec<i64>) {
        *self.chat_users.lock().unwrap() = users;
    }

    pub fn fail_sends(&self) {
        *self.fail_sends.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<(i64, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send(peer, text, _) => Some((peer, text)),
                _ => None,
            })
            .collect()
    }

    /// Wait until the recorded calls satisfy `pred`.
    pub async fn wait_for(&self, pred: impl Fn(&[Call]) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if pred(self.calls().as_slice()) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting; calls so far: {:?}", self.calls());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VkApi for MockApi {
    async fn get_long_poll_server(&self, _need_pts: bool) -> Result<LongPollSession, ApiError> {
        self.record(Call::Handshake);
        let scripted = self.handshakes.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            let mut issued = self.sessions_issued.lock().unwrap();
            *issued += 1;
            Ok(session(&format!("auto{}", issued), "1"))
        })
    }

    async fn check_long_poll(
        &self,
        session: &LongPollSession,
        _mode: u32,
    ) -> Result<RawPoll, ApiError> {
        self.record(Call::Poll {
            key: session.key.clone(),
            ts: session.ts.to_string(),
        });
        let scripted = self.polls.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn send_message(
        &self,
        peer_id: i64,
        text: &str,
        attachments: &[String],
    ) -> Result<i64, ApiError> {
        self.record(Call::Send(peer_id, text.to_string(), attachments.to_vec()));
        if *self.fail_sends.lock().unwrap() {
            return Err(ApiError::Remote {
                code: 901,
                message: "Can't send messages for users without permission".to_string(),
            });
        }
        Ok(1)
    }

    async fn delete_messages(&self, ids: &[i64], _delete_for_all: bool) -> Result<(), ApiError> {
        self.record(Call::Delete(ids.to_vec()));
        Ok(())
    }

    async fn create_poll(
        &self,
        _owner_id: Option<i64>,
        question: &str,
        answers: &[String],
    ) -> Result<Poll, ApiError> {
        self.record(Call::CreatePoll(question.to_string(), answers.to_vec()));
        Ok(Poll {
            id: 1,
            owner_id: -1,
            question: question.to_string(),
        })
    }

    async fn get_users(&self, ids: &[i64]) -> Result<Vec<User>, ApiError> {
        self.record(Call::GetUsers(ids.to_vec()));
        Ok(ids
            .iter()
            .map(|&id| User {
                id,
                first_name: format!("User{}", id),
            })
            .collect())
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Chat, ApiError> {
        self.record(Call::GetChat(chat_id));
        Ok(Chat {
            id: chat_id,
            title: "Test chat".to_string(),
            users: self.chat_users.lock().unwrap().clone(),
        })
    }
}
