use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::api::VkApi;
use crate::events::{MessageEvent, CHAT_PEER_OFFSET};

/// VK rejects longer messages.
const MAX_MESSAGE_LEN: usize = 4000;

/// Receives chat messages that look like commands.
///
/// Implementations may make any number of API calls. They run on the message
/// worker, so a slow handler delays every message queued behind it.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, api: &dyn VkApi, chat_id: i64, message: &MessageEvent) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Mention every chat member, followed by an optional note.
    All(String),
    Poll {
        question: String,
        answers: Vec<String>,
    },
    Unknown(String),
}

impl Command {
    /// Parse `/name args`. Returns `None` for ordinary text.
    pub fn parse(text: &str, prefix: char) -> Option<Self> {
        let body = text.trim_start().strip_prefix(prefix)?;
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };
        // "/help@club123" when the bot is addressed explicitly
        let name = name.split('@').next().unwrap_or_default().to_lowercase();

        let command = match name.as_str() {
            "help" | "start" => Command::Help,
            "all" => Command::All(args.to_string()),
            "poll" => {
                let mut parts = args
                    .split('|')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string);
                Command::Poll {
                    question: parts.next().unwrap_or_default(),
                    answers: parts.collect(),
                }
            }
            _ => Command::Unknown(name),
        };
        Some(command)
    }
}

/// Built-in chat commands.
pub struct ChatCommands {
    prefix: char,
}

impl ChatCommands {
    pub fn new(prefix: char) -> Self {
        Self { prefix }
    }

    fn help_text(&self) -> String {
        let p = self.prefix;
        format!(
            "Commands:\n\
             {p}help - this message\n\
             {p}all [text] - mention everyone in the chat\n\
             {p}poll Question | answer | answer - start a poll"
        )
    }

    async fn mention_all(
        &self,
        api: &dyn VkApi,
        peer_id: i64,
        chat_id: i64,
        sender: Option<i64>,
        note: &str,
    ) -> Result<()> {
        let chat = api
            .get_chat(chat_id)
            .await
            .with_context(|| format!("Failed to load chat {}", chat_id))?;

        let ids: Vec<i64> = chat
            .users
            .into_iter()
            .filter(|&id| id > 0 && Some(id) != sender)
            .collect();
        if ids.is_empty() {
            api.send_message(peer_id, "Nobody to mention.", &[]).await?;
            return Ok(());
        }

        let users = api.get_users(&ids).await.context("Failed to load users")?;
        let mut text = users
            .iter()
            .map(|u| u.mention())
            .collect::<Vec<_>>()
            .join(" ");
        if !note.is_empty() {
            text.push('\n');
            text.push_str(note);
        }

        info!(
            "Mentioning {} members of chat {} '{}'",
            users.len(),
            chat.id,
            chat.title
        );
        for chunk in split_message(&text, MAX_MESSAGE_LEN) {
            api.send_message(peer_id, &chunk, &[]).await?;
        }
        Ok(())
    }

    async fn start_poll(
        &self,
        api: &dyn VkApi,
        peer_id: i64,
        message: &MessageEvent,
        question: &str,
        answers: &[String],
    ) -> Result<()> {
        if question.is_empty() || answers.len() < 2 {
            let usage = format!(
                "Usage: {}poll Question | answer | answer",
                self.prefix
            );
            api.send_message(peer_id, &usage, &[]).await?;
            return Ok(());
        }

        let poll = api
            .create_poll(None, question, answers)
            .await
            .context("Failed to create poll")?;
        info!("Created poll {} '{}'", poll.id, poll.question);
        api.send_message(peer_id, "", &[poll.attachment()]).await?;

        if let Err(e) = api.delete_messages(&[message.message_id], true).await {
            warn!("Could not delete poll command {}: {}", message.message_id, e);
        }
        Ok(())
    }
}

/// Split on line or word boundaries so mentions are never cut in half.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].trim_end().to_string());
        start = actual_end;
    }

    chunks
}

#[async_trait]
impl CommandHandler for ChatCommands {
    async fn handle(&self, api: &dyn VkApi, chat_id: i64, message: &MessageEvent) -> Result<()> {
        let Some(command) = Command::parse(message.text(), self.prefix) else {
            return Ok(());
        };
        let peer_id = CHAT_PEER_OFFSET + chat_id;

        info!("Command in chat {}: {:?}", chat_id, command);

        match command {
            Command::Help => {
                api.send_message(peer_id, &self.help_text(), &[]).await?;
            }
            Command::All(note) => {
                self.mention_all(api, peer_id, chat_id, message.sender_id(), &note)
                    .await?;
            }
            Command::Poll { question, answers } => {
                self.start_poll(api, peer_id, message, &question, &answers)
                    .await?;
            }
            Command::Unknown(name) => {
                let hint = format!("Unknown command '{}'. Try {}help", name, self.prefix);
                api.send_message(peer_id, &hint, &[]).await?;
            }
        }
        Ok(())
    }
}
