//! Minimal Telegram Bot API client: long polling plus the two send calls the
//! bot uses.

use async_trait::async_trait;
use llmbot_core::BotError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Slack on top of the long-poll timeout before the HTTP request gives up.
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
}

/// Asks the client to open a reply box. `selective` limits it to the user
/// being replied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ForceReply {
    pub force_reply: bool,
    pub selective: bool,
}

/// Body of a `sendMessage` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<ForceReply>,
}

impl OutgoingMessage {
    pub fn reply(chat_id: i64, reply_to: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            reply_to_message_id: Some(reply_to),
            parse_mode: None,
            reply_markup: None,
        }
    }

    pub fn html(mut self) -> Self {
        self.parse_mode = Some(ParseMode::Html);
        self
    }

    pub fn force_reply(mut self) -> Self {
        self.reply_markup = Some(ForceReply {
            force_reply: true,
            selective: true,
        });
        self
    }
}

/// Outbound side of a chat, as seen by the message handler.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, message: OutgoingMessage) -> Result<(), BotError>;

    /// Show the "typing..." indicator in a chat.
    async fn send_typing(&self, chat_id: i64) -> Result<(), BotError>;
}

/// Envelope every Bot API method responds with.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        }
    }

    async fn call<T, B>(
        &self,
        method: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, BotError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let envelope: ApiResponse<T> = request.send().await?.json().await?;
        match envelope {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(BotError::Transport(format!(
                "{} failed: {}",
                method,
                description.unwrap_or_else(|| "no description".into())
            ))),
        }
    }

    /// Long-poll for updates after `offset`, waiting up to `timeout_secs`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, BotError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                &body,
                Some(Duration::from_secs(timeout_secs) + POLL_GRACE),
            )
            .await?;
        if !updates.is_empty() {
            debug!(count = updates.len(), "Received updates");
        }
        Ok(updates)
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_text(&self, message: OutgoingMessage) -> Result<(), BotError> {
        let _sent: serde_json::Value = self.call("sendMessage", &message, None).await?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), BotError> {
        let body = serde_json::json!({ "chat_id": chat_id, "action": "typing" });
        let _done: bool = self.call("sendChatAction", &body, None).await?;
        Ok(())
    }
}
