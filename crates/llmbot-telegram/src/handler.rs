use llmbot_analytics::{AnalyticsRecorder, Interaction};
use llmbot_core::{BotError, CompletionClient, UserId};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::api::{ChatTransport, Message, OutgoingMessage};

pub const HELP_TEXT: &str = "Просто отправьте мне сообщение, и я отвечу используя LLM модель!";
pub const APOLOGY_TEXT: &str = "Извините, произошла ошибка при обработке вашего сообщения.";

/// A text message from a user, stripped down to what the handler needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub chat_id: i64,
    pub message_id: i64,
    pub user_id: UserId,
    pub first_name: String,
    pub text: String,
}

impl Inbound {
    /// `None` for messages without text or without a sender (channel posts).
    pub fn from_message(message: &Message) -> Option<Self> {
        let user = message.from.as_ref()?;
        let text = message.text.clone()?;
        Some(Self {
            chat_id: message.chat.id,
            message_id: message.message_id,
            user_id: UserId(user.id),
            first_name: user.first_name.clone(),
            text,
        })
    }

    fn reply(&self, text: impl Into<String>) -> OutgoingMessage {
        OutgoingMessage::reply(self.chat_id, self.message_id, text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command<'a> {
    Start,
    Help,
    Unknown(&'a str),
}

/// `Some` when `text` is a bot command. A `@botname` suffix is ignored.
fn parse_command(text: &str) -> Option<Command<'_>> {
    let word = text.strip_prefix('/')?.split_whitespace().next()?;
    let name = word.split('@').next().unwrap_or(word);
    Some(match name {
        "start" => Command::Start,
        "help" => Command::Help,
        other => Command::Unknown(other),
    })
}

fn greeting(inbound: &Inbound) -> String {
    format!(
        "Привет <a href=\"tg://user?id={}\">{}</a>! Я бот, который использует OpenAI API для ответов на ваши вопросы.",
        inbound.user_id,
        escape_html(&inbound.first_name)
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Routes inbound messages: commands get canned replies, everything else
/// goes to the completion model. Each handled action is recorded.
pub struct BotHandler {
    transport: Arc<dyn ChatTransport>,
    completion: Arc<dyn CompletionClient>,
    recorder: Arc<AnalyticsRecorder>,
}

impl BotHandler {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        completion: Arc<dyn CompletionClient>,
        recorder: Arc<AnalyticsRecorder>,
    ) -> Self {
        Self {
            transport,
            completion,
            recorder,
        }
    }

    /// Handle one message. Every handled action is recorded even when the
    /// reply cannot be delivered; the returned error is the delivery failure.
    pub async fn handle(&self, inbound: &Inbound) -> Result<(), BotError> {
        match parse_command(&inbound.text) {
            Some(Command::Start) => {
                let reply = inbound.reply(greeting(inbound)).html().force_reply();
                let sent = self.transport.send_text(reply).await;
                self.recorder.record(inbound.user_id, Interaction::Start).await;
                sent
            }
            Some(Command::Help) => {
                let sent = self.transport.send_text(inbound.reply(HELP_TEXT)).await;
                self.recorder.record(inbound.user_id, Interaction::Help).await;
                sent
            }
            Some(Command::Unknown(name)) => {
                debug!(user_id = %inbound.user_id, command = name, "Ignoring unknown command");
                Ok(())
            }
            None => self.answer(inbound).await,
        }
    }

    async fn answer(&self, inbound: &Inbound) -> Result<(), BotError> {
        if let Err(e) = self.transport.send_typing(inbound.chat_id).await {
            debug!(user_id = %inbound.user_id, error = %e, "Typing indicator not sent");
        }

        let completion = match self.completion.complete(&inbound.text).await {
            Ok(completion) => completion,
            Err(e) => {
                error!(user_id = %inbound.user_id, error = %e, "Error processing message");
                return self.apologize(inbound).await;
            }
        };

        let (prompt_tokens, completion_tokens) =
            (completion.prompt_tokens, completion.completion_tokens);
        let sent = self
            .transport
            .send_text(inbound.reply(completion.text.clone()))
            .await;

        // Recorded whether or not the reply got through.
        self.recorder
            .record(
                inbound.user_id,
                Interaction::Answer {
                    prompt_tokens,
                    completion_tokens,
                    request_payload: Some(completion.request_payload),
                    response_text: completion.text,
                },
            )
            .await;

        match sent {
            Ok(()) => {
                info!(
                    user_id = %inbound.user_id,
                    prompt_tokens,
                    completion_tokens,
                    "Answered message"
                );
                Ok(())
            }
            Err(e) => {
                error!(user_id = %inbound.user_id, error = %e, "Failed to deliver answer");
                self.apologize(inbound).await
            }
        }
    }

    async fn apologize(&self, inbound: &Inbound) -> Result<(), BotError> {
        self.transport.send_text(inbound.reply(APOLOGY_TEXT)).await
    }
}
