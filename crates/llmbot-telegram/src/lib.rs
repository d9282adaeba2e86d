//! Telegram front end for llmbot: Bot API long polling, command routing and
//! the completion round trip, with every handled action passed to the
//! analytics recorder.

pub mod api;
pub mod handler;
pub mod polling;

pub use api::{ChatTransport, OutgoingMessage, TelegramClient};
pub use handler::{BotHandler, Inbound};
pub use polling::run_polling;
