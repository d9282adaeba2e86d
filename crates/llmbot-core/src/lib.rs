pub mod completion;
pub mod config;
pub mod error;
pub mod shutdown;
pub mod types;

pub use completion::{Completion, CompletionClient, OpenAiCompletion};
pub use config::AppConfig;
pub use error::BotError;
pub use types::UserId;
