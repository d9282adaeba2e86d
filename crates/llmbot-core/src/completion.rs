//! Single-turn chat completion against an OpenAI-compatible endpoint.

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::BotError;

/// Reply text plus the token usage reported by the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// The outbound request as JSON, kept for analytics.
    pub request_payload: serde_json::Value,
}

/// Turns user text into a model reply.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Name of the model requests are sent to.
    fn model_name(&self) -> &str;

    async fn complete(&self, user_text: &str) -> Result<Completion, BotError>;
}

pub struct OpenAiCompletion {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiCompletion {
    pub fn new(config: &ProviderConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(&config.api_base)
            .with_api_key(
                config
                    .api_key
                    .clone()
                    .unwrap_or_else(|| "not-needed".to_string()),
            );

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, user_text: &str) -> Result<Completion, BotError> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(user_text)
            .build()
            .map_err(|e| BotError::Completion(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .temperature(self.temperature)
            .build()
            .map_err(|e| BotError::Completion(e.to_string()))?;
        let request_payload = serde_json::to_value(&request)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| BotError::Completion(e.to_string()))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| BotError::Completion("No content in response".into()))?;

        let (prompt_tokens, completion_tokens) = response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        debug!(prompt_tokens, completion_tokens, "Completion received");

        Ok(Completion {
            text,
            prompt_tokens,
            completion_tokens,
            request_payload,
        })
    }
}
