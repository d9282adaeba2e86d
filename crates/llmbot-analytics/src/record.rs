use chrono::{DateTime, Utc};
use llmbot_core::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of user action captured by analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Action {
    Start,
    Help,
    Answer,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Help => "help",
            Action::Answer => "answer",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Action::Start),
            "help" => Ok(Action::Help),
            "answer" => Ok(Action::Answer),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// What happened, with the data only a completed exchange carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Start,
    Help,
    Answer {
        prompt_tokens: u32,
        completion_tokens: u32,
        request_payload: Option<serde_json::Value>,
        response_text: String,
    },
}

impl Interaction {
    pub fn action(&self) -> Action {
        match self {
            Interaction::Start => Action::Start,
            Interaction::Help => Action::Help,
            Interaction::Answer { .. } => Action::Answer,
        }
    }
}

/// One recorded user action. Immutable once built; sinks only ever borrow it.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    user_id: UserId,
    timestamp: DateTime<Utc>,
    action: Action,
    completion_tokens: u32,
    prompt_tokens: u32,
    model_name: String,
    request_payload: Option<serde_json::Value>,
    response_text: Option<String>,
}

impl EventRecord {
    pub fn new(
        user_id: UserId,
        timestamp: DateTime<Utc>,
        model_name: impl Into<String>,
        interaction: Interaction,
    ) -> Self {
        let action = interaction.action();
        let (prompt_tokens, completion_tokens, request_payload, response_text) = match interaction
        {
            Interaction::Answer {
                prompt_tokens,
                completion_tokens,
                request_payload,
                response_text,
            } => (
                prompt_tokens,
                completion_tokens,
                request_payload,
                Some(response_text),
            ),
            Interaction::Start | Interaction::Help => (0, 0, None, None),
        };

        Self {
            user_id,
            timestamp,
            action,
            completion_tokens,
            prompt_tokens,
            model_name: model_name.into(),
            request_payload,
            response_text,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn completion_tokens(&self) -> u32 {
        self.completion_tokens
    }

    pub fn prompt_tokens(&self) -> u32 {
        self.prompt_tokens
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn request_payload(&self) -> Option<&serde_json::Value> {
        self.request_payload.as_ref()
    }

    pub fn response_text(&self) -> Option<&str> {
        self.response_text.as_deref()
    }
}
