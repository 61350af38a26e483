use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::{
    completion::{ChatMessage, CompletionClient, CompletionError, CompletionRequest},
    contracts::{JokeRequest, JokeResponse},
};

const GENERATION_TEMPERATURE: f32 = 0.7;

const SYSTEM_PROMPT: &str = "You are a professional comedian API. \
You must generate a joke based on the user's topic and tone. \
You MUST output raw JSON with the keys: 'setup', 'punchline', and optional 'explanation'.";

/// Errors surfaced while producing one joke.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The completion call itself failed.
    #[error("completion call failed: {0}")]
    Upstream(#[from] CompletionError),
    /// The completion text was empty or not valid JSON.
    #[error("completion output was not valid JSON: {0}")]
    Parse(String),
    /// The completion JSON did not match the joke schema.
    #[error("completion output did not match the joke schema: {0}")]
    Schema(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawJoke {
    setup: String,
    punchline: String,
    #[serde(default)]
    explanation: Option<String>,
}

/// Builds the creative prompt, calls the completion endpoint, and
/// validates the result into a typed joke.
pub struct JokeGenerator {
    client: Arc<dyn CompletionClient>,
    max_tokens: u32,
}

impl std::fmt::Debug for JokeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JokeGenerator")
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl JokeGenerator {
    /// Creates a generator bound to a completion client and token budget.
    #[must_use]
    pub fn new(client: Arc<dyn CompletionClient>, max_tokens: u32) -> Self {
        Self { client, max_tokens }
    }

    /// Generates one joke for the request. No retries; a transient
    /// upstream failure propagates as-is.
    pub async fn generate(&self, request: &JokeRequest) -> Result<JokeResponse, GeneratorError> {
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Topic: {}\nTone: {}\nLanguage: {}",
                request.topic,
                request.tone.label(),
                request.language
            )),
        ];
        let call = CompletionRequest::new(messages, self.max_tokens, GENERATION_TEMPERATURE)
            .with_json_output();
        let raw = self.client.complete(call).await?;
        parse_joke(&raw)
    }
}

fn parse_joke(text: &str) -> Result<JokeResponse, GeneratorError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(GeneratorError::Parse("completion text was empty".to_string()));
    }
    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => {
            let block = extract_json_block(trimmed).ok_or_else(|| {
                GeneratorError::Parse("no JSON object in completion text".to_string())
            })?;
            serde_json::from_str(block).map_err(|err| GeneratorError::Parse(err.to_string()))?
        }
    };
    let raw: RawJoke =
        serde_json::from_value(value).map_err(|err| GeneratorError::Schema(err.to_string()))?;
    if raw.setup.trim().is_empty() {
        return Err(GeneratorError::Schema("setup must not be empty".to_string()));
    }
    if raw.punchline.trim().is_empty() {
        return Err(GeneratorError::Schema(
            "punchline must not be empty".to_string(),
        ));
    }
    Ok(JokeResponse {
        setup: raw.setup,
        punchline: raw.punchline,
        explanation: raw.explanation,
    })
}

fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end >= start {
        Some(&text[start..=end])
    } else {
        None
    }
}
