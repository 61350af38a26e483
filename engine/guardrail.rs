use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use shared_telemetry::{LogLevel, Telemetry};
use thiserror::Error;

use crate::{
    completion::{ChatMessage, CompletionClient, CompletionError, CompletionRequest},
    contracts::JokeResponse,
};

const SAFETY_MAX_TOKENS: u32 = 50;
const SAFETY_TEMPERATURE: f32 = 0.0;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SafetyVerdict {
    safe: bool,
}

#[derive(Debug, Error)]
enum GuardrailCheckError {
    #[error("safety check call failed: {0}")]
    Upstream(#[from] CompletionError),
    #[error("safety verdict was not strict JSON: {0}")]
    Verdict(String),
}

/// Model-backed safety check on generated content.
///
/// Fail closed: any internal failure resolves to unsafe.
pub struct GuardrailValidator {
    client: Arc<dyn CompletionClient>,
    telemetry: Option<Telemetry>,
}

impl std::fmt::Debug for GuardrailValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardrailValidator").finish()
    }
}

impl GuardrailValidator {
    /// Creates a validator bound to a completion client.
    #[must_use]
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            telemetry: None,
        }
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Classifies the joke. Never raises; errors resolve to `false`.
    pub async fn is_safe(&self, joke: &JokeResponse) -> bool {
        match self.check(joke).await {
            Ok(safe) => safe,
            Err(err) => {
                if let Some(tel) = &self.telemetry {
                    let _ = tel.log(
                        LogLevel::Warn,
                        "guardrail.check.failed",
                        json!({ "reason": err.to_string() }),
                    );
                }
                false
            }
        }
    }

    async fn check(&self, joke: &JokeResponse) -> Result<bool, GuardrailCheckError> {
        let prompt = format!(
            "Setup: {}\nPunchline: {}\n\
             Is this joke safe for work, non-offensive, and appropriate for general audiences? \
             Reply strictly with JSON: {{\"safe\": boolean}}",
            joke.setup, joke.punchline
        );
        let call = CompletionRequest::new(
            vec![ChatMessage::user(prompt)],
            SAFETY_MAX_TOKENS,
            SAFETY_TEMPERATURE,
        )
        .with_json_output();
        let raw = self.client.complete(call).await?;
        let verdict: SafetyVerdict = serde_json::from_str(raw.trim())
            .map_err(|err| GuardrailCheckError::Verdict(err.to_string()))?;
        Ok(verdict.safe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::LoopbackCompletionClient;

    fn joke() -> JokeResponse {
        JokeResponse {
            setup: "Why did the cat sit on the keyboard?".to_string(),
            punchline: "To keep an eye on the mouse.".to_string(),
            explanation: None,
        }
    }

    fn validator(client: LoopbackCompletionClient) -> GuardrailValidator {
        GuardrailValidator::new(Arc::new(client))
    }

    #[tokio::test]
    async fn safe_verdict_passes() {
        let client = LoopbackCompletionClient::new();
        client.push_text(r#"{"safe": true}"#);
        assert!(validator(client).is_safe(&joke()).await);
    }

    #[tokio::test]
    async fn unsafe_verdict_blocks() {
        let client = LoopbackCompletionClient::new();
        client.push_text(r#"{"safe": false}"#);
        assert!(!validator(client).is_safe(&joke()).await);
    }

    #[tokio::test]
    async fn upstream_failure_fails_closed() {
        let client = LoopbackCompletionClient::new();
        client.push_failure("timeout");
        assert!(!validator(client).is_safe(&joke()).await);
    }

    #[tokio::test]
    async fn malformed_verdict_fails_closed() {
        let client = LoopbackCompletionClient::new();
        client.push_text("probably fine");
        assert!(!validator(client).is_safe(&joke()).await);
    }

    #[tokio::test]
    async fn missing_key_fails_closed() {
        let client = LoopbackCompletionClient::new();
        client.push_text(r#"{"verdict": "safe"}"#);
        assert!(!validator(client).is_safe(&joke()).await);
    }
}
