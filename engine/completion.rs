use std::{collections::VecDeque, fmt, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Role of one chat message sent to the completion endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Standing instruction for the model.
    System,
    /// Caller-supplied content.
    User,
}

/// One message in a completion conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// One completion call: messages plus sampling bounds.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Conversation to complete.
    pub messages: Vec<ChatMessage>,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whether to request the endpoint's JSON output mode.
    pub json_output: bool,
}

impl CompletionRequest {
    /// Creates a plain-text completion request.
    #[must_use]
    pub const fn new(messages: Vec<ChatMessage>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            messages,
            max_tokens,
            temperature,
            json_output: false,
        }
    }

    /// Requests JSON output mode from the endpoint.
    #[must_use]
    pub const fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Single error kind covering every remote-call failure mode.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Network failure or wall-clock timeout.
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-2xx response from the endpoint.
    #[error("upstream returned status {0}")]
    Status(u16),
    /// Malformed or empty completion payload.
    #[error("malformed completion envelope: {0}")]
    Envelope(String),
}

/// Abstraction over the remote completion endpoint.
///
/// Pure adapter: no retries, no caching, no interpretation of content.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Sends the request and returns the raw completion text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}

#[derive(Debug, Deserialize)]
struct ChatEnvelope {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Reqwest-backed client speaking the chat-completions wire format.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl fmt::Debug for HttpCompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCompletionClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl HttpCompletionClient {
    /// Builds a client with a wall-clock timeout on every call.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CompletionError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    fn payload(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut payload = json!({
            "model": self.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_output {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        payload
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let mut call = self.client.post(&self.endpoint).json(&self.payload(&request));
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call
            .send()
            .await
            .map_err(|err| CompletionError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Status(status.as_u16()));
        }
        let envelope: ChatEnvelope = response
            .json()
            .await
            .map_err(|err| CompletionError::Envelope(err.to_string()))?;
        let content = envelope
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(CompletionError::Envelope(
                "completion content was empty".to_string(),
            ));
        }
        Ok(content)
    }
}

#[derive(Debug, Clone)]
enum ScriptedReply {
    Text(String),
    Failure(String),
}

/// In-memory client replaying scripted replies, for tests and offline runs.
#[derive(Debug, Default)]
pub struct LoopbackCompletionClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
}

impl LoopbackCompletionClient {
    /// Creates an empty loopback client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a completion text returned by the next call.
    pub fn push_text(&self, text: impl Into<String>) {
        self.replies.lock().push_back(ScriptedReply::Text(text.into()));
    }

    /// Queues a transport failure returned by the next call.
    pub fn push_failure(&self, reason: impl Into<String>) {
        self.replies
            .lock()
            .push_back(ScriptedReply::Failure(reason.into()));
    }
}

#[async_trait]
impl CompletionClient for LoopbackCompletionClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, CompletionError> {
        match self.replies.lock().pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Failure(reason)) => Err(CompletionError::Transport(reason)),
            None => Err(CompletionError::Transport(
                "no scripted reply queued".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_json_mode_when_requested() {
        let client = HttpCompletionClient::new(
            "http://127.0.0.1:9/v1/chat/completions",
            "test-model",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let request = CompletionRequest::new(
            vec![ChatMessage::system("sys"), ChatMessage::user("hello")],
            200,
            0.7,
        )
        .with_json_output();
        let payload = client.payload(&request);
        assert_eq!(payload["model"], "test-model");
        assert_eq!(payload["max_tokens"], 200);
        assert_eq!(payload["response_format"]["type"], "json_object");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "hello");
    }

    #[test]
    fn payload_omits_json_mode_by_default() {
        let client = HttpCompletionClient::new(
            "http://127.0.0.1:9/v1/chat/completions",
            "test-model",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let request = CompletionRequest::new(vec![ChatMessage::user("hello")], 50, 0.0);
        let payload = client.payload(&request);
        assert!(payload.get("response_format").is_none());
    }

    #[tokio::test]
    async fn loopback_replays_in_order_then_fails() {
        let client = LoopbackCompletionClient::new();
        client.push_text("first");
        client.push_failure("boom");

        let request = CompletionRequest::new(vec![ChatMessage::user("hi")], 10, 0.0);
        assert_eq!(client.complete(request.clone()).await.unwrap(), "first");
        assert!(matches!(
            client.complete(request.clone()).await,
            Err(CompletionError::Transport(reason)) if reason == "boom"
        ));
        assert!(client.complete(request).await.is_err());
    }
}
