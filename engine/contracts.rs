use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum topic length accepted at the boundary, in characters.
pub const MAX_TOPIC_CHARS: usize = 50;

/// Supported joke tones.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum JokeTone {
    /// Clever wordplay.
    Witty,
    /// Dry and biting.
    Sarcastic,
    /// Groan-inducing classics.
    DadJoke,
    /// Morbid humor.
    Dark,
    /// Absurd and lighthearted.
    Silly,
}

impl JokeTone {
    /// Wire label used in prompts and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Witty => "witty",
            Self::Sarcastic => "sarcastic",
            Self::DadJoke => "dad-joke",
            Self::Dark => "dark",
            Self::Silly => "silly",
        }
    }
}

impl Default for JokeTone {
    fn default() -> Self {
        Self::Witty
    }
}

impl fmt::Display for JokeTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors produced while validating caller input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The topic was empty after trimming.
    #[error("topic must not be empty")]
    EmptyTopic,
    /// The topic exceeded the permitted length.
    #[error("topic exceeds {} characters (got {0})", MAX_TOPIC_CHARS)]
    TopicTooLong(usize),
}

fn default_language() -> String {
    "english".to_string()
}

/// Caller request for one joke. Immutable once admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JokeRequest {
    /// Main subject of the joke, 1-50 characters.
    pub topic: String,
    /// Desired tone.
    #[serde(default)]
    pub tone: JokeTone,
    /// Target language for the joke.
    #[serde(default = "default_language")]
    pub language: String,
}

impl JokeRequest {
    /// Convenience constructor used by tests and embedding callers.
    #[must_use]
    pub fn new(topic: impl Into<String>, tone: JokeTone) -> Self {
        Self {
            topic: topic.into(),
            tone,
            language: default_language(),
        }
    }

    /// Enforces the boundary constraints on the request.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let chars = self.topic.trim().chars().count();
        if chars == 0 {
            return Err(ValidationError::EmptyTopic);
        }
        if chars > MAX_TOPIC_CHARS {
            return Err(ValidationError::TopicTooLong(chars));
        }
        Ok(())
    }
}

/// Structured joke returned to the caller. Either fully valid or never produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JokeResponse {
    /// Setup or introduction of the joke.
    pub setup: String,
    /// The punchline.
    pub punchline: String,
    /// Optional explanation for complex jokes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Durable record of one pipeline run. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique identifier.
    pub id: Uuid,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Originating topic.
    pub topic: String,
    /// Originating tone.
    pub tone: JokeTone,
    /// Generated setup.
    pub setup: String,
    /// Generated punchline.
    pub punchline: String,
    /// Generated explanation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Guardrail verdict for the run.
    pub is_safe: bool,
}

impl AuditRecord {
    /// Builds a record for the given run.
    #[must_use]
    pub fn new(request: &JokeRequest, joke: &JokeResponse, is_safe: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            topic: request.topic.clone(),
            tone: request.tone,
            setup: joke.setup.clone(),
            punchline: joke.punchline.clone(),
            explanation: joke.explanation.clone(),
            is_safe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_uses_kebab_case_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&JokeTone::DadJoke).unwrap(),
            "\"dad-joke\""
        );
        let tone: JokeTone = serde_json::from_str("\"dad-joke\"").unwrap();
        assert_eq!(tone, JokeTone::DadJoke);
    }

    #[test]
    fn request_defaults_apply() {
        let request: JokeRequest = serde_json::from_str(r#"{"topic":"cats"}"#).unwrap();
        assert_eq!(request.tone, JokeTone::Witty);
        assert_eq!(request.language, "english");
    }

    #[test]
    fn validate_rejects_empty_topic() {
        let request = JokeRequest::new("   ", JokeTone::Silly);
        assert_eq!(request.validate(), Err(ValidationError::EmptyTopic));
    }

    #[test]
    fn validate_rejects_oversized_topic() {
        let request = JokeRequest::new("x".repeat(51), JokeTone::Witty);
        assert_eq!(request.validate(), Err(ValidationError::TopicTooLong(51)));
    }

    #[test]
    fn validate_accepts_boundary_lengths() {
        assert!(JokeRequest::new("x", JokeTone::Witty).validate().is_ok());
        assert!(JokeRequest::new("x".repeat(50), JokeTone::Witty)
            .validate()
            .is_ok());
    }

    #[test]
    fn response_round_trips_field_for_field() {
        let joke = JokeResponse {
            setup: "Why did the cat sit on the keyboard?".to_string(),
            punchline: "To keep an eye on the mouse.".to_string(),
            explanation: None,
        };
        let wire = serde_json::to_string(&joke).unwrap();
        let parsed: JokeResponse = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed, joke);
    }

    #[test]
    fn audit_record_copies_run_fields() {
        let request = JokeRequest::new("cats", JokeTone::Dark);
        let joke = JokeResponse {
            setup: "setup".to_string(),
            punchline: "punchline".to_string(),
            explanation: Some("why".to_string()),
        };
        let record = AuditRecord::new(&request, &joke, false);
        assert_eq!(record.topic, "cats");
        assert_eq!(record.tone, JokeTone::Dark);
        assert_eq!(record.explanation.as_deref(), Some("why"));
        assert!(!record.is_safe);
    }
}
