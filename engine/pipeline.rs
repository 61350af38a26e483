use serde_json::json;
use shared_telemetry::{LogLevel, Telemetry};
use thiserror::Error;

use crate::{
    audit::AuditLogWriter,
    contracts::{JokeRequest, JokeResponse},
    generator::{GeneratorError, JokeGenerator},
    guardrail::GuardrailValidator,
};

/// Terminal failures of one pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Generation failed; no partial output exists.
    #[error("joke generation failed: {0}")]
    Generation(#[from] GeneratorError),
    /// The guardrail vetoed the generated content.
    #[error("the generated joke did not pass safety guidelines")]
    GuardrailRejected,
}

/// Sequences generation, guardrail validation, and audit persistence
/// for one request. Unsafe content never reaches the caller.
pub struct JokePipeline {
    generator: JokeGenerator,
    guardrail: GuardrailValidator,
    audit: AuditLogWriter,
    telemetry: Option<Telemetry>,
}

impl std::fmt::Debug for JokePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JokePipeline").finish()
    }
}

impl JokePipeline {
    /// Composes the three pipeline stages.
    #[must_use]
    pub const fn new(
        generator: JokeGenerator,
        guardrail: GuardrailValidator,
        audit: AuditLogWriter,
    ) -> Self {
        Self {
            generator,
            guardrail,
            audit,
            telemetry: None,
        }
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Drives one request through the pipeline.
    ///
    /// Generation strictly precedes validation, which strictly precedes
    /// persistence. Persistence is best-effort on the request path; its
    /// outcome never changes the result. Rejected content is persisted
    /// with `is_safe = false` for the moderation trail, then reported
    /// as [`PipelineError::GuardrailRejected`].
    pub async fn run(&self, request: &JokeRequest) -> Result<JokeResponse, PipelineError> {
        self.log(
            LogLevel::Info,
            "pipeline.generate.start",
            json!({ "topic": request.topic, "tone": request.tone.label() }),
        );
        let joke = match self.generator.generate(request).await {
            Ok(joke) => joke,
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "pipeline.generate.failed",
                    json!({ "topic": request.topic, "reason": err.to_string() }),
                );
                self.incr("pipeline.generation_failed");
                return Err(err.into());
            }
        };

        let is_safe = self.guardrail.is_safe(&joke).await;
        self.audit.record(request, &joke, is_safe).await;

        if !is_safe {
            self.log(
                LogLevel::Warn,
                "pipeline.guardrail.rejected",
                json!({ "topic": request.topic }),
            );
            self.incr("pipeline.rejected");
            return Err(PipelineError::GuardrailRejected);
        }

        self.log(
            LogLevel::Info,
            "pipeline.delivered",
            json!({ "topic": request.topic }),
        );
        self.incr("pipeline.delivered");
        Ok(joke)
    }

    fn log(&self, level: LogLevel, event: &str, fields: serde_json::Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(level, event, fields);
        }
    }

    fn incr(&self, counter: &str) {
        if let Some(tel) = &self.telemetry {
            tel.incr(counter);
        }
    }
}
