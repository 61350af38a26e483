use std::{env, path::PathBuf, time::Duration};

/// Runtime settings, read once at process start from `QUIP_*`
/// environment variables with production defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Socket address the HTTP listener binds to.
    pub bind: String,
    /// Chat-completions endpoint URL.
    pub completion_endpoint: String,
    /// Model identifier sent with every completion call.
    pub completion_model: String,
    /// Bearer token for the completion endpoint, if required.
    pub completion_api_key: Option<String>,
    /// Wall-clock bound on each completion call.
    pub completion_timeout: Duration,
    /// Token budget for joke generation.
    pub max_tokens: u32,
    /// Admissions allowed per client per window.
    pub quota: u32,
    /// Admission window length.
    pub quota_window: Duration,
    /// Audit log file path.
    pub audit_path: PathBuf,
    /// Bound on concurrent audit sessions.
    pub audit_sessions: usize,
    /// Telemetry log file path.
    pub telemetry_path: PathBuf,
}

impl Settings {
    /// Reads settings from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            bind: env::var("QUIP_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            completion_endpoint: env::var("QUIP_COMPLETION_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            completion_model: env::var("QUIP_COMPLETION_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            completion_api_key: env::var("QUIP_COMPLETION_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            completion_timeout: Duration::from_secs(parse_u64_from_env(
                "QUIP_COMPLETION_TIMEOUT_SECS",
                1,
                300,
                30,
            )),
            max_tokens: parse_u32_from_env("QUIP_MAX_TOKENS", 1, 4096, 200),
            quota: parse_u32_from_env("QUIP_QUOTA", 1, 10_000, 5),
            quota_window: Duration::from_secs(parse_u64_from_env(
                "QUIP_QUOTA_WINDOW_SECS",
                1,
                3600,
                60,
            )),
            audit_path: env::var("QUIP_AUDIT_LOG").map_or_else(
                |_| PathBuf::from("logs/gateway/audit.log.jsonl"),
                PathBuf::from,
            ),
            audit_sessions: parse_usize_from_env("QUIP_AUDIT_SESSIONS", 1, 256, 16),
            telemetry_path: env::var("QUIP_TELEMETRY_LOG").map_or_else(
                |_| PathBuf::from("logs/gateway/gateway.log.jsonl"),
                PathBuf::from,
            ),
        }
    }
}

fn parse_u64_from_env(name: &str, min: u64, max: u64, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| (min..=max).contains(value))
        .unwrap_or(default)
}

fn parse_u32_from_env(name: &str, min: u32, max: u32, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| (min..=max).contains(value))
        .unwrap_or(default)
}

fn parse_usize_from_env(name: &str, min: usize, max: usize, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| (min..=max).contains(value))
        .unwrap_or(default)
}
