use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_telemetry::{LogLevel, Telemetry};

use quip_engine::{AuditArchive, JokePipeline, JokeRequest, RateLimiter};

const HISTORY_DEFAULT_LIMIT: usize = 50;
const HISTORY_MAX_LIMIT: usize = 100;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The three-stage joke pipeline.
    pub pipeline: Arc<JokePipeline>,
    /// Per-client admission control.
    pub limiter: Arc<RateLimiter>,
    /// Read-only view over persisted audit records.
    pub archive: AuditArchive,
    /// Telemetry sinks and counters.
    pub telemetry: Telemetry,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    topic: Option<String>,
    limit: Option<usize>,
}

/// Builds the gateway router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/generate", post(generate))
        .route("/api/history", get(history))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_request,
        ))
        .with_state(state)
}

async fn track_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    state.telemetry.incr("http.requests");
    let _ = state.telemetry.log(
        LogLevel::Info,
        "http.request",
        json!({
            "method": method.as_str(),
            "path": path,
            "status": response.status().as_u16(),
            "duration_ms": duration_ms,
        }),
    );
    response
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "quip-gateway" }))
}

async fn generate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<JokeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(json) => json,
        Err(rejection) => {
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text());
        }
    };
    if let Err(err) = request.validate() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, err.to_string());
    }

    let key = client_key(&headers, peer);
    if !state.limiter.admit(&key) {
        state.telemetry.incr("http.quota_denied");
        let _ = state.telemetry.log(
            LogLevel::Warn,
            "http.quota_denied",
            json!({ "client": key }),
        );
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            format!(
                "rate limit exceeded: {} requests per {}s",
                state.limiter.quota(),
                state.limiter.window().as_secs()
            ),
        );
    }

    let _ = state.telemetry.log(
        LogLevel::Info,
        "http.generate.received",
        json!({ "topic": request.topic, "client": key }),
    );
    match state.pipeline.run(&request).await {
        Ok(joke) => (StatusCode::OK, Json(joke)).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn history(State(state): State<AppState>, Query(params): Query<HistoryParams>) -> Response {
    let limit = params
        .limit
        .unwrap_or(HISTORY_DEFAULT_LIMIT)
        .min(HISTORY_MAX_LIMIT);
    match state.archive.query(params.topic.as_deref(), limit) {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(err) => {
            let _ = state.telemetry.log(
                LogLevel::Error,
                "http.history.failed",
                json!({ "reason": err.to_string() }),
            );
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "history query failed".to_string(),
            )
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "counters": state.telemetry.counters() }))
}

fn client_key(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| peer.ip().to_string(), ToString::to_string)
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use quip_engine::{
        AuditLogWriter, AuditStore, CompletionClient, GuardrailValidator, JokeGenerator,
        JokeTone, LoopbackCompletionClient,
    };
    use tempfile::tempdir;

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn state(dir: &std::path::Path, client: LoopbackCompletionClient, quota: u32) -> AppState {
        let client: Arc<dyn CompletionClient> = Arc::new(client);
        let path = dir.join("audit.log.jsonl");
        let store = AuditStore::open(&path, 4).unwrap();
        let pipeline = JokePipeline::new(
            JokeGenerator::new(Arc::clone(&client), 200),
            GuardrailValidator::new(Arc::clone(&client)),
            AuditLogWriter::new(store),
        );
        AppState {
            pipeline: Arc::new(pipeline),
            limiter: Arc::new(RateLimiter::new(quota, Duration::from_secs(60))),
            archive: AuditArchive::new(&path),
            telemetry: Telemetry::builder("quip-gateway-test").build().unwrap(),
        }
    }

    #[tokio::test]
    async fn generate_returns_ok_for_a_safe_run() {
        let dir = tempdir().unwrap();
        let client = LoopbackCompletionClient::new();
        client.push_text(r#"{"setup":"s","punchline":"p"}"#);
        client.push_text(r#"{"safe": true}"#);
        let state = state(dir.path(), client, 5);

        let response = generate(
            State(state),
            ConnectInfo(peer()),
            HeaderMap::new(),
            Ok(Json(JokeRequest::new("cats", JokeTone::Witty))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn generate_rejects_invalid_topic_before_the_pipeline() {
        let dir = tempdir().unwrap();
        let state = state(dir.path(), LoopbackCompletionClient::new(), 5);

        let response = generate(
            State(state),
            ConnectInfo(peer()),
            HeaderMap::new(),
            Ok(Json(JokeRequest::new("  ", JokeTone::Witty))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn generate_maps_pipeline_failure_to_500() {
        let dir = tempdir().unwrap();
        let client = LoopbackCompletionClient::new();
        client.push_text(r#"{"setup":"s","punchline":"p"}"#);
        client.push_text(r#"{"safe": false}"#);
        let state = state(dir.path(), client, 5);

        let response = generate(
            State(state),
            ConnectInfo(peer()),
            HeaderMap::new(),
            Ok(Json(JokeRequest::new("cats", JokeTone::Witty))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn sixth_request_in_window_gets_429() {
        let dir = tempdir().unwrap();
        let client = LoopbackCompletionClient::new();
        for _ in 0..5 {
            client.push_text(r#"{"setup":"s","punchline":"p"}"#);
            client.push_text(r#"{"safe": true}"#);
        }
        let state = state(dir.path(), client, 5);

        for _ in 0..5 {
            let response = generate(
                State(state.clone()),
                ConnectInfo(peer()),
                HeaderMap::new(),
                Ok(Json(JokeRequest::new("cats", JokeTone::Witty))),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = generate(
            State(state),
            ConnectInfo(peer()),
            HeaderMap::new(),
            Ok(Json(JokeRequest::new("cats", JokeTone::Witty))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn history_serves_persisted_records() {
        let dir = tempdir().unwrap();
        let client = LoopbackCompletionClient::new();
        client.push_text(r#"{"setup":"s","punchline":"p"}"#);
        client.push_text(r#"{"safe": true}"#);
        let state = state(dir.path(), client, 5);

        let _ = generate(
            State(state.clone()),
            ConnectInfo(peer()),
            HeaderMap::new(),
            Ok(Json(JokeRequest::new("cats", JokeTone::Witty))),
        )
        .await;

        let response = history(
            State(state),
            Query(HistoryParams {
                topic: Some("cats".to_string()),
                limit: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn client_key_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.2".parse().unwrap());
        assert_eq!(client_key(&headers, peer()), "203.0.113.7");
        assert_eq!(client_key(&HeaderMap::new(), peer()), "127.0.0.1");
    }
}
