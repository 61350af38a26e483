#![forbid(unsafe_code)]

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use quip_engine::{
    AuditArchive, AuditLogWriter, AuditStore, CompletionClient, GuardrailValidator,
    HttpCompletionClient, JokeGenerator, JokePipeline, RateLimiter,
};
use quip_gateway::{app, AppState, Settings};
use shared_telemetry::{LogLevel, Telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env();
    let telemetry = Telemetry::builder("quip-gateway")
        .log_path(&settings.telemetry_path)
        .echo_stderr()
        .build()
        .context("initializing telemetry")?;

    let client: Arc<dyn CompletionClient> = Arc::new(
        HttpCompletionClient::new(
            settings.completion_endpoint.clone(),
            settings.completion_model.clone(),
            settings.completion_api_key.clone(),
            settings.completion_timeout,
        )
        .context("building completion client")?,
    );

    let store = AuditStore::open(&settings.audit_path, settings.audit_sessions)
        .context("opening audit store")?;
    let pipeline = JokePipeline::new(
        JokeGenerator::new(Arc::clone(&client), settings.max_tokens),
        GuardrailValidator::new(Arc::clone(&client)).with_telemetry(telemetry.clone()),
        AuditLogWriter::new(store.clone()).with_telemetry(telemetry.clone()),
    )
    .with_telemetry(telemetry.clone());

    let state = AppState {
        pipeline: Arc::new(pipeline),
        limiter: Arc::new(RateLimiter::new(settings.quota, settings.quota_window)),
        archive: AuditArchive::new(&settings.audit_path),
        telemetry: telemetry.clone(),
    };

    let addr: SocketAddr = settings.bind.parse().context("parsing QUIP_HTTP_BIND")?;
    let router = app(state);
    let _ = telemetry.log(
        LogLevel::Info,
        "gateway.listening",
        serde_json::json!({ "addr": addr.to_string(), "model": settings.completion_model }),
    );
    println!("quip-gateway listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding listener")?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving http")?;

    store.close();
    let _ = telemetry.log(LogLevel::Info, "gateway.stopped", serde_json::json!({}));
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        eprintln!("failed to listen for shutdown signal: {err}");
    }
}
