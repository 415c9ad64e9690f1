use std::{sync::Arc, time::Instant};

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use causal_lm_service::{AppConfig, Pipeline, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(
        model_id = %config.model_id,
        revision = config.revision.as_deref().unwrap_or("main"),
        model_path = %config.model_path.display(),
        "loading model artifacts"
    );

    // Loading happens before the socket is bound; a failure aborts startup.
    let started = Instant::now();
    let pipeline = Arc::new(Pipeline::load(config.as_ref())?);
    tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "pipeline loaded");

    let router = build_router(config.clone(), pipeline);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(
        %addr,
        max_new_tokens = config.max_new_tokens,
        temperature = config.temperature,
        "serving /generate and /run"
    );

    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
