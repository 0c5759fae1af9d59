use filegate_server::config::Config;
use filegate_server::server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log.clone()));

    // Structured JSON logs by default (request logs are emitted from tracing
    // spans in `http::observability`).
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .init();

    let running = server::start(config).await?;
    tracing::info!("filegate listening on http://{}", running.addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    running.shutdown().await
}
