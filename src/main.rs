use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use detectify::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::load()?;

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "Detectify starting: RUST_LOG='{}', http_port={}, backend={:?}, site_origin='{}', assistant_model={}",
        rust_log, config.http_port, config.backend, config.site_origin, config.assistant.model
    );

    detectify::server::run(config).await
}
