use anyhow::Context;
use filedrop::config::Config;
use filedrop::server::{self, Server};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "server.conf";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FILEDROP_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    let cfg = Config::load(&path)
        .and_then(Config::prepare)
        .with_context(|| format!("failed to load configuration from {path}"))?;

    let server = Server::bind(cfg).await?;
    server.run(server::shutdown_signal()).await
}
