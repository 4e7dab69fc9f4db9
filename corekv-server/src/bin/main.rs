//! Server binary entry point: initializes structured logging, reads
//! configuration from the environment, and runs the connection server
//! until the process is killed.

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let config = corekv_server::config::ServerConfig::from_env();
    corekv_server::server::run(config).await
}
