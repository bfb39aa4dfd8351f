use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use estoque::server::{self, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let http_port: u16 = std::env::var("ESTOQUE_HTTP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5000);
    let db_file = std::env::var("ESTOQUE_DB_FILE").unwrap_or_else(|_| "estoque.db".to_string());
    let upload_dir = std::env::var("ESTOQUE_UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string());

    // The signing secret has no default and is never logged. Startup fails
    // here, before the listener binds, when it is absent.
    let secret = match std::env::var("ESTOQUE_SECRET") {
        Ok(s) if !s.is_empty() => s,
        _ => anyhow::bail!("ESTOQUE_SECRET must be set to a non-empty signing secret"),
    };

    // Startup banner at info level so something always prints at default verbosity
    info!(
        target: "estoque",
        "estoque starting: RUST_LOG='{}', http_port={}, db_file='{}', upload_dir='{}'",
        rust_log, http_port, db_file, upload_dir
    );

    server::run_with_config(ServiceConfig { http_port, secret, db_file, upload_dir }).await
}
