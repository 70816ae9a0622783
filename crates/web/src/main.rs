use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;

use cyberlab_web::{AdminCredentials, WebServer, WebServerConfig, MAX_UPLOAD_BYTES};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let addr: SocketAddr = std::env::var("CYBERLAB_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:5000".to_string())
        .parse()?;

    let data_dir: PathBuf = std::env::var("CYBERLAB_DATA_DIR")
        .unwrap_or_else(|_| ".".to_string())
        .into();

    // Fake auth by design: a single in-process credential pair.
    let admin = AdminCredentials {
        username: std::env::var("CYBERLAB_ADMIN_USER").unwrap_or_else(|_| "admin".to_string()),
        password: std::env::var("CYBERLAB_ADMIN_PASSWORD")
            .unwrap_or_else(|_| "password".to_string()),
    };

    let cfg = WebServerConfig {
        data_dir: data_dir.clone(),
        admin,
        max_upload_bytes: MAX_UPLOAD_BYTES,
    };

    info!(
        "Starting CyberLab API on http://{} (data dir: {})",
        addr,
        data_dir.display()
    );

    WebServer::new(cfg)?.serve(addr).await
}
