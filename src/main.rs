use crate::deployments::KubeDeployments;
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber;

mod config;
mod deployments;
mod providers;
mod resolver;
mod secret_string;
mod webserver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("Starting kube-image-relay {}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yaml".to_string());
    let config = config::load_config(&config_path)?;
    let port = config.webserver.port;
    info!(
        "Loaded {} image mappings from {}",
        config.mappings.len(),
        config_path
    );

    info!("Initializing K8s client");
    let client = KubeDeployments::create().await?;

    let app = webserver::create_app(Arc::new(config), client);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
