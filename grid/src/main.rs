use tracing::error;
use tracing_subscriber::EnvFilter;

use grid::GridApp;
use grid_core::GridConfig;

#[tokio::main]
async fn main() {
    // .env is optional; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match GridConfig::load() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "configuration error");
            std::process::exit(2);
        }
    };
    let listen = std::env::var("GRID_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let app = match GridApp::from_config(config).await {
        Ok(app) => app,
        Err(err) => {
            error!(%err, "startup failed");
            std::process::exit(1);
        }
    };
    if let Err(err) = app.serve(&listen).await {
        error!(%err, "server exited with error");
        std::process::exit(1);
    }
}
