use nila_apple_auth::prelude::*;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; the process environment still applies.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    let config = Config::from_env().inspect_err(|e| {
        error!(kind = e.kind(), "Failed to load configuration: {}", e);
    })?;
    info!(?config, "Configuration loaded.");

    let state = AppState::new(&config).inspect_err(|e| {
        error!(kind = e.kind(), "Failed to initialise Sign in with Apple: {}", e);
    })?;

    serve(&config, state).await?;
    Ok(())
}
