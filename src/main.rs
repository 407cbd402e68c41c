use std::sync::Arc;

use cadastre::config::{CadastreConfig, ConfigError};
use cadastre::eligibility::{EligibilityError, HttpEligibilityClient};
use cadastre::{routes, state};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Eligibility(#[from] EligibilityError),

    #[error("server io: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = CadastreConfig::from_env()?;
    let port = config.port;

    let eligibility = HttpEligibilityClient::new(&config.cadastrapp_base_url, config.eligibility_timeouts)?;
    tracing::info!(endpoint = %eligibility.endpoint(), "eligibility client initialized");

    let state = state::AppState::new(config, Arc::new(eligibility));
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;

    tracing::info!(%port, "cadastre listening");
    axum::serve(listener, app).await?;
    Ok(())
}
