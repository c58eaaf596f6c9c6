use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use auth_check::{RemoteAuthenticator, SharedAuthenticator};

use file_store::config::Config;
use file_store::{router, AppState, UserNamespace};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {

    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .pretty()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting file store, storage root {}", config.storage_root.display());

    let namespaces = UserNamespace::new(&config.storage_root).await?;
    let authenticator: SharedAuthenticator = Arc::new(RemoteAuthenticator::new(config.auth_service_url.clone()));

    let app = router(AppState::new(namespaces), authenticator, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
