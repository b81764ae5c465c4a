pub mod api; // HTTP surface and request security pipeline
pub mod audit;
pub mod config;
pub mod core_state;
pub mod db;
pub mod login_attempts; // Brute-force login throttle
pub mod token;
pub mod users;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

/// Fatal errors that stop the service before or while serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Configuration(#[from] config::ConfigurationError),
    #[error(transparent)]
    Core(#[from] core_state::CoreError),
    #[error(transparent)]
    Database(#[from] db::DatabaseError),
    #[error(transparent)]
    Server(#[from] api::ServerError),
}

/// Load configuration from the environment, open storage, and serve until
/// Ctrl-C.
pub async fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let settings = config::Settings::from_env()?;
    settings.require_jwt_secret()?;

    let db = match &settings.database_path {
        Some(path) => db::Database::open(path)?,
        None => {
            tracing::warn!("DATABASE_PATH not set; using an in-memory database");
            db::Database::open_in_memory()?
        }
    };

    let bind_addr = settings.bind_addr;
    let environment = settings.environment;
    let core = Arc::new(core_state::CoreState::new(settings, db)?);
    let mut server = api::start_server_on(core, bind_addr).await?;
    tracing::info!(addr = %server.addr, ?environment, "Listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    server.shutdown();
    server.stopped().await?;
    Ok(())
}
