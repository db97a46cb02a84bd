mod auth;
mod config;
mod error;
mod routes;
mod state;
mod sync;
mod ws;

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use auth::identity::{IdentityResolver, InMemoryUserDirectory, UserDirectory};
use config::{generate_config_template, Config};
use sync::SyncHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "taskboard_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "taskboard_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!(
        "TaskBoard sync server v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    // Data directory holds the JWT signing key
    std::fs::create_dir_all(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // User directory: seeded from file, or empty until records are upserted
    let directory: Arc<dyn UserDirectory> = match &config.users_file {
        Some(path) => Arc::new(InMemoryUserDirectory::from_json_file(path)?),
        None => {
            tracing::warn!("No users_file configured, user directory starts empty");
            Arc::new(InMemoryUserDirectory::new())
        }
    };

    // Build application state
    let app_state = state::AppState {
        hub: Arc::new(SyncHub::new()),
        resolver: Arc::new(IdentityResolver::new(jwt_secret, directory)),
        auth_timeout: Duration::from_secs(config.auth_timeout_secs),
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
