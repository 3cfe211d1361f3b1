//! API server binary.

use api::config::Config;
use api::payment::Gateways;
use api::routes;
use api::sms;
use api::state::AppState;
use database::Database;
use deepseek_brain::DeepSeekBrain;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    info!(addr = %config.addr, "Starting API server");

    // Connect to database
    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;

    // Upstream model client
    let brain = DeepSeekBrain::from_env()?;

    // Providers, selected once from the configuration
    let sms = sms::provider_from_config(config.sms.clone());
    let gateways = Gateways::from_config(&config);

    let addr = config.addr;
    let state = AppState::new(db, brain, sms, gateways, config);
    let app = routes::router(state);

    // Start server
    info!(%addr, "API server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
