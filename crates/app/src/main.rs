mod items;
mod problem;
mod reports;
mod router;
mod stores;
mod telemetry;
mod users;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use stockwatch_core::{CoordinateTable, ItemCatalog};
use stockwatch_places::PlacesClient;
use stockwatch_storage::Database;
use stockwatch_util::{load_env_file, AppConfig};
use tracing::{info, warn};

const PLACES_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let coordinates = Arc::new(CoordinateTable::from_path(&config.zip_code_data)?);
    let catalog = Arc::new(ItemCatalog::from_path(&config.item_catalog)?);

    let database = Database::connect(&config.database_url)
        .await?
        .with_item_attempts(config.item_txn_max_attempts);
    database.run_migrations().await?;

    let places = match &config.maps_api_key {
        Some(key) => {
            let http = reqwest::Client::builder().timeout(PLACES_TIMEOUT).build()?;
            Some(PlacesClient::new(key.clone(), config.places_base_url.clone(), http))
        }
        None => {
            warn!(stage = "app", "MAPS_CLIENT_API_KEY not set, store vetting disabled");
            None
        }
    };

    let state = router::AppState::new(metrics, database, coordinates, catalog, places);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
