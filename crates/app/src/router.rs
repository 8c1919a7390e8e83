use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use stockwatch_core::{Coordinate, CoordinateTable, ItemCatalog, Resolved, User};
use stockwatch_places::PlacesClient;
use stockwatch_storage::Database;
use tracing::warn;

use crate::{items, reports, stores, telemetry, users};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    coordinates: Arc<CoordinateTable>,
    catalog: Arc<ItemCatalog>,
    places: Option<PlacesClient>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        coordinates: Arc<CoordinateTable>,
        catalog: Arc<ItemCatalog>,
        places: Option<PlacesClient>,
    ) -> Self {
        Self {
            metrics,
            storage,
            coordinates,
            catalog,
            places,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    /// `None` when no maps API key is configured.
    pub fn places(&self) -> Option<&PlacesClient> {
        self.places.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Ranking origin for a user, taken from their postal code.
    pub fn origin_for(&self, user: &User) -> Coordinate {
        match self.coordinates.resolve(&user.zip_code) {
            Resolved::Known(coordinate) => coordinate,
            Resolved::Fallback(coordinate) => {
                warn!(
                    stage = "reference",
                    user_id = %user.id,
                    zip_code = %user.zip_code,
                    "unknown zip code, ranking from fallback origin"
                );
                counter!("reference_fallback_total").increment(1);
                coordinate
            }
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/user/setup", post(users::setup))
        .route("/store/add", post(stores::add))
        .route("/store/query", post(stores::query))
        .route("/item/query", post(items::query))
        .route("/item/tokens/query", post(items::query_tokens))
        .route("/report/upload", post(reports::upload))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}
