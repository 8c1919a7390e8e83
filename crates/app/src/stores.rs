use std::sync::LazyLock;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use stockwatch_core::{rank, Coordinate, Store};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::users::{require_user, required_field};

/// Maximum number of stores returned by a store query.
pub const STORE_QUERY_LIMIT: usize = 10;

static ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<street>.+), (?P<city>[^,]+), (?P<state>[A-Za-z]{2,}) (?P<zip>[0-9]{5,})$")
        .expect("address pattern is valid")
});

#[derive(Debug, Deserialize)]
pub struct AddStoreRequest {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    address: String,
}

#[derive(Debug, Serialize)]
pub struct AddStoreResponse {
    store_id: String,
}

pub async fn add(
    State(state): State<AppState>,
    payload: Result<Json<AddStoreRequest>, JsonRejection>,
) -> Result<Json<AddStoreResponse>, ProblemResponse> {
    let Json(request) = payload?;
    let name = required_field("name", &request.name)?;
    let address = required_field("address", &request.address)?;
    let user = require_user(&state, &request.user_id).await?;

    let Some(places) = state.places() else {
        counter!("store_vetting_total", "result" => "unavailable").increment(1);
        return Err(ProblemResponse::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_vetting_unavailable",
            "store vetting is not configured",
        ));
    };

    let vetted = places.vet_store(&name, &address).await.map_err(|err| {
        if err.is_rejection() {
            counter!("store_vetting_total", "result" => "rejected").increment(1);
            info!(stage = "store", %name, %address, error = %err, "store rejected by vetting");
            ProblemResponse::bad_request("store_rejected", err.to_string())
        } else {
            counter!("store_vetting_total", "result" => "error").increment(1);
            error!(stage = "store", %name, %address, error = %err, "store vetting failed");
            ProblemResponse::new(
                StatusCode::BAD_GATEWAY,
                "store_vetting_failed",
                format!("failed to vet store: {err}"),
            )
        }
    })?;
    counter!("store_vetting_total", "result" => "accepted").increment(1);

    let store = Store {
        id: Uuid::new_v4().to_string(),
        name: vetted.name,
        address: vetted.address,
        coordinate: Coordinate::new(vetted.latitude, vetted.longitude),
        created_at: state.now(),
    };

    state.storage().stores().insert(&store).await.map_err(|err| {
        error!(stage = "store", store_id = %store.id, error = %err, "failed to create store");
        ProblemResponse::internal("store_add_failed", format!("failed to create store: {err}"))
    })?;

    info!(
        stage = "store",
        store_id = %store.id,
        user_id = %user.id,
        name = %store.name,
        "store created"
    );
    Ok(Json(AddStoreResponse { store_id: store.id }))
}

#[derive(Debug, Deserialize)]
pub struct QueryStoresRequest {
    #[serde(default)]
    user_id: String,
}

#[derive(Debug, Serialize)]
pub struct QueryStoresResponse {
    stores: Vec<StoreListing>,
}

/// A store together with its address split into parts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreListing {
    store_id: String,
    name: String,
    address: String,
    latitude: f64,
    longitude: f64,
    #[serde(flatten)]
    parts: AddressParts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressParts {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

/// Splits `"<street>, <city>, <state> <zip>"`.
pub fn parse_address(address: &str) -> Option<AddressParts> {
    let captures = ADDRESS_PATTERN.captures(address)?;
    Some(AddressParts {
        street: captures["street"].to_string(),
        city: captures["city"].to_string(),
        state: captures["state"].to_string(),
        zip_code: captures["zip"].to_string(),
    })
}

pub async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryStoresRequest>, JsonRejection>,
) -> Result<Json<QueryStoresResponse>, ProblemResponse> {
    let Json(request) = payload?;
    let user = require_user(&state, &request.user_id).await?;
    counter!("query_requests_total", "kind" => "stores").increment(1);

    let stores = state.storage().stores().list_all().await.map_err(|err| {
        error!(stage = "store", error = %err, "failed to list stores");
        ProblemResponse::internal("store_query_failed", format!("failed to list stores: {err}"))
    })?;

    let origin = state.origin_for(&user);
    let stores = rank(stores, origin, Some(STORE_QUERY_LIMIT))
        .into_iter()
        .filter_map(|store| match parse_address(&store.address) {
            Some(parts) => Some(StoreListing {
                store_id: store.id,
                name: store.name,
                address: store.address,
                latitude: store.coordinate.latitude,
                longitude: store.coordinate.longitude,
                parts,
            }),
            None => {
                warn!(
                    stage = "store",
                    store_id = %store.id,
                    address = %store.address,
                    "skipping store with unparseable address"
                );
                None
            }
        })
        .collect();

    Ok(Json(QueryStoresResponse { stores }))
}
