use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use metrics::counter;
use serde::Deserialize;
use stockwatch_core::{normalize_item_name, observations, rank, CatalogEntry, ItemObservation};
use tracing::error;

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::users::require_user;

#[derive(Debug, Deserialize)]
pub struct QueryItemsRequest {
    #[serde(default)]
    user_id: String,
    /// Absent means every item.
    #[serde(default)]
    item_name: Option<String>,
}

/// Returns every stock report of the requested item (or of all items),
/// nearest store first.
pub async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryItemsRequest>, JsonRejection>,
) -> Result<Json<Vec<ItemObservation>>, ProblemResponse> {
    let Json(request) = payload?;
    let user = require_user(&state, &request.user_id).await?;

    let items = state.storage().items();
    let loaded = match request.item_name.as_deref() {
        Some(raw) => {
            let name = normalize_item_name(raw).ok_or_else(|| {
                ProblemResponse::bad_request("missing_field", "item_name must not be blank")
            })?;
            counter!("query_requests_total", "kind" => "item").increment(1);
            items.fetch(&name).await.map(|item| item.into_iter().collect::<Vec<_>>())
        }
        None => {
            counter!("query_requests_total", "kind" => "all_items").increment(1);
            items.list_all().await
        }
    }
    .map_err(|err| {
        error!(stage = "query", error = %err, "failed to load items");
        ProblemResponse::internal("item_query_failed", format!("failed to load items: {err}"))
    })?;

    let now = state.now();
    let found: Vec<ItemObservation> = loaded
        .iter()
        .flat_map(|item| observations(item, now))
        .collect();

    Ok(Json(rank(found, state.origin_for(&user), None)))
}

#[derive(Debug, Deserialize)]
pub struct QueryTokensRequest {
    #[serde(default)]
    user_id: String,
}

pub async fn query_tokens(
    State(state): State<AppState>,
    payload: Result<Json<QueryTokensRequest>, JsonRejection>,
) -> Result<Json<Vec<CatalogEntry>>, ProblemResponse> {
    let Json(request) = payload?;
    require_user(&state, &request.user_id).await?;
    counter!("query_requests_total", "kind" => "tokens").increment(1);

    Ok(Json(state.catalog().entries().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::{fixed_now, insert_store, insert_user, post_json, setup_context};
    use axum::http::StatusCode;
    use chrono::Duration;
    use serde_json::json;
    use stockwatch_core::{apply_upload, Coordinate};

    #[tokio::test]
    async fn query_single_item_orders_by_distance() {
        let context = setup_context().await;
        insert_user(&context.state, "u-1", "94040").await;
        let far = insert_store(
            &context.state,
            "far",
            "350 5th Ave, New York, NY 10118",
            Coordinate::new(40.7484, -73.9857),
        )
        .await;
        let near = insert_store(
            &context.state,
            "near",
            "645 San Antonio Rd, Mountain View, CA 94040",
            Coordinate::new(37.4019, -122.1089),
        )
        .await;

        let items = context.state.storage().items();
        let reported_at = fixed_now() - Duration::hours(26);
        let names = vec!["rice".to_string()];
        apply_upload(&items, &far, "u-1", reported_at, &names, &[])
            .await
            .into_result()
            .expect("far report");
        apply_upload(&items, &near, "u-1", reported_at, &[], &names)
            .await
            .into_result()
            .expect("near report");

        let (status, body) = post_json(
            &context.state,
            "/item/query",
            json!({ "user_id": "u-1", "item_name": "  RICE " }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let results = body.as_array().expect("array");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["storeName"], "Store near");
        assert_eq!(results[0]["inStock"], false);
        assert_eq!(results[0]["hoursAgo"], 26);
        assert_eq!(results[0]["daysAgo"], 1);
        assert_eq!(results[0]["seenCount"], 1);
        assert_eq!(results[1]["storeAddress"], "350 5th Ave, New York, NY 10118");
        assert_eq!(results[1]["storeLong"], -73.9857);
    }

    #[tokio::test]
    async fn query_without_name_covers_every_item() {
        let context = setup_context().await;
        insert_user(&context.state, "u-1", "94040").await;
        let store = insert_store(
            &context.state,
            "s-1",
            "645 San Antonio Rd, Mountain View, CA 94040",
            Coordinate::new(37.4019, -122.1089),
        )
        .await;
        let items = context.state.storage().items();
        let names = vec!["beans".to_string(), "flour".to_string()];
        apply_upload(&items, &store, "u-1", fixed_now(), &names, &[])
            .await
            .into_result()
            .expect("report");

        let (status, body) =
            post_json(&context.state, "/item/query", json!({ "user_id": "u-1" })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn query_unknown_item_is_empty() {
        let context = setup_context().await;
        insert_user(&context.state, "u-1", "94040").await;

        let (status, body) = post_json(
            &context.state,
            "/item/query",
            json!({ "user_id": "u-1", "item_name": "unicorn" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn query_blank_item_name_is_rejected() {
        let context = setup_context().await;
        insert_user(&context.state, "u-1", "94040").await;

        let (status, _) = post_json(
            &context.state,
            "/item/query",
            json!({ "user_id": "u-1", "item_name": "   " }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tokens_are_returned_in_catalog_order() {
        let context = setup_context().await;
        insert_user(&context.state, "u-1", "94040").await;

        let (status, body) =
            post_json(&context.state, "/item/tokens/query", json!({ "user_id": "u-1" })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([
                { "name": "toilet paper", "tokens": ["tp", "tissue"] },
                { "name": "hand sanitizer", "tokens": ["sanitizer", "purell"] }
            ])
        );
    }

    #[tokio::test]
    async fn tokens_require_known_user() {
        let context = setup_context().await;

        let (status, _) =
            post_json(&context.state, "/item/tokens/query", json!({ "user_id": "ghost" })).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_zip_code_ranks_from_fallback_origin() {
        let context = setup_context().await;
        insert_user(&context.state, "u-z", "00000").await;
        let gulf = insert_store(
            &context.state,
            "gulf",
            "1 Dock Rd, Accra, GA 00233",
            Coordinate::new(5.6, -0.2),
        )
        .await;
        let city = insert_store(
            &context.state,
            "city",
            "350 5th Ave, New York, NY 10118",
            Coordinate::new(40.7484, -73.9857),
        )
        .await;
        let items = context.state.storage().items();
        let names = vec!["rice".to_string()];
        for store in [&city, &gulf] {
            apply_upload(&items, store, "u-z", fixed_now(), &names, &[])
                .await
                .into_result()
                .expect("report");
        }

        for _ in 0..2 {
            let (status, body) = post_json(
                &context.state,
                "/item/query",
                json!({ "user_id": "u-z", "item_name": "rice" }),
            )
            .await;

            assert_eq!(status, StatusCode::OK);
            let stores: Vec<&str> = body
                .as_array()
                .expect("array")
                .iter()
                .map(|observation| observation["storeName"].as_str().unwrap())
                .collect();
            assert_eq!(stores, vec!["Store gulf", "Store city"]);
        }
    }
}
