use std::collections::HashSet;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use stockwatch_core::{apply_upload, normalize_item_name};
use tracing::{error, info};

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::users::{require_user, required_field};

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    store_id: String,
    #[serde(default, rename = "in_stock_items")]
    in_stock: Vec<String>,
    #[serde(default, rename = "out_stock_items")]
    out_of_stock: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    items_updated: usize,
}

/// Item names of an upload after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedLists {
    pub in_stock: Vec<String>,
    pub out_of_stock: Vec<String>,
}

/// Normalizes and deduplicates both lists, keeping first-seen order.
///
/// A name listed as both in and out of stock is kept as in stock.
pub fn normalize_lists(
    in_stock: &[String],
    out_of_stock: &[String],
) -> Result<NormalizedLists, String> {
    if in_stock.is_empty() && out_of_stock.is_empty() {
        return Err("at least one in-stock or out-of-stock item is required".to_string());
    }

    let in_stock = normalize_list("in_stock_items", in_stock)?;
    let mut out_of_stock = normalize_list("out_stock_items", out_of_stock)?;

    let listed_in: HashSet<&str> = in_stock.iter().map(String::as_str).collect();
    out_of_stock.retain(|name| !listed_in.contains(name.as_str()));

    Ok(NormalizedLists {
        in_stock,
        out_of_stock,
    })
}

fn normalize_list(list: &str, raw: &[String]) -> Result<Vec<String>, String> {
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(raw.len());
    for (index, entry) in raw.iter().enumerate() {
        let name =
            normalize_item_name(entry).ok_or_else(|| format!("{list}[{index}] is blank"))?;
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    Ok(names)
}

pub async fn upload(
    State(state): State<AppState>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Json<UploadResponse>, ProblemResponse> {
    let Json(request) = payload?;
    let store_id = required_field("store_id", &request.store_id)?;
    let lists = normalize_lists(&request.in_stock, &request.out_of_stock)
        .map_err(|detail| ProblemResponse::bad_request("invalid_item_list", detail))?;
    let user = require_user(&state, &request.user_id).await?;

    let store = state
        .storage()
        .stores()
        .fetch(&store_id)
        .await
        .map_err(|err| {
            error!(stage = "report", store_id = %store_id, error = %err, "failed to load store");
            ProblemResponse::internal("store_lookup_failed", format!("failed to load store: {err}"))
        })?
        .ok_or_else(|| {
            ProblemResponse::new(StatusCode::NOT_FOUND, "unknown_store", "store id is invalid")
        })?;

    let items = state.storage().items();
    let outcome = apply_upload(
        &items,
        &store,
        &user.id,
        state.now(),
        &lists.in_stock,
        &lists.out_of_stock,
    )
    .await;

    counter!("report_items_total", "result" => "applied").increment(outcome.applied as u64);
    counter!("report_items_total", "result" => "failed").increment(outcome.failures as u64);
    let created = outcome.created;

    match outcome.into_result() {
        Ok(items_updated) => {
            counter!("report_uploads_total", "result" => "ok").increment(1);
            info!(
                stage = "report",
                user_id = %user.id,
                store_id = %store.id,
                items_updated,
                created,
                "report upload applied"
            );
            Ok(Json(UploadResponse { items_updated }))
        }
        Err(failure) => {
            counter!("report_uploads_total", "result" => "partial").increment(1);
            error!(
                stage = "report",
                user_id = %user.id,
                store_id = %store.id,
                applied = failure.applied,
                failures = failure.failures,
                error = %failure,
                "report upload partially failed"
            );
            Err(ProblemResponse::internal("report_upload_failed", failure.to_string())
                .with_failures(failure.failures))
        }
    }
}
