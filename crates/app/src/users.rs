use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use stockwatch_core::User;
use tracing::{error, info};
use uuid::Uuid;

use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    zip_code: String,
}

#[derive(Debug, Serialize)]
pub struct SetupResponse {
    user_id: String,
}

pub async fn setup(
    State(state): State<AppState>,
    payload: Result<Json<SetupRequest>, JsonRejection>,
) -> Result<Json<SetupResponse>, ProblemResponse> {
    let Json(request) = payload?;

    let first_name = required_field("first_name", &request.first_name)?;
    let last_name = required_field("last_name", &request.last_name)?;
    let zip_code = required_field("zip_code", &request.zip_code)?;

    let user = User {
        id: Uuid::new_v4().to_string(),
        first_name,
        last_name,
        zip_code,
        created_at: state.now(),
    };

    state.storage().users().insert(&user).await.map_err(|err| {
        error!(stage = "user", error = %err, "failed to create user");
        ProblemResponse::internal("user_setup_failed", format!("failed to create user: {err}"))
    })?;

    info!(stage = "user", user_id = %user.id, "user created");
    Ok(Json(SetupResponse { user_id: user.id }))
}

/// Loads the caller; unknown ids are refused with 403.
pub async fn require_user(state: &AppState, user_id: &str) -> Result<User, ProblemResponse> {
    let user_id = required_field("user_id", user_id)?;

    match state.storage().users().fetch(&user_id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(ProblemResponse::new(
            StatusCode::FORBIDDEN,
            "unknown_user",
            "user id is invalid",
        )),
        Err(err) => {
            error!(stage = "user", user_id = %user_id, error = %err, "failed to load user");
            Err(ProblemResponse::internal(
                "user_lookup_failed",
                format!("failed to load user: {err}"),
            ))
        }
    }
}

/// Trims a required string field, refusing it when blank.
pub fn required_field(name: &str, value: &str) -> Result<String, ProblemResponse> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ProblemResponse::bad_request(
            "missing_field",
            format!("{name} is required"),
        ));
    }
    Ok(trimmed.to_string())
}
