use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use globe_shared::{
    LocationPatch, LocationRecord, LocationScope, NewLocation, NewProfile, ProfileNumber,
    ProfilePatch, ProfileSummary,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::state::{AppState, StoreError};

#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    pub profile_id: Option<String>,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match self {
            StoreError::NotFound => return StatusCode::NOT_FOUND.into_response(),
            StoreError::NumberTaken(_) => StatusCode::CONFLICT,
            StoreError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, self.to_string()).into_response()
    }
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let observability = state.observability.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "locations": state.locations.len(),
        "profiles": state.profiles.len(),
        "seq": state.current_seq(),
        "sse_clients": state.event_tx.receiver_count(),
        "observability": {
            "notices_emitted_total": observability.notices_emitted_total,
            "lagged_clients_total": observability.lagged_clients_total,
        }
    }))
}

pub async fn list_locations(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> Json<Vec<LocationRecord>> {
    let scope = match query.profile_id.filter(|id| !id.is_empty()) {
        Some(profile_id) => LocationScope::Profile(profile_id),
        None => LocationScope::All,
    };
    Json(state.list_locations(&scope))
}

pub async fn create_location(
    State(state): State<AppState>,
    Json(new): Json<NewLocation>,
) -> Result<(StatusCode, Json<LocationRecord>), StoreError> {
    let record = state.create_location(new)?;
    info!(location_id = %record.id, profile_id = %record.profile_id, "location created");
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<LocationPatch>,
) -> Result<Json<LocationRecord>, StoreError> {
    let record = state.update_location(&id, &patch)?;
    debug!(location_id = %id, "location updated");
    Ok(Json(record))
}

pub async fn delete_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StoreError> {
    state.delete_location(&id)?;
    info!(location_id = %id, "location deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_profiles(State(state): State<AppState>) -> Json<Vec<ProfileSummary>> {
    Json(state.list_profiles())
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProfileSummary>, StatusCode> {
    state.profile(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_profile_by_number(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<ProfileSummary>, StatusCode> {
    let number: ProfileNumber = number.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    state
        .profile_by_number(&number)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn create_profile(
    State(state): State<AppState>,
    Json(new): Json<NewProfile>,
) -> Result<(StatusCode, Json<ProfileSummary>), StoreError> {
    let profile = state.create_profile(new)?;
    info!(profile_id = %profile.id, number = %profile.profile_number, "profile created");
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<ProfileSummary>, StoreError> {
    let profile = state.update_profile(&id, &patch)?;
    debug!(profile_id = %id, "profile updated");
    Ok(Json(profile))
}

pub async fn delete_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StoreError> {
    state.delete_profile(&id)?;
    info!(profile_id = %id, "profile deleted");
    Ok(StatusCode::NO_CONTENT)
}
