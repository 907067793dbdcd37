//! Per-owner reservation CRUD and version listing

use super::common::load_owned;
use crate::auth::Principal;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use chrono::Duration;
use sandkube_common::{validate_display_name, ApiError, Reservation, Status};
use serde::Deserialize;
use uuid::Uuid;

/// Mounts the reservation CRUD and version routes
pub fn mount(app: Router<AppState>) -> Router<AppState> {
    app.route("/reservations", get(list).post(create))
        .route("/reservations/:id", delete(destroy))
        .route("/reservations/:id/displayName", put(set_display_name))
        .route("/versions", get(versions))
}

#[derive(Debug, Deserialize)]
struct CreateReservationRequest {
    #[serde(rename = "k8sVersion")]
    k8s_version: String,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetDisplayNameRequest {
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
}

async fn list(State(state): State<AppState>, principal: Principal) -> Result<Json<Vec<Reservation>>, ApiError> {
    Ok(Json(state.queue.list_by_owner(&principal.id).await?))
}

async fn create(
    State(state): State<AppState>,
    principal: Principal,
    Json(body): Json<CreateReservationRequest>,
) -> Result<Json<Reservation>, ApiError> {
    validate_display_name(body.display_name.as_deref())?;
    let workload_type = state
        .conf
        .sandbox
        .workload_type
        .parse()
        .map_err(|err: String| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err))?;
    let reservation = Reservation::new(
        principal.id,
        body.k8s_version,
        body.display_name,
        workload_type,
        Duration::seconds(state.conf.sandbox.reservation_ttl_secs),
    );
    state.queue.put(&reservation).await?;
    Ok(Json(reservation))
}

async fn set_display_name(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(body): Json<SetDisplayNameRequest>,
) -> Result<Json<Reservation>, ApiError> {
    validate_display_name(body.display_name.as_deref())?;
    let mut reservation = load_owned(&state, &principal, id).await?;
    reservation.display_name = body.display_name;
    state.queue.put(&reservation).await?;
    Ok(Json(reservation))
}

async fn destroy(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut reservation = load_owned(&state, &principal, id).await?;
    reservation.transition(Status::Shutdown)?;
    state.queue.put(&reservation).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn versions(State(state): State<AppState>, _principal: Principal) -> Json<Vec<String>> {
    let mut versions = state.conf.known_versions();
    versions.sort();
    Json(versions)
}
