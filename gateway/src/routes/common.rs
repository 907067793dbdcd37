//! Helpers shared by the reservation, terminal, and proxy routes

use crate::auth::Principal;
use crate::state::AppState;
use sandkube_common::{ApiError, Reservation, Status};
use sandkube_driver::WorkloadSpec;
use uuid::Uuid;

/// Loads a reservation and enforces that the caller owns it
///
/// # Arguments
///
/// * `state` - The app state holding the reservation store
/// * `principal` - The authenticated caller
/// * `id` - The reservation to load
pub async fn load_owned(state: &AppState, principal: &Principal, id: Uuid) -> Result<Reservation, ApiError> {
    let reservation = state.queue.get(&id).await?;
    if reservation.owner != principal.id {
        return sandkube_common::forbidden!("reservation owner mismatch");
    }
    Ok(reservation)
}

/// Rejects any reservation not currently `available`
pub fn ensure_available(reservation: &Reservation) -> Result<(), ApiError> {
    if reservation.status != Status::Available {
        return sandkube_common::bad!("Environment not available");
    }
    Ok(())
}

/// Resolves the pod backing a reservation's workload
pub async fn resolve_pod(state: &AppState, reservation: &Reservation) -> Result<String, ApiError> {
    state
        .driver
        .resolve_pod(&minimal_spec(reservation))
        .await
        .map_err(ApiError::from)
}

/// Builds just enough of a [`WorkloadSpec`] to resolve or tear down a workload from a
/// reservation record; the fields only needed at creation time are left blank
pub fn minimal_spec(reservation: &Reservation) -> WorkloadSpec {
    WorkloadSpec {
        name: reservation.pod_id.clone(),
        reservation_id: reservation.id,
        owner: reservation.owner.clone(),
        image: String::new(),
        workload_type: reservation.workload_type,
        pvc_size: String::new(),
        nfs_server: String::new(),
        nfs_sub_path: String::new(),
    }
}
