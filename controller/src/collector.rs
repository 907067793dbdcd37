//! The Collector loop: expires overdue reservations and deletes settled ones

use chrono::Utc;
use sandkube_common::Status;
use sandkube_queue::Queue;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often the Collector scans every reservation
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Runs the Collector loop until cancelled
///
/// # Arguments
///
/// * `queue` - The reservation store
/// * `cancel` - Stops the loop the next time it wakes once cancelled
pub async fn run(queue: Queue, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }
        let reservations = match queue.list_all().await {
            Ok(reservations) => reservations,
            Err(err) => {
                tracing::error!(%err, "collector failed to list reservations");
                continue;
            }
        };
        let now = Utc::now();
        for mut reservation in reservations {
            let id = reservation.id;
            if reservation.is_expired(now) {
                if let Err(err) = reservation.transition(Status::Shutdown) {
                    tracing::warn!(%err, %id, "collector could not mark expired reservation for shutdown");
                    continue;
                }
                if let Err(err) = queue.put(&reservation).await {
                    tracing::error!(%err, %id, "collector failed to persist shutdown transition");
                }
                continue;
            }
            if reservation.is_collectible(now) {
                if let Err(err) = queue.delete(&id).await {
                    tracing::error!(%err, %id, "collector failed to delete terminated reservation");
                }
            }
        }
    }
}
