//! The Killer loop: tears down the outer workload behind every `shutdown` reservation

use sandkube_common::Status;
use sandkube_driver::{Driver, WorkloadSpec};
use sandkube_queue::Queue;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often the Killer scans for `shutdown` reservations
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Runs the Killer loop until cancelled
///
/// # Arguments
///
/// * `queue` - The reservation store
/// * `driver` - The cluster driver used to tear down workloads
/// * `cancel` - Stops the loop the next time it wakes once cancelled
pub async fn run(queue: Queue, driver: Driver, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }
        let shutting_down = match queue.list_by_status(Status::Shutdown).await {
            Ok(shutting_down) => shutting_down,
            Err(err) => {
                tracing::error!(%err, "killer failed to list shutdown reservations");
                continue;
            }
        };
        for mut reservation in shutting_down {
            let id = reservation.id;
            // Write terminated first so a delete failure doesn't leave the record stuck in
            // `shutdown`; the next pass's delete_workload call is idempotent on a 404.
            if let Err(err) = reservation.transition(Status::Terminated) {
                tracing::warn!(%err, %id, "killer could not mark reservation terminated");
                continue;
            }
            if let Err(err) = queue.put(&reservation).await {
                tracing::error!(%err, %id, "killer failed to persist terminated transition");
                continue;
            }
            if reservation.pod_id.is_empty() {
                continue;
            }
            let spec = WorkloadSpec {
                name: reservation.pod_id.clone(),
                reservation_id: reservation.id,
                owner: reservation.owner.clone(),
                image: String::new(),
                workload_type: reservation.workload_type,
                pvc_size: String::new(),
                nfs_server: String::new(),
                nfs_sub_path: String::new(),
            };
            if let Err(err) = driver.delete_workload(&spec).await {
                tracing::error!(%err, %id, "killer failed to delete workload, will retry next pass");
            }
        }
    }
}
