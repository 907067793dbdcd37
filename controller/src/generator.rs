//! The Generator loop: provisions outer-cluster workloads for `pending` reservations

use sandkube_common::{Conf, Status};
use sandkube_driver::{Driver, WorkloadSpec};
use sandkube_queue::Queue;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How often the Generator scans for `pending` reservations
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// How often readiness is polled once a workload has been created
const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// How long the Generator waits for a pod to become ready before giving up
const READINESS_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs the Generator loop until cancelled
///
/// # Arguments
///
/// * `queue` - The reservation store
/// * `driver` - The cluster driver used to provision workloads
/// * `conf` - The sandbox provisioning configuration
/// * `cancel` - Stops the loop the next time it wakes once cancelled
pub async fn run(queue: Queue, driver: Driver, conf: Conf, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }
        let pending = match queue.list_by_status(Status::Pending).await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::error!(%err, "generator failed to list pending reservations");
                continue;
            }
        };
        for reservation in pending {
            process_one(&queue, &driver, &conf, reservation).await;
        }
    }
}

/// Drives a single `pending` reservation through provisioning to `available` or `error`
async fn process_one(
    queue: &Queue,
    driver: &Driver,
    conf: &Conf,
    mut reservation: sandkube_common::Reservation,
) {
    let id = reservation.id;
    if let Err(err) = reservation.transition(Status::Generating) {
        tracing::warn!(%err, %id, "generator could not claim reservation, skipping this cycle");
        return;
    }
    if let Err(err) = queue.put(&reservation).await {
        tracing::warn!(%err, %id, "generator failed to persist generating transition, skipping this cycle");
        return;
    }

    if let Err(msg) = provision(queue, driver, conf, &mut reservation).await {
        tracing::error!(%id, %msg, "generator provisioning failed");
        reservation.fail(msg);
        if let Err(err) = queue.put(&reservation).await {
            tracing::error!(%err, %id, "generator failed to persist error transition");
        }
    }
}

/// The body of provisioning; any `Err` is recorded verbatim as the reservation's error message
async fn provision(
    queue: &Queue,
    driver: &Driver,
    conf: &Conf,
    reservation: &mut sandkube_common::Reservation,
) -> Result<(), String> {
    let image = conf.resolve_image(&reservation.k8s_version).ok_or_else(|| {
        format!(
            "unknown k8s version {}, known versions: {}",
            reservation.k8s_version,
            conf.known_versions().join(", ")
        )
    })?;

    let nfs_server = driver
        .resolve_service_ip(&conf.sandbox.nfs_service_name)
        .await
        .map_err(|err| format!("failed to resolve nfs server: {err}"))?;
    let nfs_sub_path = driver
        .ensure_owner_directory(&reservation.owner)
        .await
        .map_err(|err| format!("failed to prepare owner directory: {err}"))?;

    let spec = WorkloadSpec {
        name: sandkube_common::ids::workload_name(&reservation.id),
        reservation_id: reservation.id,
        owner: reservation.owner.clone(),
        image,
        workload_type: reservation.workload_type,
        pvc_size: conf.sandbox.pvc_size.clone(),
        nfs_server,
        nfs_sub_path,
    };

    let pod_name = driver
        .create_workload(&spec)
        .await
        .map_err(|err| format!("failed to create workload: {err}"))?;
    let pod_name = if pod_name.is_empty() {
        driver
            .resolve_pod(&spec)
            .await
            .map_err(|err| format!("failed to resolve pod: {err}"))?
    } else {
        pod_name
    };
    reservation.pod_id = spec.name.clone();

    wait_for_ready(driver, &pod_name).await?;

    reservation
        .transition(Status::Available)
        .map_err(|err| err.to_string())?;
    queue
        .put(reservation)
        .await
        .map_err(|err| format!("failed to persist available transition: {err}"))?;
    Ok(())
}

/// Polls pod readiness every [`READINESS_POLL_INTERVAL`] until it is ready, a fatal condition
/// is observed, or [`READINESS_TIMEOUT`] elapses
async fn wait_for_ready(driver: &Driver, pod_name: &str) -> Result<(), String> {
    let deadline = Instant::now() + READINESS_TIMEOUT;
    loop {
        match driver.is_pod_ready(pod_name).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(err) => return Err(err.to_string()),
        }
        if Instant::now() >= deadline {
            return Err("timeout waiting for pod".to_owned());
        }
        tokio::time::sleep(READINESS_POLL_INTERVAL).await;
    }
}
