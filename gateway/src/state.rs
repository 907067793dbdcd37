//! Shared state handed to every route handler

use sandkube_common::Conf;
use sandkube_driver::Driver;
use sandkube_queue::Queue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything a route handler needs: the reservation store, the cluster driver, and the
/// loaded configuration. Command audit entries are pushed onto the work queue's audit side
/// channel directly; the controller binary owns draining and rotating them to disk.
#[derive(Clone)]
pub struct AppState {
    /// The loaded and, in practice, immutable configuration
    pub conf: Arc<Conf>,
    /// The reservation store and audit side channel
    pub queue: Queue,
    /// The outer cluster driver used by the terminal gateway and the in-pod proxy
    pub driver: Driver,
    /// Flips to true once the queue connection has completed one successful round trip
    ready: Arc<AtomicBool>,
}

impl AppState {
    /// Builds app state from already-connected collaborators
    pub fn new(conf: Conf, queue: Queue, driver: Driver) -> Self {
        AppState {
            conf: Arc::new(conf),
            queue,
            driver,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Marks the gateway ready for the `/healthz` readiness probe
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    /// Returns whether the gateway has completed its first successful queue round trip
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}
