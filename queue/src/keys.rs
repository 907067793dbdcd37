//! Redis key layout for the work queue
//!
//! Reservations are stored as a hash per id (`reservation:{id}`), indexed by two sets
//! so the Gateway and loops can list without a full scan: one set per status
//! (`reservations:status:{status}`) and one set per owner (`reservations:owner:{owner}`).
//! The command audit queue is a single list (`audit:queue`) popped with `BLPOP`.

use uuid::Uuid;

/// The hash key holding a single reservation's serialized fields
pub fn reservation(id: &Uuid) -> String {
    format!("reservation:{id}")
}

/// The set of reservation ids currently in a given status
pub fn status_index(status: &str) -> String {
    format!("reservations:status:{status}")
}

/// The set of reservation ids owned by a given principal
pub fn owner_index(owner: &str) -> String {
    format!("reservations:owner:{owner}")
}

/// The set of every reservation id that has ever been written
pub fn all_index() -> &'static str {
    "reservations:all"
}

/// The list backing the command audit queue
pub fn audit_queue() -> &'static str {
    "audit:queue"
}
