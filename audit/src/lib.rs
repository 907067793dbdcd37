//! The command audit sink: drains the work queue's audit side channel into daily,
//! newline-delimited-JSON log files and serves them back out for admin review

mod reader;
mod rotation;
mod sink;

pub use reader::{list, ListQuery};
pub use sink::{maintenance_task, AuditSink};

use rand::Rng;

/// Generates a random bearer token for gating the admin command-log read API when none is
/// configured
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..32).map(|_| format!("{:x}", rng.gen_range(0..16))).collect()
}
