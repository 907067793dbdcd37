//! Shared types, config, and error handling for sandkube

pub mod conf;
pub mod error;
pub mod ids;
pub mod models;
pub mod trace;

pub use conf::{AuthMethod, Conf};
pub use error::{ApiError, Error};
pub use models::{validate_display_name, AuditEntry, Reservation, Status, WorkloadType};
