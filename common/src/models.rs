//! The core data types shared by every sandkube binary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The maximum length, in characters, of a reservation's display name
pub const DISPLAY_NAME_MAX_LEN: usize = 50;

/// The grace period a `terminated` reservation remains readable before the Collector
/// deletes it
pub const TERMINATED_GRACE: chrono::Duration = chrono::Duration::minutes(5);

/// The flavor of outer-cluster workload backing a reservation's sandbox pod
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadType {
    /// A `StatefulSet` with a PVC-backed `/var/lib/docker`, deterministic pod name
    Stateful,
    /// A `Deployment` with an emptyDir-backed `/var/lib/docker`, pod name discovered by label
    Ephemeral,
}

impl std::fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            WorkloadType::Stateful => write!(f, "stateful"),
            WorkloadType::Ephemeral => write!(f, "ephemeral"),
        }
    }
}

impl std::str::FromStr for WorkloadType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "stateful" => Ok(WorkloadType::Stateful),
            "ephemeral" => Ok(WorkloadType::Ephemeral),
            other => Err(format!("unknown workload type: {other}")),
        }
    }
}

/// The lifecycle status of a [`Reservation`]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Created by the Gateway, not yet picked up by the Generator
    Pending,
    /// The Generator is provisioning the workload
    Generating,
    /// The sandbox pod was observed Running with all containers Ready
    Available,
    /// A step in provisioning failed; see `error_message`
    Error,
    /// Marked for teardown by the Collector or a user-initiated destroy
    Shutdown,
    /// The Killer has deleted the underlying workload
    Terminated,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Status::Pending => write!(f, "pending"),
            Status::Generating => write!(f, "generating"),
            Status::Available => write!(f, "available"),
            Status::Error => write!(f, "error"),
            Status::Shutdown => write!(f, "shutdown"),
            Status::Terminated => write!(f, "terminated"),
        }
    }
}

impl Status {
    /// Returns true if `self -> target` is an edge in the state machine in SPEC_FULL §4.7.2
    ///
    /// # Arguments
    ///
    /// * `target` - The status being transitioned to
    pub fn can_transition_to(self, target: Status) -> bool {
        use Status::*;
        matches!(
            (self, target),
            (Pending, Generating)
                | (Pending, Error)
                | (Generating, Available)
                | (Generating, Error)
                | (Available, Shutdown)
                | (Error, Shutdown)
                | (Shutdown, Terminated)
        )
    }

    /// Returns true once a reservation in this status is no longer mutated by any loop
    /// except the Collector's deletion sweep
    pub fn is_terminal_settled(self) -> bool {
        matches!(self, Status::Terminated)
    }
}

/// One user request for an ephemeral, nested Kubernetes cluster
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Reservation {
    /// The immutable primary key
    pub id: Uuid,
    /// The authenticated principal that created this reservation
    pub owner: String,
    /// A user-chosen label, at most [`DISPLAY_NAME_MAX_LEN`] characters
    #[serde(default)]
    pub display_name: Option<String>,
    /// The requested Kubernetes version tag; must be a key in the configured image map
    pub k8s_version: String,
    /// The outer-cluster workload flavor, fixed at creation
    pub workload_type: WorkloadType,
    /// The name of the outer workload object; empty until the Generator provisions it
    #[serde(default)]
    pub pod_id: String,
    /// The current lifecycle status
    pub status: Status,
    /// Populated on any transition into `error`
    #[serde(default)]
    pub error_message: Option<String>,
    /// Set on every write
    pub status_updated_at: DateTime<Utc>,
    /// Set at creation; `now + reservation_ttl`
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a new `pending` reservation
    ///
    /// # Arguments
    ///
    /// * `owner` - The principal id of the creator
    /// * `k8s_version` - The requested Kubernetes version tag
    /// * `display_name` - An optional user-chosen label
    /// * `workload_type` - The workload flavor to provision
    /// * `ttl` - How long until this reservation expires
    pub fn new(
        owner: String,
        k8s_version: String,
        display_name: Option<String>,
        workload_type: WorkloadType,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Reservation {
            id: Uuid::new_v4(),
            owner,
            display_name,
            k8s_version,
            workload_type,
            pod_id: String::new(),
            status: Status::Pending,
            error_message: None,
            status_updated_at: now,
            expires_at: now + ttl,
        }
    }

    /// Applies a status transition, validating it against the allowed-transitions table and
    /// bumping `status_updated_at`
    ///
    /// # Arguments
    ///
    /// * `target` - The status to transition to
    pub fn transition(&mut self, target: Status) -> Result<(), crate::Error> {
        if !self.status.can_transition_to(target) {
            return Err(crate::Error::Conflict(format!(
                "cannot transition reservation {} from {} to {target}",
                self.id, self.status
            )));
        }
        self.status = target;
        self.status_updated_at = Utc::now();
        Ok(())
    }

    /// Transitions into `error`, recording the failure message; bypasses the normal
    /// transition table since any non-terminal status may fail
    ///
    /// # Arguments
    ///
    /// * `msg` - The human-readable failure message
    pub fn fail<T: Into<String>>(&mut self, msg: T) {
        self.status = Status::Error;
        self.error_message = Some(msg.into());
        self.status_updated_at = Utc::now();
    }

    /// Returns true if this reservation has passed its expiry and is still live
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.status, Status::Shutdown | Status::Terminated | Status::Error)
            && now >= self.expires_at
    }

    /// Returns true if this `terminated` reservation has sat past the deletion grace period
    pub fn is_collectible(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Terminated && now - self.status_updated_at > TERMINATED_GRACE
    }
}

/// Validates a reservation's requested display name against [`DISPLAY_NAME_MAX_LEN`]
///
/// # Arguments
///
/// * `name` - The optional display name supplied by a client
pub fn validate_display_name(name: Option<&str>) -> Result<(), crate::Error> {
    match name {
        Some(name) if name.chars().count() > DISPLAY_NAME_MAX_LEN => Err(crate::Error::Generic(
            format!("displayName must be at most {DISPLAY_NAME_MAX_LEN} characters"),
        )),
        _ => Ok(()),
    }
}

/// One command flushed by CR/LF from the terminal input parser
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuditEntry {
    /// A unique id for this audit entry
    pub id: Uuid,
    /// The reservation this command was run against
    pub reservation_id: Uuid,
    /// The principal that ran the command
    pub user_id: String,
    /// A human-friendly form of the principal, when available
    #[serde(default)]
    pub user_name: Option<String>,
    /// The sandbox pod the command ran in
    pub pod_name: String,
    /// The terminal session this command was flushed from
    pub session_id: String,
    /// The flushed command text
    pub command_text: String,
    /// When this entry was flushed from the terminal input parser
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_transitions_match_state_machine() {
        assert!(Status::Pending.can_transition_to(Status::Generating));
        assert!(Status::Pending.can_transition_to(Status::Error));
        assert!(Status::Generating.can_transition_to(Status::Available));
        assert!(Status::Generating.can_transition_to(Status::Error));
        assert!(Status::Available.can_transition_to(Status::Shutdown));
        assert!(Status::Error.can_transition_to(Status::Shutdown));
        assert!(Status::Shutdown.can_transition_to(Status::Terminated));
    }

    #[test]
    fn disallowed_transitions_are_rejected() {
        assert!(!Status::Pending.can_transition_to(Status::Available));
        assert!(!Status::Available.can_transition_to(Status::Pending));
        assert!(!Status::Terminated.can_transition_to(Status::Pending));
        assert!(!Status::Available.can_transition_to(Status::Generating));
    }

    #[test]
    fn transition_bumps_status_updated_at_monotonically() {
        let mut r = Reservation::new(
            "alice@example.com".into(),
            "1.33".into(),
            None,
            WorkloadType::Ephemeral,
            chrono::Duration::hours(24),
        );
        let first = r.status_updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        r.transition(Status::Generating).unwrap();
        assert!(r.status_updated_at >= first);
        assert_eq!(r.status, Status::Generating);
    }

    #[test]
    fn transition_rejects_invalid_edge() {
        let mut r = Reservation::new(
            "alice@example.com".into(),
            "1.33".into(),
            None,
            WorkloadType::Ephemeral,
            chrono::Duration::hours(24),
        );
        assert!(r.transition(Status::Available).is_err());
        assert_eq!(r.status, Status::Pending);
    }

    #[test]
    fn display_name_boundary() {
        let ok: String = "a".repeat(50);
        let too_long: String = "a".repeat(51);
        assert!(validate_display_name(Some(&ok)).is_ok());
        assert!(validate_display_name(Some(&too_long)).is_err());
        assert!(validate_display_name(None).is_ok());
    }

    #[test]
    fn expiry_boundary() {
        let mut r = Reservation::new(
            "alice@example.com".into(),
            "1.33".into(),
            None,
            WorkloadType::Ephemeral,
            chrono::Duration::hours(24),
        );
        r.status = Status::Available;
        assert!(!r.is_expired(r.expires_at - chrono::Duration::seconds(1)));
        assert!(r.is_expired(r.expires_at));
    }

    #[test]
    fn collectible_requires_grace_period_elapsed() {
        let mut r = Reservation::new(
            "alice@example.com".into(),
            "1.33".into(),
            None,
            WorkloadType::Ephemeral,
            chrono::Duration::hours(24),
        );
        r.status = Status::Terminated;
        let now = r.status_updated_at + chrono::Duration::minutes(4);
        assert!(!r.is_collectible(now));
        let later = r.status_updated_at + chrono::Duration::minutes(6);
        assert!(r.is_collectible(later));
    }
}
