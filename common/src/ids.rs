//! Id and name derivation helpers shared by the driver and the loops

use std::sync::LazyLock;
use uuid::Uuid;

/// Matches any run of characters that are not lowercase ascii alphanumerics or `-`
static NOT_SLUG_SAFE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new("[^a-z0-9-]+").expect("owner slug regex is valid"));

/// Sanitizes an owner principal id into a name safe to use as an NFS subdirectory
///
/// Lowercases the input, replaces any run of non `[a-z0-9-]` characters with a single `-`,
/// trims leading/trailing `-`, and falls back to `invalid-name` if nothing survives.
///
/// # Arguments
///
/// * `owner` - The raw owner principal id, e.g. an email address
pub fn slug(owner: &str) -> String {
    let lowered = owner.to_lowercase();
    let replaced = NOT_SLUG_SAFE.replace_all(&lowered, "-");
    let trimmed = replaced.trim_matches('-');
    if trimmed.is_empty() {
        "invalid-name".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Derives the workload name for a reservation from its id
///
/// The name is deterministic and short enough to satisfy Kubernetes object name limits:
/// `k8s-playground-{first 8 hex chars of the reservation id}`.
///
/// # Arguments
///
/// * `id` - The reservation id to derive a workload name from
pub fn workload_name(id: &Uuid) -> String {
    let hex = id.simple().to_string();
    format!("k8s-playground-{}", &hex[..8])
}

/// Derives a terminal session id from the owner, pod name, and a monotonic nanosecond
/// timestamp, matching the `{owner}-{pod}-{nano}` scheme used for audit correlation
///
/// # Arguments
///
/// * `owner` - The principal attaching to the pod
/// * `pod` - The pod name being attached to
/// * `nanos` - A nanosecond-resolution timestamp, unique enough to disambiguate reattaches
pub fn session_id(owner: &str, pod: &str, nanos: i64) -> String {
    format!("{owner}-{pod}-{nanos}")
}

/// The generated PVC name for a stateful workload's docker storage volume
///
/// # Arguments
///
/// * `workload_name` - The name of the stateful set this PVC belongs to
pub fn docker_storage_pvc_name(workload_name: &str) -> String {
    format!("docker-graph-storage-{workload_name}-0")
}

/// The deterministic pod name for a stateful workload's single replica
///
/// # Arguments
///
/// * `workload_name` - The name of the stateful set
pub fn stateful_pod_name(workload_name: &str) -> String {
    format!("{workload_name}-0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_lowercases_and_replaces() {
        assert_eq!(slug("User.Name+Test@Example.COM"), "user-name-test-example-com");
    }

    #[test]
    fn slug_trims_dashes() {
        assert_eq!(slug("---weird---"), "weird");
    }

    #[test]
    fn slug_empty_becomes_invalid_name() {
        assert_eq!(slug("***"), "invalid-name");
        assert_eq!(slug(""), "invalid-name");
    }

    #[test]
    fn workload_name_is_short_and_deterministic() {
        let id = Uuid::nil();
        assert_eq!(workload_name(&id), "k8s-playground-00000000");
    }

    #[test]
    fn docker_storage_pvc_name_matches_scheme() {
        assert_eq!(
            docker_storage_pvc_name("k8s-playground-abcd1234"),
            "docker-graph-storage-k8s-playground-abcd1234-0"
        );
    }

    #[test]
    fn stateful_pod_name_appends_ordinal_zero() {
        assert_eq!(stateful_pod_name("k8s-playground-abcd1234"), "k8s-playground-abcd1234-0");
    }
}
