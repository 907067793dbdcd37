//! Label conventions applied to every object the driver creates

use std::collections::BTreeMap;
use uuid::Uuid;

/// Builds the label set stamped on every sandbox workload object, mirroring the
/// `app`/ownership label convention used to recognize owned pods
///
/// # Arguments
///
/// * `reservation_id` - The reservation this object belongs to
/// * `owner_slug` - The sanitized owner name
pub fn sandkube_labels(reservation_id: &Uuid, owner_slug: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_owned(), "sandkube".to_owned());
    labels.insert("sandkube/reservation".to_owned(), reservation_id.to_string());
    labels.insert("sandkube/owner-slug".to_owned(), owner_slug.to_owned());
    labels
}

/// Checks whether an object's labels mark it as owned by sandkube
///
/// # Arguments
///
/// * `labels` - The labels to check, as found on a live object
pub fn is_sandkube_owned(labels: &BTreeMap<String, String>) -> bool {
    labels.get("app").map(String::as_str) == Some("sandkube")
        && labels.contains_key("sandkube/reservation")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_include_required_keys() {
        let id = Uuid::nil();
        let labels = sandkube_labels(&id, "alice");
        assert_eq!(labels.get("app"), Some(&"sandkube".to_owned()));
        assert_eq!(
            labels.get("sandkube/reservation"),
            Some(&id.to_string())
        );
        assert_eq!(labels.get("sandkube/owner-slug"), Some(&"alice".to_owned()));
        assert!(is_sandkube_owned(&labels));
    }

    #[test]
    fn unlabeled_object_is_not_owned() {
        assert!(!is_sandkube_owned(&BTreeMap::new()));
    }
}
