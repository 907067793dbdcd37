//! Typed construction of the outer-cluster objects backing one sandbox

use crate::labels::sandkube_labels;
use crate::WorkloadSpec;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, ExecAction, NFSVolumeSource,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, Probe,
    ResourceRequirements, SecurityContext, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use sandkube_common::ids;
use std::collections::BTreeMap;

const DOCKER_PORT: i32 = 2375;
const DOCKER_GRAPH_STORAGE: &str = "/var/lib/docker";
const SHARE_MOUNT: &str = "/root/share";
const TMP_MOUNT: &str = "/tmp";
/// The root of the shared NFS export every workload mounts in full, subpathed per owner
const NFS_EXPORT_ROOT: &str = "/exports";

fn owner_slug(spec: &WorkloadSpec) -> String {
    ids::slug(&spec.owner)
}

fn selector_labels(spec: &WorkloadSpec) -> BTreeMap<String, String> {
    BTreeMap::from([("sandkube/workload".to_owned(), spec.name.clone())])
}

fn object_meta(name: &str, spec: &WorkloadSpec) -> ObjectMeta {
    let mut labels = sandkube_labels(&spec.reservation_id, &owner_slug(spec));
    labels.insert("sandkube/workload".to_owned(), spec.name.clone());
    ObjectMeta {
        name: Some(name.to_owned()),
        labels: Some(labels),
        ..Default::default()
    }
}

/// The volumes every workload mounts regardless of flavor: a scratch `emptyDir` and the
/// owner's subpathed slice of the shared NFS export
fn common_volumes(spec: &WorkloadSpec) -> Vec<Volume> {
    vec![
        Volume {
            name: "tmp".to_owned(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: "share".to_owned(),
            nfs: Some(NFSVolumeSource {
                server: spec.nfs_server.clone(),
                path: NFS_EXPORT_ROOT.to_owned(),
                read_only: Some(false),
            }),
            ..Default::default()
        },
    ]
}

fn common_mounts(spec: &WorkloadSpec) -> Vec<VolumeMount> {
    vec![
        VolumeMount {
            name: "tmp".to_owned(),
            mount_path: TMP_MOUNT.to_owned(),
            ..Default::default()
        },
        VolumeMount {
            name: "share".to_owned(),
            mount_path: SHARE_MOUNT.to_owned(),
            sub_path: Some(spec.nfs_sub_path.clone()),
            ..Default::default()
        },
    ]
}

fn docker_probe() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec!["docker".to_owned(), "ps".to_owned()]),
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(10),
        ..Default::default()
    }
}

fn docker_container(spec: &WorkloadSpec, mut mounts: Vec<VolumeMount>) -> Container {
    mounts.extend(common_mounts(spec));
    Container {
        name: "docker".to_owned(),
        image: Some(spec.image.clone()),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        ports: Some(vec![ContainerPort {
            container_port: DOCKER_PORT,
            ..Default::default()
        }]),
        volume_mounts: Some(mounts),
        resources: Some(ResourceRequirements::default()),
        liveness_probe: Some(docker_probe()),
        readiness_probe: Some(docker_probe()),
        ..Default::default()
    }
}

fn pod_template(spec: &WorkloadSpec, mut volumes: Vec<Volume>, mounts: Vec<VolumeMount>) -> PodTemplateSpec {
    volumes.extend(common_volumes(spec));
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(selector_labels(spec)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![docker_container(spec, mounts)],
            volumes: Some(volumes),
            ..Default::default()
        }),
    }
}

/// Builds the PVC backing a stateful workload's docker storage directory
///
/// # Arguments
///
/// * `spec` - The workload this PVC belongs to
pub fn build_pvc(spec: &WorkloadSpec) -> PersistentVolumeClaim {
    let name = ids::docker_storage_pvc_name(&spec.name);
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_owned(), Quantity(spec.pvc_size.clone()));
    PersistentVolumeClaim {
        metadata: object_meta(&name, spec),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds a single-replica `StatefulSet` with its docker storage volume bound to a PVC,
/// giving it a deterministic `{name}-0` pod name
///
/// # Arguments
///
/// * `spec` - The workload to build
pub fn build_statefulset(spec: &WorkloadSpec) -> StatefulSet {
    let pvc_name = ids::docker_storage_pvc_name(&spec.name);
    let volume = Volume {
        name: "docker-graph-storage".to_owned(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: pvc_name,
            ..Default::default()
        }),
        ..Default::default()
    };
    let mount = VolumeMount {
        name: "docker-graph-storage".to_owned(),
        mount_path: DOCKER_GRAPH_STORAGE.to_owned(),
        ..Default::default()
    };
    StatefulSet {
        metadata: object_meta(&spec.name, spec),
        spec: Some(StatefulSetSpec {
            service_name: spec.name.clone(),
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(spec)),
                ..Default::default()
            },
            template: pod_template(spec, vec![volume], vec![mount]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds a single-replica `Deployment` with docker storage backed by an ephemeral
/// `emptyDir` rather than a PVC
///
/// # Arguments
///
/// * `spec` - The workload to build
pub fn build_deployment(spec: &WorkloadSpec) -> Deployment {
    let volume = Volume {
        name: "docker-graph-storage".to_owned(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    };
    let mount = VolumeMount {
        name: "docker-graph-storage".to_owned(),
        mount_path: DOCKER_GRAPH_STORAGE.to_owned(),
        ..Default::default()
    };
    Deployment {
        metadata: object_meta(&spec.name, spec),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(spec)),
                ..Default::default()
            },
            template: pod_template(spec, vec![volume], vec![mount]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds the `ClusterIP` service fronting a workload's docker daemon port
///
/// # Arguments
///
/// * `spec` - The workload this service fronts
pub fn build_service(spec: &WorkloadSpec) -> Service {
    Service {
        metadata: object_meta(&spec.name, spec),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(spec)),
            ports: Some(vec![ServicePort {
                port: DOCKER_PORT,
                target_port: Some(IntOrString::Int(DOCKER_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandkube_common::WorkloadType;
    use uuid::Uuid;

    fn spec(workload_type: WorkloadType) -> WorkloadSpec {
        WorkloadSpec {
            name: "k8s-playground-abcd1234".to_owned(),
            reservation_id: Uuid::nil(),
            owner: "alice@example.com".to_owned(),
            image: "example.com/k8s-playground:1.33".to_owned(),
            workload_type,
            pvc_size: "10Gi".to_owned(),
            nfs_server: "10.0.0.5".to_owned(),
            nfs_sub_path: "alice-example-com".to_owned(),
        }
    }

    #[test]
    fn statefulset_mounts_pvc_at_docker_graph_storage() {
        let sts = build_statefulset(&spec(WorkloadType::Stateful));
        let pod_spec = sts.spec.unwrap().template.spec.unwrap();
        let container = &pod_spec.containers[0];
        let mounts = container.volume_mounts.as_ref().unwrap();
        assert!(mounts.iter().any(|m| m.mount_path == DOCKER_GRAPH_STORAGE));
        assert!(mounts.iter().any(|m| m.mount_path == SHARE_MOUNT));
        assert!(mounts.iter().any(|m| m.mount_path == TMP_MOUNT));
        assert_eq!(container.security_context.as_ref().unwrap().privileged, Some(true));
    }

    #[test]
    fn deployment_uses_empty_dir_not_pvc() {
        let deploy = build_deployment(&spec(WorkloadType::Ephemeral));
        let pod_spec = deploy.spec.unwrap().template.spec.unwrap();
        let volumes = pod_spec.volumes.unwrap();
        let docker_volume = volumes
            .iter()
            .find(|v| v.name == "docker-graph-storage")
            .unwrap();
        assert!(docker_volume.empty_dir.is_some());
        assert!(docker_volume.persistent_volume_claim.is_none());
    }

    #[test]
    fn service_targets_docker_port() {
        let svc = build_service(&spec(WorkloadType::Stateful));
        let ports = svc.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, DOCKER_PORT);
    }
}
