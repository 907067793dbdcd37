//! The cluster driver: the only crate that talks directly to the outer Kubernetes API

mod exec;
mod labels;
mod workload;

pub use exec::ExecOutput;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use sandkube_common::{ids, Error, WorkloadType};
use uuid::Uuid;

/// The well-known label selector the NFS server pod is expected to carry
pub const NFS_SERVER_LABEL_SELECTOR: &str = "app=nfs-server";
/// The container within the NFS server pod `mkdir` is exec'd into
pub const NFS_SERVER_CONTAINER: &str = "nfs-server";
/// The root of the NFS export tree; owner subdirectories live directly under it
pub const NFS_EXPORT_ROOT: &str = "/exports";
/// The name of the privileged container every sandbox workload runs docker in
pub const SANDBOX_CONTAINER: &str = "docker";

/// A request to provision one sandbox workload
pub struct WorkloadSpec {
    /// The deterministic name shared by the Deployment/StatefulSet, Service, and PVC
    pub name: String,
    /// The reservation this workload belongs to
    pub reservation_id: Uuid,
    /// The owning principal, used for labeling and NFS subdirectory selection
    pub owner: String,
    /// The container image to run
    pub image: String,
    /// Which workload flavor to build
    pub workload_type: WorkloadType,
    /// The PVC size requested for stateful workloads, e.g. `"10Gi"`
    pub pvc_size: String,
    /// The address of the NFS server backing the shared export
    pub nfs_server: String,
    /// The owner's subdirectory under the NFS export, mounted at `/root/share`
    pub nfs_sub_path: String,
}

/// The cluster driver's handle to the outer Kubernetes API
#[derive(Clone)]
pub struct Driver {
    client: kube::Client,
    namespace: String,
}

impl Driver {
    /// Builds a driver from an existing kube client
    ///
    /// # Arguments
    ///
    /// * `client` - A connected kube client
    /// * `namespace` - The namespace sandbox workloads are created in
    pub fn new(client: kube::Client, namespace: String) -> Self {
        Driver { client, namespace }
    }

    /// Builds a driver, preferring an explicit kubeconfig path and falling back to in-cluster
    /// config, matching the scaler's own client bootstrap
    ///
    /// # Arguments
    ///
    /// * `kubeconfig` - An optional path to a kubeconfig file
    /// * `namespace` - The namespace sandbox workloads are created in
    pub async fn connect(kubeconfig: Option<&str>, namespace: String) -> Result<Self, Error> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = kube::config::Kubeconfig::read_from(path)
                    .map_err(|err| Error::new(format!("failed to read kubeconfig {path}: {err}")))?;
                kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &kube::config::KubeConfigOptions::default(),
                )
                .await?
            }
            None => match kube::Config::incluster() {
                Ok(config) => config,
                Err(_) => {
                    kube::Config::from_kubeconfig(&kube::config::KubeConfigOptions::default())
                        .await?
                }
            },
        };
        let client = kube::Client::try_from(config)?;
        Ok(Driver::new(client, namespace))
    }

    fn deployment_api(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn statefulset_api(&self) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn service_api(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pod_api(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pvc_api(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Server-side applies an object under the `sandkube-driver` field manager, which both
    /// creates and idempotently updates the object
    async fn apply<K>(&self, api: &Api<K>, name: &str, obj: &K) -> Result<(), Error>
    where
        K: kube::Resource + serde::Serialize + serde::de::DeserializeOwned + Clone + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let params = PatchParams::apply("sandkube-driver").force();
        api.patch(name, &params, &Patch::Apply(obj)).await?;
        Ok(())
    }

    /// Creates the outer-cluster objects backing one sandbox: the PVC for stateful
    /// workloads, the workload itself, and its service, returning the pod name when it is
    /// known immediately (stateful) or an empty string when it must be resolved later
    /// (ephemeral)
    ///
    /// # Arguments
    ///
    /// * `spec` - The workload to provision
    pub async fn create_workload(&self, spec: &WorkloadSpec) -> Result<String, Error> {
        if spec.workload_type == WorkloadType::Stateful {
            let pvc = workload::build_pvc(spec);
            self.apply(&self.pvc_api(), &pvc.metadata.name.clone().unwrap(), &pvc)
                .await?;
            let sts = workload::build_statefulset(spec);
            self.apply(&self.statefulset_api(), &spec.name, &sts).await?;
        } else {
            let deploy = workload::build_deployment(spec);
            self.apply(&self.deployment_api(), &spec.name, &deploy).await?;
        }
        let svc = workload::build_service(spec);
        self.apply(&self.service_api(), &spec.name, &svc).await?;
        match spec.workload_type {
            WorkloadType::Stateful => Ok(ids::stateful_pod_name(&spec.name)),
            WorkloadType::Ephemeral => Ok(String::new()),
        }
    }

    /// Resolves the name of the single pod backing a workload
    ///
    /// Stateful workloads have a deterministic pod name (`{name}-0`); ephemeral workloads are
    /// resolved by their `sandkube/reservation` label since the Deployment's pod name carries
    /// a generated suffix.
    ///
    /// # Arguments
    ///
    /// * `spec` - The workload to resolve a pod for
    pub async fn resolve_pod(&self, spec: &WorkloadSpec) -> Result<String, Error> {
        match spec.workload_type {
            WorkloadType::Stateful => Ok(ids::stateful_pod_name(&spec.name)),
            WorkloadType::Ephemeral => {
                let params = kube::api::ListParams::default()
                    .labels(&format!("sandkube/reservation={}", spec.reservation_id));
                let pods = self.pod_api().list(&params).await?;
                pods.items
                    .into_iter()
                    .next()
                    .and_then(|pod| pod.metadata.name)
                    .ok_or_else(|| {
                        Error::NotFound(format!("no pod found for reservation {}", spec.reservation_id))
                    })
            }
        }
    }

    /// Checks whether a pod is Running with every container reporting ready
    ///
    /// Returns `Err` only for conditions the caller should stop waiting on: a container stuck
    /// in `CrashLoopBackOff`, an image pull error, or a terminated container.
    ///
    /// # Arguments
    ///
    /// * `pod_name` - The name of the pod to check
    pub async fn is_pod_ready(&self, pod_name: &str) -> Result<bool, Error> {
        let pod = match self.pod_api().get_opt(pod_name).await? {
            Some(pod) => pod,
            None => return Ok(false),
        };
        let Some(status) = &pod.status else {
            return Ok(false);
        };
        if let Some(container_statuses) = &status.container_statuses {
            for cs in container_statuses {
                if let Some(waiting) = cs.state.as_ref().and_then(|s| s.waiting.as_ref()) {
                    if matches!(
                        waiting.reason.as_deref(),
                        Some("CrashLoopBackOff") | Some("ImagePullBackOff") | Some("ErrImagePull")
                    ) {
                        return Err(Error::ExternalApi(format!(
                            "container {} for pod {pod_name} is {}",
                            cs.name,
                            waiting.reason.as_deref().unwrap_or("waiting")
                        )));
                    }
                }
                if let Some(terminated) = cs.state.as_ref().and_then(|s| s.terminated.as_ref()) {
                    return Err(Error::ExternalApi(format!(
                        "container {} for pod {pod_name} terminated: {}",
                        cs.name,
                        terminated.reason.as_deref().unwrap_or("unknown")
                    )));
                }
            }
        }
        if status.phase.as_deref() != Some("Running") {
            return Ok(false);
        }
        let Some(container_statuses) = &status.container_statuses else {
            return Ok(false);
        };
        Ok(!container_statuses.is_empty() && container_statuses.iter().all(|cs| cs.ready))
    }

    /// Deletes every outer-cluster object backing a workload, treating a 404 on any of them
    /// as already-deleted success
    ///
    /// # Arguments
    ///
    /// * `spec` - The workload to tear down
    pub async fn delete_workload(&self, spec: &WorkloadSpec) -> Result<(), Error> {
        let params = DeleteParams::default();
        ignore_404(self.service_api().delete(&spec.name, &params).await)?;
        match spec.workload_type {
            WorkloadType::Stateful => {
                ignore_404(self.statefulset_api().delete(&spec.name, &params).await)?;
                let pvc_name = ids::docker_storage_pvc_name(&spec.name);
                ignore_404(self.pvc_api().delete(&pvc_name, &params).await)?;
            }
            WorkloadType::Ephemeral => {
                ignore_404(self.deployment_api().delete(&spec.name, &params).await)?;
            }
        }
        Ok(())
    }

    /// Resolves a Service's cluster IP by name, used to locate the NFS server the Generator
    /// mounts sandbox workloads against
    ///
    /// # Arguments
    ///
    /// * `service_name` - The name of the Service to resolve
    pub async fn resolve_service_ip(&self, service_name: &str) -> Result<String, Error> {
        let svc = self.service_api().get(service_name).await?;
        svc.spec
            .and_then(|spec| spec.cluster_ip)
            .filter(|ip| ip != "None")
            .ok_or_else(|| Error::ExternalApi(format!("service {service_name} has no cluster ip")))
    }

    /// Ensures `/exports/{slug(owner)}` exists on the NFS server pod by exec'ing `mkdir -p`
    /// into it, returning the created subdirectory name
    ///
    /// # Arguments
    ///
    /// * `owner` - The raw owner principal id to derive a subdirectory for
    pub async fn ensure_owner_directory(&self, owner: &str) -> Result<String, Error> {
        let sub_path = ids::slug(owner);
        let params = kube::api::ListParams::default().labels(NFS_SERVER_LABEL_SELECTOR);
        let pods = self.pod_api().list(&params).await?;
        let nfs_pod = pods
            .items
            .into_iter()
            .next()
            .and_then(|pod| pod.metadata.name)
            .ok_or_else(|| Error::ExternalApi("no nfs server pod found".to_owned()))?;
        let dir = format!("{NFS_EXPORT_ROOT}/{sub_path}");
        let output = self
            .exec(
                &nfs_pod,
                NFS_SERVER_CONTAINER,
                vec!["mkdir".to_owned(), "-p".to_owned(), dir],
            )
            .await?;
        if output.exit_code != 0 {
            return Err(Error::ExternalApi(format!(
                "mkdir -p failed in nfs server pod: {}",
                output.stderr
            )));
        }
        Ok(sub_path)
    }

    /// Execs a command inside a pod to completion, returning its captured stdout/stderr and
    /// exit code
    ///
    /// # Arguments
    ///
    /// * `pod_name` - The pod to exec inside
    /// * `container` - The container within the pod to target
    /// * `command` - The argv of the command to run
    pub async fn exec(
        &self,
        pod_name: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput, Error> {
        exec::run(&self.pod_api(), pod_name, container, command).await
    }

    /// Attaches to a pod's shell for the terminal gateway, returning the raw attached process
    /// so the caller can relay stdin/stdout/resize directly over its websocket
    ///
    /// # Arguments
    ///
    /// * `pod_name` - The pod to attach to
    /// * `container` - The container within the pod to target
    /// * `command` - The shell command to start, e.g. `["sh"]`
    pub async fn attach_shell(
        &self,
        pod_name: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<kube::api::AttachedProcess, Error> {
        exec::attach(&self.pod_api(), pod_name, container, command).await
    }
}

/// Swallows a 404 from a delete call, since the target is already gone
fn ignore_404<K>(
    result: Result<either::Either<K, kube::core::Status>, kube::Error>,
) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(err) => Err(Error::from(err)),
    }
}
