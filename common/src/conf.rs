//! The shared configuration for every sandkube binary

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Helps serde default the bind interface to all addresses
fn default_interface() -> String {
    "0.0.0.0".to_owned()
}

/// Helps serde default the gateway port
fn default_port() -> u16 {
    8080
}

/// Helps serde default the tracing level
fn default_log_level() -> String {
    "info".to_owned()
}

/// Helps serde default the default workload flavor
fn default_workload_type() -> String {
    "ephemeral".to_owned()
}

/// Helps serde default the pvc size for stateful workloads
fn default_pvc_size() -> String {
    "10Gi".to_owned()
}

/// Helps serde default the NFS server's in-cluster service name
fn default_nfs_service_name() -> String {
    "nfs-server".to_owned()
}

/// Helps serde default the audit log directory
fn default_log_directory() -> String {
    "/var/log/sandkube".to_owned()
}

/// Helps serde default the reservation lifetime, in seconds
fn default_reservation_ttl() -> i64 {
    86_400
}

/// Authentication strategy for the Gateway
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Federated identity via an OAuth provider
    Oauth,
    /// A single shared secret; development only
    Password,
}

impl Default for AuthMethod {
    fn default() -> Self {
        AuthMethod::Password
    }
}

/// OAuth specific settings, only required when `authMethod = oauth`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OauthConf {
    /// The OAuth client id
    #[serde(default)]
    pub client_id: String,
    /// The OAuth client secret
    #[serde(default)]
    pub client_secret: String,
    /// Hostnames allowed to authenticate, comma-separated in the environment
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

/// Authentication settings
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AuthConf {
    /// Which auth method to use
    #[serde(default)]
    pub method: AuthMethod,
    /// OAuth settings, required when `method == Oauth`
    #[serde(default)]
    pub oauth: OauthConf,
    /// The shared admin password, required when `method == Password`
    #[serde(default)]
    pub admin_password: String,
    /// Principal ids considered admins when running in OAuth mode
    #[serde(default)]
    pub admin_principals: Vec<String>,
    /// The secret used to sign session cookies
    #[serde(default)]
    pub session_key: String,
}

/// Settings describing how sandbox workloads are built
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SandboxConf {
    /// Map of k8s version tag -> container image tag
    #[serde(default)]
    pub version_image_map: BTreeMap<String, String>,
    /// Repository prefix images are pulled from
    #[serde(default)]
    pub image_base_repo: String,
    /// Default workload flavor: `stateful` or `ephemeral`
    #[serde(default = "default_workload_type")]
    pub workload_type: String,
    /// PVC size used for stateful workloads
    #[serde(default = "default_pvc_size")]
    pub pvc_size: String,
    /// How long a reservation lives before the Collector marks it for teardown, in seconds
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl_secs: i64,
    /// The in-cluster service name the NFS server is reachable at
    #[serde(default = "default_nfs_service_name")]
    pub nfs_service_name: String,
}

impl Default for SandboxConf {
    fn default() -> Self {
        SandboxConf {
            version_image_map: BTreeMap::default(),
            image_base_repo: String::default(),
            workload_type: default_workload_type(),
            pvc_size: default_pvc_size(),
            reservation_ttl_secs: default_reservation_ttl(),
            nfs_service_name: default_nfs_service_name(),
        }
    }
}

/// The command audit sink's settings
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuditConf {
    /// The root directory the daily log files are written under
    #[serde(default = "default_log_directory")]
    pub log_directory: String,
    /// Optional internal address of a standalone audit sink, if the read API is split out
    #[serde(default)]
    pub admin_api_url: Option<String>,
    /// Bearer token required to read admin command logs; generated at startup if unset
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for AuditConf {
    fn default() -> Self {
        AuditConf {
            log_directory: default_log_directory(),
            admin_api_url: None,
            admin_token: None,
        }
    }
}

/// Top level sandkube configuration, loaded from a YAML file and overridden by
/// `SANDKUBE__`-prefixed environment variables
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Conf {
    /// The connection string for the work queue's backing store
    #[serde(default)]
    pub queue_backend_url: String,
    /// The outer-cluster namespace workloads are created in
    #[serde(default)]
    pub namespace: String,
    /// The absolute url of the Gateway, used for OAuth callbacks
    #[serde(default)]
    pub base_url: String,
    /// The interface the Gateway binds to
    #[serde(default = "default_interface")]
    pub interface: String,
    /// The port the Gateway binds to
    #[serde(default = "default_port")]
    pub port: u16,
    /// The tracing filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Optional path to a kubeconfig file; in-cluster config is tried first when unset
    #[serde(default)]
    pub kubeconfig: Option<String>,
    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConf,
    /// Sandbox provisioning settings
    #[serde(default)]
    pub sandbox: SandboxConf,
    /// Command audit sink settings
    #[serde(default)]
    pub audit: AuditConf,
}

impl Default for Conf {
    fn default() -> Self {
        Conf {
            queue_backend_url: String::default(),
            namespace: "default".to_owned(),
            base_url: String::default(),
            interface: default_interface(),
            port: default_port(),
            log_level: default_log_level(),
            kubeconfig: None,
            auth: AuthConf::default(),
            sandbox: SandboxConf::default(),
            audit: AuditConf::default(),
        }
    }
}

impl Conf {
    /// Loads configuration from a YAML file, then layers `SANDKUBE__`-prefixed
    /// environment variables on top (double underscore separates nested keys,
    /// e.g. `SANDKUBE__AUTH__ADMIN_PASSWORD`)
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the base YAML config file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let path = path.as_ref();
        let mut builder = config::Config::builder();
        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        }
        let conf = builder
            .add_source(
                config::Environment::with_prefix("sandkube")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        conf.try_deserialize()
    }

    /// Returns the sorted list of configured k8s version tags
    pub fn known_versions(&self) -> Vec<String> {
        self.sandbox.version_image_map.keys().cloned().collect()
    }

    /// Resolves a k8s version tag to a full image reference
    pub fn resolve_image(&self, k8s_version: &str) -> Option<String> {
        self.sandbox
            .version_image_map
            .get(k8s_version)
            .map(|tag| format!("{}:{}", self.sandbox.image_base_repo, tag))
    }
}
