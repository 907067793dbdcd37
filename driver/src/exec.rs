//! Pod exec/attach plumbing shared by the ensure-directory primitive and the terminal gateway

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, AttachedProcess};
use sandkube_common::Error;

/// The captured result of a one-shot `exec`
pub struct ExecOutput {
    /// Everything the command wrote to stdout
    pub stdout: String,
    /// Everything the command wrote to stderr
    pub stderr: String,
    /// The command's exit code, or `-1` if the status stream closed without reporting one
    pub exit_code: i32,
}

/// Execs a command inside a pod to completion and collects its output
///
/// # Arguments
///
/// * `pods` - The namespaced pod API to exec against
/// * `pod_name` - The pod to exec inside
/// * `container` - The container within the pod to target
/// * `command` - The argv of the command to run
pub async fn run(
    pods: &Api<Pod>,
    pod_name: &str,
    container: &str,
    command: Vec<String>,
) -> Result<ExecOutput, Error> {
    let params = AttachParams::default()
        .container(container)
        .stdin(false)
        .stdout(true)
        .stderr(true);
    let mut attached = pods
        .exec(pod_name, command, &params)
        .await
        .map_err(|err| Error::ExternalApi(format!("exec into pod {pod_name} failed: {err}")))?;

    use tokio::io::AsyncReadExt;

    let mut stdout = String::new();
    if let Some(mut out) = attached.stdout() {
        let _ = out.read_to_string(&mut stdout).await;
    }
    let mut stderr = String::new();
    if let Some(mut err) = attached.stderr() {
        let _ = err.read_to_string(&mut stderr).await;
    }
    let exit_code = match attached.take_status() {
        Some(status_fut) => status_fut
            .await
            .and_then(|status| status.status)
            .map(|reason| if reason == "Success" { 0 } else { 1 })
            .unwrap_or(-1),
        None => -1,
    };
    attached.join().await.ok();
    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code,
    })
}

/// Attaches to a long-lived shell in a pod, leaving stdin/stdout/resize relaying to the caller
///
/// # Arguments
///
/// * `pods` - The namespaced pod API to attach against
/// * `pod_name` - The pod to attach to
/// * `container` - The container within the pod to target
/// * `command` - The shell command to start
pub async fn attach(
    pods: &Api<Pod>,
    pod_name: &str,
    container: &str,
    command: Vec<String>,
) -> Result<AttachedProcess, Error> {
    // tty and stderr cannot both be true; a pty already multiplexes stderr into stdout
    let params = AttachParams::default()
        .container(container)
        .stdin(true)
        .stdout(true)
        .stderr(false)
        .tty(true);
    pods.exec(pod_name, command, &params)
        .await
        .map_err(|err| Error::ExternalApi(format!("attach to pod {pod_name} failed: {err}")))
}
