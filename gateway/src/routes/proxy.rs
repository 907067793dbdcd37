//! The in-pod HTTP proxy: exec's a shell script that port-forwards to a nested service, runs
//! one curl, and tears the port-forward back down

use super::common::{ensure_available, load_owned, resolve_pod};
use crate::auth::Principal;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Json;
use axum::Router;
use sandkube_common::ApiError;
use sandkube_driver::SANDBOX_CONTAINER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Overall deadline for a single proxied request, including service discovery
const PROXY_TIMEOUT: Duration = Duration::from_secs(20);
/// How long the port-forward is given to bind before curl is run
const PORT_FORWARD_SETTLE: Duration = Duration::from_secs(2);
/// Ports probed directly over TCP when no k8s Service/Endpoints are discoverable
const COMMON_PORTS: &[u16] = &[80, 443, 3000, 5000, 8000, 8080, 8081, 8888, 9000, 9090];
/// Headers that must never be copied verbatim from curl's response, since the gateway's own
/// transport framing supersedes them
const DROPPED_RESPONSE_HEADERS: &[&str] = &["transfer-encoding", "connection", "content-length"];

/// Mounts the service-listing and proxy routes
pub fn mount(app: Router<AppState>) -> Router<AppState> {
    app.route("/reservations/:id/services", axum::routing::get(list_services))
        .route("/reservations/:id/proxy/*path", any(proxy))
}

/// One service discovered (or probed) inside a reservation's nested cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedService {
    /// The service's name, or the probed port as a string when TCP-probed
    pub name: String,
    /// The port the service listens on
    pub port: u16,
    /// `TCP` or `UDP`; always `TCP` for probed ports
    pub protocol: String,
    /// A short human-readable description
    pub description: String,
    /// True when at least one endpoint address backs the service
    pub verified: bool,
    /// The k8s Service name to port-forward against, when discovered via the API; `None` for
    /// a raw TCP-probed port, meaning the proxy talks to `localhost` directly with no
    /// port-forward step
    pub k8s_service_name: Option<String>,
}

async fn list_services(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<NestedService>>, ApiError> {
    let reservation = load_owned(&state, &principal, id).await?;
    ensure_available(&reservation)?;
    let pod_name = resolve_pod(&state, &reservation).await?;
    let services = discover_services(&state, &pod_name).await?;
    Ok(Json(services))
}

async fn proxy(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, path)): Path<(Uuid, String)>,
    Query(mut query): Query<HashMap<String, String>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let reservation = load_owned(&state, &principal, id).await?;
    ensure_available(&reservation)?;
    let pod_name = resolve_pod(&state, &reservation).await?;

    let port = query
        .remove("port")
        .and_then(|raw| raw.parse::<u16>().ok())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "missing or invalid port query parameter"))?;

    let services = discover_services(&state, &pod_name).await?;
    let service = services
        .into_iter()
        .find(|s| s.port == port)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Service not found on port {port}")))?;

    let query_string = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let script = build_proxy_script(&service, &path, &method, &headers, &query_string, &body);

    let run = state.driver.exec(&pod_name, SANDBOX_CONTAINER, vec!["sh".to_owned(), "-c".to_owned(), script]);
    let output = match tokio::time::timeout(PROXY_TIMEOUT, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Ok((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": format!("port-forward failed: {err}") })),
            )
                .into_response())
        }
        Err(_) => {
            return Ok((
                StatusCode::REQUEST_TIMEOUT,
                Json(serde_json::json!({ "error": "proxy request timed out" })),
            )
                .into_response())
        }
    };

    if output.exit_code != 0 {
        return Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "port-forward failed",
                "stdout": output.stdout,
                "stderr": output.stderr,
            })),
        )
            .into_response());
    }

    Ok(parse_curl_response(&output.stdout))
}

/// Runs the compound service-discovery probe inside a reservation's pod, preferring real k8s
/// Service/Endpoint listings and falling back to raw TCP port probing
async fn discover_services(state: &AppState, pod_name: &str) -> Result<Vec<NestedService>, ApiError> {
    let script = r#"
if ! kubectl cluster-info --request-timeout=3s >/dev/null 2>&1; then
  echo '{"ready":false}'
  exit 0
fi
svc=$(kubectl get svc --all-namespaces -o json 2>/dev/null)
ep=$(kubectl get endpoints --all-namespaces -o json 2>/dev/null)
printf '{"ready":true,"services":%s,"endpoints":%s}' "$svc" "$ep"
"#;
    let output = state
        .driver
        .exec(pod_name, SANDBOX_CONTAINER, vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()])
        .await
        .map_err(ApiError::from)?;

    let discovered = parse_services_json(&output.stdout);
    if !discovered.is_empty() {
        return Ok(discovered);
    }
    probe_common_ports(state, pod_name).await
}

/// Parses the compound discovery script's JSON output into [`NestedService`] entries,
/// excluding `kube-*` system namespaces and the default `kubernetes` service
fn parse_services_json(raw: &str) -> Vec<NestedService> {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };
    if parsed.get("ready").and_then(|v| v.as_bool()) != Some(true) {
        return Vec::new();
    }
    let endpoint_has_addresses = |namespace: &str, name: &str| -> bool {
        parsed["endpoints"]["items"]
            .as_array()
            .into_iter()
            .flatten()
            .any(|ep| {
                ep["metadata"]["namespace"].as_str() == Some(namespace)
                    && ep["metadata"]["name"].as_str() == Some(name)
                    && ep["subsets"]
                        .as_array()
                        .map(|subsets| {
                            subsets.iter().any(|subset| {
                                subset["addresses"].as_array().map(|a| !a.is_empty()).unwrap_or(false)
                            })
                        })
                        .unwrap_or(false)
            })
    };

    let mut services = Vec::new();
    for item in parsed["services"]["items"].as_array().into_iter().flatten() {
        let namespace = item["metadata"]["namespace"].as_str().unwrap_or_default();
        let name = item["metadata"]["name"].as_str().unwrap_or_default();
        if namespace.starts_with("kube-") || (namespace == "default" && name == "kubernetes") {
            continue;
        }
        for port in item["spec"]["ports"].as_array().into_iter().flatten() {
            let Some(port_num) = port["port"].as_u64() else { continue };
            let protocol = port["protocol"].as_str().unwrap_or("TCP").to_owned();
            services.push(NestedService {
                name: name.to_owned(),
                port: port_num as u16,
                protocol,
                description: format!("{namespace}/{name}"),
                verified: endpoint_has_addresses(namespace, name),
                k8s_service_name: Some(name.to_owned()),
            });
        }
    }
    services
}

/// Falls back to probing a fixed list of common ports over a raw TCP connect, used when no
/// cluster is ready or no services were discovered
async fn probe_common_ports(state: &AppState, pod_name: &str) -> Result<Vec<NestedService>, ApiError> {
    let mut open = Vec::new();
    for &port in COMMON_PORTS {
        let script = format!("timeout 1 bash -c '</dev/tcp/localhost/{port}' 2>/dev/null && echo open");
        let output = state
            .driver
            .exec(pod_name, SANDBOX_CONTAINER, vec!["sh".to_owned(), "-c".to_owned(), script])
            .await
            .map_err(ApiError::from)?;
        if output.stdout.trim() == "open" {
            open.push(NestedService {
                name: port.to_string(),
                port,
                protocol: "TCP".to_owned(),
                description: format!("localhost:{port}"),
                verified: true,
                k8s_service_name: None,
            });
        }
    }
    Ok(open)
}

/// Builds the in-pod shell script: background port-forward (skipped for a TCP-probed
/// service), a settle sleep, a single curl, then a trap-guarded teardown
fn build_proxy_script(
    service: &NestedService,
    path: &str,
    method: &Method,
    headers: &HeaderMap,
    query_string: &str,
    body: &Bytes,
) -> String {
    let port = service.port;
    let url = if query_string.is_empty() {
        format!("http://localhost:{port}/{path}")
    } else {
        format!("http://localhost:{port}/{path}?{query_string}")
    };
    let header_args = headers
        .iter()
        .filter(|(name, _)| *name != axum::http::header::HOST)
        .filter_map(|(name, value)| value.to_str().ok().map(|v| format!("-H {}", shell_quote(&format!("{name}: {v}")))))
        .collect::<Vec<_>>()
        .join(" ");
    let data_arg = if body.is_empty() {
        String::new()
    } else {
        format!("--data-binary {}", shell_quote(&String::from_utf8_lossy(body)))
    };
    let curl = format!(
        "curl -s -i -X {method} {header_args} {data_arg} {}",
        shell_quote(&url)
    );
    match &service.k8s_service_name {
        Some(name) => {
            let settle = PORT_FORWARD_SETTLE.as_secs();
            format!(
                "kubectl port-forward service/{name} {port}:{port} >/tmp/pf.log 2>&1 & pf=$!\n\
                 trap 'kill $pf 2>/dev/null; wait $pf 2>/dev/null' EXIT\n\
                 sleep {settle}\n\
                 {curl}\n"
            )
        }
        None => format!("{curl}\n"),
    }
}

/// Shell single-quotes a value, escaping any embedded single quote
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Parses curl's `-i` output (headers then a blank line then the body) into an axum response,
/// dropping hop-by-hop headers and adding permissive CORS
fn parse_curl_response(raw: &str) -> Response {
    let Some(split_at) = raw.find("\r\n\r\n").or_else(|| raw.find("\n\n")) else {
        return (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": "malformed upstream response" })),
        )
            .into_response();
    };
    let separator_len = if raw[split_at..].starts_with("\r\n\r\n") { 4 } else { 2 };
    let header_block = &raw[..split_at];
    let body = raw[split_at + separator_len..].to_owned();

    let mut lines = header_block.lines();
    let Some(status_line) = lines.next() else {
        return (StatusCode::BAD_GATEWAY, "malformed upstream response").into_response();
    };
    let status_code = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response_headers = HeaderMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else { continue };
        let name = name.trim();
        if DROPPED_RESPONSE_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name),
            axum::http::HeaderValue::from_str(value.trim()),
        ) {
            response_headers.insert(name, value);
        }
    }
    response_headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        axum::http::HeaderValue::from_static("*"),
    );

    (status_code, response_headers, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_curl_response_with_crlf_headers() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nok";
        let response = parse_curl_response(raw);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn drops_hop_by_hop_headers() {
        let services = parse_services_json(r#"{"ready":false}"#);
        assert!(services.is_empty());
    }

    #[test]
    fn excludes_kube_system_namespaces() {
        let raw = serde_json::json!({
            "ready": true,
            "services": {"items": [
                {"metadata": {"namespace": "kube-system", "name": "kube-dns"}, "spec": {"ports": [{"port": 53, "protocol": "UDP"}]}},
                {"metadata": {"namespace": "default", "name": "kubernetes"}, "spec": {"ports": [{"port": 443, "protocol": "TCP"}]}},
                {"metadata": {"namespace": "default", "name": "demo"}, "spec": {"ports": [{"port": 8080, "protocol": "TCP"}]}},
            ]},
            "endpoints": {"items": []},
        })
        .to_string();
        let services = parse_services_json(&raw);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "demo");
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
