//! The sandkube gateway: the app-facing REST, terminal, and proxy surface

mod args;
mod audit_buffer;
mod auth;
mod routes;
mod state;

pub use args::Args;
pub use state::AppState;

use axum::http::Method;
use sandkube_common::Conf;
use sandkube_driver::Driver;
use sandkube_queue::Queue;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// The grace period axum's graceful shutdown future waits for in-flight requests to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
/// How many times bind is retried before giving up
const MAX_BIND_ATTEMPTS: u32 = 10;

/// Builds the axum router, mounting every route module and the shared CORS/tracing layers
fn build_app(state: AppState) -> axum::Router {
    let app = axum::Router::new();
    let app = routes::mount_all(app);
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
        .allow_origin(tower_http::cors::Any);
    app.layer(TraceLayer::new_for_http()).layer(cors).with_state(state)
}

/// Connects the gateway's collaborators, builds the router, and serves it until a shutdown
/// signal is received
///
/// # Arguments
///
/// * `conf` - The loaded gateway configuration
pub async fn serve(conf: Conf) {
    let queue = Queue::connect(&conf.queue_backend_url)
        .await
        .expect("failed to connect to the work queue");
    let driver = Driver::connect(conf.kubeconfig.as_deref(), conf.namespace.clone())
        .await
        .expect("failed to connect to the outer cluster");

    let interface = conf.interface.clone();
    let port = conf.port;
    let state = AppState::new(conf, queue, driver);
    state.mark_ready();

    let app = build_app(state);
    let bind_addr: std::net::IpAddr = interface.parse().expect("failed to parse interface addr");
    let addr = SocketAddr::new(bind_addr, port);

    let mut attempts = 0;
    loop {
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(%err, %addr, "failed to bind gateway listener");
                attempts += 1;
                assert!(attempts <= MAX_BIND_ATTEMPTS, "failed to bind gateway in {MAX_BIND_ATTEMPTS} attempts");
                tokio::time::sleep(Duration::from_secs(3)).await;
                continue;
            }
        };
        tracing::info!(%addr, "gateway listening");
        let result = axum::serve(listener, app.clone())
            .with_graceful_shutdown(shutdown_signal())
            .await;
        match result {
            Ok(()) => break,
            Err(err) => {
                tracing::error!(%err, "gateway server error");
                attempts += 1;
                assert!(attempts <= MAX_BIND_ATTEMPTS, "failed to bind gateway in {MAX_BIND_ATTEMPTS} attempts");
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight requests for up to {SHUTDOWN_GRACE:?}");
}
