//! Readiness probe for the gateway's own outer-cluster deployment

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

/// Mounts `/healthz`
pub fn mount(app: Router<AppState>) -> Router<AppState> {
    app.route("/healthz", get(healthz))
}

async fn healthz(State(state): State<AppState>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
