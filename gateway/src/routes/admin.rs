//! Admin-only command log and reservation inspection routes

use crate::auth::AdminPrincipal;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use sandkube_audit::ListQuery;
use sandkube_common::{ApiError, AuditEntry, Reservation};
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

/// Mounts the admin-only routes
pub fn mount(app: Router<AppState>) -> Router<AppState> {
    app.route("/admin/commandLogs", get(command_logs))
        .route("/admin/reservations", get(list_reservations))
}

#[derive(Debug, Deserialize)]
struct CommandLogsQuery {
    user: Option<String>,
    reservation: Option<Uuid>,
    #[serde(default)]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

async fn command_logs(
    State(state): State<AppState>,
    AdminPrincipal(_admin): AdminPrincipal,
    Query(query): Query<CommandLogsQuery>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let entries = sandkube_audit::list(
        Path::new(&state.conf.audit.log_directory),
        &ListQuery {
            user_id: query.user,
            reservation_id: query.reservation,
            limit: query.limit,
            offset: query.offset,
        },
    )?;
    Ok(Json(entries))
}

async fn list_reservations(
    State(state): State<AppState>,
    AdminPrincipal(_admin): AdminPrincipal,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    Ok(Json(state.queue.list_all().await?))
}
