//! Route modules mounted onto the gateway's router

pub mod admin;
pub mod common;
pub mod health;
pub mod proxy;
pub mod reservations;
pub mod terminal;

use crate::state::AppState;
use axum::Router;

/// Mounts every route module onto a fresh router
pub fn mount_all(app: Router<AppState>) -> Router<AppState> {
    let app = health::mount(app);
    let app = reservations::mount(app);
    let app = terminal::mount(app);
    let app = proxy::mount(app);
    admin::mount(app)
}
