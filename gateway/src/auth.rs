//! Principal extraction; the identity provider itself is an external collaborator, so the
//! gateway only ever consumes identity it is handed (a shared-secret bearer token in password
//! mode, or a trusted header injected by an upstream OAuth-terminating proxy in oauth mode)

use crate::state::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use sandkube_common::{ApiError, AuthMethod};

/// The header an upstream identity layer is expected to set once a request is authenticated
const PRINCIPAL_HEADER: &str = "x-sandkube-user";

/// An authenticated caller
#[derive(Debug, Clone)]
pub struct Principal {
    /// The principal id, typically an email address
    pub id: String,
    /// Whether this principal is a configured admin
    pub is_admin: bool,
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match state.conf.auth.method {
            AuthMethod::Password => password_principal(parts, state),
            AuthMethod::Oauth => oauth_principal(parts, state),
        }
    }
}

/// Requires the shared admin secret as a bearer token, then trusts [`PRINCIPAL_HEADER`] for
/// the calling identity, defaulting to `admin` when the header is absent
fn password_principal(parts: &Parts, state: &AppState) -> Result<Principal, ApiError> {
    let token = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match token {
        Some(token) if token == state.conf.auth.admin_password => {}
        _ => return sandkube_common::unauthorized!(),
    }
    let id = header_str(parts, PRINCIPAL_HEADER)
        .map(str::to_owned)
        .unwrap_or_else(|| "admin".to_owned());
    let is_admin = id == "admin" || state.conf.auth.admin_principals.iter().any(|p| p == &id);
    Ok(Principal { id, is_admin })
}

/// Trusts [`PRINCIPAL_HEADER`] as already authenticated by an upstream OAuth-terminating proxy
fn oauth_principal(parts: &Parts, state: &AppState) -> Result<Principal, ApiError> {
    let id = match header_str(parts, PRINCIPAL_HEADER) {
        Some(id) => id.to_owned(),
        None => return sandkube_common::unauthorized!(),
    };
    if !state.conf.auth.oauth.allowed_domains.is_empty() {
        let domain = id.rsplit('@').next().unwrap_or_default();
        if !state
            .conf
            .auth
            .oauth
            .allowed_domains
            .iter()
            .any(|allowed| allowed == domain)
        {
            return sandkube_common::forbidden!(format!("domain {domain} is not allowed to authenticate"));
        }
    }
    let is_admin = state.conf.auth.admin_principals.iter().any(|p| p == &id);
    Ok(Principal { id, is_admin })
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|value| value.to_str().ok())
}

/// An authenticated caller who must also be a configured admin
#[derive(Debug, Clone)]
pub struct AdminPrincipal(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AdminPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_request_parts(parts, state).await?;
        if !principal.is_admin {
            return sandkube_common::forbidden!("admin access required");
        }
        Ok(AdminPrincipal(principal))
    }
}
