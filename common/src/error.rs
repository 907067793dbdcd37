//! The error types shared by every sandkube binary

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::fmt;

/// An internal error produced anywhere in the sandkube stack
///
/// This is the error type loops and library calls propagate with `?`; it is distinct from
/// [`ApiError`], which is the HTTP-facing error the Gateway actually returns to callers.
#[derive(Debug)]
pub enum Error {
    /// A generic error with just a message
    Generic(String),
    /// The work queue backend could not be reached or timed out
    StorageUnavailable(String),
    /// The requested record does not exist
    NotFound(String),
    /// The request conflicts with the current state of a record
    Conflict(String),
    /// An error surfaced by the outer Kubernetes API
    ExternalApi(String),
    /// A kube-rs client error
    Kube(kube::Error),
    /// An error loading a kubeconfig
    KubeConfig(kube::config::KubeconfigError),
    /// An error (de)serializing JSON
    Serde(serde_json::Error),
    /// An error loading the YAML configuration
    Config(config::ConfigError),
    /// An IO error
    Io(std::io::Error),
    /// A request timed out
    Timeout(String),
}

impl Error {
    /// Create a new generic error
    pub fn new<T: Into<String>>(msg: T) -> Self {
        Error::Generic(msg.into())
    }

    /// Returns true if this error represents a fatal, non-retryable condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ExternalApi(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Generic(msg) => write!(f, "{msg}"),
            Error::StorageUnavailable(msg) => write!(f, "storage unavailable: {msg}"),
            Error::NotFound(msg) => write!(f, "not found: {msg}"),
            Error::Conflict(msg) => write!(f, "conflict: {msg}"),
            Error::ExternalApi(msg) => write!(f, "external api error: {msg}"),
            Error::Kube(err) => write!(f, "k8s client error: {err}"),
            Error::KubeConfig(err) => write!(f, "k8s config error: {err}"),
            Error::Serde(err) => write!(f, "serde error: {err}"),
            Error::Config(err) => write!(f, "config error: {err}"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Timeout(msg) => write!(f, "timeout: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        Error::Kube(error)
    }
}

impl From<kube::config::KubeconfigError> for Error {
    fn from(error: kube::config::KubeconfigError) -> Self {
        Error::KubeConfig(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serde(error)
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

/// Builds an error HTTP response for the Gateway
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    /// The status code to return
    #[serde(skip)]
    pub code: StatusCode,
    /// The error message to return
    pub error: String,
}

impl ApiError {
    /// Creates a new API error
    pub fn new<T: Into<String>>(code: StatusCode, msg: T) -> Self {
        ApiError {
            code,
            error: msg.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}", self.code.as_u16(), self.error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(code = self.code.as_u16(), msg = %self.error, "request failed");
        (self.code, Json(serde_json::json!({ "error": self.error }))).into_response()
    }
}

/// Maps an internal [`Error`] onto the HTTP status it should surface as, per the error
/// handling design: storage outages are retriable (503), external Kubernetes rejections
/// are gateway errors (502), and everything else not found/invalid becomes a 500.
impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        match error {
            Error::StorageUnavailable(msg) => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            Error::NotFound(msg) => ApiError::new(StatusCode::NOT_FOUND, msg),
            Error::Conflict(msg) => ApiError::new(StatusCode::CONFLICT, msg),
            Error::ExternalApi(msg) => ApiError::new(StatusCode::BAD_GATEWAY, msg),
            Error::Timeout(msg) => ApiError::new(StatusCode::REQUEST_TIMEOUT, msg),
            Error::Kube(err) => ApiError::new(StatusCode::BAD_GATEWAY, err.to_string()),
            other => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

/// 400 bad request
#[macro_export]
macro_rules! bad {
    ($($msg:tt)+) => {
        Err($crate::ApiError::new(axum::http::StatusCode::BAD_REQUEST, $($msg)+))
    };
}

/// 403 forbidden
#[macro_export]
macro_rules! forbidden {
    ($($msg:tt)+) => {
        Err($crate::ApiError::new(axum::http::StatusCode::FORBIDDEN, $($msg)+))
    };
}

/// 404 not found
#[macro_export]
macro_rules! not_found {
    ($($msg:tt)+) => {
        Err($crate::ApiError::new(axum::http::StatusCode::NOT_FOUND, $($msg)+))
    };
}

/// 409 conflict
#[macro_export]
macro_rules! conflict {
    ($($msg:tt)+) => {
        Err($crate::ApiError::new(axum::http::StatusCode::CONFLICT, $($msg)+))
    };
}

/// 401 unauthorized
#[macro_export]
macro_rules! unauthorized {
    () => {
        Err($crate::ApiError::new(
            axum::http::StatusCode::UNAUTHORIZED,
            "authentication required",
        ))
    };
}
