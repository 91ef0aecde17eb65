//! Error types.
//!
//! Two channels, never mixed:
//!
//! - [`HttpError`] is the failure a controller or middleware hands back to the
//!   dispatcher. It carries the status code to answer with and the cause whose
//!   message becomes the plain-text body.
//! - [`Error`] surfaces infrastructure failures: binding a socket, loading TLS
//!   material, registering a route, or misusing the server lifecycle.

use std::fmt;

use http::StatusCode;

/// Boxed, thread-safe error used as the cause of an [`HttpError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failed request: the status to respond with and what went wrong.
///
/// Returning `Err(HttpError)` from a [`Controller`](crate::Controller) or a
/// [`Middleware`](crate::Middleware) stops the chain. The dispatcher answers
/// with `status` and the cause's message as a `text/plain` body.
///
/// ```rust
/// use mvc::{HttpError, StatusCode};
///
/// let err = HttpError::new(StatusCode::FORBIDDEN, "forbidden");
/// assert_eq!(err.status(), StatusCode::FORBIDDEN);
/// assert_eq!(err.to_string(), "forbidden");
/// ```
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    cause: BoxError,
}

impl HttpError {
    pub fn new(status: StatusCode, cause: impl Into<BoxError>) -> Self {
        Self { status, cause: cause.into() }
    }

    /// `400 Bad Request` with `cause`.
    pub fn bad_request(cause: impl Into<BoxError>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, cause)
    }

    /// `500 Internal Server Error` with `cause`.
    pub fn internal(cause: impl Into<BoxError>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, cause)
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) { &*self.cause }

    pub fn into_cause(self) -> BoxError { self.cause }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cause, f)
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}

/// The error type returned by the crate's infrastructure operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("route `{0}` registered without any method")]
    NoMethods(String),

    #[error("invalid route `{pattern}`: {source}")]
    Route {
        pattern: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("tls: {0}")]
    Tls(#[from] crate::tls::TlsError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("server is already running")]
    AlreadyRunning,

    /// `run` was called after `shutdown`. A server is single-use.
    #[error("server closed")]
    ServerClosed,

    #[error("shutdown deadline exceeded with {open_connections} connection(s) still open")]
    DeadlineExceeded { open_connections: usize },

    #[error("request exceeded the write timeout")]
    WriteTimeout,
}

impl Error {
    pub fn is_server_closed(&self) -> bool {
        matches!(self, Self::ServerClosed)
    }
}
