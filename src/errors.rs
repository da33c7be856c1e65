//! Error classification shared by the HTTP and WebSocket paths.
//!
//! Every error the core can produce maps to exactly one of the classes
//! below, and each class maps to exactly one HTTP status code (or to a
//! silent connection close, for the cases the protocol allows no response
//! at all). Handlers never see these directly — the connection worker
//! consumes them to decide what, if anything, goes back on the wire.

use crate::http::types::StatusCode;
use std::io;
use thiserror::Error;

/// Errors surfaced while framing, parsing, routing, or writing a single
/// HTTP exchange.
#[derive(Debug, Error)]
pub enum CwistError {
    /// Malformed request line, header, or missing CRLF separators.
    #[error("malformed request: {0}")]
    Protocol(&'static str),

    /// `Transfer-Encoding: chunked`, a body over the configured ceiling, or
    /// a header block too large for the read buffer.
    #[error("policy violation: {0}")]
    Policy(PolicyViolation),

    /// No route matched `(method, path)`.
    #[error("no route for request")]
    NotFound,

    /// The connection exceeded the configured rate limit.
    #[error("rate limit exceeded")]
    RateLimited,

    /// A WebSocket upgrade was requested but the handshake headers were
    /// invalid.
    #[error("invalid websocket upgrade request")]
    UpgradeFailed,

    /// The underlying socket or TLS session failed. Transient conditions
    /// are retried by the caller and never reach this variant; only
    /// unrecoverable I/O does.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("chunked transfer encoding is not supported")]
    ChunkedNotSupported,
    #[error("request body exceeds the configured maximum")]
    BodyTooLarge,
    #[error("request headers exceed the read buffer ceiling")]
    HeadersTooLarge,
    #[error("request has more headers than the configured maximum")]
    TooManyHeaders,
}

impl CwistError {
    /// Status code this error maps to when the protocol still allows a
    /// response (a mid-read timeout or peer-initiated close never gets
    /// one and is handled before an error of this type is constructed).
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            CwistError::Protocol(_) => StatusCode::BadRequest,
            CwistError::Policy(PolicyViolation::ChunkedNotSupported) => StatusCode::NotImplemented,
            CwistError::Policy(PolicyViolation::BodyTooLarge) => StatusCode::PayloadTooLarge,
            CwistError::Policy(PolicyViolation::HeadersTooLarge) => {
                StatusCode::RequestHeaderFieldsTooLarge
            }
            CwistError::Policy(PolicyViolation::TooManyHeaders) => {
                StatusCode::RequestHeaderFieldsTooLarge
            }
            CwistError::NotFound => StatusCode::NotFound,
            CwistError::RateLimited => StatusCode::TooManyRequests,
            CwistError::UpgradeFailed => StatusCode::BadRequest,
            CwistError::Io(_) => StatusCode::InternalServerError,
        }
    }

    /// Whether the connection worker must close the socket after handling
    /// this error. Every class but routing closes the connection — a 404
    /// is an ordinary handled response and the connection may stay open
    /// for the next pipelined request.
    pub(crate) fn closes_connection(&self) -> bool {
        !matches!(self, CwistError::NotFound)
    }

    /// Machine-readable error code, mirrored in the JSON body so clients
    /// can match on it without parsing `message`.
    fn code(&self) -> &'static str {
        match self {
            CwistError::Protocol(_) => "PROTOCOL_ERROR",
            CwistError::Policy(PolicyViolation::ChunkedNotSupported) => "CHUNKED_NOT_SUPPORTED",
            CwistError::Policy(PolicyViolation::BodyTooLarge) => "BODY_TOO_LARGE",
            CwistError::Policy(PolicyViolation::HeadersTooLarge) => "HEADERS_TOO_LARGE",
            CwistError::Policy(PolicyViolation::TooManyHeaders) => "TOO_MANY_HEADERS",
            CwistError::NotFound => "NOT_FOUND",
            CwistError::RateLimited => "RATE_LIMITED",
            CwistError::UpgradeFailed => "UPGRADE_FAILED",
            CwistError::Io(_) => "IO_ERROR",
        }
    }

    /// JSON body the framework emits for error responses the application
    /// did not override.
    pub(crate) fn json_body(&self) -> Vec<u8> {
        serde_json::json!({ "error": self.to_string(), "code": self.code() })
            .to_string()
            .into_bytes()
    }
}

/// Errors returned by [`crate::server::listener::bind`].
#[derive(Debug, Error)]
pub enum ListenError {
    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),
    #[error("invalid bind address")]
    BadAddress,
    #[error("failed to bind socket: {0}")]
    Bind(#[source] io::Error),
    #[error("failed to set socket options: {0}")]
    SetOpt(#[source] io::Error),
    #[error("failed to listen on socket: {0}")]
    Listen(#[source] io::Error),
}

/// Errors returned while initializing the TLS acceptor.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read certificate file: {0}")]
    CertFile(#[source] io::Error),
    #[error("failed to read private key file: {0}")]
    KeyFile(#[source] io::Error),
    #[error("no private key found in key file")]
    NoKey,
    #[error("invalid certificate or key: {0}")]
    Config(#[source] rustls::Error),
}

/// Errors returned by [`crate::server::ServerBuilder::build`]. The listener
/// and handler builder fields are still required-and-panics the way the
/// teacher crate's builder does (a missing required field is a programmer
/// error caught at startup, not a runtime condition); TLS initialization is
/// genuine I/O and file-format fallibility, so it gets a real `Result`.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("TLS initialization failed: {0}")]
    Tls(#[from] TlsError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_keeps_connection_open() {
        assert!(!CwistError::NotFound.closes_connection());
    }

    #[test]
    fn every_other_variant_closes_connection() {
        assert!(CwistError::Protocol("bad request line").closes_connection());
        assert!(CwistError::Policy(PolicyViolation::BodyTooLarge).closes_connection());
        assert!(CwistError::RateLimited.closes_connection());
        assert!(CwistError::UpgradeFailed.closes_connection());
    }

    #[test]
    fn status_mapping_matches_class() {
        assert_eq!(CwistError::NotFound.status(), StatusCode::NotFound);
        assert_eq!(CwistError::RateLimited.status(), StatusCode::TooManyRequests);
        assert_eq!(
            CwistError::Policy(PolicyViolation::ChunkedNotSupported).status(),
            StatusCode::NotImplemented
        );
    }

    #[test]
    fn json_body_is_valid_json_with_code() {
        let body = CwistError::NotFound.json_body();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["code"], "NOT_FOUND");
    }
}
