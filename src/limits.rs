//! Server configuration limits and timeouts.
//!
//! # Security-first defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Header flooding
//! - Slowloris-style idle connections
//!
//! # Examples
//!
//! ```no_run
//! use cwist::limits::{ConnLimits, ReqLimits, ServerLimits};
//! use std::time::Duration;
//!
//! let server_limits = ServerLimits {
//!     event_loop_workers: 8,
//!     ..ServerLimits::default()
//! };
//! let conn_limits = ConnLimits {
//!     io_timeout: Duration::from_secs(10),
//!     ..ConnLimits::default()
//! };
//! let req_limits = ReqLimits {
//!     header_count: 32,
//!     max_body_size: 4 * 1024 * 1024,
//!     ..ReqLimits::default()
//! };
//! ```

use std::time::Duration;

/// Server-level tunables independent of any single connection.
///
/// The kernel `listen()` backlog (spec §4.1) is not among these: it is an
/// argument to [`crate::server::bind`], which binds the listener the
/// builder is handed, not something the builder itself can retroactively
/// apply. Likewise there is no default rate limit here — the built-in
/// [`crate::RateLimit`] middleware takes its requests-per-minute ceiling
/// directly via [`crate::RateLimit::new`] and is registered like any other
/// middleware.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of fixed worker tasks used by
    /// [`crate::server::Scheduling::EventLoop`] (default: `4`). Ignored by
    /// the other scheduling models.
    pub event_loop_workers: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            event_loop_workers: 4,
            _priv: (),
        }
    }
}

/// Connection-level I/O timeouts. Applies identically on the plain and
/// TLS-wrapped paths.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration any single blocking read or write may take before
    /// the connection is closed (default: `30s`, `CWIST_HTTP_TIMEOUT_MS`
    /// in spec §4.2). Expiry on an idle keep-alive connection, or mid-body,
    /// is a silent close — no partial response is safe to send once
    /// framing may be desynchronized.
    pub io_timeout: Duration,

    /// Maximum number of requests served on one connection before the
    /// server sends `Connection: close` and ends it (default: `1000`).
    pub max_requests_per_connection: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(30),
            max_requests_per_connection: 1000,
            _priv: (),
        }
    }
}

/// HTTP request parsing limits.
///
/// Requests are read into a growable buffer that persists across the
/// keep-alive iterations of one connection (bytes consumed by a framed
/// request are drained, not reallocated). These limits cap how large that
/// buffer is allowed to grow; every [`crate::http::Request`] it hands back
/// owns its data outright.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum length of the request line and header block combined, in
    /// bytes (default: `64 KiB`, `CWIST_HTTP_READ_BUFFER_SIZE` in spec
    /// §4.2). Exceeding this closes the connection with
    /// `431 Request Header Fields Too Large`.
    pub read_buffer_ceiling: usize,

    /// Maximum number of headers accepted per request (default: `64`).
    pub header_count: usize,

    /// Maximum request body size in bytes (default: `8 MiB`,
    /// `CWIST_HTTP_MAX_BODY_SIZE` in spec §4.2). Exceeding this (per
    /// `Content-Length`, checked before the body is read) yields
    /// `413 Payload Too Large`.
    pub max_body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            read_buffer_ceiling: 64 * 1024,
            header_count: 64,
            max_body_size: 8 * 1024 * 1024,
            _priv: (),
        }
    }
}
