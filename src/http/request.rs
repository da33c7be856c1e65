//! Owned HTTP request representation and the connection-side parser that
//! produces it.
//!
//! The parser reads into a growable buffer that is reused across the
//! keep-alive iterations of one connection (cleared only by draining
//! consumed bytes, never reallocated mid-connection) but every [`Request`]
//! it hands back owns its data outright — no part of it borrows from that
//! buffer. This is what lets a [`Request`] carry route parameters captured
//! during dispatch and survive being read, mutated by middleware, and read
//! again by a handler without any lifetime gymnastics.

use crate::{
    errors::{CwistError, PolicyViolation},
    http::{
        query::QueryMap,
        types::{HeaderMap, Method, Url, Version},
    },
    limits::ReqLimits,
};
use memchr::memchr;
use std::{io, net::SocketAddr, time::Duration};
use tokio::{io::AsyncRead, io::AsyncReadExt, time::sleep};

/// An HTTP request after framing, parsing, and query decoding.
///
/// Route parameters (`params`) start empty and are filled in by the router
/// once a route matches; middleware and handlers see the final, populated
/// request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    url: Url,
    query: QueryMap,
    version: Version,
    headers: HeaderMap,
    body: Vec<u8>,
    params: Vec<(String, String)>,
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    upgraded: bool,
}

impl Request {
    #[inline]
    pub(crate) fn set_addrs(&mut self, client_addr: SocketAddr, server_addr: SocketAddr) {
        self.client_addr = client_addr;
        self.server_addr = server_addr;
    }

    #[inline]
    pub(crate) fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params;
    }

    /// Mutable access to the request headers, for middleware that needs to
    /// stamp a header onto the request itself (e.g. request-id).
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[inline]
    pub(crate) fn set_upgraded(&mut self, value: bool) {
        self.upgraded = value;
    }

    /// Whether this exchange was switched to a WebSocket connection. Once
    /// true, the framework does not write a normal response and the socket
    /// is handed off to the WebSocket frame loop instead.
    #[inline]
    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }
}

// Public API
impl Request {
    /// The request method.
    #[inline]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// The parsed request target (path, segments, raw query string).
    #[inline]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// The percent-decoded query string as a key/value map.
    #[inline]
    pub const fn query(&self) -> &QueryMap {
        &self.query
    }

    /// The negotiated protocol version.
    #[inline]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// All request headers.
    #[inline]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The first header value matching `name`, case-insensitively.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The parsed `Content-Length`, if the request carried a body.
    #[inline]
    pub fn content_length(&self) -> Option<usize> {
        if self.body.is_empty() {
            None
        } else {
            Some(self.body.len())
        }
    }

    /// The request body. Empty when the request carried none.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The value captured for a named route parameter (e.g. `:id`), if the
    /// matched route declared one by that name.
    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All captured route parameters, in the order the pattern declared them.
    #[inline]
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The remote peer's socket address.
    #[inline]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// The local socket address the connection was accepted on.
    #[inline]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

/// Outcome of framing one request off the connection buffer.
pub(crate) struct Parsed {
    pub(crate) request: Request,
    pub(crate) keep_alive: bool,
}

/// Reads raw bytes off a connection and frames them into [`Request`]s.
///
/// Unlike a per-request parser, this buffer persists across an entire
/// connection's keep-alive lifetime: bytes belonging to a second,
/// already-arrived request (HTTP/1.1 pipelining) stay queued after the
/// first is drained, instead of being discarded.
#[derive(Debug, Default)]
pub(crate) struct Parser {
    buffer: Vec<u8>,
}

impl Parser {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn feed(&mut self, bytes: impl AsRef<[u8]>) {
        self.buffer.extend_from_slice(bytes.as_ref());
    }

    /// Reads one chunk off `stream`, appending it to the internal buffer.
    /// Returns `0` on a clean EOF with nothing more buffered.
    ///
    /// Generic over the stream type so the plain-TCP and TLS-wrapped
    /// connection loops share this exact code path — pipelining and timeout
    /// behavior are identical on both.
    pub(crate) async fn fill_buffer<S: AsyncRead + Unpin>(
        &mut self,
        stream: &mut S,
        timeout: Duration,
    ) -> Result<usize, io::Error> {
        let mut chunk = [0u8; 4096];

        let n = tokio::select! {
            biased;

            result = stream.read(&mut chunk) => result?,
            _ = sleep(timeout) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"));
            }
        };

        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Attempts to frame one complete request out of the buffered bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed (the caller should
    /// `fill_buffer` and retry), consuming nothing from the buffer in that
    /// case so a later call sees the same partial data plus whatever was
    /// appended.
    pub(crate) fn try_parse(&mut self, limits: &ReqLimits) -> Result<Option<Parsed>, CwistError> {
        let Some(head_end) = find_head_end(&self.buffer) else {
            if self.buffer.len() > limits.read_buffer_ceiling {
                return Err(CwistError::Policy(PolicyViolation::HeadersTooLarge));
            }
            return Ok(None);
        };

        if head_end > limits.read_buffer_ceiling {
            return Err(CwistError::Policy(PolicyViolation::HeadersTooLarge));
        }

        let head = &self.buffer[..head_end];
        let (method, url, version, mut keep_alive, headers) = parse_head(head, limits)?;

        let body_len = match headers.get("transfer-encoding") {
            Some(value) if value.to_ascii_lowercase().contains("chunked") => {
                return Err(CwistError::Policy(PolicyViolation::ChunkedNotSupported));
            }
            _ => match headers.get("content-length") {
                Some(value) => {
                    let len: usize = value
                        .trim()
                        .parse()
                        .map_err(|_| CwistError::Protocol("invalid Content-Length"))?;
                    if len > limits.max_body_size {
                        return Err(CwistError::Policy(PolicyViolation::BodyTooLarge));
                    }
                    len
                }
                None => 0,
            },
        };

        let body_start = head_end + 4;
        if self.buffer.len() < body_start + body_len {
            return Ok(None);
        }

        let body = self.buffer[body_start..body_start + body_len].to_vec();
        self.buffer.drain(0..body_start + body_len);

        match version {
            Version::Http10 => {
                keep_alive = headers
                    .get("connection")
                    .is_some_and(|v| v.eq_ignore_ascii_case("keep-alive"));
            }
            Version::Http11 => {
                if let Some(v) = headers.get("connection") {
                    keep_alive = !v.eq_ignore_ascii_case("close");
                }
            }
        }

        let query = QueryMap::parse(url.query_raw().unwrap_or(""));

        let request = Request {
            method,
            url,
            query,
            version,
            headers,
            body,
            params: Vec::new(),
            client_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            server_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            upgraded: false,
        };

        Ok(Some(Parsed { request, keep_alive }))
    }
}

/// Finds the byte offset of the `\r\n` that ends the header block (i.e. the
/// position of the first `\r` in the terminating `\r\n\r\n`), not counting
/// it as part of the returned head.
fn find_head_end(buffer: &[u8]) -> Option<usize> {
    let mut search_from = 0;
    loop {
        let rel = memchr(b'\r', &buffer[search_from..])?;
        let pos = search_from + rel;
        if buffer.get(pos..pos + 4) == Some(b"\r\n\r\n") {
            return Some(pos);
        }
        search_from = pos + 1;
    }
}

fn parse_head(
    head: &[u8],
    limits: &ReqLimits,
) -> Result<(Method, Url, Version, bool, HeaderMap), CwistError> {
    let mut lines = head.split(|&b| b == b'\n').map(strip_trailing_cr);

    let request_line = lines
        .next()
        .ok_or(CwistError::Protocol("empty request"))?;
    let (method, url, version, keep_alive) = parse_request_line(request_line)?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if headers.len() >= limits.header_count {
            return Err(CwistError::Policy(PolicyViolation::TooManyHeaders));
        }
        let (name, value) = parse_header_line(line)?;
        headers.append(name, value);
    }

    Ok((method, url, version, keep_alive, headers))
}

#[inline]
fn strip_trailing_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_request_line(line: &[u8]) -> Result<(Method, Url, Version, bool), CwistError> {
    let (method, after_method) = Method::from_bytes(line)?;
    let rest = &line[after_method..];

    let sp = memchr(b' ', rest).ok_or(CwistError::Protocol("request line missing target"))?;
    let target = &rest[..sp];

    if target.first() != Some(&b'/') {
        return Err(CwistError::Protocol("request target must start with '/'"));
    }

    let target = std::str::from_utf8(target)
        .map_err(|_| CwistError::Protocol("request target is not valid UTF-8"))?;
    let url = Url::parse(target);

    let version_bytes = &rest[sp + 1..];
    let (version, keep_alive) = Version::from_bytes(version_bytes)?;

    Ok((method, url, version, keep_alive))
}

fn parse_header_line(line: &[u8]) -> Result<(String, String), CwistError> {
    let colon = memchr(b':', line).ok_or(CwistError::Protocol("header missing ':'"))?;
    let name = &line[..colon];
    if name.is_empty() {
        return Err(CwistError::Protocol("header name is empty"));
    }

    let mut value_start = colon + 1;
    while line.get(value_start) == Some(&b' ') {
        value_start += 1;
    }
    let value = &line[value_start..];

    let name = std::str::from_utf8(name)
        .map_err(|_| CwistError::Protocol("header name is not valid UTF-8"))?
        .to_string();
    let value = std::str::from_utf8(value)
        .map_err(|_| CwistError::Protocol("header value is not valid UTF-8"))?
        .to_string();

    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ReqLimits {
        ReqLimits::default()
    }

    fn parse_once(bytes: &[u8]) -> Parsed {
        let mut parser = Parser::new();
        parser.feed(bytes);
        parser
            .try_parse(&limits())
            .expect("parse should not error")
            .expect("request should be complete")
    }

    #[test]
    fn parses_simple_get() {
        let parsed = parse_once(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(parsed.request.method(), Method::Get);
        assert_eq!(parsed.request.url().path(), "/hello");
        assert_eq!(parsed.request.version(), Version::Http11);
        assert!(parsed.keep_alive);
    }

    #[test]
    fn http10_defaults_to_close_without_connection_header() {
        let parsed = parse_once(b"GET / HTTP/1.0\r\n\r\n");
        assert!(!parsed.keep_alive);
    }

    #[test]
    fn http10_keep_alive_header_overrides_default() {
        let parsed = parse_once(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        assert!(parsed.keep_alive);
    }

    #[test]
    fn http11_connection_close_overrides_default() {
        let parsed = parse_once(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert!(!parsed.keep_alive);
    }

    #[test]
    fn parses_headers_case_insensitively() {
        let parsed = parse_once(b"GET / HTTP/1.1\r\nContent-Type: text/plain\r\n\r\n");
        assert_eq!(parsed.request.header("content-type"), Some("text/plain"));
    }

    #[test]
    fn parses_body_matching_content_length() {
        let parsed = parse_once(b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(parsed.request.body(), b"hello");
    }

    #[test]
    fn incomplete_body_requires_more_bytes() {
        let mut parser = Parser::new();
        parser.feed(b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel");
        assert!(parser.try_parse(&limits()).unwrap().is_none());

        parser.feed(b"lo");
        let parsed = parser.try_parse(&limits()).unwrap().unwrap();
        assert_eq!(parsed.request.body(), b"hello");
    }

    #[test]
    fn incomplete_head_requires_more_bytes() {
        let mut parser = Parser::new();
        parser.feed(b"GET / HTTP/1.1\r\nHost: x\r\n");
        assert!(parser.try_parse(&limits()).unwrap().is_none());
    }

    #[test]
    fn rejects_chunked_transfer_encoding() {
        let mut parser = Parser::new();
        parser.feed(b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");
        let err = parser.try_parse(&limits()).unwrap_err();
        assert!(matches!(
            err,
            CwistError::Policy(PolicyViolation::ChunkedNotSupported)
        ));
    }

    #[test]
    fn rejects_body_over_limit() {
        let mut small_limits = limits();
        small_limits.max_body_size = 4;

        let mut parser = Parser::new();
        parser.feed(b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        let err = parser.try_parse(&small_limits).unwrap_err();
        assert!(matches!(
            err,
            CwistError::Policy(PolicyViolation::BodyTooLarge)
        ));
    }

    #[test]
    fn rejects_too_many_headers() {
        let mut small_limits = limits();
        small_limits.header_count = 1;

        let mut parser = Parser::new();
        parser.feed(b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\n\r\n");
        let err = parser.try_parse(&small_limits).unwrap_err();
        assert!(matches!(
            err,
            CwistError::Policy(PolicyViolation::TooManyHeaders)
        ));
    }

    #[test]
    fn unrecognized_methods_parse_as_unknown_not_rejected() {
        let parsed = parse_once(b"TRACE / HTTP/1.1\r\n\r\n");
        assert_eq!(parsed.request.method(), Method::Unknown);
    }

    #[test]
    fn pipelined_requests_are_parsed_one_at_a_time() {
        let mut parser = Parser::new();
        parser.feed(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");

        let first = parser.try_parse(&limits()).unwrap().unwrap();
        assert_eq!(first.request.url().path(), "/a");

        let second = parser.try_parse(&limits()).unwrap().unwrap();
        assert_eq!(second.request.url().path(), "/b");

        assert!(parser.try_parse(&limits()).unwrap().is_none());
    }

    #[test]
    fn route_params_round_trip() {
        let parsed = parse_once(b"GET /users/7 HTTP/1.1\r\n\r\n");
        let mut request = parsed.request;
        request.set_params(vec![("id".to_string(), "7".to_string())]);
        assert_eq!(request.param("id"), Some("7"));
        assert_eq!(request.param("missing"), None);
    }
}
