//! Core HTTP protocol types: methods, versions, status codes, URLs and
//! headers. Everything here is owned — no type in this module borrows from
//! a connection's read buffer, per the representation decision recorded in
//! `DESIGN.md`.

use crate::errors::CwistError;

// METHOD

/// HTTP request methods.
///
/// # References
///
/// - [RFC 7231, Section 4](https://datatracker.ietf.org/doc/html/rfc7231#section-4)
/// - [RFC 5789](https://datatracker.ietf.org/doc/html/rfc5789) (PATCH method)
///
/// An unrecognized method token (including `TRACE`/`CONNECT`, which this
/// framework does not special-case) parses to [`Method::Unknown`] rather
/// than rejecting the request at the framing layer — the response policy
/// for an unknown method is the router/handler's call, not the parser's.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - transfer a current representation of the target resource.
    Get,
    /// PUT - replace all current representations of the target resource.
    Put,
    /// POST - perform resource-specific processing on the request payload.
    Post,
    /// HEAD - same as GET but without a response body.
    Head,
    /// PATCH - apply partial modifications to a resource.
    Patch,
    /// DELETE - remove all current representations of the target resource.
    Delete,
    /// OPTIONS - describe the communication options for the target resource.
    Options,
    /// Any method token not recognized above.
    Unknown,
}

impl Method {
    /// Parses a method token (up to the first space) from the request
    /// line. Never fails: an unrecognized token yields `Unknown` and the
    /// byte offset of the token itself (the caller still needs the space
    /// separator to exist, which is checked independently).
    #[inline]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<(Self, usize), CwistError> {
        match src {
            [b'G', b'E', b'T', b' ', ..] => Ok((Method::Get, 4)),
            [b'P', b'U', b'T', b' ', ..] => Ok((Method::Put, 4)),
            [b'P', b'O', b'S', b'T', b' ', ..] => Ok((Method::Post, 5)),
            [b'H', b'E', b'A', b'D', b' ', ..] => Ok((Method::Head, 5)),
            [b'P', b'A', b'T', b'C', b'H', b' ', ..] => Ok((Method::Patch, 6)),
            [b'D', b'E', b'L', b'E', b'T', b'E', b' ', ..] => Ok((Method::Delete, 7)),
            [b'O', b'P', b'T', b'I', b'O', b'N', b'S', b' ', ..] => Ok((Method::Options, 8)),
            _ => {
                let len = memchr::memchr(b' ', src)
                    .ok_or(CwistError::Protocol("request line missing method"))?;
                if len == 0 {
                    return Err(CwistError::Protocol("request line missing method"));
                }
                Ok((Method::Unknown, len + 1))
            }
        }
    }

    /// The method name as it appears on the wire. `Unknown` has no single
    /// wire form; callers that need the original token should read it off
    /// the request line before parsing, not through this method.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Unknown => "UNKNOWN",
        }
    }
}

// VERSION

/// HTTP protocol version.
///
/// HTTP/0.9 is intentionally unsupported: it has no headers, no status
/// line, and no keep-alive, none of which this framework's routing,
/// middleware, or WebSocket upgrade can meaningfully operate over.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0 - [RFC 1945](https://tools.ietf.org/html/rfc1945).
    Http10,
    /// HTTP/1.1 - [RFC 7230](https://tools.ietf.org/html/rfc7230) and related.
    Http11,
}

impl Version {
    /// Parses the version token, returning the default keep-alive value for
    /// that version absent an explicit `Connection` header.
    #[inline]
    pub(crate) const fn from_bytes(src: &[u8]) -> Result<(Self, bool), CwistError> {
        match src {
            b"HTTP/1.1" => Ok((Self::Http11, true)),
            b"HTTP/1.0" => Ok((Self::Http10, false)),
            _ => Err(CwistError::Protocol("unsupported HTTP version")),
        }
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])+
        $name:ident = ($num:expr, $str:expr);
    )+) => {
        /// HTTP status codes.
        ///
        /// Represents valid HTTP status codes as defined in
        /// [RFC 9110](https://tools.ietf.org/html/rfc9110#section-15) and other standards.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $(#[$docs])+
            $name = $num,
        )+ }

        impl StatusCode {
            /// Returns the HTTP status line as bytes (e.g., `b"HTTP/1.1 200 OK\r\n"`).
            #[inline]
            pub(crate) const fn into_first_line(&self, version: Version) -> &'static [u8] {
                match (self, version) { $(
                    (StatusCode::$name, Version::Http11) => {
                        concat!("HTTP/1.1 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                    (StatusCode::$name, Version::Http10) => {
                        concat!("HTTP/1.0 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                )+ }
            }

            /// The numeric code as a `u16`.
            #[inline]
            pub const fn as_u16(&self) -> u16 {
                *self as u16
            }
        }
    }
}

set_status_codes! {
    /// [[RFC9110, Section 15.2.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.2.1)]
    Continue = (100, "Continue");
    /// [[RFC9110, Section 15.2.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.2.2)]
    SwitchingProtocols = (101, "Switching Protocols");

    /// [[RFC9110, Section 15.3.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.1)]
    Ok = (200, "OK");
    /// [[RFC9110, Section 15.3.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.2)]
    Created = (201, "Created");
    /// [[RFC9110, Section 15.3.3](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.3)]
    Accepted = (202, "Accepted");
    /// [[RFC9110, Section 15.3.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.5)]
    NoContent = (204, "No Content");
    /// [[RFC9110, Section 15.3.7](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.7)]
    PartialContent = (206, "Partial Content");

    /// [[RFC9110, Section 15.4.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.2)]
    MovedPermanently = (301, "Moved Permanently");
    /// [[RFC9110, Section 15.4.3](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.3)]
    Found = (302, "Found");
    /// [[RFC9110, Section 15.4.4](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.4)]
    SeeOther = (303, "See Other");
    /// [[RFC9110, Section 15.4.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.5)]
    NotModified = (304, "Not Modified");
    /// [[RFC9110, Section 15.4.7](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.7)]
    TemporaryRedirect = (307, "Temporary Redirect");
    /// [[RFC9110, Section 15.4.8](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.8)]
    PermanentRedirect = (308, "Permanent Redirect");

    /// [[RFC9110, Section 15.5.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.1)]
    BadRequest = (400, "Bad Request");
    /// [[RFC9110, Section 15.5.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.2)]
    Unauthorized = (401, "Unauthorized");
    /// [[RFC9110, Section 15.5.4](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.4)]
    Forbidden = (403, "Forbidden");
    /// [[RFC9110, Section 15.5.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.5)]
    NotFound = (404, "Not Found");
    /// [[RFC9110, Section 15.5.6](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.6)]
    MethodNotAllowed = (405, "Method Not Allowed");
    /// [[RFC9110, Section 15.5.9](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.9)]
    RequestTimeout = (408, "Request Timeout");
    /// [[RFC9110, Section 15.5.10](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.10)]
    Conflict = (409, "Conflict");
    /// [[RFC9110, Section 15.5.12](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.12)]
    LengthRequired = (411, "Length Required");
    /// [[RFC9110, Section 15.5.14](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.14)]
    PayloadTooLarge = (413, "Payload Too Large");
    /// [[RFC9110, Section 15.5.15](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.15)]
    UriTooLong = (414, "URI Too Long");
    /// [[RFC9110, Section 15.5.17](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.17)]
    RangeNotSatisfiable = (416, "Range Not Satisfiable");
    /// [[RFC9110, Section 15.5.20](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.20)]
    MisdirectedRequest = (421, "Misdirected Request");
    /// [[RFC9110, Section 15.5.21](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.21)]
    UnprocessableEntity = (422, "Unprocessable Entity");
    /// [[RFC6585, Section 4](https://datatracker.ietf.org/doc/html/rfc6585#section-4)]
    TooManyRequests = (429, "Too Many Requests");
    /// [[RFC6585, Section 5](https://datatracker.ietf.org/doc/html/rfc6585#section-5)]
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    /// [[RFC9110, Section 15.6.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.1)]
    InternalServerError = (500, "Internal Server Error");
    /// [[RFC9110, Section 15.6.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.2)]
    NotImplemented = (501, "Not Implemented");
    /// [[RFC9110, Section 15.6.3](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.3)]
    BadGateway = (502, "Bad Gateway");
    /// [[RFC9110, Section 15.6.4](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.4)]
    ServiceUnavailable = (503, "Service Unavailable");
    /// [[RFC9110, Section 15.6.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.5)]
    GatewayTimeout = (504, "Gateway Timeout");
    /// [[RFC9110, Section 15.6.6](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.6)]
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

// URL

/// A parsed request target: path, path segments, and the raw (still
/// percent-encoded) query string. Percent-decoding into a key/value map
/// happens separately in [`crate::http::query`].
///
/// # Components
///
/// - **Target**: full path with query string (e.g. `/api/users/123?sort=name`)
/// - **Path**: target without the query string (e.g. `/api/users/123`)
/// - **Segments**: path split on `/` (e.g. `["api", "users", "123"]`)
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Url {
    pub(crate) target: String,
    pub(crate) path: String,
    pub(crate) segments: Vec<String>,
    pub(crate) raw_query: Option<String>,
}

impl Url {
    #[inline]
    pub(crate) fn parse(target: &str) -> Self {
        let (path, raw_query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };

        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            target: target.to_string(),
            path: path.to_string(),
            segments,
            raw_query,
        }
    }

    /// The raw request target, including the query string if present.
    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The path component, without the query string.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path segment at `index`, or `None` past the end.
    ///
    /// For `/api/users/123`: index `0` is `"api"`, index `2` is `"123"`.
    #[inline]
    pub fn path_segment(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    /// All path segments, in order, without the leading or trailing `/`.
    #[inline]
    pub fn path_segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    /// The raw (still percent-encoded) query string, without the leading `?`.
    #[inline]
    pub fn query_raw(&self) -> Option<&str> {
        self.raw_query.as_deref()
    }
}

// HEADER MAP

/// An ordered, case-insensitively-addressed collection of HTTP headers.
///
/// Header names are stored as given on the wire (not lowercased) so the
/// original casing survives a round trip through middleware; lookups and
/// duplicate checks compare case-insensitively per RFC 9110.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderMap {
    pub(crate) headers: Vec<(String, String)>,
}

impl HeaderMap {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            headers: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn clear(&mut self) {
        self.headers.clear();
    }

    /// The first value stored under `name`, compared case-insensitively.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values stored under `name`, in insertion order.
    #[inline]
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether any header named `name` is present.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Appends a header, keeping any existing header of the same name
    /// (multiple `Set-Cookie`-style headers are legal).
    #[inline]
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Removes every header named `name` and inserts a single fresh one.
    #[inline]
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Removes every header named `name`.
    #[inline]
    pub fn remove(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Iterates headers in insertion order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.headers.len()
    }
}
