//! Owned HTTP response representation and the wire serializer that turns
//! one into bytes.
//!
//! Unlike the teacher crate's single-pass buffer writer, `Response` here is
//! a plain struct middleware can mutate both before and after the handler
//! runs (a CORS middleware sets status and short-circuits; an access-log
//! middleware reads the final status and body size after `next` returns).
//! Serialization into wire bytes happens once, at the end, in
//! [`Response::serialize`] — the component spec §4.6 calls the response
//! serializer.

use crate::http::types::{HeaderMap, StatusCode, Version};
pub use write::{BodyWriter, WriteBuffer};

/// An HTTP response under construction. Handlers and middleware see the
/// same `&mut Response` for the duration of one exchange; nothing here
/// borrows from the connection's read buffer.
#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) version: Version,
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    pub(crate) keep_alive: bool,
}

/// Proof that a response has been finalized. [`crate::middleware::Middleware`]
/// and route handlers return this, which a caller can only obtain by
/// calling a body-finalizing method on [`Response`].
#[doc(hidden)]
pub struct Handled(());

impl Response {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            version: Version::Http11,
            status: StatusCode::Ok,
            headers: HeaderMap::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.version = Version::Http11;
        self.status = StatusCode::Ok;
        self.headers.clear();
        self.body.clear();
        self.keep_alive = true;
    }
}

impl Response {
    /// Forces the connection to close after this response, overriding
    /// whatever keep-alive the request negotiated.
    #[inline]
    pub fn close(&mut self) -> &mut Self {
        self.keep_alive = false;
        self
    }

    /// Sets the HTTP status code. May be called more than once (the last
    /// call before finalizing wins) so middleware can override a status a
    /// handler already set.
    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// The status code currently set on the response.
    #[inline]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// All response headers set so far.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The first header value stored under `name`, case-insensitively.
    #[inline]
    pub fn header_get(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The response body written so far.
    #[inline]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Sets (replacing any prior value) a header.
    ///
    /// Do not set `content-length` (computed automatically at
    /// serialization) or `connection` (use [`close()`](Response::close))
    /// through this method — both are synthesized only if the handler left
    /// them unset, per the response-serializer contract.
    #[inline]
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        self.headers.set(to_string(&name), to_string(&value));
        self
    }

    /// Sets a header whose value is a `split`-joined sequence of values
    /// (e.g. `accept: text/html, text/plain`).
    #[inline]
    pub fn header_multi<N, S, I, V>(&mut self, name: N, split: S, values: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = V>,
        V: WriteBuffer,
    {
        let mut buf = Vec::new();
        let mut iter = values.into_iter();
        if let Some(first) = iter.next() {
            first.write_to(&mut buf);
            for value in iter {
                split.write_to(&mut buf);
                value.write_to(&mut buf);
            }
        }
        self.headers.set(to_string(&name), String::from_utf8_lossy(&buf).into_owned());
        self
    }

    /// Sets a header built from `key[=value]` parameters (e.g.
    /// `cache-control: max-age=3600, must-revalidate`).
    #[inline]
    pub fn header_params<N, S, I, K, V>(&mut self, name: N, split: S, params: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = (K, Option<V>)>,
        K: WriteBuffer,
        V: WriteBuffer,
    {
        let mut buf = Vec::new();
        let mut iter = params.into_iter();
        if let Some((first_key, first_val)) = iter.next() {
            first_key.write_to(&mut buf);
            if let Some(val) = first_val {
                buf.push(b'=');
                val.write_to(&mut buf);
            }
            for (key, value) in iter {
                split.write_to(&mut buf);
                key.write_to(&mut buf);
                if let Some(val) = value {
                    buf.push(b'=');
                    val.write_to(&mut buf);
                }
            }
        }
        self.headers.set(to_string(&name), String::from_utf8_lossy(&buf).into_owned());
        self
    }

    /// Sets the response body and finalizes the response.
    #[inline]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> Handled {
        self.body.clear();
        data.write_to(&mut self.body);
        Handled(())
    }

    /// Writes the response body via a closure and finalizes the response.
    #[inline]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> Handled {
        self.body.clear();
        f(&mut BodyWriter(&mut self.body));
        Handled(())
    }

    /// Marks the response finalized without touching the body (e.g. a
    /// `204 No Content` or `HEAD` response that already carries the right
    /// `Content-Length` via [`Response::set_content_length`]).
    #[inline]
    pub fn finish(&mut self) -> Handled {
        Handled(())
    }

    /// Overrides the synthesized `Content-Length` without writing a body
    /// (used by `HEAD` responses, which report the entity size of the
    /// matching `GET` without sending it).
    #[inline]
    pub(crate) fn set_content_length_only(&mut self, len: usize) {
        self.headers.set("content-length", len.to_string());
    }
}

fn to_string<T: WriteBuffer>(value: &T) -> String {
    let mut buf = Vec::new();
    value.write_to(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

impl Response {
    /// Serializes the status line, headers (synthesizing `Content-Length`
    /// and `Connection` only where the handler left them unset), and body
    /// into wire bytes, per spec §4.6.
    pub(crate) fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(self.status.into_first_line(self.version));

        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        if !self.headers.contains("content-length") {
            out.extend_from_slice(b"content-length: ");
            out.extend_from_slice(self.body.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        if !self.headers.contains("connection") {
            let value: &[u8] = match (self.version, self.keep_alive) {
                (Version::Http11, true) => b"keep-alive",
                (Version::Http11, false) => b"close",
                (Version::Http10, true) => b"keep-alive",
                (Version::Http10, false) => b"close",
            };
            out.extend_from_slice(b"connection: ");
            out.extend_from_slice(value);
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Like [`serialize`](Self::serialize) but omits the body (for `HEAD`
    /// responses, which must still report the entity's `Content-Length`).
    pub(crate) fn serialize_head_only(&self) -> Vec<u8> {
        let mut out = self.serialize();
        let body_start = out.len() - self.body.len();
        out.truncate(body_start);
        out
    }
}

pub mod write {
    use super::*;
    use std::{borrow::Cow, rc::Rc, sync::Arc};

    /// Writer for constructing the HTTP response body, passed to
    /// [`body_with`](Response::body_with).
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends a [`WriteBuffer`] value to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Trait for writing a value's wire representation directly into a
    /// byte buffer, implemented for strings, byte slices, booleans, chars,
    /// and integer types (not floats — locale-independent formatting of
    /// floats in protocol text is out of scope; reach for `ryu` if your
    /// application needs it).
    pub trait WriteBuffer {
        /// Writes the value's representation directly to the buffer.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
        (non_zero($type:ty), $conn:expr => $($t:ident),*) => {
            $(impl WriteBuffer for std::num::$t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(self.get() as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl<T: WriteBuffer> WriteBuffer for &mut T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => &str, String, Box<str>, Cow<'_, str>,
        Arc<str>, Rc<str>, Arc<String>, Rc<String>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => &[u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>,
        Arc<[u8]>, Rc<[u8]>, Arc<Vec<u8>>, Rc<Vec<u8>>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), impl_write_buffer_u128 => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        non_zero(u128), impl_write_buffer_u128 => NonZeroU8,
        NonZeroU16, NonZeroU32, NonZeroU64, NonZeroU128, NonZeroUsize
    }
    impl_write_buffer! {
        number(i128), impl_write_buffer_i128 => i8, i16, i32, i64, i128, isize
    }
    impl_write_buffer! {
        non_zero(i128), impl_write_buffer_i128 => NonZeroI8,
        NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI128, NonZeroIsize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline]
    fn impl_write_buffer_u128(value: u128, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(value.to_string().as_bytes());
    }

    #[inline]
    fn impl_write_buffer_i128(value: i128, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(value.to_string().as_bytes());
    }
}

#[cfg(test)]
mod status_tests {
    use super::*;

    #[test]
    fn status_defaults_to_ok() {
        let r = Response::new();
        assert_eq!(r.status_code(), StatusCode::Ok);
    }

    #[test]
    fn status_can_be_overridden_after_the_fact() {
        let mut r = Response::new();
        r.status(StatusCode::Ok);
        r.status(StatusCode::NoContent);
        assert_eq!(r.status_code(), StatusCode::NoContent);
    }
}

#[cfg(test)]
mod header_tests {
    use super::*;

    #[test]
    fn header_set_is_visible_through_header_get() {
        let mut r = Response::new();
        r.header("content-type", "text/plain");
        assert_eq!(r.header_get("content-type"), Some("text/plain"));
        assert_eq!(r.header_get("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn header_accepts_non_string_writebuffer_values() {
        let mut r = Response::new();
        r.header("x-count", 42).header("x-enabled", true);
        assert_eq!(r.header_get("x-count"), Some("42"));
        assert_eq!(r.header_get("x-enabled"), Some("true"));
    }

    #[test]
    fn header_multi_joins_with_separator() {
        let mut r = Response::new();
        r.header_multi("accept", "; ", ["text/html", "text/plain"]);
        assert_eq!(r.header_get("accept"), Some("text/html; text/plain"));
    }

    #[test]
    fn header_params_writes_key_value_pairs() {
        let mut r = Response::new();
        r.header_params(
            "content-type",
            "; ",
            [("text/html", None), ("charset", Some("utf-8"))],
        );
        assert_eq!(r.header_get("content-type"), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn middleware_can_set_headers_after_body_is_finalized() {
        let mut r = Response::new();
        r.status(StatusCode::Ok).body("hi");
        r.header("x-request-id", "abc123");
        assert_eq!(r.header_get("x-request-id"), Some("abc123"));
    }
}

#[cfg(test)]
mod serialize_tests {
    use super::*;

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn serialize_synthesizes_content_length_and_connection() {
        let mut r = Response::new();
        r.status(StatusCode::Ok).header("content-type", "text/plain");
        r.body("hello");
        let out = text(r.serialize());
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("content-length: 5\r\n"));
        assert!(out.contains("connection: keep-alive\r\n"));
        assert!(out.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn handler_set_content_length_is_not_overridden() {
        let mut r = Response::new();
        r.status(StatusCode::Ok).header("content-length", "0");
        r.body("hello");
        let out = text(r.serialize());
        assert!(out.contains("content-length: 0\r\n"));
        assert!(!out.contains("content-length: 5"));
    }

    #[test]
    fn handler_set_connection_is_not_overridden() {
        let mut r = Response::new();
        r.status(StatusCode::Ok).header("connection", "close");
        r.close(); // would normally also produce "close"; header already set wins either way
        r.body("bye");
        let out = text(r.serialize());
        assert_eq!(out.matches("connection:").count(), 1);
    }

    #[test]
    fn close_forces_connection_close_on_http11() {
        let mut r = Response::new();
        r.status(StatusCode::Ok).close();
        r.body("bye");
        assert!(text(r.serialize()).contains("connection: close\r\n"));
    }

    #[test]
    fn head_only_serialization_omits_body_bytes() {
        let mut r = Response::new();
        r.status(StatusCode::Ok).header("content-type", "text/plain");
        r.body("hello");
        let out = text(r.serialize_head_only());
        assert!(out.contains("content-length: 5\r\n"));
        assert!(!out.contains("hello"));
    }

    #[test]
    fn reset_clears_status_headers_and_body() {
        let mut r = Response::new();
        r.status(StatusCode::NotFound).header("x-a", "1").close();
        r.body("x");
        r.reset();
        assert_eq!(r.status_code(), StatusCode::Ok);
        assert!(r.header_get("x-a").is_none());
        assert!(r.body_bytes().is_empty());
        assert!(r.keep_alive);
    }
}
