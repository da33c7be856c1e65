//! Route registration and lookup.
//!
//! Literal routes (no `:name` segment) live in a hashed bucket array keyed
//! by `(method, pattern)`; parameterized routes fall back to a linear scan
//! in registration order. A literal match always wins over a parameterized
//! one, and the router is frozen (no further registration) once the server
//! starts accepting connections.

use crate::{
    http::{
        request::Request,
        response::{Handled, Response},
        types::{Method, StatusCode},
    },
    websocket::WsStream,
};
use async_trait::async_trait;
use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash, Hasher},
    path::PathBuf,
    sync::Arc,
};
use tokio::fs;

/// An HTTP route handler.
///
/// Implement this directly (`async_trait` lets the trait method itself be
/// `async fn`) rather than relying on a blanket closure impl — a handler is
/// usually a small struct carrying whatever shared state (a database pool,
/// a template cache) it needs.
///
/// ```
/// use cwist::{Handler, Request, Response, Handled, StatusCode};
/// use async_trait::async_trait;
///
/// struct Hello;
///
/// #[async_trait]
/// impl Handler for Hello {
///     async fn call(&self, _req: &Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("hello")
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, req: &Request, resp: &mut Response) -> Handled;
}

/// A WebSocket route handler, invoked once a request has successfully
/// upgraded. Owns the connection for as long as the WebSocket session runs.
#[async_trait]
pub trait WsHandler: Send + Sync + 'static {
    async fn call(&self, stream: WsStream);
}

/// The error handler slot: invoked for routing failures (no match) with the
/// status that would otherwise be sent, letting an application emit its own
/// error body instead of the framework's default JSON.
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    async fn call(&self, req: &Request, resp: &mut Response, status: StatusCode);
}

#[derive(Clone)]
pub(crate) enum HandlerKind {
    Http(Arc<dyn Handler>),
    Ws(Arc<dyn WsHandler>),
}

/// One segment of a parsed route pattern.
#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param(String),
}

fn split_segments(pattern: &str) -> Vec<Segment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Literal(s.to_string()),
        })
        .collect()
}

fn has_params(segments: &[Segment]) -> bool {
    segments.iter().any(|s| matches!(s, Segment::Param(_)))
}

pub(crate) struct RouteEntry {
    method: Method,
    pattern: String,
    segments: Vec<Segment>,
    handler: HandlerKind,
}

/// A registered `(url_prefix, fs_root)` static file mapping.
pub(crate) struct StaticRoute {
    prefix: String,
    fs_root: PathBuf,
}

/// The result of a successful route lookup: which handler to invoke and
/// whatever path parameters its pattern captured.
pub(crate) enum Matched {
    Http(Arc<dyn Handler>, Vec<(String, String)>),
    Ws(Arc<dyn WsHandler>, Vec<(String, String)>),
    Static(Arc<StaticRoute>),
}

/// The frozen-after-build route table: a hashed bucket array for literal
/// routes plus a linear list for parameterized ones, per the router's
/// hot-path/fallback split.
pub(crate) struct Router {
    buckets: Vec<Vec<RouteEntry>>,
    hasher: RandomState,
    param_routes: Vec<RouteEntry>,
    static_routes: Vec<Arc<StaticRoute>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

fn bucket_index(hasher: &RandomState, bucket_count: usize, method: Method, pattern: &str) -> usize {
    let mut h = hasher.build_hasher();
    method.hash(&mut h);
    pattern.hash(&mut h);
    (h.finish() as usize) % bucket_count
}

impl Router {
    pub(crate) fn new(bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        Self {
            buckets: (0..bucket_count).map(|_| Vec::new()).collect(),
            hasher: RandomState::new(),
            param_routes: Vec::new(),
            static_routes: Vec::new(),
            error_handler: None,
        }
    }

    pub(crate) fn set_error_handler(&mut self, handler: Arc<dyn ErrorHandler>) {
        self.error_handler = Some(handler);
    }

    pub(crate) fn error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
        self.error_handler.clone()
    }

    /// Registers an HTTP handler. Registering the same `(method, pattern)`
    /// twice replaces the earlier entry's handler in place rather than
    /// adding a second one (router idempotence).
    pub(crate) fn register_http(&mut self, method: Method, pattern: &str, handler: Arc<dyn Handler>) {
        self.register(method, pattern, HandlerKind::Http(handler));
    }

    /// Registers a WebSocket handler. Always matched against `GET`, since
    /// RFC 6455 upgrades ride a `GET` request.
    pub(crate) fn register_ws(&mut self, pattern: &str, handler: Arc<dyn WsHandler>) {
        self.register(Method::Get, pattern, HandlerKind::Ws(handler));
    }

    pub(crate) fn register_static(&mut self, url_prefix: &str, fs_root: impl Into<PathBuf>) {
        self.static_routes.push(Arc::new(StaticRoute {
            prefix: url_prefix.trim_end_matches('/').to_string(),
            fs_root: fs_root.into(),
        }));
    }

    fn register(&mut self, method: Method, pattern: &str, handler: HandlerKind) {
        let segments = split_segments(pattern);

        if has_params(&segments) {
            if let Some(existing) = self
                .param_routes
                .iter_mut()
                .find(|e| e.method == method && e.pattern == pattern)
            {
                existing.handler = handler;
                return;
            }
            self.param_routes.push(RouteEntry {
                method,
                pattern: pattern.to_string(),
                segments,
                handler,
            });
            return;
        }

        let bucket_count = self.buckets.len();
        let idx = bucket_index(&self.hasher, bucket_count, method, pattern);
        let bucket = &mut self.buckets[idx];
        if let Some(existing) = bucket.iter_mut().find(|e| e.method == method && e.pattern == pattern) {
            existing.handler = handler;
            return;
        }
        bucket.push(RouteEntry {
            method,
            pattern: pattern.to_string(),
            segments,
            handler,
        });
    }

    /// Looks up `(method, path)`. A literal match always wins; among
    /// parameterized routes, earlier registration wins; static routes are
    /// consulted last and only for `GET`/`HEAD`.
    pub(crate) fn lookup(&self, method: Method, path: &str) -> Option<Matched> {
        let bucket_count = self.buckets.len();
        let idx = bucket_index(&self.hasher, bucket_count, method, path);
        if let Some(entry) = self.buckets[idx]
            .iter()
            .find(|e| e.method == method && e.pattern == path)
        {
            return Some(match &entry.handler {
                HandlerKind::Http(h) => Matched::Http(h.clone(), Vec::new()),
                HandlerKind::Ws(h) => Matched::Ws(h.clone(), Vec::new()),
            });
        }

        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for entry in &self.param_routes {
            if entry.method != method || entry.segments.len() != path_segments.len() {
                continue;
            }
            let mut params = Vec::new();
            let mut ok = true;
            for (seg, part) in entry.segments.iter().zip(path_segments.iter()) {
                match seg {
                    Segment::Literal(lit) => {
                        if lit != part {
                            ok = false;
                            break;
                        }
                    }
                    Segment::Param(name) => params.push((name.clone(), part.to_string())),
                }
            }
            if ok {
                return Some(match &entry.handler {
                    HandlerKind::Http(h) => Matched::Http(h.clone(), params),
                    HandlerKind::Ws(h) => Matched::Ws(h.clone(), params),
                });
            }
        }

        if matches!(method, Method::Get | Method::Head) {
            if let Some(route) = self
                .static_routes
                .iter()
                .find(|r| path_matches_prefix(path, &r.prefix))
            {
                return Some(Matched::Static(route.clone()));
            }
        }

        None
    }
}

fn path_matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Serves a static file request. Invoked by the connection loop once a
/// [`Matched::Static`] is resolved, with `path` being the full request path
/// (still carrying the route's prefix).
pub(crate) async fn serve_static(route: &StaticRoute, path: &str, head_only: bool, resp: &mut Response) -> Handled {
    let rel = path.strip_prefix(&route.prefix).unwrap_or(path);
    let rel = rel.trim_start_matches('/');

    if rel.split('/').any(|seg| seg == "..") {
        return resp.status(StatusCode::Forbidden).body(br#"{"error":"path traversal rejected"}"#.to_vec());
    }

    let full_path: PathBuf = if rel.is_empty() {
        route.fs_root.clone()
    } else {
        route.fs_root.join(rel)
    };

    match fs::metadata(&full_path).await {
        Ok(meta) if meta.is_dir() => {
            resp.status(StatusCode::Forbidden).body(br#"{"error":"directory listing is disabled"}"#.to_vec())
        }
        Ok(meta) => match fs::read(&full_path).await {
            Ok(bytes) => {
                resp.status(StatusCode::Ok);
                if head_only {
                    resp.set_content_length_only(meta.len() as usize);
                    resp.finish()
                } else {
                    resp.body(bytes)
                }
            }
            Err(_) => resp.status(StatusCode::InternalServerError).body(br#"{"error":"failed to read file"}"#.to_vec()),
        },
        Err(_) => resp.status(StatusCode::NotFound).body(br#"{"error":"not found"}"#.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::Response;

    struct Ok200;
    #[async_trait]
    impl Handler for Ok200 {
        async fn call(&self, _req: &Request, resp: &mut Response) -> Handled {
            resp.status(StatusCode::Ok).body("ok")
        }
    }

    struct Other;
    #[async_trait]
    impl Handler for Other {
        async fn call(&self, _req: &Request, resp: &mut Response) -> Handled {
            resp.status(StatusCode::Ok).body("other")
        }
    }

    #[test]
    fn literal_beats_parameterized() {
        let mut router = Router::new(8);
        router.register_http(Method::Get, "/users/:id", Arc::new(Ok200));
        router.register_http(Method::Get, "/users/42", Arc::new(Other));

        match router.lookup(Method::Get, "/users/42") {
            Some(Matched::Http(_, params)) => assert!(params.is_empty()),
            _ => panic!("expected a literal match"),
        }
    }

    #[test]
    fn parameterized_route_captures_segment() {
        let mut router = Router::new(8);
        router.register_http(Method::Get, "/users/:id/posts", Arc::new(Ok200));

        match router.lookup(Method::Get, "/users/42/posts") {
            Some(Matched::Http(_, params)) => {
                assert_eq!(params, vec![("id".to_string(), "42".to_string())]);
            }
            _ => panic!("expected a parameterized match"),
        }
    }

    #[test]
    fn registering_same_route_twice_replaces_handler() {
        let mut router = Router::new(8);
        router.register_http(Method::Get, "/x", Arc::new(Ok200));
        router.register_http(Method::Get, "/x", Arc::new(Other));

        assert_eq!(router.buckets.iter().map(Vec::len).sum::<usize>(), 1);
    }

    #[test]
    fn no_match_returns_none() {
        let router = Router::new(8);
        assert!(router.lookup(Method::Get, "/nope").is_none());
    }

    #[test]
    fn static_route_matches_on_prefix_boundary() {
        let mut router = Router::new(8);
        router.register_static("/assets", "/srv/www");
        assert!(matches!(router.lookup(Method::Get, "/assets/app.js"), Some(Matched::Static(_))));
        assert!(router.lookup(Method::Get, "/assetsmalicious").is_none());
    }
}
