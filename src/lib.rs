//! cwist — an embeddable async server framework.
//!
//! `cwist` accepts network connections, parses HTTP/1.1 requests
//! (optionally over TLS), dispatches them through a middleware pipeline to
//! route-specific handlers, and can upgrade a connection to the WebSocket
//! protocol. The core handles the wire protocol, connection lifecycle,
//! routing, and concurrency; application code implements per-route
//! handlers and middleware.
//!
//! # Protocol support
//!
//! - **HTTP/1.1**, including keep-alive and pipelining, over plain TCP or
//!   TLS.
//! - **WebSocket** (RFC 6455) upgrade from an HTTP/1.1 `GET`, with a masked
//!   frame codec for the server side.
//!
//! `Transfer-Encoding: chunked` request bodies and HTTP/2 or HTTP/3 are
//! explicitly out of scope — see [`crate::PolicyViolation`].
//!
//! # Quick start
//!
//! ```no_run
//! use cwist::{Handler, Handled, Method, Request, Response, Server, StatusCode};
//! use async_trait::async_trait;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Handler for Hello {
//!     async fn call(&self, _req: &Request, resp: &mut Response) -> Handled {
//!         resp.status(StatusCode::Ok).body("Hello, world!")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = cwist::server::bind("127.0.0.1:8080".parse().unwrap(), 128).unwrap();
//!
//!     Server::builder()
//!         .listener(listener)
//!         .route(Method::Get, "/", Hello)
//!         .build()
//!         .unwrap()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! # Middleware
//!
//! Built-in middlewares cover request-id stamping, access logging, a
//! fixed-window rate limiter, and CORS. The chain is global (there is no
//! per-route middleware) and frozen once [`Server::launch`] is called.
//!
//! # WebSocket
//!
//! Register a [`WsHandler`] with [`ServerBuilder::ws_route`]; once the
//! handshake succeeds the framework hands the connection to that handler
//! as a [`WsStream`] and the HTTP loop for that socket ends.

mod errors;
mod http;
pub mod limits;
mod middleware;
mod router;
pub mod server;
mod websocket;

pub use crate::{
    errors::{BuildError, CwistError, ListenError, PolicyViolation, TlsError},
    http::{
        query::QueryMap,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{HeaderMap, Method, StatusCode, Url, Version},
    },
    middleware::{AccessLog, Cors, Middleware, Next, RateLimit, RequestId},
    router::{ErrorHandler, Handler, WsHandler},
    server::{Scheduling, Server, ServerBuilder},
    websocket::{Frame, Opcode, WsState, WsStream},
};
