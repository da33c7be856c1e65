//! The middleware chain executor and the four built-in middlewares.
//!
//! A middleware wraps the call to the eventual handler: it may mutate the
//! request or response before calling [`Next::run`], after, both, or not at
//! all (a short-circuit, e.g. a CORS preflight answering 204 directly).
//! Calling `next` more than once per invocation is undefined behavior the
//! executor does not detect, matching the router's "handler dispatch"
//! contract.

mod access_log;
mod cors;
mod rate_limit;
mod request_id;

pub use access_log::AccessLog;
pub use cors::Cors;
pub use rate_limit::RateLimit;
pub use request_id::RequestId;

use crate::{
    errors::CwistError,
    http::{request::Request, response::Handled},
    router::{self, ErrorHandler, HandlerKind, StaticRoute},
    websocket,
};
use async_trait::async_trait;
use std::sync::Arc;

/// One link in the middleware chain.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(
        &self,
        req: &mut Request,
        resp: &mut crate::http::response::Response,
        next: Next<'_>,
    ) -> Handled;
}

/// What runs once the middleware chain is exhausted: the matched handler,
/// or the router's fallback for an unmatched request.
pub(crate) enum Terminal {
    Dispatch(HandlerKind),
    Static(Arc<StaticRoute>, String, bool),
    NotFound(Option<Arc<dyn ErrorHandler>>),
}

impl Terminal {
    async fn call(&self, req: &mut Request, resp: &mut crate::http::response::Response) -> Handled {
        match self {
            Terminal::Dispatch(HandlerKind::Http(handler)) => handler.call(req, resp).await,
            Terminal::Dispatch(HandlerKind::Ws(_)) => {
                if !websocket::is_upgrade_request(req) {
                    let error = CwistError::UpgradeFailed;
                    return resp.status(error.status()).body(error.json_body());
                }
                let key = req.header("sec-websocket-key").unwrap().to_string();
                let accept = websocket::accept_key(&key);
                req.set_upgraded(true);
                resp.status(crate::http::types::StatusCode::SwitchingProtocols)
                    .header("upgrade", "websocket")
                    .header("connection", "Upgrade")
                    .header("sec-websocket-accept", accept);
                resp.finish()
            }
            Terminal::Static(route, path, head_only) => {
                router::serve_static(route, path, *head_only, resp).await
            }
            Terminal::NotFound(Some(handler)) => {
                handler.call(req, resp, crate::http::types::StatusCode::NotFound).await;
                resp.finish()
            }
            Terminal::NotFound(None) => {
                let error = CwistError::NotFound;
                resp.status(error.status()).body(error.json_body())
            }
        }
    }
}

/// The chain-position context value passed by move into each middleware
/// call — an index into the middleware slice plus the shared terminal,
/// rather than a boxed recursive closure.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    index: usize,
    terminal: &'a Terminal,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middlewares: &'a [Arc<dyn Middleware>], terminal: &'a Terminal) -> Self {
        Self { middlewares, index: 0, terminal }
    }

    /// Advances the chain: invokes the next middleware, or the terminal
    /// handler once the chain is exhausted.
    pub async fn run(self, req: &mut Request, resp: &mut crate::http::response::Response) -> Handled {
        match self.middlewares.get(self.index) {
            Some(mw) => {
                let next = Next {
                    middlewares: self.middlewares,
                    index: self.index + 1,
                    terminal: self.terminal,
                };
                mw.handle(req, resp, next).await
            }
            None => self.terminal.call(req, resp).await,
        }
    }
}
