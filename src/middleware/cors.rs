use super::{Middleware, Next};
use crate::http::{request::Request, response::Handled, response::Response, types::{Method, StatusCode}};
use async_trait::async_trait;

/// Always sets `Access-Control-Allow-Origin: *`. `OPTIONS` preflights get a
/// bare 204 with the standard allow-methods/allow-headers/max-age headers
/// and never reach the handler.
#[derive(Debug, Default)]
pub struct Cors;

impl Cors {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for Cors {
    async fn handle(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> Handled {
        resp.header("access-control-allow-origin", "*");

        if req.method() == Method::Options {
            resp.status(StatusCode::NoContent)
                .header("access-control-allow-methods", "GET, POST, PUT, PATCH, DELETE, OPTIONS")
                .header("access-control-allow-headers", "*")
                .header("access-control-max-age", 86400);
            return resp.finish();
        }

        next.run(req, resp).await
    }
}
