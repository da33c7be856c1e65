use super::{Middleware, Next};
use crate::http::{request::Request, response::Handled, response::Response};
use async_trait::async_trait;
use std::time::Instant;

/// Records wall-clock elapsed time around the rest of the chain and emits
/// one `tracing` event per completed request. Using `tracing` here rather
/// than a bespoke mutex-guarded writer means the subscriber, not this
/// middleware, is responsible for serializing concurrent output.
#[derive(Debug, Default)]
pub struct AccessLog;

impl AccessLog {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for AccessLog {
    async fn handle(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> Handled {
        let start = Instant::now();
        let method = req.method().as_str();
        let path = req.url().path().to_string();
        let request_body_size = req.body().len();

        let handled = next.run(req, resp).await;

        tracing::info!(
            request_id = resp.header_get("x-request-id").unwrap_or("-"),
            method,
            path = %path,
            status = resp.status_code().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            request_body_size,
            response_body_size = resp.body_bytes().len(),
            "request completed"
        );

        handled
    }
}
