//! The per-connection worker.
//!
//! Reads HTTP requests off the wire, resolves a [`crate::router::Router`]
//! lookup into the middleware chain's [`Terminal`], and either writes an
//! HTTP response or — on a successful WebSocket upgrade — hands the socket
//! off to the matched [`crate::router::WsHandler`]. Generic over the stream
//! type so the plain-TCP and TLS-wrapped paths share this one code path
//! (spec §4.2/§4.7: both must frame, pipeline, and time out identically).

use crate::{
    errors::CwistError,
    http::{
        request::{Parsed, Parser, Request},
        response::Response,
        types::Method,
    },
    limits::{ConnLimits, ReqLimits},
    middleware::{Middleware, Next, Terminal},
    router::{HandlerKind, Matched, Router},
    websocket::WsStream,
};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Shared, read-only state every connection worker needs: the frozen route
/// table and middleware chain, plus the request/connection tunables. Cheap
/// to clone (an `Arc` bump each) so every spawned worker gets its own copy.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) router: Arc<Router>,
    pub(crate) middlewares: Arc<Vec<Arc<dyn Middleware>>>,
    pub(crate) conn_limits: Arc<ConnLimits>,
    pub(crate) req_limits: Arc<ReqLimits>,
}

/// Runs one accepted connection to completion.
///
/// Returns once the peer closes the socket, an I/O timeout expires, an
/// unrecoverable write error occurs, or (after a WebSocket upgrade) the
/// application's [`crate::router::WsHandler`] returns. None of those cases
/// propagate an error past this function — a worker that cannot continue
/// simply stops, per spec §7.
pub(crate) async fn serve<S>(
    mut stream: S,
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    ctx: ConnectionContext,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut parser = Parser::new();
    let mut requests_served: usize = 0;

    loop {
        let parsed = match next_request(&mut stream, &mut parser, &ctx).await {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return,
            Err(error) => {
                let _ = write_frame(&mut stream, &error_response_bytes(&error)).await;
                return;
            }
        };

        let Parsed {
            mut request,
            keep_alive,
        } = parsed;
        request.set_addrs(client_addr, server_addr);
        let head_only = request.method() == Method::Head;

        let terminal = build_terminal(&ctx.router, &mut request);
        let mut response = Response::new();
        response.keep_alive = keep_alive;

        Next::new(&ctx.middlewares[..], &terminal)
            .run(&mut request, &mut response)
            .await;

        requests_served += 1;
        if requests_served >= ctx.conn_limits.max_requests_per_connection {
            response.close();
        }

        let wire = if head_only {
            response.serialize_head_only()
        } else {
            response.serialize()
        };

        if write_all(&mut stream, &wire, &ctx.conn_limits).await.is_err() {
            return;
        }

        if request.is_upgraded() {
            if let Terminal::Dispatch(HandlerKind::Ws(handler)) = terminal {
                handler.call(WsStream::new(stream)).await;
            }
            return;
        }

        if !response.keep_alive {
            return;
        }
    }
}

/// Drives the fill/parse loop until either a complete request is framed, the
/// peer closes the connection, or the read times out (both of the latter
/// resolve to `Ok(None)`: a silent close, no response sent).
async fn next_request<S>(
    stream: &mut S,
    parser: &mut Parser,
    ctx: &ConnectionContext,
) -> Result<Option<Parsed>, CwistError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(parsed) = parser.try_parse(&ctx.req_limits)? {
            return Ok(Some(parsed));
        }

        match parser.fill_buffer(stream, ctx.conn_limits.io_timeout).await {
            Ok(0) => return Ok(None),
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(CwistError::Io(e)),
        }
    }
}

/// Resolves a router lookup into the terminal the middleware chain runs
/// once exhausted, populating `request.path_params` along the way.
fn build_terminal(router: &Router, request: &mut Request) -> Terminal {
    match router.lookup(request.method(), request.url().path()) {
        Some(Matched::Http(handler, params)) => {
            request.set_params(params);
            Terminal::Dispatch(HandlerKind::Http(handler))
        }
        Some(Matched::Ws(handler, params)) => {
            request.set_params(params);
            Terminal::Dispatch(HandlerKind::Ws(handler))
        }
        Some(Matched::Static(route)) => {
            let path = request.url().path().to_string();
            let head_only = request.method() == Method::Head;
            Terminal::Static(route, path, head_only)
        }
        None => Terminal::NotFound(router.error_handler()),
    }
}

/// Writes a pre-serialized response (used only for the framing/policy
/// errors that short-circuit before a [`Response`] is ever constructed).
async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, bytes: &[u8]) -> Result<(), io::Error> {
    stream.write_all(bytes).await
}

/// Writes a response, retrying on nothing: per spec §4.6, `EPIPE`/
/// `ECONNRESET` are hard failures that end the connection without a further
/// response, and every other write error is treated the same way since
/// framing may already be desynchronized once any partial write fails.
async fn write_all<S: AsyncWrite + Unpin>(
    stream: &mut S,
    bytes: &[u8],
    limits: &ConnLimits,
) -> Result<(), io::Error> {
    tokio::select! {
        biased;

        result = stream.write_all(bytes) => result,
        _ = tokio::time::sleep(limits.io_timeout) => {
            Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
        }
    }
}

/// Builds the wire bytes for a framing/policy failure that happens before
/// a request — and so before a [`Response`] — could be constructed.
fn error_response_bytes(error: &CwistError) -> Vec<u8> {
    use crate::http::types::Version;

    let body = error.json_body();
    let status = error.status();
    let mut out = Vec::with_capacity(128 + body.len());
    out.extend_from_slice(status.into_first_line(Version::Http11));
    out.extend_from_slice(b"content-type: application/json\r\n");
    out.extend_from_slice(format!("content-length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"connection: close\r\n\r\n");
    out.extend_from_slice(&body);
    out
}
