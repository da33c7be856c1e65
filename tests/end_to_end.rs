//! Cross-module end-to-end scenarios (spec §8): each test drives a real
//! `Server` over a loopback TCP socket rather than calling into crate
//! internals, since those are not part of the public API.

use async_trait::async_trait;
use cwist::{
    AccessLog, Cors, Handled, Handler, Method, RateLimit, Request, Response, Server, StatusCode,
    WsHandler, WsStream,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn send_and_read(addr: std::net::SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

fn status_line(response: &str) -> &str {
    response.lines().next().unwrap()
}

fn header(response: &str, name: &str) -> Option<String> {
    response
        .lines()
        .take_while(|line| !line.is_empty())
        .find(|line| line.to_ascii_lowercase().starts_with(&format!("{}:", name.to_ascii_lowercase())))
        .map(|line| line.splitn(2, ':').nth(1).unwrap().trim().to_string())
}

fn body(response: &str) -> &str {
    response.split("\r\n\r\n").nth(1).unwrap_or("")
}

struct Hello;
#[async_trait]
impl Handler for Hello {
    async fn call(&self, _req: &Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::Ok).body("hello")
    }
}

// Scenario 1: GET / against a hello handler.
#[tokio::test]
async fn hello_world_get() {
    init_tracing();

    let listener = cwist::server::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .listener(listener)
        .middleware(AccessLog::new())
        .route(Method::Get, "/", Hello)
        .build()
        .unwrap();
    tokio::spawn(server.launch());

    let response = send_and_read(addr, "GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;

    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    assert_eq!(header(&response, "content-length").as_deref(), Some("5"));
    assert_eq!(body(&response), "hello");
}

struct Echo;
#[async_trait]
impl Handler for Echo {
    async fn call(&self, req: &Request, resp: &mut Response) -> Handled {
        let content_type = req.header("content-type").unwrap_or("application/octet-stream").to_string();
        resp.status(StatusCode::Ok)
            .header("content-type", content_type)
            .body(req.body().to_vec())
    }
}

// Scenario 2: POST /echo with a body.
#[tokio::test]
async fn post_echo_round_trips_body_and_content_type() {
    let listener = cwist::server::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .listener(listener)
        .route(Method::Post, "/echo", Echo)
        .build()
        .unwrap();
    tokio::spawn(server.launch());

    let request = "POST /echo HTTP/1.1\r\nContent-Length: 5\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nhello";
    let response = send_and_read(addr, request).await;

    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    assert_eq!(header(&response, "content-type").as_deref(), Some("text/plain"));
    assert_eq!(body(&response), "hello");
}

// Scenario 3: CORS preflight short-circuits before the handler runs.
#[tokio::test]
async fn cors_preflight_short_circuits_with_204() {
    let listener = cwist::server::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .listener(listener)
        .middleware(Cors::new())
        .route(Method::Get, "/anything", Hello)
        .build()
        .unwrap();
    tokio::spawn(server.launch());

    let request = "OPTIONS /anything HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";
    let response = send_and_read(addr, request).await;

    assert_eq!(status_line(&response), "HTTP/1.1 204 No Content");
    assert!(header(&response, "access-control-allow-methods").is_some());
    assert!(header(&response, "access-control-allow-headers").is_some());
    assert_eq!(header(&response, "access-control-max-age").as_deref(), Some("86400"));
    assert_eq!(body(&response), "");
}

// Scenario 4: 61 requests in one minute from one IP with a 60/min limit.
#[tokio::test]
async fn sixty_first_request_is_rate_limited() {
    let listener = cwist::server::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .listener(listener)
        .middleware(RateLimit::new(60))
        .route(Method::Get, "/", Hello)
        .build()
        .unwrap();
    tokio::spawn(server.launch());

    let request = "GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";

    for _ in 0..60 {
        let response = send_and_read(addr, request).await;
        assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    }

    let response = send_and_read(addr, request).await;
    assert_eq!(status_line(&response), "HTTP/1.1 429 Too Many Requests");
    assert_eq!(header(&response, "retry-after").as_deref(), Some("60"));
}

struct UserPosts;
#[async_trait]
impl Handler for UserPosts {
    async fn call(&self, req: &Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::Ok).body(format!("pattern:{}", req.param("id").unwrap_or("?")))
    }
}

struct LiteralWinner;
#[async_trait]
impl Handler for LiteralWinner {
    async fn call(&self, _req: &Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::Ok).body("literal")
    }
}

// Scenario 5: a literal route registered after a parameterized one wins.
#[tokio::test]
async fn literal_route_beats_parameterized_route() {
    let listener = cwist::server::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .listener(listener)
        .route(Method::Get, "/users/:id/posts", UserPosts)
        .route(Method::Get, "/users/42/posts", LiteralWinner)
        .build()
        .unwrap();
    tokio::spawn(server.launch());

    let literal = send_and_read(
        addr,
        "GET /users/42/posts HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(body(&literal), "literal");

    let parameterized = send_and_read(
        addr,
        "GET /users/7/posts HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(body(&parameterized), "pattern:7");
}

struct EchoOneFrame;
#[async_trait]
impl WsHandler for EchoOneFrame {
    async fn call(&self, mut stream: WsStream) {
        if let Ok(Some(frame)) = stream.read_frame().await {
            let text = String::from_utf8_lossy(&frame.payload).into_owned();
            let _ = stream.send_text(&text).await;
        }
    }
}

// Scenario 6: WebSocket upgrade followed by a masked TEXT frame.
#[tokio::test]
async fn websocket_upgrade_then_masked_text_frame_round_trips() {
    let listener = cwist::server::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .listener(listener)
        .ws_route("/ws", EchoOneFrame)
        .build()
        .unwrap();
    tokio::spawn(server.launch());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let handshake = "GET /ws HTTP/1.1\r\n\
         Host: x\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n";
    stream.write_all(handshake.as_bytes()).await.unwrap();

    let mut head = [0u8; 4096];
    let n = stream.read(&mut head).await.unwrap();
    let response = String::from_utf8_lossy(&head[..n]).into_owned();
    assert_eq!(status_line(&response), "HTTP/1.1 101 Switching Protocols");
    assert_eq!(
        header(&response, "sec-websocket-accept").as_deref(),
        Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
    );

    let mask = [1u8, 2, 3, 4];
    let payload = b"hi";
    let mut masked = payload.to_vec();
    for (i, byte) in masked.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
    let mut frame = vec![0x81u8, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&mask);
    frame.extend_from_slice(&masked);
    stream.write_all(&frame).await.unwrap();

    let mut reply = [0u8; 16];
    let n = stream.read(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x81);
    assert_eq!(reply[1], 2); // unmasked length, no 0x80 bit
    assert_eq!(&reply[2..4], b"hi");
}
