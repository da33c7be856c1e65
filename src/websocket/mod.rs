//! WebSocket upgrade handshake and the RFC 6455 frame codec.
//!
//! The upgrade path answers `101 Switching Protocols` using the same
//! [`crate::http::response::Response`] as any other route, then hands the
//! raw socket off to [`WsStream`] for the rest of the connection's life —
//! the HTTP framing, router, and middleware chain are never touched again
//! for that connection.

mod frame;

pub use frame::{Frame, Opcode};

use crate::http::{request::Request, types::Method};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Whether `req` carries a valid WebSocket upgrade request per RFC 6455:
/// `GET`, `Upgrade: websocket`, a `Connection` header containing the
/// `upgrade` token, and a present `Sec-WebSocket-Key`.
pub(crate) fn is_upgrade_request(req: &Request) -> bool {
    req.method() == Method::Get
        && req
            .header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
        && req
            .header("connection")
            .is_some_and(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
        && req.header("sec-websocket-key").is_some()
}

/// Computes `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`:
/// `base64(sha1(key || GUID))`.
pub(crate) fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// A live WebSocket connection, state-tracked per RFC 6455 §7: `OPEN` until
/// either side sends or receives a `CLOSE` frame, then `CLOSING`, after
/// which further reads return `None` and further writes (other than a
/// reciprocal `CLOSE`) error.
pub struct WsStream {
    inner: Box<dyn AsyncIoStream>,
    state: WsState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Open,
    Closing,
    Closed,
}

/// Any duplex byte stream the connection worker can hand off after a
/// successful upgrade — a plain [`tokio::net::TcpStream`] or a
/// `tokio_rustls` server-side TLS stream both qualify.
pub(crate) trait AsyncIoStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncIoStream for T {}

impl WsStream {
    pub(crate) fn new(stream: impl AsyncIoStream + 'static) -> Self {
        Self {
            inner: Box::new(stream),
            state: WsState::Open,
        }
    }

    pub fn state(&self) -> WsState {
        self.state
    }

    /// Reads one frame. Returns `Ok(None)` once the handle has entered
    /// `CLOSING`/`CLOSED` (no bytes are read off the wire in that case).
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, io::Error> {
        if self.state != WsState::Open {
            return Ok(None);
        }

        let mut head = [0u8; 2];
        self.inner.read_exact(&mut head).await?;

        let fin = head[0] & 0x80 != 0;
        let opcode = Opcode::from_byte(head[0] & 0x0F)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown websocket opcode"))?;
        let masked = head[1] & 0x80 != 0;
        if !masked {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "client frame must be masked",
            ));
        }

        let len7 = head[1] & 0x7F;
        let payload_len: u64 = match len7 {
            126 => {
                let mut buf = [0u8; 2];
                self.inner.read_exact(&mut buf).await?;
                u16::from_be_bytes(buf) as u64
            }
            127 => {
                let mut buf = [0u8; 8];
                self.inner.read_exact(&mut buf).await?;
                u64::from_be_bytes(buf)
            }
            n => n as u64,
        };

        let mut mask = [0u8; 4];
        self.inner.read_exact(&mut mask).await?;

        let mut payload = vec![0u8; payload_len as usize];
        self.inner.read_exact(&mut payload).await?;
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }

        if opcode == Opcode::Close {
            self.state = match self.state {
                WsState::Open => WsState::Closing,
                _ => WsState::Closed,
            };
        }

        Ok(Some(Frame { fin, opcode, payload }))
    }

    /// Writes one unmasked, unfragmented (`FIN=1`) frame.
    pub async fn write_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), io::Error> {
        if self.state != WsState::Open && opcode != Opcode::Close {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "websocket is closing"));
        }

        let mut header = Vec::with_capacity(10);
        header.push(0x80 | opcode.as_byte());

        let len = payload.len();
        if len < 126 {
            header.push(len as u8);
        } else if len <= u16::MAX as usize {
            header.push(126);
            header.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            header.push(127);
            header.extend_from_slice(&(len as u64).to_be_bytes());
        }

        self.inner.write_all(&header).await?;
        self.inner.write_all(payload).await?;

        if opcode == Opcode::Close {
            self.state = match self.state {
                WsState::Open => WsState::Closing,
                _ => WsState::Closed,
            };
        }

        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), io::Error> {
        self.write_frame(Opcode::Text, text.as_bytes()).await
    }

    pub async fn send_binary(&mut self, data: &[u8]) -> Result<(), io::Error> {
        self.write_frame(Opcode::Binary, data).await
    }

    pub async fn close(&mut self) -> Result<(), io::Error> {
        self.write_frame(Opcode::Close, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }
}
