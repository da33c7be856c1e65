//! The wire-level frame type and opcode enumeration.

/// A decoded WebSocket frame. Fragmentation is accepted on read (the `fin`
/// bit is reported as-is; this crate does not reassemble continuation
/// frames for the application) but never produced on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub(crate) fn as_byte(&self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::WsStream;
    use tokio::io::duplex;

    async fn roundtrip(payload_len: usize) {
        let (client, server) = duplex(8 * 1024 + payload_len);
        let mut server = WsStream::new(server);

        let payload = vec![b'x'; payload_len];
        let mut header = vec![0x81u8]; // FIN=1, opcode=TEXT
        let mask = [1u8, 2, 3, 4];
        let len = payload.len();
        if len < 126 {
            header.push(0x80 | len as u8);
        } else if len <= u16::MAX as usize {
            header.push(0x80 | 126);
            header.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            header.push(0x80 | 127);
            header.extend_from_slice(&(len as u64).to_be_bytes());
        }
        header.extend_from_slice(&mask);

        let mut masked_payload = payload.clone();
        for (i, byte) in masked_payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }

        let mut wire = header;
        wire.extend_from_slice(&masked_payload);

        let mut client = client;
        use tokio::io::AsyncWriteExt;
        client.write_all(&wire).await.unwrap();

        let frame = server.read_frame().await.unwrap().unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, payload);
    }

    #[tokio::test]
    async fn decodes_masked_text_frame() {
        roundtrip(2).await;
    }

    #[tokio::test]
    async fn length_boundaries_all_decode_correctly() {
        for len in [0, 125, 126, 127, 65535, 65536] {
            roundtrip(len).await;
        }
    }

    #[tokio::test]
    async fn unmasked_client_frame_is_rejected() {
        let (client, server) = duplex(64);
        let mut server = WsStream::new(server);

        let mut client = client;
        use tokio::io::AsyncWriteExt;
        client.write_all(&[0x81, 0x02, b'h', b'i']).await.unwrap();

        assert!(server.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn writer_never_masks_and_sets_fin() {
        let (mut client, server) = duplex(64);
        let mut server = WsStream::new(server);

        server.send_text("hi").await.unwrap();

        let mut buf = [0u8; 4];
        use tokio::io::AsyncReadExt;
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], 0x81); // FIN=1, TEXT
        assert_eq!(buf[1], 2); // unmasked length, no 0x80 bit
        assert_eq!(&buf[2..4], b"hi");
    }

    #[tokio::test]
    async fn close_frame_transitions_state_to_closing() {
        let (client, server) = duplex(64);
        let mut server = WsStream::new(server);

        let mut client = client;
        use tokio::io::AsyncWriteExt;
        client.write_all(&[0x88, 0x80, 0, 0, 0, 0]).await.unwrap();

        let frame = server.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Close);
        assert_eq!(server.state(), crate::websocket::WsState::Closing);
        assert!(server.read_frame().await.unwrap().is_none());
    }
}
