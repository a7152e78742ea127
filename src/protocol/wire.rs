//! Wire protocol I/O
//!
//! Reading and writing handshakes and length-prefixed frames on an async
//! byte stream.

use anyhow::Result;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::handshake::{Handshake, HANDSHAKE_LEN};
use super::message::Message;
use crate::error::TorrentError;

/// Largest frame accepted from a peer
pub const MAX_FRAME_LEN: usize = 1 << 20;

fn read_error(err: std::io::Error, what: &str) -> anyhow::Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TorrentError::truncated_message(format!("connection closed while reading {}", what)).into()
    } else {
        TorrentError::network_error_with_source(format!("failed to read {}", what), err.to_string()).into()
    }
}

fn write_error(err: std::io::Error, what: &str) -> anyhow::Error {
    TorrentError::network_error_with_source(format!("failed to write {}", what), err.to_string()).into()
}

/// Read one frame. Fails with `TruncatedMessage` when the stream ends before
/// the declared length has arrived.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut length_buf = [0u8; 4];
    reader
        .read_exact(&mut length_buf)
        .await
        .map_err(|e| read_error(e, "frame length"))?;
    let length = u32::from_be_bytes(length_buf) as usize;

    if length > MAX_FRAME_LEN {
        return Err(TorrentError::protocol_violation(format!("frame of {} bytes exceeds limit", length)).into());
    }

    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| read_error(e, "frame body"))?;
    trace!("Read frame of {} bytes", length);

    Message::deserialize(Bytes::from(body))
}

/// Write one frame and flush
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    writer
        .write_all(&message.serialize())
        .await
        .map_err(|e| write_error(e, "frame"))?;
    writer.flush().await.map_err(|e| write_error(e, "frame"))?;
    trace!("Wrote {:?}", message.message_id());
    Ok(())
}

/// Read exactly 68 bytes and parse them as a handshake
pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Handshake> {
    let mut buf = [0u8; HANDSHAKE_LEN];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| read_error(e, "handshake"))?;
    Handshake::deserialize(&buf)
}

pub async fn write_handshake<W: AsyncWrite + Unpin>(writer: &mut W, handshake: &Handshake) -> Result<()> {
    writer
        .write_all(&handshake.serialize())
        .await
        .map_err(|e| write_error(e, "handshake"))?;
    writer.flush().await.map_err(|e| write_error(e, "handshake"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(err: &anyhow::Error) -> Option<&TorrentError> {
        err.downcast_ref::<TorrentError>()
    }

    #[tokio::test]
    async fn test_write_then_read_frames() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_message(&mut a, &Message::Unchoke).await.unwrap();
        write_message(&mut a, &Message::Have { piece_index: 3 }).await.unwrap();
        assert_eq!(read_message(&mut b).await.unwrap(), Message::Unchoke);
        assert_eq!(read_message(&mut b).await.unwrap(), Message::Have { piece_index: 3 });
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let mut data: &[u8] = &[0, 0, 0, 10, 7, 0, 0];
        let err = read_message(&mut data).await.unwrap_err();
        assert!(matches!(kind(&err), Some(TorrentError::TruncatedMessage { .. })));
    }

    #[tokio::test]
    async fn test_truncated_length() {
        let mut data: &[u8] = &[0, 0];
        let err = read_message(&mut data).await.unwrap_err();
        assert!(matches!(kind(&err), Some(TorrentError::TruncatedMessage { .. })));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut data: &[u8] = &[0xff, 0xff, 0xff, 0xff];
        let err = read_message(&mut data).await.unwrap_err();
        assert!(matches!(kind(&err), Some(TorrentError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn test_handshake_exchange() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let sent = Handshake::extended([4u8; 20], [5u8; 20]);
        write_handshake(&mut a, &sent).await.unwrap();
        assert_eq!(read_handshake(&mut b).await.unwrap(), sent);
    }

    #[tokio::test]
    async fn test_short_handshake() {
        let mut data: &[u8] = &[19, b'B', b'i'];
        let err = read_handshake(&mut data).await.unwrap_err();
        assert!(matches!(kind(&err), Some(TorrentError::TruncatedMessage { .. })));
    }
}
