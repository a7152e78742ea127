//! BitTorrent protocol messages
//!
//! Length-prefixed frames exchanged after the handshake.

use anyhow::Result;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::error::TorrentError;

/// Size of a block request
pub const BLOCK_SIZE: u32 = 16384;

/// BitTorrent message IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Extended = 20,
}

impl TryFrom<u8> for MessageId {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            20 => Ok(MessageId::Extended),
            _ => {
                warn!("Unknown message ID: {}", value);
                Err(TorrentError::protocol_violation(format!("unknown message id {}", value)).into())
            }
        }
    }
}

/// BitTorrent protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Bytes },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    /// Extension protocol message; `id` 0 is the extension handshake
    Extended { id: u8, payload: Bytes },
}

impl Message {
    /// Get the message ID (None for KeepAlive)
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield { .. } => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
            Message::Extended { .. } => Some(MessageId::Extended),
        }
    }

    /// Serialize to a frame including the length prefix
    pub fn serialize(&self) -> Bytes {
        let mut body = BytesMut::new();

        if let Some(id) = self.message_id() {
            body.put_u8(id as u8);
        }

        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have { piece_index } => body.put_u32(*piece_index),
            Message::Bitfield { bitfield } => body.put_slice(bitfield),
            Message::Request { index, begin, length } | Message::Cancel { index, begin, length } => {
                body.put_u32(*index);
                body.put_u32(*begin);
                body.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                body.put_u32(*index);
                body.put_u32(*begin);
                body.put_slice(block);
            }
            Message::Extended { id, payload } => {
                body.put_u8(*id);
                body.put_slice(payload);
            }
        }

        let mut frame = BytesMut::with_capacity(4 + body.len());
        frame.put_u32(body.len() as u32);
        frame.put_slice(&body);
        frame.freeze()
    }

    /// Parse a frame body (everything after the length prefix). An empty
    /// body is a keep-alive.
    pub fn deserialize(mut body: Bytes) -> Result<Self> {
        if body.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let id = MessageId::try_from(body.get_u8())?;
        trace!("Decoding {:?} with {} payload bytes", id, body.len());

        let expect_len = |body: &Bytes, len: usize| -> Result<()> {
            if body.len() != len {
                return Err(TorrentError::protocol_violation(format!(
                    "{:?} payload must be {} bytes, got {}",
                    id,
                    len,
                    body.len()
                ))
                .into());
            }
            Ok(())
        };

        let message = match id {
            MessageId::Choke => {
                expect_len(&body, 0)?;
                Message::Choke
            }
            MessageId::Unchoke => {
                expect_len(&body, 0)?;
                Message::Unchoke
            }
            MessageId::Interested => {
                expect_len(&body, 0)?;
                Message::Interested
            }
            MessageId::NotInterested => {
                expect_len(&body, 0)?;
                Message::NotInterested
            }
            MessageId::Have => {
                expect_len(&body, 4)?;
                Message::Have { piece_index: body.get_u32() }
            }
            MessageId::Bitfield => Message::Bitfield { bitfield: body },
            MessageId::Request | MessageId::Cancel => {
                expect_len(&body, 12)?;
                let (index, begin, length) = (body.get_u32(), body.get_u32(), body.get_u32());
                if id == MessageId::Request {
                    Message::Request { index, begin, length }
                } else {
                    Message::Cancel { index, begin, length }
                }
            }
            MessageId::Piece => {
                if body.len() < 8 {
                    return Err(TorrentError::protocol_violation(format!(
                        "piece payload must be at least 8 bytes, got {}",
                        body.len()
                    ))
                    .into());
                }
                let index = body.get_u32();
                let begin = body.get_u32();
                Message::Piece { index, begin, block: body }
            }
            MessageId::Extended => {
                if body.is_empty() {
                    return Err(TorrentError::protocol_violation("extended message without sub-id").into());
                }
                let id = body.get_u8();
                Message::Extended { id, payload: body }
            }
        };

        Ok(message)
    }
}
