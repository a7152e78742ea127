//! Piece assembly and validation
//!
//! Lays a piece out as 16 KiB blocks, collects block payloads at their
//! offsets and checks the assembled bytes against the expected SHA-1.

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::TorrentError;
use crate::protocol::BLOCK_SIZE;
use crate::torrent::sha1_digest;

/// Offset and length of one block request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    pub begin: u32,
    pub length: u32,
}

/// Buffer for one piece being downloaded
#[derive(Debug)]
pub struct PieceBuffer {
    index: u32,
    data: BytesMut,
    received: Vec<bool>,
}

impl PieceBuffer {
    pub fn new(index: u32, length: u32) -> Self {
        let block_count = length.div_ceil(BLOCK_SIZE) as usize;
        Self {
            index,
            data: BytesMut::zeroed(length as usize),
            received: vec![false; block_count],
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Block layout: full 16 KiB blocks, the last one holding the remainder
    pub fn blocks(&self) -> Vec<BlockSpec> {
        let length = self.len();
        (0..self.received.len() as u32)
            .map(|i| {
                let begin = i * BLOCK_SIZE;
                BlockSpec {
                    begin,
                    length: BLOCK_SIZE.min(length - begin),
                }
            })
            .collect()
    }

    /// Copy a block into place. `begin` must be block-aligned and the block
    /// must have exactly the expected length.
    pub fn add_block(&mut self, begin: u32, block: &[u8]) -> Result<()> {
        let slot = (begin / BLOCK_SIZE) as usize;
        let expected = self.blocks().get(slot).copied();

        match expected {
            Some(spec) if spec.begin == begin && spec.length as usize == block.len() => {
                let start = begin as usize;
                self.data[start..start + block.len()].copy_from_slice(block);
                self.received[slot] = true;
                Ok(())
            }
            _ => Err(TorrentError::protocol_violation(format!(
                "block at offset {} with {} bytes does not fit piece {} of {} bytes",
                begin,
                block.len(),
                self.index,
                self.len()
            ))
            .into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received.iter().all(|&r| r)
    }

    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }
}

/// Check piece bytes against their expected hash
pub fn verify_piece(index: u32, data: &[u8], expected: &[u8; 20]) -> Result<()> {
    let actual = sha1_digest(data);
    if actual != *expected {
        warn!(
            "Piece {} hash mismatch: expected {}, got {}",
            index,
            hex::encode(expected),
            hex::encode(actual)
        );
        return Err(TorrentError::piece_validation_failed(index, expected, &actual).into());
    }
    debug!("Piece {} verified ({} bytes)", index, data.len());
    Ok(())
}
