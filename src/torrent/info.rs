//! Torrent information structures
//!
//! Immutable metadata of a single-file torrent: tracker, lengths, piece
//! hashes and the info hash.

use anyhow::Result;
use sha1::{Digest, Sha1};

use crate::error::TorrentError;

/// Largest accepted `piece length`; a piece is buffered whole in memory
pub const MAX_PIECE_LENGTH: u64 = 64 * 1024 * 1024;

/// SHA-1 digest of a byte slice
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Validated torrent metadata. Built by `TorrentParser`, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {
    announce: String,
    name: Option<String>,
    total_length: u64,
    piece_length: u64,
    piece_hashes: Vec<[u8; 20]>,
    info_hash: [u8; 20],
}

impl TorrentInfo {
    /// Assemble metadata, checking the piece-count invariant
    pub fn new(
        announce: String,
        name: Option<String>,
        total_length: u64,
        piece_length: u64,
        piece_hashes: Vec<[u8; 20]>,
        info_hash: [u8; 20],
    ) -> Result<Self> {
        if piece_length == 0 {
            return Err(TorrentError::invalid_torrent_field("piece length must be positive", "piece length").into());
        }
        if piece_length > MAX_PIECE_LENGTH {
            return Err(TorrentError::invalid_torrent_field(
                format!("piece length {} exceeds limit of {}", piece_length, MAX_PIECE_LENGTH),
                "piece length",
            )
            .into());
        }

        let expected = total_length.div_ceil(piece_length);
        if piece_hashes.len() as u64 != expected {
            return Err(TorrentError::invalid_torrent_field(
                format!(
                    "{} piece hashes for {} bytes in pieces of {} (expected {})",
                    piece_hashes.len(),
                    total_length,
                    piece_length,
                    expected
                ),
                "pieces",
            )
            .into());
        }

        Ok(Self {
            announce,
            name,
            total_length,
            piece_length,
            piece_hashes,
            info_hash,
        })
    }

    /// Split the concatenated `pieces` field into 20-byte digests
    pub fn parse_piece_hashes(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>> {
        if pieces_bytes.len() % 20 != 0 {
            return Err(TorrentError::invalid_torrent_field(
                format!("pieces length must be a multiple of 20, got {}", pieces_bytes.len()),
                "pieces",
            )
            .into());
        }

        Ok(pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect())
    }

    /// Tracker announce URL
    pub fn announce(&self) -> &str {
        &self.announce
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Total content length in bytes
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Nominal piece length in bytes
    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    pub fn piece_hashes(&self) -> &[[u8; 20]] {
        &self.piece_hashes
    }

    pub fn piece_hash(&self, index: u32) -> Option<&[u8; 20]> {
        self.piece_hashes.get(index as usize)
    }

    /// Length of the piece at `index`. Every piece is `piece_length` long
    /// except the last, which holds whatever remains.
    pub fn piece_length_at(&self, index: u32) -> Option<u64> {
        let index = index as usize;
        if index >= self.piece_hashes.len() {
            return None;
        }
        if index + 1 == self.piece_hashes.len() {
            Some(self.total_length - index as u64 * self.piece_length)
        } else {
            Some(self.piece_length)
        }
    }

    pub fn info_hash(&self) -> &[u8; 20] {
        &self.info_hash
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Piece hashes rendered as lowercase hex, in index order
    pub fn piece_hashes_hex(&self) -> Vec<String> {
        self.piece_hashes.iter().map(hex::encode).collect()
    }
}
