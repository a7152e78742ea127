//! BitTorrent handshake protocol
//!
//! The fixed 68-byte frame exchanged right after the TCP connection opens.

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use crate::error::TorrentError;

/// BitTorrent protocol identifier string
pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// Total handshake frame length
pub const HANDSHAKE_LEN: usize = 68;

/// Reserved byte and bit that advertise extension protocol support
const EXTENSION_BYTE: usize = 5;
const EXTENSION_BIT: u8 = 0x10;

/// Client prefix of generated peer ids
pub const PEER_ID_PREFIX: &[u8; 8] = b"-MT0001-";

/// BitTorrent handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Reserved bytes (capability flags)
    pub reserved: [u8; 8],
    /// Torrent info hash
    pub info_hash: [u8; 20],
    /// Sender's peer ID
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Plain handshake with no capability bits
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Handshake advertising extension protocol support
    pub fn extended(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        let mut handshake = Self::new(info_hash, peer_id);
        handshake.reserved[EXTENSION_BYTE] |= EXTENSION_BIT;
        handshake
    }

    pub fn supports_extensions(&self) -> bool {
        self.reserved[EXTENSION_BYTE] & EXTENSION_BIT != 0
    }

    /// Generate a random peer ID with the client prefix
    pub fn generate_peer_id() -> [u8; 20] {
        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
        peer_id[8..].copy_from_slice(&rand::random::<[u8; 12]>());
        info!("Generated new peer ID: {}", hex::encode(peer_id));
        peer_id
    }

    /// Serialize the handshake to its 68-byte frame
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_STRING.len() as u8);
        buf.put_slice(PROTOCOL_STRING);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        trace!("Handshake serialized: {} bytes", buf.len());
        buf.freeze()
    }

    /// Parse a 68-byte frame, checking the protocol string
    pub fn deserialize(data: &[u8; HANDSHAKE_LEN]) -> Result<Self> {
        if data[0] as usize != PROTOCOL_STRING.len() || &data[1..20] != PROTOCOL_STRING {
            warn!("Invalid protocol header in handshake: {:?}", &data[..20]);
            return Err(TorrentError::handshake_mismatch("peer did not send the BitTorrent protocol header").into());
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        debug!("Handshake reserved: {}", hex::encode(reserved));
        Ok(Self {
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Check a peer's reply against what we sent
    pub fn verify(&self, expected_info_hash: &[u8; 20], expect_extensions: bool) -> Result<()> {
        if self.info_hash != *expected_info_hash {
            warn!(
                "Handshake info hash mismatch: expected {}, got {}",
                hex::encode(expected_info_hash),
                hex::encode(self.info_hash)
            );
            return Err(TorrentError::handshake_mismatch(format!(
                "peer answered for info hash {}, expected {}",
                hex::encode(self.info_hash),
                hex::encode(expected_info_hash)
            ))
            .into());
        }

        if expect_extensions && !self.supports_extensions() {
            warn!("Peer did not set the extension protocol bit");
            return Err(TorrentError::handshake_mismatch("peer does not advertise extension protocol support").into());
        }

        debug!("Handshake verified");
        Ok(())
    }
}
