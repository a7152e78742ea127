//! Metadata retrieval for magnet links
//!
//! Fetches the info dictionary from a peer over ut_metadata and checks it
//! against the info hash the magnet link asserts. Only single-piece metadata
//! is supported.

use anyhow::Result;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use crate::bencode;
use crate::error::TorrentError;
use crate::peer::connection::{ConnectionConfig, PeerConnection};
use crate::protocol::extension::{MetadataMessageType, UT_METADATA};
use crate::torrent::{MagnetInfo, TorrentInfo, TorrentParser};

impl PeerConnection {
    /// The peer's ut_metadata id, running the extension handshake if needed
    pub async fn peer_metadata_id(&mut self) -> Result<u8> {
        let extensions = self.exchange_extension_handshake().await?;
        extensions.ut_metadata_id().ok_or_else(|| {
            warn!("Peer {} does not support {}", self.peer_addr(), UT_METADATA);
            TorrentError::extension_unsupported(UT_METADATA)
                .with_peer(self.peer_addr())
                .into()
        })
    }

    /// Fetch and verify the info dictionary for `magnet` from this peer.
    /// The session must have been opened with an extended handshake.
    pub async fn fetch_metadata(&mut self, magnet: &MagnetInfo) -> Result<TorrentInfo> {
        let peer_id = self.peer_metadata_id().await?;
        let response = self.request_metadata(peer_id).await?;
        let addr = self.peer_addr();

        let violation = |message: String| -> anyhow::Error {
            warn!("Metadata from {}: {}", addr, message);
            TorrentError::protocol_violation(message).with_peer(addr).into()
        };

        if response.msg_type != MetadataMessageType::Data {
            return Err(violation(format!("metadata request answered with {:?}", response.msg_type)));
        }
        if response.piece != 0 {
            return Err(violation(format!("asked for metadata piece 0, got piece {}", response.piece)));
        }
        if let Some(total) = response.total_size {
            if total != response.data.len() as u64 {
                return Err(violation(format!(
                    "metadata total_size {} but {} bytes received",
                    total,
                    response.data.len()
                )));
            }
        }

        debug!("Received {} bytes of metadata from {}", response.data.len(), addr);
        let info_dict = bencode::decode(&response.data)?;
        let torrent = TorrentParser::from_magnet_metadata(&info_dict, magnet)?;
        info!("Metadata for {} verified via {}", magnet.info_hash_hex(), addr);
        Ok(torrent)
    }
}

/// Try peers in order until one supplies metadata matching the magnet's info
/// hash. An `InfoHashMismatch` aborts immediately; other failures move on to
/// the next peer.
pub async fn fetch_metadata_from_peers(
    magnet: &MagnetInfo,
    peers: &[SocketAddr],
    our_peer_id: [u8; 20],
    config: &ConnectionConfig,
) -> Result<TorrentInfo> {
    for &addr in peers {
        let attempt = async {
            let mut conn = PeerConnection::connect(addr, magnet.info_hash, our_peer_id, true, config).await?;
            conn.fetch_metadata(magnet).await
        };

        match attempt.await {
            Ok(torrent) => return Ok(torrent),
            Err(e) => {
                if matches!(
                    e.downcast_ref::<TorrentError>(),
                    Some(TorrentError::InfoHashMismatch { .. })
                ) {
                    return Err(e);
                }
                warn!("Metadata fetch from {} failed: {}", addr, e);
            }
        }
    }

    Err(TorrentError::no_peers_available(format!(
        "none of {} peer(s) supplied metadata for {}",
        peers.len(),
        magnet.info_hash_hex()
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakePeer, Misbehavior, TestTorrent, PEER_UT_METADATA_ID};
    use std::time::Duration;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(500),
        }
    }

    fn kind(err: &anyhow::Error) -> Option<&TorrentError> {
        err.downcast_ref::<TorrentError>()
    }

    #[tokio::test]
    async fn test_fetch_metadata() {
        let torrent = TestTorrent::new(b"magnet content that spans pieces", 10);
        let peer = FakePeer::spawn(torrent.clone(), Misbehavior::None).await;

        let mut conn = PeerConnection::connect(peer.addr, torrent.info_hash(), [2u8; 20], true, &config())
            .await
            .unwrap();
        assert_eq!(conn.peer_metadata_id().await.unwrap(), PEER_UT_METADATA_ID);

        let info = conn.fetch_metadata(&torrent.magnet()).await.unwrap();
        assert_eq!(info.info_hash(), &torrent.info_hash());
        assert_eq!(info.total_length(), 32);
        assert_eq!(info.piece_length(), 10);
        assert_eq!(info.piece_count(), 4);
        assert_eq!(info.announce(), "http://tracker.test/announce");
    }

    #[tokio::test]
    async fn test_missing_extension() {
        let torrent = TestTorrent::new(b"abcdefgh", 8);
        let peer = FakePeer::spawn(torrent.clone(), Misbehavior::NoMetadataExtension).await;

        let mut conn = PeerConnection::connect(peer.addr, torrent.info_hash(), [2u8; 20], true, &config())
            .await
            .unwrap();
        let err = conn.fetch_metadata(&torrent.magnet()).await.unwrap_err();
        assert!(matches!(kind(&err), Some(TorrentError::ExtensionUnsupported { .. })));
    }

    #[tokio::test]
    async fn test_rejected_request() {
        let torrent = TestTorrent::new(b"abcdefgh", 8);
        let peer = FakePeer::spawn(torrent.clone(), Misbehavior::RejectMetadata).await;

        let mut conn = PeerConnection::connect(peer.addr, torrent.info_hash(), [2u8; 20], true, &config())
            .await
            .unwrap();
        let err = conn.fetch_metadata(&torrent.magnet()).await.unwrap_err();
        assert!(matches!(kind(&err), Some(TorrentError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn test_response_for_other_piece() {
        let torrent = TestTorrent::new(b"abcdefgh", 8);
        let peer = FakePeer::spawn(torrent.clone(), Misbehavior::WrongMetadataPiece).await;

        let mut conn = PeerConnection::connect(peer.addr, torrent.info_hash(), [2u8; 20], true, &config())
            .await
            .unwrap();
        let err = conn.fetch_metadata(&torrent.magnet()).await.unwrap_err();
        assert!(matches!(kind(&err), Some(TorrentError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn test_total_size_disagrees_with_data() {
        let torrent = TestTorrent::new(b"abcdefgh", 8);
        let peer = FakePeer::spawn(torrent.clone(), Misbehavior::BadMetadataSize).await;

        let mut conn = PeerConnection::connect(peer.addr, torrent.info_hash(), [2u8; 20], true, &config())
            .await
            .unwrap();
        let err = conn.fetch_metadata(&torrent.magnet()).await.unwrap_err();
        assert!(matches!(kind(&err), Some(TorrentError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn test_wrong_metadata_is_hash_mismatch() {
        let torrent = TestTorrent::new(b"abcdefgh", 8);
        let other = TestTorrent::new(b"different bytes", 8);
        // peer serves `other`'s info dict under `torrent`'s info hash
        let peer = FakePeer::spawn_serving(torrent.clone(), other, Misbehavior::None).await;
        let good = FakePeer::spawn(torrent.clone(), Misbehavior::None).await;

        let err = fetch_metadata_from_peers(&torrent.magnet(), &[peer.addr, good.addr], [2u8; 20], &config())
            .await
            .unwrap_err();
        assert!(matches!(kind(&err), Some(TorrentError::InfoHashMismatch { .. })));
    }

    #[tokio::test]
    async fn test_falls_through_to_next_peer() {
        let torrent = TestTorrent::new(b"abcdefgh", 8);
        let bad = FakePeer::spawn(torrent.clone(), Misbehavior::NoMetadataExtension).await;
        let good = FakePeer::spawn(torrent.clone(), Misbehavior::None).await;

        let info = fetch_metadata_from_peers(&torrent.magnet(), &[bad.addr, good.addr], [2u8; 20], &config())
            .await
            .unwrap();
        assert_eq!(info.info_hash(), &torrent.info_hash());

        let err = fetch_metadata_from_peers(&torrent.magnet(), &[bad.addr], [2u8; 20], &config())
            .await
            .unwrap_err();
        assert!(matches!(kind(&err), Some(TorrentError::NoPeersAvailable { .. })));
    }
}
