//! Download manager module
//!
//! Drives peer sessions against a shared `PieceWorkQueue`: one worker task per
//! peer, each piece hash-checked before it is recorded, failed pieces handed
//! back for another worker.

use anyhow::Result;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::TorrentError;
use crate::peer::{ConnectionConfig, PeerConnection};
use crate::storage::piece::verify_piece;
use crate::storage::queue::PieceWorkQueue;
use crate::torrent::TorrentInfo;

/// Piece download orchestrator
#[derive(Debug, Clone)]
pub struct DownloadManager {
    config: ConnectionConfig,
    peer_id: [u8; 20],
    extended: bool,
}

impl DownloadManager {
    pub fn new(config: ConnectionConfig, peer_id: [u8; 20]) -> Self {
        Self {
            config,
            peer_id,
            extended: false,
        }
    }

    /// Use extension-capable handshakes and exchange extension handshakes on
    /// every session (magnet downloads)
    pub fn with_extensions(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    async fn open_session(&self, torrent: &TorrentInfo, addr: SocketAddr) -> Result<PeerConnection> {
        let mut conn = PeerConnection::connect(addr, *torrent.info_hash(), self.peer_id, self.extended, &self.config).await?;
        if self.extended {
            conn.exchange_extension_handshake().await?;
        }
        Ok(conn)
    }

    /// Download one piece over an open session and check its hash
    async fn fetch_piece(conn: &mut PeerConnection, torrent: &TorrentInfo, index: u32) -> Result<Bytes> {
        let length = piece_length(torrent, index)?;
        let data = conn.download_piece(index, length).await?;
        let expected = torrent
            .piece_hash(index)
            .ok_or_else(|| TorrentError::invalid_torrent(format!("no hash for piece {}", index)))?;
        verify_piece(index, &data, expected)?;
        Ok(data)
    }

    /// Download a single piece, trying peers in order until one delivers
    /// bytes matching the piece hash.
    ///
    /// Fails with `PieceValidationFailed` if any peer sent corrupt data and
    /// none sent good data, otherwise with `NoPeersAvailable`.
    pub async fn download_piece(&self, torrent: &TorrentInfo, peers: &[SocketAddr], index: u32) -> Result<Bytes> {
        piece_length(torrent, index)?;
        if peers.is_empty() {
            return Err(TorrentError::no_peers_available("peer list is empty").into());
        }

        let mut validation_failure = None;
        for &addr in peers {
            let attempt = async {
                let mut conn = self.open_session(torrent, addr).await?;
                Self::fetch_piece(&mut conn, torrent, index).await
            };

            match attempt.await {
                Ok(data) => {
                    info!("Piece {} downloaded from {}", index, addr);
                    return Ok(data);
                }
                Err(e) => {
                    warn!("Piece {} from {} failed: {}", index, addr, e);
                    if matches!(
                        e.downcast_ref::<TorrentError>(),
                        Some(TorrentError::PieceValidationFailed { .. })
                    ) {
                        validation_failure = Some(e);
                    }
                }
            }
        }

        Err(validation_failure.unwrap_or_else(|| {
            TorrentError::no_peers_available(format!("none of {} peer(s) delivered piece {}", peers.len(), index)).into()
        }))
    }

    /// Download every piece still pending in `queue` using one worker per
    /// peer, returning all pieces in index order.
    ///
    /// Fails with `IncompleteDownload` when every worker has stopped with
    /// pieces outstanding.
    pub async fn download_all(
        &self,
        torrent: Arc<TorrentInfo>,
        peers: &[SocketAddr],
        queue: Arc<PieceWorkQueue>,
    ) -> Result<Vec<Bytes>> {
        if queue.piece_count() as usize != torrent.piece_count() {
            return Err(TorrentError::invalid_torrent(format!(
                "work queue holds {} pieces, torrent has {}",
                queue.piece_count(),
                torrent.piece_count()
            ))
            .into());
        }
        if queue.is_complete() {
            return queue.ordered_pieces();
        }
        if peers.is_empty() {
            return Err(TorrentError::no_peers_available("peer list is empty").into());
        }

        info!(
            "Downloading {} piece(s) from {} peer(s)",
            queue.missing().len(),
            peers.len()
        );

        let mut workers = JoinSet::new();
        for &addr in peers {
            let manager = self.clone();
            let torrent = Arc::clone(&torrent);
            let queue = Arc::clone(&queue);
            workers.spawn(async move { (addr, manager.run_worker(torrent, addr, queue).await) });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((addr, completed)) => debug!("Worker for {} finished after {} piece(s)", addr, completed),
                Err(e) => error!("Download worker aborted: {}", e),
            }
        }

        let pieces = queue.ordered_pieces()?;
        info!("All {} piece(s) downloaded", pieces.len());
        Ok(pieces)
    }

    /// Worker loop for one peer. Any failure hands the current piece back and
    /// ends the worker; the session is not reused after an error.
    async fn run_worker(&self, torrent: Arc<TorrentInfo>, addr: SocketAddr, queue: Arc<PieceWorkQueue>) -> usize {
        let mut conn = match self.open_session(&torrent, addr).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Worker for {} could not start: {}", addr, e);
                return 0;
            }
        };

        let mut completed = 0;
        while let Some(claim) = queue.next_piece().await {
            let index = claim.index();
            match Self::fetch_piece(&mut conn, &torrent, index).await {
                Ok(data) => {
                    if claim.complete(data) {
                        completed += 1;
                        info!(
                            "Piece {} done via {} ({}/{})",
                            index,
                            addr,
                            queue.completed_count(),
                            queue.piece_count()
                        );
                    }
                }
                Err(e) => {
                    let local = e
                        .downcast_ref::<TorrentError>()
                        .map(TorrentError::is_peer_local)
                        .unwrap_or(false);
                    warn!(
                        "Piece {} from {} failed ({}): {}; requeueing and dropping peer",
                        index,
                        addr,
                        if local { "peer" } else { "fatal" },
                        e
                    );
                    claim.requeue();
                    break;
                }
            }
        }
        completed
    }
}

fn piece_length(torrent: &TorrentInfo, index: u32) -> Result<u32> {
    let length = torrent.piece_length_at(index).ok_or_else(|| {
        TorrentError::invalid_torrent(format!(
            "piece index {} out of range, torrent has {} piece(s)",
            index,
            torrent.piece_count()
        ))
    })?;
    u32::try_from(length).map_err(|_| {
        TorrentError::invalid_torrent_field(format!("piece length {} too large", length), "piece length").into()
    })
}
