//! Peer connection module
//!
//! One TCP session with one peer: handshake, the bitfield / interested /
//! unchoke exchange, block downloads and extension messages. Every read is
//! bounded by the configured read timeout.

use anyhow::Result;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;
use crate::peer::state::SessionState;
use crate::protocol::extension::{ExtensionHandshake, MetadataMessage, EXTENSION_HANDSHAKE_ID, LOCAL_UT_METADATA_ID};
use crate::protocol::{wire, Handshake, Message};
use crate::storage::piece::PieceBuffer;

/// Timeouts applied to each peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Bound on the TCP connect
    pub connect_timeout: Duration,
    /// Bound on every read from the peer
    pub read_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// A handshaken session with one peer
pub struct PeerConnection {
    addr: SocketAddr,
    stream: TcpStream,
    state: SessionState,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    read_timeout: Duration,
    peer_extensions: Option<ExtensionHandshake>,
}

impl PeerConnection {
    /// Connect to a peer and perform the handshake. With `extended` the
    /// handshake advertises extension support and requires it in the reply.
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        extended: bool,
        config: &ConnectionConfig,
    ) -> Result<Self> {
        info!("Connecting to peer: {}", addr);

        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|e| {
                warn!("Connection timeout to {}", addr);
                TorrentError::network_error_full("Connection timeout", addr.to_string(), e.to_string())
            })?
            .map_err(|e| {
                error!("Failed to connect to {}: {}", addr, e);
                TorrentError::network_error_full("Failed to connect", addr.to_string(), e.to_string())
            })?;

        let mut connection = Self {
            addr,
            stream,
            state: SessionState::Connected,
            info_hash,
            peer_id: [0u8; 20],
            read_timeout: config.read_timeout,
            peer_extensions: None,
        };
        connection.perform_handshake(our_peer_id, extended).await?;

        info!("Handshake complete with peer {} ({})", addr, hex::encode(connection.peer_id));
        Ok(connection)
    }

    /// Send our handshake, read exactly 68 bytes back and verify them
    async fn perform_handshake(&mut self, our_peer_id: [u8; 20], extended: bool) -> Result<()> {
        let ours = if extended {
            Handshake::extended(self.info_hash, our_peer_id)
        } else {
            Handshake::new(self.info_hash, our_peer_id)
        };

        debug!("Sending handshake to peer: {}", self.addr);
        wire::write_handshake(&mut self.stream, &ours)
            .await
            .map_err(|e| self.annotate(e))?;
        self.state = SessionState::HandshakeSent;

        let read_timeout = self.read_timeout;
        let reply = timeout(read_timeout, wire::read_handshake(&mut self.stream))
            .await
            .map_err(|_| self.timed_out("handshake"))?
            .map_err(|e| self.annotate(e))?;

        reply.verify(&self.info_hash, extended).map_err(|e| self.annotate(e))?;

        self.peer_id = reply.peer_id;
        self.state = SessionState::HandshakeVerified;
        Ok(())
    }

    /// Attach the peer address to a `TorrentError`
    fn annotate(&self, err: anyhow::Error) -> anyhow::Error {
        match err.downcast::<TorrentError>() {
            Ok(e) => e.with_peer(self.addr).into(),
            Err(other) => other,
        }
    }

    fn timed_out(&self, what: &str) -> anyhow::Error {
        warn!("Timed out after {:?} waiting for {} from {}", self.read_timeout, what, self.addr);
        TorrentError::network_error_full(
            format!("timed out waiting for {}", what),
            self.addr.to_string(),
            format!("no data within {:?}", self.read_timeout),
        )
        .into()
    }

    fn violation(&self, message: String) -> anyhow::Error {
        warn!("Protocol violation from {}: {}", self.addr, message);
        TorrentError::protocol_violation(message).with_peer(self.addr).into()
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        trace!("Sending {:?} to peer: {}", message.message_id(), self.addr);
        wire::write_message(&mut self.stream, message)
            .await
            .map_err(|e| self.annotate(e))
    }

    /// Read the next non-keep-alive message. The read timeout bounds the
    /// whole wait; keep-alives do not extend it.
    pub async fn wait_for_message(&mut self) -> Result<Message> {
        let deadline = Instant::now() + self.read_timeout;
        loop {
            let message = timeout_at(deadline, wire::read_message(&mut self.stream))
                .await
                .map_err(|_| self.timed_out("message"))?
                .map_err(|e| self.annotate(e))?;

            if message == Message::KeepAlive {
                trace!("Keep-alive from {}", self.addr);
                continue;
            }
            debug!("Received {:?} from peer: {}", message.message_id(), self.addr);
            return Ok(message);
        }
    }

    /// The first message after the handshake must be the bitfield
    pub async fn receive_bitfield(&mut self) -> Result<Bytes> {
        match self.wait_for_message().await? {
            Message::Bitfield { bitfield } => {
                debug!("Peer {} sent a {}-byte bitfield", self.addr, bitfield.len());
                self.state = SessionState::BitfieldReceived;
                Ok(bitfield)
            }
            other => Err(self.violation(format!("expected bitfield, got {:?}", other.message_id()))),
        }
    }

    pub async fn send_interested(&mut self) -> Result<()> {
        self.send_message(&Message::Interested).await?;
        self.state = SessionState::InterestedSent;
        Ok(())
    }

    pub async fn receive_unchoke(&mut self) -> Result<()> {
        match self.wait_for_message().await? {
            Message::Unchoke => {
                debug!("Unchoked by peer: {}", self.addr);
                self.state = SessionState::Unchoked;
                Ok(())
            }
            other => Err(self.violation(format!("expected unchoke, got {:?}", other.message_id()))),
        }
    }

    /// Run whatever part of bitfield / interested / unchoke has not happened
    /// yet on this session
    pub async fn ensure_unchoked(&mut self) -> Result<()> {
        if self.state.can_request() {
            return Ok(());
        }
        if self.state < SessionState::BitfieldReceived {
            self.receive_bitfield().await?;
        }
        if self.state < SessionState::InterestedSent {
            self.send_interested().await?;
        }
        self.receive_unchoke().await
    }

    /// Download one piece block by block, one request in flight at a time.
    /// The returned bytes are not hash-checked.
    pub async fn download_piece(&mut self, index: u32, length: u32) -> Result<Bytes> {
        self.ensure_unchoked().await?;
        info!("Downloading piece {} ({} bytes) from {}", index, length, self.addr);

        let mut buffer = PieceBuffer::new(index, length);
        for block in buffer.blocks() {
            self.state = SessionState::RequestInFlight;
            self.send_message(&Message::Request {
                index,
                begin: block.begin,
                length: block.length,
            })
            .await?;

            match self.wait_for_message().await? {
                Message::Piece { index: got_index, begin, block: data }
                    if got_index == index && begin == block.begin && data.len() == block.length as usize =>
                {
                    trace!("Block {}+{} of piece {} from {}", begin, data.len(), index, self.addr);
                    buffer.add_block(begin, &data).map_err(|e| self.annotate(e))?;
                    self.state = SessionState::BlockReceived;
                }
                Message::Piece { index: got_index, begin, block: data } => {
                    return Err(self.violation(format!(
                        "requested piece {} offset {} length {}, got piece {} offset {} length {}",
                        index,
                        block.begin,
                        block.length,
                        got_index,
                        begin,
                        data.len()
                    )));
                }
                other => {
                    return Err(self.violation(format!(
                        "expected piece block, got {:?}",
                        other.message_id()
                    )));
                }
            }
        }

        self.state = SessionState::PieceComplete;
        debug!("Piece {} assembled from {}", index, self.addr);
        Ok(buffer.into_bytes())
    }

    /// Send our extension handshake and read the peer's
    pub async fn exchange_extension_handshake(&mut self) -> Result<ExtensionHandshake> {
        if let Some(existing) = &self.peer_extensions {
            return Ok(existing.clone());
        }
        if self.state < SessionState::BitfieldReceived {
            self.receive_bitfield().await?;
        }

        debug!("Sending extension handshake to {}", self.addr);
        self.send_message(&Message::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            payload: ExtensionHandshake::local().encode(),
        })
        .await?;

        let theirs = match self.wait_for_message().await? {
            Message::Extended { id: EXTENSION_HANDSHAKE_ID, payload } => {
                ExtensionHandshake::decode(&payload).map_err(|e| self.annotate(e))?
            }
            other => {
                return Err(self.violation(format!(
                    "expected extension handshake, got {:?}",
                    other.message_id()
                )))
            }
        };

        debug!("Peer {} extensions: {:?}", self.addr, theirs.extensions);
        self.peer_extensions = Some(theirs.clone());
        Ok(theirs)
    }

    /// Ask for metadata piece 0 under the peer's ut_metadata id and read the
    /// reply addressed to our id
    pub async fn request_metadata(&mut self, peer_ut_metadata_id: u8) -> Result<MetadataMessage> {
        debug!("Requesting metadata from {} (ut_metadata id {})", self.addr, peer_ut_metadata_id);
        self.send_message(&Message::Extended {
            id: peer_ut_metadata_id,
            payload: MetadataMessage::request(0).encode(),
        })
        .await?;

        match self.wait_for_message().await? {
            Message::Extended { id: LOCAL_UT_METADATA_ID, payload } => {
                MetadataMessage::decode(payload).map_err(|e| self.annotate(e))
            }
            other => Err(self.violation(format!(
                "expected ut_metadata response, got {:?}",
                other.message_id()
            ))),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Peer id from the handshake reply
    pub fn peer_id(&self) -> &[u8; 20] {
        &self.peer_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}
