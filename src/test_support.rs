//! In-process torrents and peers for tests
//!
//! `FakePeer` listens on 127.0.0.1 and speaks enough of the peer wire
//! protocol to serve a `TestTorrent`: handshake, bitfield, unchoke, block
//! requests and ut_metadata, with optional misbehaviour.

use anyhow::Result;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};

use crate::bencode::{self, Value};
use crate::protocol::extension::{
    ExtensionHandshake, MetadataMessage, EXTENSION_HANDSHAKE_ID, LOCAL_UT_METADATA_ID, UT_METADATA,
};
use crate::protocol::{wire, Handshake, Message};
use crate::torrent::{sha1_digest, MagnetInfo, TorrentInfo, TorrentParser};

/// ut_metadata id fake peers advertise
pub const PEER_UT_METADATA_ID: u8 = 3;

pub const TRACKER_URL: &str = "http://tracker.test/announce";

/// Single-file torrent built around in-memory content
#[derive(Debug, Clone)]
pub struct TestTorrent {
    pub content: Bytes,
    pub piece_length: u32,
    pub info: Value,
    info_hash: [u8; 20],
}

impl TestTorrent {
    pub fn new(content: &[u8], piece_length: u32) -> Self {
        let pieces: Vec<u8> = content
            .chunks(piece_length as usize)
            .flat_map(sha1_digest)
            .collect();
        let info = Value::dict([
            ("length", Value::Integer(content.len() as i64)),
            ("name", Value::string("test.bin")),
            ("piece length", Value::Integer(piece_length as i64)),
            ("pieces", Value::from(pieces)),
        ]);
        let info_hash = sha1_digest(&bencode::encode(&info));
        Self {
            content: Bytes::copy_from_slice(content),
            piece_length,
            info,
            info_hash,
        }
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    /// Bencoded info dictionary, as served over ut_metadata
    pub fn info_bytes(&self) -> Bytes {
        Bytes::from(bencode::encode(&self.info))
    }

    pub fn torrent_bytes(&self, announce: &str) -> Vec<u8> {
        bencode::encode(&Value::dict([
            ("announce", Value::string(announce)),
            ("info", self.info.clone()),
        ]))
    }

    pub fn metadata(&self) -> TorrentInfo {
        TorrentParser::from_bytes(&self.torrent_bytes(TRACKER_URL)).unwrap()
    }

    pub fn magnet(&self) -> MagnetInfo {
        MagnetInfo {
            info_hash: self.info_hash,
            display_name: Some("test.bin".to_string()),
            trackers: vec![TRACKER_URL.to_string()],
            total_size: Some(self.content.len() as u64),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.content.len().div_ceil(self.piece_length as usize)
    }

    pub fn piece(&self, index: u32) -> Bytes {
        let start = (index as usize * self.piece_length as usize).min(self.content.len());
        let end = (start + self.piece_length as usize).min(self.content.len());
        self.content.slice(start..end)
    }

    /// Bitfield claiming every piece
    pub fn bitfield(&self) -> Bytes {
        let count = self.piece_count();
        let mut bits = vec![0u8; count.div_ceil(8)];
        for i in 0..count {
            bits[i / 8] |= 0x80 >> (i % 8);
        }
        Bytes::from(bits)
    }
}

/// How a fake peer deviates from the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misbehavior {
    None,
    /// Handshake reply carries a different info hash
    WrongInfoHash,
    /// Sends unchoke where the bitfield belongs
    NoBitfield,
    /// Handshakes, then never sends anything
    Silent,
    /// Answers interested with choke
    ChokeInsteadOfUnchoke,
    /// Answers block requests with keep-alives only
    KeepAliveOnly,
    /// Answers block requests with a piece message for another index
    WrongBlockIndex,
    /// Sends half of the first piece frame, then closes
    TruncateBlock,
    /// Flips a byte of this piece every time it is served
    CorruptPiece(u32),
    /// Flips a byte of this piece the first time it is served
    CorruptPieceOnce(u32),
    /// Extension handshake without ut_metadata
    NoMetadataExtension,
    /// Answers metadata requests with reject
    RejectMetadata,
    /// Answers metadata requests with data for another piece
    WrongMetadataPiece,
    /// Answers metadata requests with a `total_size` that disagrees with the data
    BadMetadataSize,
}

struct Shared {
    info_hash: [u8; 20],
    served: TestTorrent,
    misbehavior: Misbehavior,
    peer_id: [u8; 20],
    corrupt_pending: AtomicBool,
    corruptions: AtomicUsize,
}

/// A listening fake peer. Every accepted connection is served independently.
pub struct FakePeer {
    pub addr: SocketAddr,
    pub peer_id: [u8; 20],
    shared: Arc<Shared>,
}

impl FakePeer {
    pub async fn spawn(torrent: TestTorrent, misbehavior: Misbehavior) -> Self {
        Self::spawn_serving(torrent.clone(), torrent, misbehavior).await
    }

    /// Handshake as `handshake_for`, but serve pieces and metadata of `served`
    pub async fn spawn_serving(handshake_for: TestTorrent, served: TestTorrent, misbehavior: Misbehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(b"-FK0001-");
        peer_id[8..].copy_from_slice(&rand::random::<[u8; 12]>());

        let shared = Arc::new(Shared {
            info_hash: handshake_for.info_hash(),
            served,
            misbehavior,
            peer_id,
            corrupt_pending: AtomicBool::new(true),
            corruptions: AtomicUsize::new(0),
        });

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    let _ = serve(stream, shared).await;
                });
            }
        });

        Self { addr, peer_id, shared }
    }

    /// Number of corrupted pieces served so far
    pub fn corruptions(&self) -> usize {
        self.shared.corruptions.load(Ordering::SeqCst)
    }
}

async fn serve(mut stream: TcpStream, shared: Arc<Shared>) -> Result<()> {
    let theirs = wire::read_handshake(&mut stream).await?;
    let info_hash = match shared.misbehavior {
        Misbehavior::WrongInfoHash => [0xAA; 20],
        _ => shared.info_hash,
    };
    let reply = if theirs.supports_extensions() {
        Handshake::extended(info_hash, shared.peer_id)
    } else {
        Handshake::new(info_hash, shared.peer_id)
    };
    wire::write_handshake(&mut stream, &reply).await?;

    match shared.misbehavior {
        Misbehavior::Silent => {
            let mut sink = [0u8; 1024];
            while stream.read(&mut sink).await? > 0 {}
            return Ok(());
        }
        Misbehavior::NoBitfield => wire::write_message(&mut stream, &Message::Unchoke).await?,
        _ => {
            let bitfield = shared.served.bitfield();
            wire::write_message(&mut stream, &Message::Bitfield { bitfield }).await?
        }
    }

    loop {
        let message = match wire::read_message(&mut stream).await {
            Ok(message) => message,
            Err(_) => return Ok(()),
        };

        match message {
            Message::Interested => {
                let reply = match shared.misbehavior {
                    Misbehavior::ChokeInsteadOfUnchoke => Message::Choke,
                    _ => Message::Unchoke,
                };
                wire::write_message(&mut stream, &reply).await?
            }
            Message::Request { .. } if shared.misbehavior == Misbehavior::KeepAliveOnly => loop {
                wire::write_message(&mut stream, &Message::KeepAlive).await?;
                sleep(Duration::from_millis(100)).await;
            },
            Message::Request { index, begin, length } => {
                let piece = shared.served.piece(index);
                let start = begin as usize;
                let end = start + length as usize;
                if end > piece.len() {
                    return Ok(());
                }

                let mut block = piece.slice(start..end);
                if begin == 0 && should_corrupt(&shared, index) {
                    let mut bytes = block.to_vec();
                    bytes[0] ^= 0xFF;
                    block = Bytes::from(bytes);
                }

                let reply = match shared.misbehavior {
                    Misbehavior::WrongBlockIndex => Message::Piece { index: index + 5, begin, block },
                    _ => Message::Piece { index, begin, block },
                };
                if shared.misbehavior == Misbehavior::TruncateBlock {
                    let frame = reply.serialize();
                    stream.write_all(&frame[..frame.len() / 2]).await?;
                    stream.shutdown().await?;
                    return Ok(());
                }
                wire::write_message(&mut stream, &reply).await?
            }
            Message::Extended { id: EXTENSION_HANDSHAKE_ID, .. } => {
                let mut ours = ExtensionHandshake::default();
                if shared.misbehavior != Misbehavior::NoMetadataExtension {
                    ours.extensions.insert(UT_METADATA.to_string(), PEER_UT_METADATA_ID);
                    ours.metadata_size = Some(shared.served.info_bytes().len() as i64);
                }
                let payload = ours.encode();
                wire::write_message(&mut stream, &Message::Extended { id: EXTENSION_HANDSHAKE_ID, payload }).await?
            }
            Message::Extended { id: PEER_UT_METADATA_ID, payload } => {
                let request = MetadataMessage::decode(payload)?;
                let info = shared.served.info_bytes();
                let response = match shared.misbehavior {
                    Misbehavior::RejectMetadata => MetadataMessage::reject(request.piece),
                    Misbehavior::WrongMetadataPiece => MetadataMessage::data(request.piece + 1, info),
                    Misbehavior::BadMetadataSize => MetadataMessage {
                        total_size: Some(999),
                        ..MetadataMessage::data(request.piece, info)
                    },
                    _ => MetadataMessage::data(request.piece, info),
                };
                let payload = response.encode();
                wire::write_message(&mut stream, &Message::Extended { id: LOCAL_UT_METADATA_ID, payload }).await?
            }
            _ => {}
        }
    }
}

fn should_corrupt(shared: &Shared, index: u32) -> bool {
    let corrupt = match shared.misbehavior {
        Misbehavior::CorruptPiece(target) => target == index,
        Misbehavior::CorruptPieceOnce(target) => target == index && shared.corrupt_pending.swap(false, Ordering::SeqCst),
        _ => false,
    };
    if corrupt {
        shared.corruptions.fetch_add(1, Ordering::SeqCst);
    }
    corrupt
}
