//! mini-torrent
//!
//! A minimal BitTorrent client: bencode, HTTP tracker announces, the peer
//! wire protocol, magnet metadata exchange and concurrent piece download.

pub mod bencode;
pub mod cli;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod storage;
pub mod torrent;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use error::TorrentError;

pub use bencode::Value;
pub use cli::{CliArgs, Command, Config};
pub use peer::{fetch_metadata_from_peers, ConnectionConfig, PeerConnection, SessionState};
pub use protocol::{ExtensionHandshake, Handshake, Message, MessageId, MetadataMessage};
pub use storage::{write_pieces, DownloadManager, FileSink, PieceSink, PieceWorkQueue};
pub use torrent::{MagnetInfo, MagnetParser, TorrentInfo, TorrentParser};
pub use tracker::{AnnounceRequest, HttpTransport, ReqwestTransport, TrackerClient};
