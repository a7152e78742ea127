//! Torrent metadata module
//!
//! Parsing of .torrent files, magnet links and peer-supplied info dictionaries.

pub mod info;
pub mod magnet;
pub mod parser;

pub use info::{sha1_digest, TorrentInfo};
pub use magnet::{MagnetInfo, MagnetParser};
pub use parser::TorrentParser;
