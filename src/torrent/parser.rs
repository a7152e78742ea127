//! Torrent metadata parser
//!
//! Builds `TorrentInfo` from a `.torrent` file or from an info dictionary
//! received over the metadata extension.

use anyhow::Result;
use tracing::{debug, error, info, trace, warn};

use crate::bencode::{self, Value};
use crate::error::TorrentError;
use crate::torrent::info::{sha1_digest, TorrentInfo};
use crate::torrent::magnet::MagnetInfo;

/// Parser for torrent metadata
pub struct TorrentParser;

impl TorrentParser {
    /// Parse a `.torrent` file from bytes
    pub fn from_bytes(data: &[u8]) -> Result<TorrentInfo> {
        info!("Parsing torrent file from {} bytes", data.len());
        trace!("Torrent data (first 100 bytes): {:?}", &data[..data.len().min(100)]);

        let root = bencode::decode(data)?;
        if root.as_dict().is_none() {
            return Err(TorrentError::invalid_torrent("root must be a dictionary").into());
        }

        let announce = root
            .get("announce")
            .and_then(Value::as_str)
            .ok_or_else(|| TorrentError::invalid_torrent_field("missing or non-text tracker URL", "announce"))?
            .to_string();

        let info_dict = root
            .get("info")
            .ok_or_else(|| TorrentError::invalid_torrent_field("missing info dictionary", "info"))?;

        let torrent = Self::from_info_dict(announce, info_dict)?;
        info!(
            "Parsed torrent: name={}, length={}, pieces={}, info_hash={}",
            torrent.name().unwrap_or("(none)"),
            torrent.total_length(),
            torrent.piece_count(),
            torrent.info_hash_hex()
        );
        Ok(torrent)
    }

    /// Parse a `.torrent` file from a file path
    pub fn parse_file(path: &std::path::Path) -> Result<TorrentInfo> {
        info!("Loading torrent file from: {}", path.display());

        let data = std::fs::read(path).map_err(|e| {
            error!("Failed to read torrent file '{}': {}", path.display(), e);
            TorrentError::storage_error_full("Failed to read torrent file", path.display().to_string(), e.to_string())
        })?;

        debug!("Read {} bytes from torrent file", data.len());
        Self::from_bytes(&data)
    }

    /// Build metadata from an info dictionary supplied by a peer for a magnet
    /// link. The dictionary is untrusted, so its hash must match the one the
    /// magnet link asserts.
    pub fn from_magnet_metadata(info_dict: &Value, magnet: &MagnetInfo) -> Result<TorrentInfo> {
        let actual = sha1_digest(&bencode::encode(info_dict));
        if actual != magnet.info_hash {
            warn!(
                "Metadata hash {} does not match magnet hash {}",
                hex::encode(actual),
                magnet.info_hash_hex()
            );
            return Err(TorrentError::info_hash_mismatch(&magnet.info_hash, &actual).into());
        }

        let announce = magnet.tracker().unwrap_or_default().to_string();
        Self::from_info_dict(announce, info_dict)
    }

    fn from_info_dict(announce: String, info_dict: &Value) -> Result<TorrentInfo> {
        if info_dict.as_dict().is_none() {
            return Err(TorrentError::invalid_torrent_field("info must be a dictionary", "info").into());
        }

        let total_length = Self::non_negative(info_dict, "length")?;
        let piece_length = Self::non_negative(info_dict, "piece length")?;

        let pieces = info_dict
            .get("pieces")
            .and_then(Value::as_bytes)
            .ok_or_else(|| TorrentError::invalid_torrent_field("missing or non-binary piece hashes", "pieces"))?;
        let piece_hashes = TorrentInfo::parse_piece_hashes(pieces)?;

        let name = info_dict.get("name").and_then(Value::as_str).map(str::to_string);

        // Canonical re-encoding, not the original bytes
        let info_hash = sha1_digest(&bencode::encode(info_dict));
        debug!("Computed info hash {}", hex::encode(info_hash));

        TorrentInfo::new(announce, name, total_length, piece_length, piece_hashes, info_hash)
    }

    fn non_negative(dict: &Value, key: &str) -> Result<u64> {
        let value = dict
            .get(key)
            .and_then(Value::as_integer)
            .ok_or_else(|| TorrentError::invalid_torrent_field("missing or non-integer value", key))?;
        u64::try_from(value).map_err(|_| TorrentError::invalid_torrent_field(format!("negative value {}", value), key).into())
    }
}
