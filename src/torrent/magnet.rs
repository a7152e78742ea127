//! Magnet link parser
//!
//! Handles parsing of `magnet:?` URIs into the info hash, display name,
//! tracker list and optional exact length.

use anyhow::Result;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TorrentError;

/// Parsed magnet link information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetInfo {
    /// SHA1 info hash asserted by the `xt` parameter
    pub info_hash: [u8; 20],
    /// Display name (`dn` parameter), as it appears in the URI
    pub display_name: Option<String>,
    /// Tracker URLs (`tr` parameters), URL-decoded, in order
    pub trackers: Vec<String>,
    /// Exact content length (`xl` parameter)
    pub total_size: Option<u64>,
}

impl MagnetInfo {
    /// First tracker, which announces are made to
    pub fn tracker(&self) -> Option<&str> {
        self.trackers.first().map(String::as_str)
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }
}

/// Parser for magnet links
pub struct MagnetParser;

impl MagnetParser {
    /// Parse a magnet link string
    ///
    /// # Example
    /// ```ignore
    /// let magnet = "magnet:?xt=urn:btih:ad42ce8109f54c99613ce38f9b4d87e70f24a165&dn=magnet1.gif";
    /// let info = MagnetParser::parse(magnet)?;
    /// ```
    pub fn parse(magnet_uri: &str) -> Result<MagnetInfo> {
        info!("Parsing magnet link: {}", magnet_uri);

        let url = Url::parse(magnet_uri.trim()).map_err(|e| {
            warn!("Invalid magnet URL format: {}", e);
            TorrentError::invalid_torrent(format!("invalid magnet URI: {}", e))
        })?;

        if url.scheme() != "magnet" {
            warn!("URL is not a magnet link: scheme is '{}'", url.scheme());
            return Err(TorrentError::invalid_torrent(format!(
                "expected a magnet URI, got scheme '{}'",
                url.scheme()
            ))
            .into());
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();
        let mut total_size = None;

        // Split the raw query so that only `tr` is percent-decoded
        for pair in url.query().unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            debug!("Processing parameter: {} = {}", key, value);

            match key {
                "xt" => info_hash = Some(Self::extract_info_hash(value)?),
                "dn" => display_name = Some(value.to_string()),
                "tr" => {
                    let tracker = urlencoding::decode(value).map_err(|e| {
                        TorrentError::invalid_torrent_field(format!("tracker URL is not UTF-8: {}", e), "tr")
                    })?;
                    debug!("Added tracker: {}", tracker);
                    trackers.push(tracker.into_owned());
                }
                "xl" => match value.parse::<u64>() {
                    Ok(size) => total_size = Some(size),
                    Err(_) => warn!("Ignoring invalid xl parameter value: {}", value),
                },
                _ => debug!("Ignoring unknown parameter: {}", key),
            }
        }

        let info_hash = info_hash.ok_or_else(|| {
            warn!("Magnet link missing required info hash (xt parameter)");
            TorrentError::invalid_torrent_field("magnet link must contain xt=urn:btih:<hash>", "xt")
        })?;

        info!(
            "Parsed magnet link: info_hash={}, name={}, trackers={}",
            hex::encode(info_hash),
            display_name.as_deref().unwrap_or("(none)"),
            trackers.len()
        );

        Ok(MagnetInfo {
            info_hash,
            display_name,
            trackers,
            total_size,
        })
    }

    /// Extract the 20-byte hash from `urn:btih:<40 hex chars>`
    fn extract_info_hash(xt_value: &str) -> Result<[u8; 20]> {
        let hash_str = xt_value.strip_prefix("urn:btih:").ok_or_else(|| {
            TorrentError::invalid_torrent_field(format!("unsupported topic '{}'", xt_value), "xt")
        })?;

        let mut hash = [0u8; 20];
        hex::decode_to_slice(hash_str, &mut hash).map_err(|e| {
            TorrentError::invalid_torrent_field(
                format!("info hash '{}' is not 40 hex characters: {}", hash_str, e),
                "xt",
            )
        })?;
        Ok(hash)
    }
}
