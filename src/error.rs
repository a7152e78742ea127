//! Error types for the torrent client
//!
//! This module defines the error taxonomy shared by every component of the
//! client, from the bencode codec up to the download orchestrator.

use std::fmt;

/// Comprehensive error type for torrent operations
#[derive(Debug, Clone)]
pub enum TorrentError {
    /// Bad bencode input
    MalformedEncoding {
        message: String,
        position: Option<usize>,
    },

    /// Torrent metadata is missing required keys or has wrong types
    InvalidTorrent {
        message: String,
        field: Option<String>,
    },

    /// Metadata received from a peer does not hash to the magnet's info hash
    InfoHashMismatch {
        expected: String,
        actual: String,
    },

    /// HTTP or tracker-level failure
    TrackerError {
        message: String,
        url: Option<String>,
        source: Option<String>,
    },

    /// The peer answered the handshake with unexpected content
    HandshakeMismatch {
        message: String,
        peer: Option<String>,
    },

    /// The peer sent a message that is not allowed at this point
    ProtocolViolation {
        message: String,
        peer: Option<String>,
    },

    /// The connection closed before a whole frame arrived
    TruncatedMessage {
        message: String,
        peer: Option<String>,
    },

    /// The peer does not speak a required extension
    ExtensionUnsupported {
        extension: String,
        peer: Option<String>,
    },

    /// A downloaded piece does not match its expected SHA-1
    PieceValidationFailed {
        index: u32,
        expected: String,
        actual: String,
    },

    /// No peer could serve the request
    NoPeersAvailable {
        message: String,
    },

    /// Every worker stopped with pieces still outstanding
    IncompleteDownload {
        missing: Vec<u32>,
    },

    /// Network errors (connect, socket I/O, timeouts)
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Output sink errors
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },
}

impl TorrentError {
    /// Create a new MalformedEncoding error
    pub fn malformed_encoding(message: impl Into<String>) -> Self {
        TorrentError::MalformedEncoding {
            message: message.into(),
            position: None,
        }
    }

    /// Create a new MalformedEncoding error at a byte offset
    pub fn malformed_encoding_at(message: impl Into<String>, position: usize) -> Self {
        TorrentError::MalformedEncoding {
            message: message.into(),
            position: Some(position),
        }
    }

    /// Create a new InvalidTorrent error
    pub fn invalid_torrent(message: impl Into<String>) -> Self {
        TorrentError::InvalidTorrent {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new InvalidTorrent error naming the offending key
    pub fn invalid_torrent_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::InvalidTorrent {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new InfoHashMismatch error from the two digests
    pub fn info_hash_mismatch(expected: &[u8; 20], actual: &[u8; 20]) -> Self {
        TorrentError::InfoHashMismatch {
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }
    }

    /// Create a new TrackerError
    pub fn tracker_error(message: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: None,
            source: None,
        }
    }

    /// Create a new TrackerError with the announce URL
    pub fn tracker_error_with_url(message: impl Into<String>, url: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: Some(url.into()),
            source: None,
        }
    }

    /// Create a new TrackerError with URL and source
    pub fn tracker_error_full(message: impl Into<String>, url: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: Some(url.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new HandshakeMismatch error
    pub fn handshake_mismatch(message: impl Into<String>) -> Self {
        TorrentError::HandshakeMismatch {
            message: message.into(),
            peer: None,
        }
    }

    /// Create a new ProtocolViolation error
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        TorrentError::ProtocolViolation {
            message: message.into(),
            peer: None,
        }
    }

    /// Create a new TruncatedMessage error
    pub fn truncated_message(message: impl Into<String>) -> Self {
        TorrentError::TruncatedMessage {
            message: message.into(),
            peer: None,
        }
    }

    /// Create a new ExtensionUnsupported error
    pub fn extension_unsupported(extension: impl Into<String>) -> Self {
        TorrentError::ExtensionUnsupported {
            extension: extension.into(),
            peer: None,
        }
    }

    /// Create a new PieceValidationFailed error from the two digests
    pub fn piece_validation_failed(index: u32, expected: &[u8; 20], actual: &[u8; 20]) -> Self {
        TorrentError::PieceValidationFailed {
            index,
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }
    }

    /// Create a new NoPeersAvailable error
    pub fn no_peers_available(message: impl Into<String>) -> Self {
        TorrentError::NoPeersAvailable {
            message: message.into(),
        }
    }

    /// Create a new IncompleteDownload error listing the missing pieces
    pub fn incomplete_download(missing: Vec<u32>) -> Self {
        TorrentError::IncompleteDownload { missing }
    }

    /// Create a new NetworkError
    pub fn network_error(message: impl Into<String>) -> Self {
        TorrentError::NetworkError {
            message: message.into(),
            address: None,
            source: None,
        }
    }

    /// Create a new NetworkError with source
    pub fn network_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::NetworkError {
            message: message.into(),
            address: None,
            source: Some(source.into()),
        }
    }

    /// Create a new NetworkError with address and source
    pub fn network_error_full(message: impl Into<String>, address: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new StorageError with path and source
    pub fn storage_error_full(message: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Attach the remote peer address to a per-peer error
    pub fn with_peer(mut self, addr: impl fmt::Display) -> Self {
        let addr = addr.to_string();
        match &mut self {
            TorrentError::HandshakeMismatch { peer, .. }
            | TorrentError::ProtocolViolation { peer, .. }
            | TorrentError::TruncatedMessage { peer, .. }
            | TorrentError::ExtensionUnsupported { peer, .. } => {
                *peer = Some(addr);
            }
            TorrentError::NetworkError { address, .. } => {
                address.get_or_insert(addr);
            }
            _ => {}
        }
        self
    }

    /// Whether the failure is confined to one peer session or piece attempt.
    ///
    /// Peer-local failures are recovered by requeueing the piece or trying
    /// the next peer; everything else aborts the operation.
    pub fn is_peer_local(&self) -> bool {
        matches!(
            self,
            TorrentError::HandshakeMismatch { .. }
                | TorrentError::ProtocolViolation { .. }
                | TorrentError::TruncatedMessage { .. }
                | TorrentError::ExtensionUnsupported { .. }
                | TorrentError::PieceValidationFailed { .. }
                | TorrentError::NetworkError { .. }
        )
    }
}

fn write_peer(f: &mut fmt::Formatter<'_>, kind: &str, message: &str, peer: &Option<String>) -> fmt::Result {
    match peer {
        Some(p) => write!(f, "{}: {} (peer: {})", kind, message, p),
        None => write!(f, "{}: {}", kind, message),
    }
}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentError::MalformedEncoding { message, position } => {
                if let Some(pos) = position {
                    write!(f, "Malformed encoding: {} (at byte {})", message, pos)
                } else {
                    write!(f, "Malformed encoding: {}", message)
                }
            }
            TorrentError::InvalidTorrent { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Invalid torrent: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Invalid torrent: {}", message)
                }
            }
            TorrentError::InfoHashMismatch { expected, actual } => {
                write!(f, "Info hash mismatch: expected {}, got {}", expected, actual)
            }
            TorrentError::TrackerError { message, url, source } => {
                match (url, source) {
                    (Some(u), Some(s)) => write!(f, "Tracker error: {} (url: {}, source: {})", message, u, s),
                    (Some(u), None) => write!(f, "Tracker error: {} (url: {})", message, u),
                    (None, Some(s)) => write!(f, "Tracker error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Tracker error: {}", message),
                }
            }
            TorrentError::HandshakeMismatch { message, peer } => {
                write_peer(f, "Handshake mismatch", message, peer)
            }
            TorrentError::ProtocolViolation { message, peer } => {
                write_peer(f, "Protocol violation", message, peer)
            }
            TorrentError::TruncatedMessage { message, peer } => {
                write_peer(f, "Truncated message", message, peer)
            }
            TorrentError::ExtensionUnsupported { extension, peer } => {
                write_peer(f, "Extension unsupported", extension, peer)
            }
            TorrentError::PieceValidationFailed { index, expected, actual } => {
                write!(f, "Piece {} failed validation: expected {}, got {}", index, expected, actual)
            }
            TorrentError::NoPeersAvailable { message } => {
                write!(f, "No peers available: {}", message)
            }
            TorrentError::IncompleteDownload { missing } => {
                write!(f, "Incomplete download: {} piece(s) missing {:?}", missing.len(), missing)
            }
            TorrentError::NetworkError { message, address, source } => {
                match (address, source) {
                    (Some(a), Some(s)) => write!(f, "Network error: {} (address: {}, source: {})", message, a, s),
                    (Some(a), None) => write!(f, "Network error: {} (address: {})", message, a),
                    (None, Some(s)) => write!(f, "Network error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Network error: {}", message),
                }
            }
            TorrentError::StorageError { message, path, source } => {
                match (path, source) {
                    (Some(p), Some(s)) => write!(f, "Storage error: {} (path: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Storage error: {} (path: {})", message, p),
                    (None, Some(s)) => write!(f, "Storage error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Storage error: {}", message),
                }
            }
            TorrentError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for TorrentError {}

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        TorrentError::storage_error_full(err.to_string(), "unknown".to_string(), err.kind().to_string())
    }
}

impl From<std::net::AddrParseError> for TorrentError {
    fn from(err: std::net::AddrParseError) -> Self {
        TorrentError::network_error_full("Failed to parse address", "unknown".to_string(), err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for TorrentError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TorrentError::network_error("Operation timed out")
    }
}

impl From<reqwest::Error> for TorrentError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_else(|| "unknown".to_string());
        TorrentError::tracker_error_full("HTTP request failed", url, err.to_string())
    }
}
