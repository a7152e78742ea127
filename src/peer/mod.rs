//! Peer session module
//!
//! Per-peer wire sessions and metadata retrieval for magnet links.

pub mod connection;
pub mod metadata;
pub mod state;

// Re-export main types
pub use connection::{ConnectionConfig, PeerConnection};
pub use metadata::fetch_metadata_from_peers;
pub use state::SessionState;
