//! HTTP tracker module
//!
//! Peer discovery through a tracker announce.

pub mod client;
pub mod transport;

pub use client::{parse_compact_peers, AnnounceRequest, TrackerClient};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
