//! BitTorrent peer wire protocol
//!
//! Handshake, framed messages and extension protocol payloads.

pub mod extension;
pub mod handshake;
pub mod message;
pub mod wire;

pub use extension::{ExtensionHandshake, MetadataMessage, MetadataMessageType};
pub use handshake::Handshake;
pub use message::{Message, MessageId, BLOCK_SIZE};
