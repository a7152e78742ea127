//! Bencode codec
//!
//! The binary encoding used by torrent files, tracker responses and the
//! extension protocol.

pub mod decoder;
pub mod encoder;
pub mod value;

pub use decoder::{decode, decode_prefix};
pub use encoder::encode;
pub use value::Value;
