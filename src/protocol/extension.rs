//! Extension protocol payloads
//!
//! The extension handshake and the ut_metadata messages used to fetch an info
//! dictionary for a magnet link.

use anyhow::Result;
use bytes::Bytes;
use std::collections::BTreeMap;

use crate::bencode::{self, Value};
use crate::error::TorrentError;

/// Sub-id of the extension handshake
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// Id under which we ask peers to send us ut_metadata messages
pub const LOCAL_UT_METADATA_ID: u8 = 16;

pub const UT_METADATA: &str = "ut_metadata";

/// Extension handshake dictionary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionHandshake {
    /// Extension name to the id the sender wants to receive it under
    pub extensions: BTreeMap<String, u8>,
    /// Size of the info dictionary, when the sender has it
    pub metadata_size: Option<i64>,
}

impl ExtensionHandshake {
    /// Our handshake: we only speak ut_metadata
    pub fn local() -> Self {
        let mut extensions = BTreeMap::new();
        extensions.insert(UT_METADATA.to_string(), LOCAL_UT_METADATA_ID);
        Self {
            extensions,
            metadata_size: None,
        }
    }

    pub fn ut_metadata_id(&self) -> Option<u8> {
        self.extensions.get(UT_METADATA).copied()
    }

    pub fn encode(&self) -> Bytes {
        let m = Value::Dict(
            self.extensions
                .iter()
                .map(|(name, id)| (Bytes::copy_from_slice(name.as_bytes()), Value::Integer(*id as i64)))
                .collect(),
        );
        let mut entries = vec![("m", m)];
        if let Some(size) = self.metadata_size {
            entries.push(("metadata_size", Value::Integer(size)));
        }
        Bytes::from(bencode::encode(&Value::dict(entries)))
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let value = bencode::decode(payload)?;
        let m = value
            .get("m")
            .and_then(Value::as_dict)
            .ok_or_else(|| TorrentError::protocol_violation("extension handshake has no 'm' dictionary"))?;

        // id 0 means "disabled"; out-of-range ids are ignored
        let extensions = m
            .iter()
            .filter_map(|(name, id)| {
                let name = std::str::from_utf8(name).ok()?;
                let id = u8::try_from(id.as_integer()?).ok().filter(|&id| id > 0)?;
                Some((name.to_string(), id))
            })
            .collect();

        Ok(Self {
            extensions,
            metadata_size: value.get("metadata_size").and_then(Value::as_integer),
        })
    }
}

/// ut_metadata message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMessageType {
    Request = 0,
    Data = 1,
    Reject = 2,
}

impl TryFrom<i64> for MetadataMessageType {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(MetadataMessageType::Request),
            1 => Ok(MetadataMessageType::Data),
            2 => Ok(MetadataMessageType::Reject),
            other => Err(TorrentError::protocol_violation(format!("unknown ut_metadata msg_type {}", other)).into()),
        }
    }
}

/// A ut_metadata message: a bencoded header, followed by the raw metadata
/// bytes for `Data` messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataMessage {
    pub msg_type: MetadataMessageType,
    pub piece: u32,
    pub total_size: Option<u64>,
    pub data: Bytes,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Request,
            piece,
            total_size: None,
            data: Bytes::new(),
        }
    }

    pub fn data(piece: u32, data: Bytes) -> Self {
        Self {
            msg_type: MetadataMessageType::Data,
            piece,
            total_size: Some(data.len() as u64),
            data,
        }
    }

    pub fn reject(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Reject,
            piece,
            total_size: None,
            data: Bytes::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut entries = vec![
            ("msg_type", Value::Integer(self.msg_type as i64)),
            ("piece", Value::Integer(self.piece as i64)),
        ];
        if let Some(size) = self.total_size {
            entries.push(("total_size", Value::Integer(size as i64)));
        }
        let mut out = bencode::encode(&Value::dict(entries));
        out.extend_from_slice(&self.data);
        Bytes::from(out)
    }

    /// Split the leading bencoded header from the trailing raw bytes
    pub fn decode(payload: Bytes) -> Result<Self> {
        let (header, consumed) = bencode::decode_prefix(&payload)?;

        let msg_type = header
            .get("msg_type")
            .and_then(Value::as_integer)
            .ok_or_else(|| TorrentError::protocol_violation("ut_metadata message without msg_type"))?;
        let piece = header
            .get("piece")
            .and_then(Value::as_integer)
            .and_then(|p| u32::try_from(p).ok())
            .ok_or_else(|| TorrentError::protocol_violation("ut_metadata message without a valid piece"))?;
        let total_size = header
            .get("total_size")
            .and_then(Value::as_integer)
            .and_then(|s| u64::try_from(s).ok());

        Ok(Self {
            msg_type: MetadataMessageType::try_from(msg_type)?,
            piece,
            total_size,
            data: payload.slice(consumed..),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_handshake_encoding() {
        assert_eq!(
            ExtensionHandshake::local().encode().as_ref(),
            b"d1:md11:ut_metadatai16eee"
        );
    }

    #[test]
    fn test_decode_peer_handshake() {
        let hs = ExtensionHandshake::decode(b"d1:md11:ut_metadatai3e6:ut_pexi0ee13:metadata_sizei132ee").unwrap();
        assert_eq!(hs.ut_metadata_id(), Some(3));
        assert!(!hs.extensions.contains_key("ut_pex"));
        assert_eq!(hs.metadata_size, Some(132));
    }

    #[test]
    fn test_decode_handshake_without_ut_metadata() {
        let hs = ExtensionHandshake::decode(b"d1:md6:ut_pexi1eee").unwrap();
        assert_eq!(hs.ut_metadata_id(), None);
        assert!(ExtensionHandshake::decode(b"d1:v3:abce").is_err());
    }

    #[test]
    fn test_request_encoding() {
        assert_eq!(
            MetadataMessage::request(0).encode().as_ref(),
            b"d8:msg_typei0e5:piecei0ee"
        );
    }

    #[test]
    fn test_data_split() {
        let payload = Bytes::from_static(b"d8:msg_typei1e5:piecei0e10:total_sizei8eed1:ai1ee");
        let message = MetadataMessage::decode(payload).unwrap();
        assert_eq!(message.msg_type, MetadataMessageType::Data);
        assert_eq!(message.piece, 0);
        assert_eq!(message.total_size, Some(8));
        assert_eq!(message.data.as_ref(), b"d1:ai1ee");
    }

    #[test]
    fn test_data_message_encoding() {
        let message = MetadataMessage::data(0, Bytes::from_static(b"d1:ai1ee"));
        assert_eq!(MetadataMessage::decode(message.encode()).unwrap(), message);
    }

    #[test]
    fn test_reject_and_unknown_type() {
        let reject = MetadataMessage::decode(MetadataMessage::reject(0).encode()).unwrap();
        assert_eq!(reject.msg_type, MetadataMessageType::Reject);
        assert!(MetadataMessage::decode(Bytes::from_static(b"d8:msg_typei7e5:piecei0ee")).is_err());
    }
}
