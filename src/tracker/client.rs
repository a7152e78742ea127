//! HTTP tracker announce
//!
//! Builds the announce URL, sends it through an `HttpTransport` and decodes
//! the compact peer list from the bencoded response.

use anyhow::Result;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::bencode::{self, Value};
use crate::error::TorrentError;
use crate::tracker::transport::HttpTransport;

/// Parameters of one announce request
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

impl AnnounceRequest {
    /// Fresh download: nothing transferred yet
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
        }
    }
}

/// Tracker client over a pluggable HTTP transport
#[derive(Clone)]
pub struct TrackerClient {
    transport: Arc<dyn HttpTransport>,
}

impl TrackerClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Announce to `tracker_url` and return the peers it lists. An empty list
    /// is a valid answer.
    pub async fn announce(&self, tracker_url: &str, request: &AnnounceRequest) -> Result<Vec<SocketAddrV4>> {
        let url = build_announce_url(tracker_url, request)?;
        info!("Announcing to tracker {}", tracker_url);

        let response = self.transport.get(&url).await?;
        if !response.is_success() {
            warn!("Tracker {} answered HTTP {}", tracker_url, response.status);
            return Err(TorrentError::tracker_error_with_url(
                format!("HTTP status {}", response.status),
                tracker_url,
            )
            .into());
        }

        let peers = parse_announce_response(&response.body).map_err(|e| {
            warn!("Bad tracker response from {}: {}", tracker_url, e);
            e
        })?;
        info!("Tracker returned {} peer(s)", peers.len());
        Ok(peers)
    }
}

/// Append the announce parameters to the tracker URL. The binary hash and
/// peer id are percent-encoded byte for byte.
pub fn build_announce_url(tracker_url: &str, request: &AnnounceRequest) -> Result<String> {
    let parsed = Url::parse(tracker_url).map_err(|e| {
        TorrentError::tracker_error_full("invalid announce URL", tracker_url, e.to_string())
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(TorrentError::tracker_error_with_url(
            format!("unsupported tracker scheme '{}'", parsed.scheme()),
            tracker_url,
        )
        .into());
    }

    let separator = if parsed.query().is_some() { '&' } else { '?' };
    let url = format!(
        "{}{}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
        tracker_url,
        separator,
        urlencoding::encode_binary(&request.info_hash),
        urlencoding::encode_binary(&request.peer_id),
        request.port,
        request.uploaded,
        request.downloaded,
        request.left
    );
    debug!("Announce URL: {}", url);
    Ok(url)
}

/// Decode a bencoded announce response into peer addresses
pub fn parse_announce_response(body: &[u8]) -> Result<Vec<SocketAddrV4>> {
    let value = bencode::decode(body)
        .map_err(|e| TorrentError::tracker_error(format!("response is not bencode: {}", e)))?;
    if value.as_dict().is_none() {
        return Err(TorrentError::tracker_error("response is not a dictionary").into());
    }

    if let Some(failure) = value.get("failure reason") {
        let reason = failure
            .as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_else(|| "unspecified".to_string());
        return Err(TorrentError::tracker_error(format!("tracker failure: {}", reason)).into());
    }

    let peers = value
        .get("peers")
        .and_then(Value::as_bytes)
        .ok_or_else(|| TorrentError::tracker_error("response has no compact peers field"))?;
    parse_compact_peers(peers)
}

/// Split a compact peers string into 6-byte `ip:port` entries
pub fn parse_compact_peers(data: &[u8]) -> Result<Vec<SocketAddrV4>> {
    if data.len() % 6 != 0 {
        return Err(TorrentError::tracker_error(format!(
            "compact peers length {} is not a multiple of 6",
            data.len()
        ))
        .into());
    }

    Ok(data
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddrV4::new(ip, port)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::transport::HttpResponse;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    struct StubTransport {
        status: u16,
        body: Vec<u8>,
        requested: Mutex<Vec<String>>,
    }

    impl StubTransport {
        fn new(status: u16, body: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                status,
                body: body.to_vec(),
                requested: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn get(&self, url: &str) -> Result<HttpResponse> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(HttpResponse {
                status: self.status,
                body: Bytes::from(self.body.clone()),
            })
        }
    }

    fn request() -> AnnounceRequest {
        let mut info_hash = [0u8; 20];
        info_hash[0] = 0x00;
        info_hash[1] = 0xff;
        info_hash[2] = b'a';
        info_hash[3] = b' ';
        AnnounceRequest::new(info_hash, *b"-MT0001-abcdefghijkl", 6881, 1000)
    }

    fn is_tracker_error(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<TorrentError>(), Some(TorrentError::TrackerError { .. }))
    }

    #[test]
    fn test_parse_compact_peers() {
        let peers = parse_compact_peers(&[192, 168, 1, 1, 0x1A, 0xE1, 10, 0, 0, 5, 0x1A, 0xE2]).unwrap();
        let rendered: Vec<String> = peers.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, vec!["192.168.1.1:6881", "10.0.0.5:6882"]);
    }

    #[test]
    fn test_parse_compact_peers_bad_length() {
        assert!(is_tracker_error(&parse_compact_peers(&[1, 2, 3, 4, 5]).unwrap_err()));
        assert!(parse_compact_peers(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_announce_url_encoding() {
        let url = build_announce_url("http://tracker.example.com/announce", &request()).unwrap();
        assert!(url.starts_with("http://tracker.example.com/announce?info_hash=%00%FFa%20%00"));
        assert!(url.contains("&peer_id=-MT0001-abcdefghijkl&"));
        assert!(url.ends_with("&port=6881&uploaded=0&downloaded=0&left=1000&compact=1"));
    }

    #[test]
    fn test_announce_url_extends_existing_query() {
        let url = build_announce_url("http://t.example.com/announce?key=1", &request()).unwrap();
        assert!(url.starts_with("http://t.example.com/announce?key=1&info_hash="));
    }

    #[test]
    fn test_announce_url_rejects_non_http() {
        assert!(is_tracker_error(&build_announce_url("udp://t:80", &request()).unwrap_err()));
        assert!(is_tracker_error(&build_announce_url("not a url", &request()).unwrap_err()));
    }

    #[tokio::test]
    async fn test_announce_returns_peers() {
        let mut body = b"d8:intervali60e5:peers12:".to_vec();
        body.extend_from_slice(&[127, 0, 0, 1, 0x1A, 0xE1, 127, 0, 0, 2, 0x1A, 0xE2]);
        body.push(b'e');
        let transport = StubTransport::new(200, &body);
        let client = TrackerClient::new(transport.clone());

        let peers = client.announce("http://t.example.com/announce", &request()).await.unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1].to_string(), "127.0.0.2:6882");
        assert_eq!(transport.requested.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_announce_empty_peer_list() {
        let client = TrackerClient::new(StubTransport::new(200, b"d5:peers0:e"));
        let peers = client.announce("http://t.example.com/announce", &request()).await.unwrap();
        assert!(peers.is_empty());
    }

    #[tokio::test]
    async fn test_announce_failures() {
        let cases: Vec<(u16, &[u8])> = vec![
            (500, b"d5:peers0:e"),
            (200, b"d14:failure reason12:unregisterede"),
            (200, b"not bencode"),
            (200, b"d8:intervali60ee"),
            (200, b"le"),
        ];
        for (status, body) in cases {
            let client = TrackerClient::new(StubTransport::new(status, body));
            let err = client.announce("http://t.example.com/announce", &request()).await.unwrap_err();
            assert!(is_tracker_error(&err), "status {} body {:?}", status, body);
        }
    }
}
