//! HTTP transport abstraction for tracker requests
//!
//! The tracker client only needs "send GET, receive status and body". This
//! trait lets the announce logic run against reqwest in production and an
//! in-memory stub in tests.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::TorrentError;

/// Timeout applied to the whole tracker request
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking request/response HTTP transport
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a GET request for a fully built URL
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// `HttpTransport` backed by a reqwest client
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| {
                error!("Failed to build HTTP client: {}", e);
                TorrentError::from(e)
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(TorrentError::from)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(TorrentError::from)?;
        debug!("Tracker responded with status {} and {} bytes", status, body.len());
        Ok(HttpResponse { status, body })
    }
}
