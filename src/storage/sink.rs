//! Output sinks for validated pieces
//!
//! Pieces are appended in index order at an implicit sequential offset.
//! Only hash-checked data ever reaches a sink.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::error::TorrentError;

/// Destination for downloaded content
#[async_trait]
pub trait PieceSink: Send {
    /// Append the next piece
    async fn write_piece(&mut self, index: u32, data: &Bytes) -> Result<()>;

    /// Flush everything written so far
    async fn finish(&mut self) -> Result<()>;
}

/// Sink writing to a file on disk, truncating any previous content
pub struct FileSink {
    path: PathBuf,
    file: fs::File,
    written: u64,
}

impl FileSink {
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create directory '{}': {}", parent.display(), e);
                TorrentError::storage_error_full("Failed to create directory", parent.display().to_string(), e.to_string())
            })?;
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| {
                error!("Failed to create file '{}': {}", path.display(), e);
                TorrentError::storage_error_full("Failed to create file", path.display().to_string(), e.to_string())
            })?;

        debug!("Opened output file {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written: 0,
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl PieceSink for FileSink {
    async fn write_piece(&mut self, index: u32, data: &Bytes) -> Result<()> {
        self.file.write_all(data).await.map_err(|e| {
            error!("Failed to write piece {} to '{}': {}", index, self.path.display(), e);
            TorrentError::storage_error_full(
                format!("Failed to write piece {}", index),
                self.path.display().to_string(),
                e.to_string(),
            )
        })?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.file.flush().await.map_err(|e| {
            error!("Failed to flush file '{}': {}", self.path.display(), e);
            TorrentError::storage_error_full("Failed to flush file", self.path.display().to_string(), e.to_string())
        })?;
        info!("Wrote {} bytes to {}", self.written, self.path.display());
        Ok(())
    }
}

/// In-memory sink
#[async_trait]
impl PieceSink for Vec<u8> {
    async fn write_piece(&mut self, _index: u32, data: &Bytes) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Write pieces to a sink in the order given, then finish it
pub async fn write_pieces<S: PieceSink + ?Sized>(pieces: &[Bytes], sink: &mut S) -> Result<()> {
    for (index, piece) in pieces.iter().enumerate() {
        sink.write_piece(index as u32, piece).await?;
    }
    sink.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("mini-torrent-sink-{}-{}", std::process::id(), rand::random::<u32>()))
            .join(name)
    }

    #[tokio::test]
    async fn test_vec_sink_appends_in_order() {
        let mut sink = Vec::new();
        let pieces = vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd"), Bytes::from_static(b"e")];
        write_pieces(&pieces, &mut sink).await.unwrap();
        assert_eq!(sink, b"abcde");
    }

    #[tokio::test]
    async fn test_file_sink_writes_and_truncates() {
        let path = temp_path("out.bin");
        {
            let mut sink = FileSink::create(&path).await.unwrap();
            write_pieces(&[Bytes::from_static(b"old content here")], &mut sink).await.unwrap();
        }

        let mut sink = FileSink::create(&path).await.unwrap();
        write_pieces(&[Bytes::from_static(b"new"), Bytes::from_static(b"!")], &mut sink)
            .await
            .unwrap();
        assert_eq!(sink.bytes_written(), 4);
        drop(sink);

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"new!");
        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }
}
