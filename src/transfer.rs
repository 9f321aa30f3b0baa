//! Streaming file transfer and integrity checking

use crate::client::Session;
use crate::error::TransferError;
use async_trait::async_trait;
use futures::StreamExt;
use sha1::{Digest, Sha1};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Read buffer size for hashing
const BLOCKSIZE: usize = 65536;

/// Progress callback, called with the size of each written chunk
pub type Progress<'a> = &'a (dyn Fn(u64) + Send + Sync);

#[async_trait]
pub trait Transfer: Send + Sync {
    /// Stream `url` into the already-opened `file`; returns bytes written
    async fn stream_to_file(
        &self,
        session: &Session,
        url: &str,
        file: &mut File,
        progress: Progress<'_>,
    ) -> Result<u64, TransferError>;
}

/// [`Transfer`] over the session's HTTP client
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpTransfer;

#[async_trait]
impl Transfer for HttpTransfer {
    async fn stream_to_file(
        &self,
        session: &Session,
        url: &str,
        file: &mut File,
        progress: Progress<'_>,
    ) -> Result<u64, TransferError> {
        let response = session.http().get(url).send().await?;

        if !response.status().is_success() {
            return Err(TransferError::Status(response.status()));
        }
        debug!(
            "Transfer started: {} ({:?} bytes announced)",
            url,
            response.content_length()
        );

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress(chunk.len() as u64);
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(written)
    }
}

/// SHA-1 of a file on disk, lowercase hex
///
/// MediaWiki reports SHA-1 for every file revision, so that is what we
/// compare against.
pub async fn sha1_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; BLOCKSIZE];

    loop {
        let count = file.read(&mut buffer).await?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(hex::encode(hasher.finalize()))
}
