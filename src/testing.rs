//! In-memory wiki and transfer fakes for unit tests

use crate::client::{FileInfo, Session, SiteKey, WikiApi};
use crate::error::{ClientError, TransferError};
use crate::transfer::{Progress, Transfer};
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const UPLOAD_HOST: &str = "https://upload.example.org/";

struct StoredFile {
    content: Vec<u8>,
    sha1: String,
    delay: Duration,
}

pub struct FakeWiki {
    files: Mutex<HashMap<String, StoredFile>>,
    logins: AtomicUsize,
    lookups: AtomicUsize,
    reject_logins: bool,
}

impl FakeWiki {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            logins: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
            reject_logins: false,
        }
    }

    pub fn with_file(self, title: &str, content: &[u8]) -> Self {
        self.replace(title, content);
        self
    }

    /// Override the reported SHA-1
    pub fn with_sha1(self, title: &str, sha1: &str) -> Self {
        if let Some(file) = self.files.lock().unwrap().get_mut(title) {
            file.sha1 = sha1.to_string();
        }
        self
    }

    /// Make metadata lookups for `title` slow
    pub fn with_delay(self, title: &str, millis: u64) -> Self {
        if let Some(file) = self.files.lock().unwrap().get_mut(title) {
            file.delay = Duration::from_millis(millis);
        }
        self
    }

    pub fn rejecting_logins(mut self) -> Self {
        self.reject_logins = true;
        self
    }

    pub fn replace(&self, title: &str, content: &[u8]) {
        let sha1 = hex::encode(Sha1::digest(content));
        self.files.lock().unwrap().insert(
            title.to_string(),
            StoredFile {
                content: content.to_vec(),
                sha1,
                delay: Duration::ZERO,
            },
        );
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn content_for(&self, url: &str) -> Option<Vec<u8>> {
        let title = url.strip_prefix(UPLOAD_HOST)?;
        let files = self.files.lock().unwrap();
        files.get(title).map(|f| f.content.clone())
    }
}

#[async_trait]
impl WikiApi for FakeWiki {
    async fn authenticate(&self, site: &SiteKey) -> Result<Session, ClientError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if site.credentials.is_some() && self.reject_logins {
            return Err(ClientError::LoginRejected(
                "Incorrect username or password entered.".to_string(),
            ));
        }
        Ok(Session::new(
            site.host.clone(),
            site.api_url()?,
            reqwest::Client::new(),
        ))
    }

    async fn get_file_info(&self, _session: &Session, title: &str) -> Result<FileInfo, ClientError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let found = {
            let files = self.files.lock().unwrap();
            files
                .get(title)
                .map(|f| (f.content.len() as u64, f.sha1.clone(), f.delay))
        };
        let Some((size, sha1, delay)) = found else {
            return Err(ClientError::NotFound(title.to_string()));
        };
        tokio::time::sleep(delay).await;
        Ok(FileInfo {
            canonical_title: title.to_string(),
            url: format!("{}{}", UPLOAD_HOST, title),
            size: Some(size),
            sha1: Some(sha1),
        })
    }
}

pub struct FakeTransfer {
    wiki: Arc<FakeWiki>,
    fail_after: Option<usize>,
    calls: AtomicUsize,
}

impl FakeTransfer {
    pub fn new(wiki: &Arc<FakeWiki>) -> Self {
        Self {
            wiki: Arc::clone(wiki),
            fail_after: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Write `n` bytes, then fail as if the connection dropped
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transfer for FakeTransfer {
    async fn stream_to_file(
        &self,
        _session: &Session,
        url: &str,
        file: &mut File,
        progress: Progress<'_>,
    ) -> Result<u64, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = self
            .wiki
            .content_for(url)
            .ok_or(TransferError::Status(reqwest::StatusCode::NOT_FOUND))?;

        if let Some(n) = self.fail_after {
            file.write_all(&content[..n.min(content.len())]).await?;
            file.flush().await?;
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )));
        }

        file.write_all(&content).await?;
        file.flush().await?;
        progress(content.len() as u64);
        Ok(content.len() as u64)
    }
}
