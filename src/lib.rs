//! wikiget: download files from MediaWiki sites
//!
//! Takes a file name (`File:Example.jpg`) or the URL of its description
//! page, looks the file up through the wiki's API and streams it to disk.
//! Batch mode does the same for a list of references, several at a time.
//!
//! - resolve: user input to site + title, no network
//! - download: metadata lookup, collision policy, transfer, verification
//! - batch: bounded-concurrency runner with per-item outcomes

pub mod batch;
pub mod client;
pub mod download;
pub mod error;
pub mod logging;
pub mod resolve;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use batch::{parse_batch, read_batch_source, run_batch, BatchItem, BatchResult, FailurePolicy};
pub use client::{ClientConfig, Credentials, MediaWikiClient, WikiApi, USER_AGENT};
pub use download::{DownloadOptions, DownloadOutcome, Downloader, ProgressMode};
pub use error::{DownloadError, Error, ExitStatus, ResolutionError};
pub use resolve::{resolve, FileReference, DEFAULT_PATH, DEFAULT_SITE};
pub use transfer::{HttpTransfer, Transfer};
