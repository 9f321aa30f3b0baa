//! Batch runner: many references, bounded concurrency, per-item outcomes
//!
//! Single-file mode goes through the same loop with one item and
//! [`FailurePolicy::AbortOnFirst`].

use crate::download::{DownloadOptions, DownloadOutcome, Downloader};
use crate::error::Error;
use anyhow::{Context, Result};
use futures::future;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncReadExt;
use tracing::{error, info, info_span, warn, Instrument};

/// One non-comment line of batch input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// 1-based line number in the source
    pub line_number: usize,
    pub raw_text: String,
}

/// What to do with the rest of the run after an item fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Start no further items; items already running still finish
    AbortOnFirst,
    /// Record the failure and keep going
    IsolatePerItem,
}

/// Outcome of one item
#[derive(Debug)]
pub struct ItemReport {
    pub item: BatchItem,
    pub outcome: Result<DownloadOutcome, Error>,
}

impl ItemReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Human-readable result: site, URL, target path, success or failure
    pub fn summary(&self) -> String {
        match &self.outcome {
            Ok(done) if done.dry_run => format!(
                "'{}' from {} ({}) would be saved to '{}' (dry run)",
                done.title,
                done.site,
                done.url,
                done.path.display()
            ),
            Ok(done) => format!(
                "'{}' from {} ({}) saved to '{}' ({} bytes)",
                done.title,
                done.site,
                done.url,
                done.path.display(),
                done.bytes
            ),
            Err(err) => format!("'{}' failed: {}", self.item.raw_text, err),
        }
    }
}

/// All outcomes of a run, in input order
#[derive(Debug, Default)]
pub struct BatchResult {
    pub reports: Vec<ItemReport>,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// One line per item, prefixed with its line number
    pub fn summary_lines(&self) -> Vec<String> {
        self.reports
            .iter()
            .map(|r| format!("line {}: {}", r.item.line_number, r.summary()))
            .collect()
    }
}

/// Lines that are blank or start with `#` are skipped
pub fn parse_batch(input: &str) -> impl Iterator<Item = BatchItem> + '_ {
    input.lines().enumerate().filter_map(|(idx, line)| {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            None
        } else {
            Some(BatchItem {
                line_number: idx + 1,
                raw_text: trimmed.to_string(),
            })
        }
    })
}

/// Read the whole batch source up front; `-` means stdin.
///
/// Holding the contents in memory means edits to the file mid-run do not
/// change what gets downloaded.
pub async fn read_batch_source(source: &str) -> Result<String> {
    if source == "-" {
        info!("Using stdin for batch download");
        let mut input = String::new();
        tokio::io::stdin()
            .read_to_string(&mut input)
            .await
            .context("File could not be read: stdin")?;
        return Ok(input);
    }

    info!("Using file '{}' for batch download", source);
    tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("File could not be read: {}", source))
}

/// Run every item through `downloader`, at most `jobs` at a time.
///
/// Reports come back in input order regardless of completion order.
pub async fn run_batch<I>(
    downloader: &Downloader,
    items: I,
    options: &DownloadOptions,
    jobs: usize,
    policy: FailurePolicy,
) -> BatchResult
where
    I: IntoIterator<Item = BatchItem>,
{
    let aborted = AtomicBool::new(false);

    let mut running = stream::iter(items)
        .take_while(|_| future::ready(!aborted.load(Ordering::SeqCst)))
        .map(|item| run_item(downloader, item, options, policy))
        .buffer_unordered(jobs.max(1));

    let mut reports = Vec::new();
    while let Some(report) = running.next().await {
        if !report.is_success() && policy == FailurePolicy::AbortOnFirst {
            aborted.store(true, Ordering::SeqCst);
        }
        reports.push(report);
    }

    reports.sort_by_key(|r| r.item.line_number);
    BatchResult { reports }
}

/// A collision is only a warning when other items carry on; on its own it
/// is the failure of the run.
async fn run_item(
    downloader: &Downloader,
    item: BatchItem,
    options: &DownloadOptions,
    policy: FailurePolicy,
) -> ItemReport {
    let span = info_span!("item", line = item.line_number, raw = %item.raw_text);
    async move {
        info!("Processing '{}' at line {}", item.raw_text, item.line_number);
        let outcome = downloader.fetch(&item.raw_text, options).await;
        if let Err(err) = &outcome {
            if err.is_file_exists() && policy == FailurePolicy::IsolatePerItem {
                warn!("{}", err);
            } else {
                error!("{}", err);
            }
        }
        ItemReport { item, outcome }
    }
    .instrument(span)
    .await
}
