//! Download coordination: metadata lookup, output path, collision policy,
//! transfer and verification for one file reference.

use crate::client::{Credentials, Session, SessionCache, SiteKey, WikiApi};
use crate::error::{ClientError, DownloadError, Error, ResolutionError};
use crate::resolve::{resolve, FileReference};
use crate::transfer::{sha1_file, Transfer};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tracing::{debug, error, info, warn};

/// Options shared by every download in a run
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// `--site`; ignored for URL references
    pub site: Option<String>,
    /// `--path`; ignored for URL references
    pub path: Option<String>,
    pub credentials: Option<Credentials>,
    /// `--output`; single-file mode only
    pub output: Option<PathBuf>,
    /// Directory relative output paths resolve against
    pub directory: Option<PathBuf>,
    pub force: bool,
    pub dry_run: bool,
}

/// A reference that has been looked up and is ready to fetch
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub reference: FileReference,
    pub remote_url: String,
    pub output_path: PathBuf,
    pub size_hint: Option<u64>,
    pub sha1: Option<String>,
}

/// What a successful download produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub title: String,
    pub site: String,
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub dry_run: bool,
}

/// How transfer progress is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Hidden,
    /// Bars disappear once a transfer finishes
    Transient,
    /// Bars stay on screen (verbose runs)
    Persistent,
}

pub struct Downloader {
    sessions: SessionCache,
    transfer: Arc<dyn Transfer>,
    bars: MultiProgress,
    progress: ProgressMode,
}

impl Downloader {
    pub fn new(api: Arc<dyn WikiApi>, transfer: Arc<dyn Transfer>) -> Self {
        Self {
            sessions: SessionCache::new(api),
            transfer,
            bars: MultiProgress::new(),
            progress: ProgressMode::Hidden,
        }
    }

    pub fn with_progress(mut self, progress: ProgressMode) -> Self {
        self.progress = progress;
        self
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Resolve `raw` and download it
    pub async fn fetch(&self, raw: &str, options: &DownloadOptions) -> Result<DownloadOutcome, Error> {
        let reference = resolve(raw, options.site.as_deref(), options.path.as_deref())?;
        debug!(
            "Resolved '{}' to {} at {}{}",
            raw,
            reference.title,
            reference.site_url(),
            reference.script_path
        );
        self.download(&reference, options).await
    }

    /// Download one resolved reference.
    ///
    /// An existing output file fails with [`DownloadError::FileExists`]
    /// before any network traffic unless `force` is set. Any failure after
    /// the output file was opened removes it.
    pub async fn download(
        &self,
        reference: &FileReference,
        options: &DownloadOptions,
    ) -> Result<DownloadOutcome, Error> {
        let output_path = output_path(reference, options);

        if !options.force && fs::try_exists(&output_path).await.unwrap_or(false) {
            return Err(DownloadError::FileExists(output_path).into());
        }

        let (target, session) = self.prepare(reference, options, output_path).await?;

        let mut message = format!(
            "Downloading '{}' ({} bytes) from {}",
            reference.name(),
            target
                .size_hint
                .map_or_else(|| "unknown".to_string(), |s| s.to_string()),
            reference.site_host
        );
        if options.output.is_some() || options.directory.is_some() {
            message.push_str(&format!(" to '{}'", target.output_path.display()));
        }
        info!("{}", message);
        info!("{}", target.remote_url);

        if options.dry_run {
            warn!("Dry run; download skipped");
            return Ok(outcome(&target, 0, true));
        }

        let bytes = self.transfer(&session, &target, options.force).await?;
        info!(
            "'{}' downloaded to '{}'",
            reference.name(),
            target.output_path.display()
        );
        Ok(outcome(&target, bytes, false))
    }

    /// Authenticate (once per site) and look up the file
    async fn prepare(
        &self,
        reference: &FileReference,
        options: &DownloadOptions,
        output_path: PathBuf,
    ) -> Result<(DownloadTarget, Arc<Session>), Error> {
        let key = SiteKey::for_reference(reference, options.credentials.as_ref());
        let session = self
            .sessions
            .session(&key)
            .await
            .map_err(|err| site_error(reference, options, err))?;

        let info = self
            .sessions
            .api()
            .get_file_info(&session, &reference.title)
            .await
            .map_err(|err| site_error(reference, options, err))?;

        if info.canonical_title != reference.title {
            debug!(
                "Wiki normalized '{}' to '{}'",
                reference.title, info.canonical_title
            );
        }

        let target = DownloadTarget {
            reference: reference.clone(),
            remote_url: info.url,
            output_path,
            size_hint: info.size,
            sha1: info.sha1,
        };
        Ok((target, session))
    }

    async fn transfer(
        &self,
        session: &Session,
        target: &DownloadTarget,
        force: bool,
    ) -> Result<u64, DownloadError> {
        let path = &target.output_path;
        let mut file = open_output(path, force).await?;

        let bar = self.progress_bar(target);
        let progress = |n: u64| bar.inc(n);
        let result = self
            .transfer
            .stream_to_file(session, &target.remote_url, &mut file, &progress)
            .await;
        drop(file);

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(source) => {
                bar.abandon();
                remove_partial(path).await;
                return Err(DownloadError::TransferFailed {
                    url: target.remote_url.clone(),
                    source,
                });
            }
        };
        self.finish_bar(bar);

        if let Some(expected) = &target.sha1 {
            verify(path, expected).await?;
        }

        Ok(bytes)
    }

    fn progress_bar(&self, target: &DownloadTarget) -> ProgressBar {
        if self.progress == ProgressMode::Hidden {
            return ProgressBar::hidden();
        }
        let bar = match target.size_hint {
            Some(size) => ProgressBar::new(size),
            None => ProgressBar::new_spinner(),
        };
        let style = ProgressStyle::with_template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(target.reference.name().to_string());
        self.bars.add(bar)
    }

    fn finish_bar(&self, bar: ProgressBar) {
        match self.progress {
            ProgressMode::Persistent => bar.finish(),
            _ => bar.finish_and_clear(),
        }
    }
}

/// `--output` if given, otherwise the title without its namespace;
/// relative paths land in `directory` when one is set.
pub fn output_path(reference: &FileReference, options: &DownloadOptions) -> PathBuf {
    let base = options
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(reference.name()));
    match &options.directory {
        Some(dir) if base.is_relative() => dir.join(base),
        _ => base,
    }
}

/// Without `force` the file is created exclusively, so two workers can
/// never both claim the same path.
async fn open_output(path: &Path, force: bool) -> Result<File, DownloadError> {
    let mut open = OpenOptions::new();
    open.write(true);
    if force {
        open.create(true).truncate(true);
    } else {
        open.create_new(true);
    }
    open.open(path).await.map_err(|source| {
        if source.kind() == ErrorKind::AlreadyExists {
            DownloadError::FileExists(path.to_path_buf())
        } else {
            error!("File could not be written: {}", source);
            DownloadError::Write {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

async fn verify(path: &Path, expected: &str) -> Result<(), DownloadError> {
    let actual = sha1_file(path).await.map_err(|source| {
        error!("File downloaded but could not be verified: {}", source);
        DownloadError::Write {
            path: path.to_path_buf(),
            source,
        }
    })?;

    info!("Downloaded file SHA1 is {}", actual);
    info!("Server file SHA1 is {}", expected);

    if actual.eq_ignore_ascii_case(expected) {
        info!("Hashes match!");
        return Ok(());
    }

    remove_partial(path).await;
    Err(DownloadError::HashMismatch {
        expected: expected.to_string(),
        actual,
    })
}

async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed incomplete file '{}'", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(
            "Could not remove incomplete file '{}': {}",
            path.display(),
            err
        ),
    }
}

fn site_error(reference: &FileReference, options: &DownloadOptions, err: ClientError) -> Error {
    match err {
        ClientError::LoginRejected(reason) => ResolutionError::AuthFailure {
            site: reference.site_host.clone(),
            user: options
                .credentials
                .as_ref()
                .map(|c| c.username.clone())
                .unwrap_or_default(),
            reason,
        }
        .into(),
        err => {
            if err.is_access_denied() {
                error!("Access denied. Try providing credentials with --username and --password.");
            }
            DownloadError::from(err).into()
        }
    }
}

fn outcome(target: &DownloadTarget, bytes: u64, dry_run: bool) -> DownloadOutcome {
    DownloadOutcome {
        title: target.reference.title.clone(),
        site: target.reference.site_host.clone(),
        url: target.remote_url.clone(),
        path: target.output_path.clone(),
        bytes,
        dry_run,
    }
}
