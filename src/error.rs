//! Error taxonomy and process exit codes
//!
//! Per-item failures are [`Error`], which is either a [`ResolutionError`]
//! (the reference itself, or the credentials, are unusable) or a
//! [`DownloadError`] (the wiki or the transfer let us down). Process-level
//! failures live in the binary as `anyhow` errors.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn a user-supplied reference into a usable target
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Bare title without a `File:`/`Image:` prefix
    #[error("Could not parse input '{0}' as a file: missing File: or Image: prefix")]
    MissingNamespace(String),

    /// Prefix present but the name is not a valid file name
    #[error("Could not parse input '{raw}' as a file: {reason}")]
    InvalidTitle { raw: String, reason: &'static str },

    /// URL without an identifiable file title
    #[error("Could not find a file title in URL '{0}'")]
    MalformedUrl(String),

    /// Credentials were supplied and rejected
    #[error("Could not log in to {site} as '{user}': {reason}")]
    AuthFailure {
        site: String,
        user: String,
        reason: String,
    },
}

/// Errors raised by the MediaWiki API collaborator
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Could not connect to {site}: {source}")]
    Connect {
        site: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Could not reach {url} ({status}); check the value of --path")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("API error {code}: {info}")]
    Api { code: String, info: String },

    #[error("Unexpected API response: {0}")]
    InvalidResponse(String),

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("No file named '{0}'")]
    NotFound(String),

    #[error("Invalid API endpoint '{0}'")]
    Endpoint(String),
}

impl ClientError {
    /// API error codes MediaWiki uses for private wikis
    pub fn is_access_denied(&self) -> bool {
        matches!(self, ClientError::Api { code, .. } if code == "readapidenied" || code == "permissiondenied")
    }
}

/// Errors raised while streaming bytes to disk
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("write error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-item download failure, isolated at the batch boundary
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The wiki has no file by that name
    #[error("Target '{0}' does not appear to be a valid file")]
    NotFound(String),

    /// Output path already exists and `--force` was not given
    #[error("File '{}' already exists, skipping download (use -f to ignore)", .0.display())]
    FileExists(PathBuf),

    /// Transfer failed partway; the partial file has been removed
    #[error("Download of '{url}' failed: {source}")]
    TransferFailed {
        url: String,
        #[source]
        source: TransferError,
    },

    /// Downloaded bytes do not match the server's SHA-1
    #[error("Hash mismatch! Downloaded file may be corrupt (expected {expected}, got {actual})")]
    HashMismatch { expected: String, actual: String },

    /// Output file could not be created or verified
    #[error("File '{}' could not be written: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Connection or API failure talking to the wiki
    #[error(transparent)]
    Site(ClientError),
}

impl From<ClientError> for DownloadError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(title) => DownloadError::NotFound(title),
            other => DownloadError::Site(other),
        }
    }
}

/// Failure of a single reference, resolution or download
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Download(DownloadError::NotFound(_)))
    }

    pub fn is_file_exists(&self) -> bool {
        matches!(self, Error::Download(DownloadError::FileExists(_)))
    }
}

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every requested download succeeded
    Success,
    /// Single-file mode: the only item failed
    ItemFailed,
    /// Bad arguments (clap exits with this code on its own)
    Usage,
    /// Batch mode: at least one item failed
    BatchFailed,
    /// Process-level failure before or outside any item
    Fatal,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::ItemFailed => 1,
            ExitStatus::Usage => 2,
            ExitStatus::BatchFailed => 3,
            ExitStatus::Fatal => 4,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}
