//! wikiget CLI
//!
//! Downloads files from MediaWiki sites by file name or description page URL.

use anyhow::Result;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use wikiget::logging::{self, LogConfig};
use wikiget::{
    parse_batch, read_batch_source, run_batch, BatchItem, ClientConfig, Credentials,
    DownloadOptions, Downloader, ExitStatus, FailurePolicy, HttpTransfer, MediaWikiClient,
    ProgressMode, USER_AGENT,
};

#[derive(Parser)]
#[command(name = "wikiget")]
#[command(version)]
#[command(about = "Download files from MediaWiki sites using the file name or description page URL")]
#[command(after_help = "Examples:
  wikiget File:Example.jpg
  wikiget --site en.wikipedia.org File:Example.jpg
  wikiget https://en.wikipedia.org/wiki/File:Example.jpg -o output.jpg
  wikiget -a -j4 batch.txt

Exit status: 0 success, 1 download failed, 2 usage error,
3 one or more batch items failed, 4 fatal error")]
struct Cli {
    /// Name of the file to download with the File: prefix, or the URL of its
    /// file description page. With --batch, a text file listing one per line
    /// ('-' reads standard input)
    #[arg(value_name = "FILE")]
    file: String,

    /// Suppress warning messages
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Print detailed information; use -vv for even more detail
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Force overwriting existing files
    #[arg(short, long)]
    force: bool,

    /// Look up files but do not download them
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// MediaWiki site to download from [default: commons.wikimedia.org]
    #[arg(short, long)]
    site: Option<String>,

    /// MediaWiki site path, where api.php is located [default: /w/]
    #[arg(short, long)]
    path: Option<String>,

    /// MediaWiki site username, for private wikis
    #[arg(long, env = "WIKIGET_USERNAME", requires = "password")]
    username: Option<String>,

    /// MediaWiki site password, for private wikis
    #[arg(long, env = "WIKIGET_PASSWORD", hide_env_values = true, requires = "username")]
    password: Option<String>,

    /// Write download to OUTPUT
    #[arg(short, long, conflicts_with = "batch")]
    output: Option<PathBuf>,

    /// Directory to save downloads in
    #[arg(short, long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Treat FILE as a text file of files to download, one URL or name per line
    #[arg(short = 'a', long)]
    batch: bool,

    /// Number of parallel downloads in batch mode (1-64)
    #[arg(short = 'j', long, default_value = "1", value_parser = clap::value_parser!(u8).range(1..=64))]
    threads: u8,

    /// Save log output to LOGFILE (appended, never truncated)
    #[arg(short, long, value_name = "LOGFILE")]
    logfile: Option<PathBuf>,

    /// Connect and API request timeout in seconds (0 disables)
    #[arg(long, default_value = "30", value_name = "SECS")]
    timeout: u64,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log = LogConfig {
        verbosity: cli.verbose,
        quiet: cli.quiet,
        logfile: cli.logfile.clone(),
    };
    if let Err(err) = logging::init(&log) {
        eprintln!("Error: {:#}", err);
        return ExitStatus::Fatal.into();
    }

    match run(cli).await {
        Ok(status) => status.into(),
        Err(err) => {
            error!("{:#}", err);
            ExitStatus::Fatal.into()
        }
    }
}

async fn run(cli: Cli) -> Result<ExitStatus> {
    // The logfile is appended to, so mark where this run starts
    info!(
        "Starting download session using wikiget {}",
        env!("CARGO_PKG_VERSION")
    );
    debug!("User agent: {}", USER_AGENT);

    let options = DownloadOptions {
        site: cli.site.clone(),
        path: cli.path.clone(),
        credentials: match (&cli.username, &cli.password) {
            (Some(user), Some(pass)) => Some(Credentials::new(user, pass)),
            _ => None,
        },
        output: cli.output.clone(),
        directory: cli.directory.clone(),
        force: cli.force,
        dry_run: cli.dry_run,
    };

    let client = MediaWikiClient::new(ClientConfig {
        user_agent: USER_AGENT.to_string(),
        timeout: (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout)),
    });
    let progress = if cli.quiet || cli.no_progress {
        ProgressMode::Hidden
    } else if cli.verbose > 0 {
        ProgressMode::Persistent
    } else {
        ProgressMode::Transient
    };
    let downloader =
        Downloader::new(Arc::new(client), Arc::new(HttpTransfer)).with_progress(progress);

    if cli.batch {
        let input = read_batch_source(&cli.file).await?;
        let result = run_batch(
            &downloader,
            parse_batch(&input),
            &options,
            usize::from(cli.threads),
            FailurePolicy::IsolatePerItem,
        )
        .await;

        if result.reports.is_empty() {
            warn!("No files to download in '{}'", cli.file);
        }
        // -q silences warnings, not the results
        for line in result.summary_lines() {
            println!("{}", line);
        }

        if result.is_success() {
            return Ok(ExitStatus::Success);
        }
        error!(
            "{} problems encountered during batch processing",
            result.failed()
        );
        return Ok(ExitStatus::BatchFailed);
    }

    let item = BatchItem {
        line_number: 1,
        raw_text: cli.file.clone(),
    };
    let result = run_batch(
        &downloader,
        [item],
        &options,
        1,
        FailurePolicy::AbortOnFirst,
    )
    .await;

    for report in &result.reports {
        println!("{}", report.summary());
    }

    Ok(if result.is_success() {
        ExitStatus::Success
    } else {
        ExitStatus::ItemFailed
    })
}
