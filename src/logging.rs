//! Console and logfile logging
//!
//! Console verbosity follows `-q`/`-v`/`-vv`; the logfile, when given,
//! always records this crate at debug level with timestamps and is only
//! ever appended to.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const FILE_DIRECTIVE: &str = "warn,wikiget=debug";

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Number of `-v` flags
    pub verbosity: u8,
    pub quiet: bool,
    pub logfile: Option<PathBuf>,
}

/// Console filter for the given flags.
///
/// `-v` adds this crate's resolution and transfer details; `-vv` opens up
/// debug output from every crate, HTTP internals included.
pub fn console_directive(verbosity: u8, quiet: bool) -> &'static str {
    match (verbosity, quiet) {
        (0, true) => "error",
        (0, false) => "warn",
        (1, _) => "warn,wikiget=info",
        _ => "debug",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the console filter.
pub fn init(config: &LogConfig) -> Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directive(config.verbosity, config.quiet)));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_filter(console_filter);

    let logfile = match &config.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Log file could not be opened: {}", path.display()))?;
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_timer(LocalTime)
                .with_target(false)
                .with_filter(EnvFilter::new(FILE_DIRECTIVE));
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(logfile)
        .try_init()
        .context("Logging was already initialized")?;

    Ok(())
}

/// Local wall-clock timestamps for logfile lines
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}
