//! Logging setup
//!
//! Library code logs through `tracing` macros. The binary calls [`init`] once to
//! install a formatter writing to stderr, or to a log file when one is given.
//! `NTFSTRACE_LOG` overrides the level picked from the verbosity flag.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted before the verbosity flag
pub const LOG_ENV: &str = "NTFSTRACE_LOG";

/// Log levels selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Map a `-v` count onto a level (0 = warn)
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("ntfstrace={}", level)))
}

/// Initialize the global subscriber.
///
/// Calling this more than once is harmless; only the first call installs a
/// subscriber.
pub fn init(level: LogLevel, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = filter_for(level);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
            eprintln!("[ntfstrace] Logging to: {}", path.display());
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }

    Ok(())
}

/// Write a separator line for readability
pub fn separator(label: &str) {
    info!("========== {} ==========", label);
}
