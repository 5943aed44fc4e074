//! Log sink lifecycle.
//!
//! [`init`] opens one timestamped file per run and installs two layers: the
//! file receives everything at debug level (or whatever `RUST_LOG` says), the
//! console only errors. Keep the returned [`LogGuard`] alive for the whole run;
//! dropping it flushes the file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const DEFAULT_FILE_FILTER: &str = "debug,hyper=info,hyper_util=info,reqwest=info,rustls=info,tungstenite=info,tokio_tungstenite=info";

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub dir: PathBuf,
    pub console_level: LevelFilter,
}

impl LogConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            console_level: LevelFilter::ERROR,
        }
    }
}

pub struct LogGuard {
    file: Arc<File>,
    path: PathBuf,
}

impl LogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        let _ = self.file.sync_all();
    }
}

pub fn log_file_name(at: &DateTime<Local>) -> String {
    format!("log_{}.log", at.format("%Y%m%d_%H%M%S"))
}

/// Creates `dir` if needed and opens this run's log file for appending.
pub fn open_sink(dir: &Path, at: &DateTime<Local>) -> std::io::Result<(Arc<File>, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(log_file_name(at));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((Arc::new(file), path))
}

pub fn init(cfg: &LogConfig) -> anyhow::Result<LogGuard> {
    let (file, path) = open_sink(&cfg.dir, &Local::now())?;

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILE_FILTER));

    let file_layer = fmt::layer()
        .with_writer(file.clone())
        .with_ansi(false)
        .with_target(true)
        .with_filter(file_filter);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(cfg.console_level);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    Ok(LogGuard { file, path })
}
