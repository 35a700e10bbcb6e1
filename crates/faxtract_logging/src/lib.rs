//! Shared logging utilities for Faxtract binaries.
//!
//! One file layer under the Faxtract home logs directory plus a stderr
//! layer. The file is size-capped with a single `.old` rotation so a
//! long-running service never fills the disk.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use faxtract_protocol::paths::default_logs_dir;

const DEFAULT_LOG_FILTER: &str = "faxtract=info,faxtract_pipeline=info,faxtract_queue=info";
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for a Faxtract binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a capped file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = default_logs_dir();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let writer = CappedFileWriter::open(log_dir, config.app_name)
        .context("Failed to open log file")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

struct CappedFile {
    path: PathBuf,
    file: File,
    written: u64,
}

impl CappedFile {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();
        let old = self.path.with_extension("log.old");
        if old.exists() {
            fs::remove_file(&old)?;
        }
        fs::rename(&self.path, &old)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for CappedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Clone)]
struct CappedFileWriter {
    inner: Arc<Mutex<CappedFile>>,
}

impl CappedFileWriter {
    fn open(dir: PathBuf, app_name: &str) -> Result<Self> {
        let name: String = app_name
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        let file = CappedFile::open(dir.join(format!("{name}.log")))
            .with_context(|| format!("Failed to open log file for {app_name}"))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct CappedFileGuard {
    inner: Arc<Mutex<CappedFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CappedFileWriter {
    type Writer = CappedFileGuard;

    fn make_writer(&'a self) -> Self::Writer {
        CappedFileGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for CappedFileGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}
