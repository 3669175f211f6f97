//! Shared logging utilities for Clipforge binaries.
//!
//! Installs three sinks: a size-rotated log file under the data root, stderr,
//! and an in-memory ring buffer the supervisor serves as its log tail.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod buffer;

pub use buffer::{CaptureLayer, LogBuffer};

const DEFAULT_LOG_FILTER: &str = "clipforge=info,clipforge_engine=info,clipforge_supervisor=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by Clipforge binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub logs_dir: PathBuf,
    pub verbose: bool,
}

/// Initialize tracing with a rotating file writer, stderr output and the
/// capture buffer. Returns the buffer handle for the supervisor.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogBuffer> {
    fs::create_dir_all(&config.logs_dir).with_context(|| {
        format!("Failed to create log directory: {}", config.logs_dir.display())
    })?;
    let file_writer = SharedRotatingWriter::new(config.logs_dir, config.app_name)
        .context("Failed to initialize rotating log writer")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    let buffer = LogBuffer::with_capacity(clipforge_protocol::defaults::LOG_BUFFER_CAPACITY);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(CaptureLayer::new(buffer.clone()))
        .init();

    Ok(buffer)
}

struct RotatingFileAppender {
    dir: PathBuf,
    base_name: String,
    file: Option<File>,
    current_size: u64,
}

impl RotatingFileAppender {
    fn new(dir: PathBuf, base_name: &str) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut appender = Self {
            dir,
            base_name: sanitize_name(base_name),
            file: None,
            current_size: 0,
        };
        let (file, size) = appender.open_current()?;
        appender.file = Some(file);
        appender.current_size = size;
        if appender.current_size > MAX_LOG_FILE_SIZE {
            appender.rotate()?;
        }
        Ok(appender)
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.base_name, index))
    }

    fn open_current(&self) -> io::Result<(File, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        let oldest = self.rotated_path(MAX_LOG_FILES - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for idx in (1..MAX_LOG_FILES - 1).rev() {
            let src = self.rotated_path(idx);
            if src.exists() {
                fs::rename(&src, self.rotated_path(idx + 1))?;
            }
        }
        let current = self.current_path();
        if current.exists() {
            fs::rename(current, self.rotated_path(1))?;
        }

        let (file, size) = self.open_current()?;
        self.file = Some(file);
        self.current_size = size;
        Ok(())
    }
}

impl Write for RotatingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let bytes = file.write(buf)?;
        self.current_size += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct SharedRotatingWriter {
    inner: Arc<Mutex<RotatingFileAppender>>,
}

impl SharedRotatingWriter {
    fn new(dir: PathBuf, base_name: &str) -> Result<Self> {
        let appender = RotatingFileAppender::new(dir, base_name)
            .with_context(|| format!("Failed to open log file for {}", base_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(appender)),
        })
    }
}

struct SharedRotatingWriterGuard {
    inner: Arc<Mutex<RotatingFileAppender>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRotatingWriter {
    type Writer = SharedRotatingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedRotatingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedRotatingWriterGuard {
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

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
