//! Central JSONL file output.
//!
//! Multi-process safe via append-only writes flushed per line.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::json_layer::JsonLayer;
use crate::{InitError, LogConfig};

/// `~/.alarm-engine/logs/engine.jsonl`, if a home directory is known.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".alarm-engine").join("logs").join("engine.jsonl"))
}

/// Appending file writer shared by every clone.
#[derive(Clone)]
pub struct CentralLogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl CentralLogWriter {
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl Write for CentralLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        // Other processes tail the same file; make each line visible at once.
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// [`MakeWriter`] handing out clones of one [`CentralLogWriter`].
#[derive(Clone)]
pub struct WriterFactory {
    writer: CentralLogWriter,
}

impl WriterFactory {
    pub fn new(writer: CentralLogWriter) -> Self {
        Self { writer }
    }
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = CentralLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub(crate) fn init_file_subscriber(config: &LogConfig) -> Result<PathBuf, InitError> {
    let log_path = match &config.log_path {
        Some(path) => path.clone(),
        None => default_log_path().ok_or(InitError::NoHomeDir)?,
    };
    let writer = CentralLogWriter::new(&log_path).map_err(|source| InitError::Open {
        path: log_path.clone(),
        source,
    })?;

    let json_layer = JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_ansi(true)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer.with_filter(env_filter(&config.default_level)))
        .with(stderr_layer)
        .try_init()
        .map_err(|e| InitError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        log_path = %log_path.display(),
        "observability initialized"
    );
    Ok(log_path)
}
