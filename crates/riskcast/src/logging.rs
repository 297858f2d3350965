use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log file name inside the log directory
pub const LOG_FILE: &str = "riskcast.log";
/// Maximum log file size before rotation (5 MB)
const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;
/// Size to keep after rotation (1 MB of most recent logs)
const KEEP_SIZE: u64 = 1024 * 1024;

/// Trim the log to its last `keep` bytes once it grows past `max`.
/// The cut is moved forward to the next line start.
fn rotate_log_if_needed(log_path: &Path, max: u64, keep: u64) -> std::io::Result<bool> {
    if !log_path.exists() {
        return Ok(false);
    }

    let file_size = fs::metadata(log_path)?.len();
    if file_size <= max {
        return Ok(false);
    }

    let mut file = File::open(log_path)?;
    file.seek(SeekFrom::Start(file_size.saturating_sub(keep)))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    drop(file);

    let skip = buffer
        .iter()
        .position(|&b| b == b'\n')
        .map_or(0, |i| i + 1);

    let mut file = File::create(log_path)?;
    file.write_all(b"--- Log rotated (older entries removed) ---\n")?;
    file.write_all(&buffer[skip..])?;
    Ok(true)
}

/// Produces writers that share one open log file
#[derive(Clone)]
struct LogWriterFactory {
    file: Arc<Mutex<File>>,
}

struct LogWriter {
    file: Arc<Mutex<File>>,
}

impl LogWriter {
    fn file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            file: Arc::clone(&self.file),
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("riskcast={level},riskcast_core=warn")))
}

/// Initialize logging.
///
/// With a log directory, logs go to `{log_dir}/riskcast.log` with size-based
/// rotation (past 5MB only the last 1MB is kept). Without one they go to
/// stderr. `RUST_LOG` overrides `level`.
pub fn init_logging(log_dir: Option<&Path>, level: &str) -> color_eyre::Result<()> {
    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .init();
        return Ok(());
    };

    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE);

    if let Err(e) = rotate_log_if_needed(&log_path, MAX_LOG_SIZE, KEEP_SIZE) {
        eprintln!("Warning: Failed to rotate log file: {e}");
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let writer_factory = LogWriterFactory {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(
            fmt::layer()
                .with_writer(writer_factory)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false),
        )
        .init();

    tracing::info!(log_path = %log_path.display(), "riskcast logging initialized");
    Ok(())
}
