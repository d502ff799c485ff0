//! Async file writer (spec.md §4.6): bounded-queue producer/consumer,
//! batched drains, an in-memory ~64 KB buffer flushed on size/time boundary,
//! and size/time rotation performed only at a flush boundary.

pub mod format;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::LogFormat;
use crate::error::{DaqError, IoErrorKind, RecoveryAction};
use crate::sample::SampleRecord;
use crate::stats::Counters;
use format::SessionMeta;

const FLUSH_BUFFER_BYTES: usize = 64 * 1024;
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub output_directory: PathBuf,
    pub filename_prefix: String,
    pub format: LogFormat,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub rotation_enabled: bool,
    pub rotation_size_bytes: u64,
    pub rotation_time: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("."),
            filename_prefix: String::new(),
            format: LogFormat::Csv,
            batch_size: 100,
            flush_interval: Duration::from_millis(250),
            rotation_enabled: false,
            rotation_size_bytes: 100 * 1024 * 1024,
            rotation_time: Duration::from_secs(3600),
        }
    }
}

/// Strips characters that are unsafe in filenames and any path-traversal
/// sequence from a user-supplied prefix (spec.md §4.6).
pub fn sanitize_prefix(prefix: &str) -> String {
    let stripped: String =
        prefix.chars().filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')).collect();
    stripped.replace("..", "")
}

fn part_filename(prefix: &str, session_start: chrono::DateTime<Utc>, part: Option<u32>, ext: &str) -> String {
    let prefix = sanitize_prefix(prefix);
    let prefix_part = if prefix.is_empty() { String::new() } else { format!("{prefix}_") };
    let date = session_start.format("%Y%m%d");
    let time = session_start.format("%H%M%S");
    match part {
        Some(n) => format!("{prefix_part}{date}_{time}_part{n:03}.{ext}"),
        None => format!("{prefix_part}{date}_{time}.{ext}"),
    }
}

/// A handle to the running writer task: enqueue samples, or stop and drain.
pub struct FileWriter {
    tx: mpsc::Sender<SampleRecord>,
    stop: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl FileWriter {
    pub async fn spawn(
        config: WriterConfig,
        meta: SessionMeta,
        queue_capacity: usize,
        counters: Arc<Counters>,
    ) -> Result<Self, DaqError> {
        tokio::fs::create_dir_all(&config.output_directory).await.map_err(|e| {
            DaqError::io(
                "IO-001",
                RecoveryAction::ChooseDirectory,
                IoErrorKind::DirectoryNotWritable(e.to_string()),
            )
        })?;

        let (tx, rx) = mpsc::channel(queue_capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let loop_counters = counters.clone();
        let loop_stop = stop.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = run_writer_loop(config, meta, rx, loop_stop, loop_counters.clone()).await {
                error!(target: "writer", "writer loop terminated with error: {e}");
            }
        });

        Ok(Self { tx, stop, task: Some(task), counters })
    }

    /// Enqueues a processed sample. Never blocks: on a full queue the sample
    /// is dropped and `writer_dropped` is incremented (spec.md §4.4, §5).
    pub fn enqueue(&self, sample: SampleRecord) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(_) => {
                Counters::inc(&self.counters.writer_dropped);
                false
            }
        }
    }

    /// Signals the writer to stop, waits for it to drain and close its
    /// file, up to a bounded join timeout (spec.md §5).
    pub async fn stop(mut self) -> Result<(), DaqError> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            match tokio::time::timeout(STOP_JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(join_err)) => Err(DaqError::io(
                    "IO-005",
                    RecoveryAction::Manual,
                    IoErrorKind::CloseFailed(join_err.to_string()),
                )),
                Err(_) => Err(DaqError::io(
                    "IO-005",
                    RecoveryAction::Manual,
                    IoErrorKind::CloseFailed("writer did not stop within the join timeout".to_string()),
                )),
            }
        } else {
            Ok(())
        }
    }
}

struct OpenPart {
    file: File,
    path: PathBuf,
    bytes_written: u64,
    opened_at: Instant,
}

async fn open_part(
    dir: &Path,
    prefix: &str,
    session_start: chrono::DateTime<Utc>,
    part: Option<u32>,
    format: LogFormat,
    meta: &SessionMeta,
) -> Result<OpenPart, DaqError> {
    let ext = format::file_extension(format);
    let name = part_filename(prefix, session_start, part, ext);
    let path = dir.join(name);
    let mut file = File::create(&path)
        .await
        .map_err(|e| DaqError::io("IO-003", RecoveryAction::Retry, IoErrorKind::RotationFailed(e.to_string())))?;

    let mut header = Vec::new();
    header.extend_from_slice(format::bom_prefix(format));
    header.extend_from_slice(format::metadata_header(format, meta).as_bytes());
    header.extend_from_slice(format::column_header(format, meta).as_bytes());
    file.write_all(&header)
        .await
        .map_err(|e| DaqError::io("IO-004", RecoveryAction::Retry, IoErrorKind::WriteFailed(e.to_string())))?;

    let bytes_written = header.len() as u64;
    debug!(target: "writer", path = %path.display(), "opened log part");
    Ok(OpenPart { file, path, bytes_written, opened_at: Instant::now() })
}

async fn close_part(part: &mut OpenPart) -> Result<(), DaqError> {
    part.file
        .flush()
        .await
        .map_err(|e| DaqError::io("IO-004", RecoveryAction::Retry, IoErrorKind::WriteFailed(e.to_string())))?;
    part.file
        .sync_all()
        .await
        .map_err(|e| DaqError::io("IO-005", RecoveryAction::Manual, IoErrorKind::CloseFailed(e.to_string())))?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_writer_loop(
    config: WriterConfig,
    meta: SessionMeta,
    mut rx: mpsc::Receiver<SampleRecord>,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
) -> Result<(), DaqError> {
    let session_start = meta.session_start;
    let mut part_no: u32 = 0;
    let mut current =
        open_part(&config.output_directory, &config.filename_prefix, session_start, None, config.format, &meta)
            .await?;
    counters.rotation_count.store(1, Ordering::Relaxed);

    let mut buffer: Vec<u8> = Vec::with_capacity(FLUSH_BUFFER_BYTES);
    let mut last_flush = Instant::now();
    let mut batch: Vec<SampleRecord> = Vec::with_capacity(config.batch_size);
    let mut consecutive_rotation_failures = 0u32;

    loop {
        if stop.load(Ordering::SeqCst) && rx.is_empty() {
            break;
        }

        batch.clear();
        // Bounded wait so the stop flag is re-checked at least once per
        // flush interval, even with no traffic (spec.md §5 cooperative
        // cancellation: checked at every timeout).
        let remaining = config.flush_interval.saturating_sub(last_flush.elapsed()).max(Duration::from_millis(1));
        match tokio::time::timeout(remaining, rx.recv_many(&mut batch, config.batch_size)).await {
            Ok(0) if stop.load(Ordering::SeqCst) => break,
            Ok(_) | Err(_) => {}
        }

        for sample in &batch {
            let ts = Utc::now();
            let row = format::data_row(config.format, &meta, ts, sample);
            buffer.extend_from_slice(row.as_bytes());
            Counters::inc(&counters.samples_written);
        }

        let should_flush = buffer.len() >= FLUSH_BUFFER_BYTES
            || last_flush.elapsed() >= config.flush_interval
            || (stop.load(Ordering::SeqCst) && rx.is_empty());

        if should_flush && !buffer.is_empty() {
            match current.file.write_all(&buffer).await {
                Ok(()) => {
                    current.bytes_written += buffer.len() as u64;
                    Counters::add(&counters.bytes_written, buffer.len() as u64);
                    buffer.clear();
                }
                Err(e) => {
                    warn!(target: "writer", "write failed, retrying once: {e}");
                    // Retry once at the batch boundary (spec.md §7).
                    if let Err(e2) = current.file.write_all(&buffer).await {
                        return Err(DaqError::io(
                            "IO-004",
                            RecoveryAction::Manual,
                            IoErrorKind::WriteFailed(e2.to_string()),
                        ));
                    }
                    current.bytes_written += buffer.len() as u64;
                    buffer.clear();
                }
            }
            let _ = current.file.flush().await;
            last_flush = Instant::now();
        }

        let rotation_due = config.rotation_enabled
            && (current.bytes_written >= config.rotation_size_bytes || current.opened_at.elapsed() >= config.rotation_time);

        if rotation_due && should_flush {
            match close_part(&mut current).await {
                Ok(()) => {
                    part_no += 1;
                    match open_part(
                        &config.output_directory,
                        &config.filename_prefix,
                        session_start,
                        Some(part_no),
                        config.format,
                        &meta,
                    )
                    .await
                    {
                        Ok(next) => {
                            current = next;
                            Counters::inc(&counters.rotation_count);
                            consecutive_rotation_failures = 0;
                        }
                        Err(e) => {
                            consecutive_rotation_failures += 1;
                            error!(target: "writer", "rotation failed: {e}");
                            if consecutive_rotation_failures >= 2 {
                                return Err(e);
                            }
                        }
                    }
                }
                Err(e) => {
                    consecutive_rotation_failures += 1;
                    error!(target: "writer", "failed to close part for rotation: {e}");
                    if consecutive_rotation_failures >= 2 {
                        return Err(e);
                    }
                }
            }
        }

        if stop.load(Ordering::SeqCst) && rx.is_empty() && buffer.is_empty() {
            break;
        }
    }

    close_part(&mut current).await?;
    debug!(target: "writer", path = %current.path.display(), "writer stopped, final part closed");
    Ok(())
}
