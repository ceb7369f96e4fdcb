//! JSON-lines training log, either written inline or from a background worker thread.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::warn;
use trackpilot_core::{EpisodeReport, GenerationReport, TrainingSink};

use crate::StorageError;

const DEFAULT_FLUSH_THRESHOLD: usize = 16;

/// One line of the training log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    Generation(GenerationReport),
    Episode(EpisodeReport),
}

/// Buffered JSON-lines writer. Records reach the file once the buffer hits its threshold,
/// on [`TrainingLog::flush`], or on drop.
#[derive(Debug)]
pub struct TrainingLog {
    path: PathBuf,
    file: File,
    pending: Vec<LogRecord>,
    flush_threshold: usize,
    written: usize,
}

impl TrainingLog {
    /// Create (or truncate) the log at `path`.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        Self::with_threshold(path, DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn with_threshold(path: &Path, flush_threshold: usize) -> Result<Self, StorageError> {
        crate::ensure_parent(path)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|err| StorageError::io(path, err))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            pending: Vec::new(),
            flush_threshold: flush_threshold.max(1),
            written: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written to disk so far.
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    /// Records accepted but not yet on disk.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn append(&mut self, record: LogRecord) -> Result<(), StorageError> {
        self.pending.push(record);
        if self.pending.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Write every pending record as one batch. On failure the batch stays pending.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut batch = Vec::new();
        for record in &self.pending {
            serde_json::to_writer(&mut batch, record)
                .map_err(|err| StorageError::json(&self.path, err))?;
            batch.push(b'\n');
        }
        self.file
            .write_all(&batch)
            .map_err(|err| StorageError::io(&self.path, err))?;
        self.written += self.pending.len();
        self.pending.clear();
        Ok(())
    }

    /// Read every record back from a log file.
    pub fn read_all(path: &Path) -> Result<Vec<LogRecord>, StorageError> {
        let text = std::fs::read_to_string(path).map_err(|err| StorageError::io(path, err))?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|err| StorageError::json(path, err)))
            .collect()
    }
}

impl Drop for TrainingLog {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(%err, "failed to flush training log on drop");
        }
    }
}

impl TrainingSink for TrainingLog {
    fn on_generation(&mut self, report: &GenerationReport) {
        if let Err(err) = self.append(LogRecord::Generation(report.clone())) {
            warn!(%err, generation = report.generation.0, "failed to log generation");
        }
    }

    fn on_episode(&mut self, report: &EpisodeReport) {
        if let Err(err) = self.append(LogRecord::Episode(*report)) {
            warn!(%err, episode = report.episode, "failed to log episode");
        }
    }
}

#[derive(Debug)]
enum LogCommand {
    Append(LogRecord),
    Flush,
    Shutdown,
}

/// Moves log serialization and file I/O onto a dedicated worker thread.
pub struct TrainingLogPipeline {
    tx: mpsc::Sender<LogCommand>,
    handle: Option<thread::JoinHandle<Result<usize, StorageError>>>,
}

impl TrainingLogPipeline {
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        Self::from_log(TrainingLog::create(path)?)
    }

    pub fn from_log(mut log: TrainingLog) -> Result<Self, StorageError> {
        let (tx, rx) = mpsc::channel::<LogCommand>();
        let handle = thread::Builder::new()
            .name("trackpilot-log-worker".into())
            .spawn(move || -> Result<usize, StorageError> {
                while let Ok(command) = rx.recv() {
                    match command {
                        LogCommand::Append(record) => {
                            if let Err(err) = log.append(record) {
                                warn!(%err, "failed to append training record");
                            }
                        }
                        LogCommand::Flush => {
                            if let Err(err) = log.flush() {
                                warn!(%err, "failed to flush training log");
                            }
                        }
                        LogCommand::Shutdown => break,
                    }
                }
                log.flush()?;
                Ok(log.written())
            })
            .map_err(|err| {
                StorageError::Worker(format!("failed to spawn training log worker: {err}"))
            })?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Request an immediate flush of buffered records.
    pub fn flush(&self) {
        let _ = self.tx.send(LogCommand::Flush);
    }

    /// Stop the worker and return how many records reached disk.
    pub fn finish(mut self) -> Result<usize, StorageError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<usize, StorageError> {
        let _ = self.tx.send(LogCommand::Shutdown);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| StorageError::Worker("training log worker panicked".to_string()))?,
            None => Ok(0),
        }
    }

    fn send(&self, record: LogRecord) {
        if self.tx.send(LogCommand::Append(record)).is_err() {
            warn!("training log worker channel closed; record dropped");
        }
    }
}

impl TrainingSink for TrainingLogPipeline {
    fn on_generation(&mut self, report: &GenerationReport) {
        self.send(LogRecord::Generation(report.clone()));
    }

    fn on_episode(&mut self, report: &EpisodeReport) {
        self.send(LogRecord::Episode(*report));
    }
}

impl Drop for TrainingLogPipeline {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, "training log worker did not shut down cleanly");
        }
    }
}
