use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::AppResult;

const JOURNAL_FILE: &str = "telemetry.jsonl";
const PREVIOUS_JOURNAL_FILE: &str = "telemetry.previous.jsonl";

/// Buffers batch events in memory and appends them to a JSONL journal in the data
/// directory. Events stay queued if a write fails.
#[derive(Clone)]
pub struct TelemetryClient {
    enabled: Arc<AtomicBool>,
    queue: Arc<Mutex<Vec<TelemetryEvent>>>,
    journal_path: PathBuf,
    flush_threshold: usize,
    max_journal_bytes: u64,
}

impl TelemetryClient {
    pub fn new<P: AsRef<Path>>(data_dir: P, config: &AppConfig) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let journal_path = data_dir.join(JOURNAL_FILE);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)?;

        Ok(Self {
            enabled: Arc::new(AtomicBool::new(config.telemetry_enabled)),
            queue: Arc::new(Mutex::new(Vec::new())),
            journal_path,
            flush_threshold: config.telemetry_batch_size.max(1),
            max_journal_bytes: config.telemetry_buffer_max_bytes,
        })
    }

    pub fn record(&self, name: impl Into<String>, payload: serde_json::Value) -> AppResult<()> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mut queue = self.queue.lock();
        queue.push(TelemetryEvent::new(name.into(), payload));
        if queue.len() >= self.flush_threshold {
            self.persist_locked(&mut queue)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        let mut queue = self.queue.lock();
        self.persist_locked(&mut queue)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn persist_locked(&self, queue: &mut Vec<TelemetryEvent>) -> AppResult<()> {
        if queue.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::new();
        for event in queue.iter() {
            serde_json::to_writer(&mut encoded, event)?;
            encoded.push(b'\n');
        }

        self.roll_if_full(encoded.len() as u64)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)?;
        file.write_all(&encoded)?;
        file.flush()?;

        debug!(events = queue.len(), "flushed telemetry events");
        queue.clear();
        Ok(())
    }

    // Keeps one previous journal; older history is dropped.
    fn roll_if_full(&self, incoming_bytes: u64) -> AppResult<()> {
        let current = fs::metadata(&self.journal_path)
            .map(|meta| meta.len())
            .unwrap_or(0);
        if current == 0 || current + incoming_bytes <= self.max_journal_bytes {
            return Ok(());
        }

        let previous = self
            .journal_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(PREVIOUS_JOURNAL_FILE);
        fs::rename(&self.journal_path, previous)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct TelemetryEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl TelemetryEvent {
    fn new(name: String, payload: serde_json::Value) -> Self {
        Self {
            name,
            timestamp: Utc::now(),
            payload,
        }
    }
}
