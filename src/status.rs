//! Shared state of the current (or most recent) scan run.
//!
//! One `ScanStatus` is created per process and handed to both the orchestrator
//! and the HTTP layer. Writers mutate it in small steps; readers only ever see
//! cloned snapshots, so a reader may observe a run mid-update but never a torn value.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::{LOG_CAPACITY, PROBE_PROGRESS_CAP};

/// Append-only run log bounded to `LOG_CAPACITY`; hitting the bound drops the oldest half.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LogBuffer {
    lines: Vec<String>,
}

impl LogBuffer {
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
        if self.lines.len() >= LOG_CAPACITY {
            let excess = self.lines.len() - LOG_CAPACITY / 2;
            self.lines.drain(..excess);
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Snapshot of a run, serialised as the status JSON the UI polls or streams.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunState {
    #[serde(rename = "is_scanning")]
    pub running: bool,
    pub target: String,
    pub progress: u8,
    pub logs: LogBuffer,
    pub completed: bool,
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        self.completed && !self.running
    }
}

#[derive(Clone, Default)]
pub struct ScanStatus {
    inner: Arc<RwLock<RunState>>,
}

impl ScanStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh run for `target`.
    pub async fn reset(&self, target: &str) {
        let mut logs = LogBuffer::default();
        logs.push(format!("Starting scan for {target}..."));
        *self.inner.write().await = RunState {
            running: true,
            target: target.to_string(),
            progress: 0,
            logs,
            completed: false,
        };
    }

    pub async fn log(&self, line: impl Into<String>) {
        self.inner.write().await.logs.push(line);
    }

    /// Prober activity tick: +1, never past `PROBE_PROGRESS_CAP`.
    pub async fn bump_progress(&self) {
        let mut s = self.inner.write().await;
        if s.progress < PROBE_PROGRESS_CAP {
            s.progress += 1;
        }
    }

    /// Advance progress to `value`. Progress never moves backwards.
    pub async fn advance_to(&self, value: u8) {
        let mut s = self.inner.write().await;
        s.progress = s.progress.max(value.min(100));
    }

    pub async fn finish(&self) {
        let mut s = self.inner.write().await;
        s.running = false;
        s.completed = true;
    }

    pub async fn snapshot(&self) -> RunState {
        self.inner.read().await.clone()
    }
}
