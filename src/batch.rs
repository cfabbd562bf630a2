use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::export::{file_name_for, DownloadSink, ExportError};
use crate::sheet::{StudentId, StudentRecord};

/// Cooperative cancellation, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Minimum spacing between two consecutive downloads.
#[derive(Debug, Clone)]
pub struct MinInterval {
    interval: Duration,
    last: Option<Instant>,
}

impl MinInterval {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Blocks on `clock` until the interval since the previous download has passed.
    /// Never waits before the first download.
    pub fn wait(&self, clock: &dyn Clock) {
        let Some(last) = self.last else {
            return;
        };
        let elapsed = clock.now().saturating_duration_since(last);
        if elapsed < self.interval {
            clock.sleep(self.interval - elapsed);
        }
    }

    pub fn mark(&mut self, clock: &dyn Clock) {
        self.last = Some(clock.now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub exported: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Progress { completed: usize, total: usize },
    ItemFailed { student_id: StudentId, name: String, message: String },
    Done(BatchSummary),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum BatchStatus {
    #[default]
    Idle,
    Running { job_id: Uuid, current: usize, total: usize },
    Done { job_id: Uuid, summary: BatchSummary, finished_at: Instant },
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, BatchStatus::Running { .. })
    }

    /// Status as shown to the user: a finished batch reads as idle once `done_ttl` passed.
    pub fn observe(&self, now: Instant, done_ttl: Duration) -> BatchStatus {
        match self {
            BatchStatus::Done { finished_at, .. }
                if now.saturating_duration_since(*finished_at) >= done_ttl =>
            {
                BatchStatus::Idle
            }
            other => other.clone(),
        }
    }
}

/// Exports items one at a time: render, wait for the throttle, save, report progress.
/// A failing item is reported and skipped; the rest of the batch still runs.
pub struct BatchSequencer<'a> {
    pub clock: &'a dyn Clock,
    pub interval: Duration,
    pub cancel: CancelToken,
}

impl BatchSequencer<'_> {
    pub fn run<R>(
        &self,
        items: &[StudentRecord],
        mut render: R,
        sink: &mut dyn DownloadSink,
        on_event: &mut dyn FnMut(BatchEvent),
    ) -> BatchSummary
    where
        R: FnMut(&StudentRecord) -> Result<Vec<u8>, ExportError>,
    {
        let total = items.len();
        let mut throttle = MinInterval::new(self.interval);
        let mut summary = BatchSummary {
            total,
            exported: 0,
            failed: 0,
            cancelled: false,
            files: Vec::new(),
            archive: None,
            archive_error: None,
        };

        for (i, student) in items.iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::info!("batch cancelled after {i} of {total} receipts");
                summary.cancelled = true;
                break;
            }

            let outcome = render(student).and_then(|png| {
                throttle.wait(self.clock);
                let saved = sink.save(&file_name_for(student), &png);
                throttle.mark(self.clock);
                saved
            });

            match outcome {
                Ok(file) => {
                    summary.exported += 1;
                    summary.files.push(file);
                }
                Err(e) => {
                    log::warn!("receipt for #{} {} failed: {e}", student.sequence_number, student.name);
                    summary.failed += 1;
                    on_event(BatchEvent::ItemFailed {
                        student_id: student.id,
                        name: student.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
            on_event(BatchEvent::Progress {
                completed: i + 1,
                total,
            });
        }

        match sink.finish() {
            Ok(archive) => summary.archive = archive.map(|p| p.to_string_lossy().to_string()),
            Err(e) => {
                log::warn!("failed to finalize batch output: {e}");
                summary.archive_error = Some(e.to_string());
            }
        }

        log::info!(
            "batch finished: {} exported, {} failed, cancelled={}",
            summary.exported,
            summary.failed,
            summary.cancelled
        );
        on_event(BatchEvent::Done(summary.clone()));
        summary
    }
}
