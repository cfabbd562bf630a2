use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use serde_json::json;
use uuid::Uuid;

use crate::batch::{BatchEvent, BatchSequencer, BatchStatus, CancelToken};
use crate::export::{sanitize_stem, DirectorySink, DownloadSink, ExportError, ZipSink};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{check_load, export_err, opt_bool, opt_str};
use crate::ipc::types::{AppState, PendingBatch, Request};

fn lock(status: &Mutex<BatchStatus>) -> MutexGuard<'_, BatchStatus> {
    // A panicked worker leaves the last status it wrote, which is still meaningful.
    status.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn status_json(state: &AppState) -> serde_json::Value {
    let observed = lock(&state.batch.status).observe(state.clock.now(), state.settings.done_ttl());
    match observed {
        BatchStatus::Idle => json!({ "state": "idle" }),
        BatchStatus::Running {
            job_id,
            current,
            total,
        } => json!({
            "state": "running",
            "jobId": job_id.to_string(),
            "current": current,
            "total": total,
        }),
        BatchStatus::Done { job_id, summary, .. } => json!({
            "state": "done",
            "jobId": job_id.to_string(),
            "summary": summary,
        }),
    }
}

fn archive_path(dir: &Path, sheet_name: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    dir.join(format!("{}_{}.zip", sanitize_stem(sheet_name), stamp))
}

/// Joins a worker that already finished so its handle does not linger.
fn reap_worker(state: &mut AppState) {
    if state
        .batch
        .worker
        .as_ref()
        .is_some_and(|w| w.is_finished())
    {
        if let Some(handle) = state.batch.worker.take() {
            if handle.join().is_err() {
                log::error!("batch worker panicked");
            }
        }
    }
}

fn handle_batch_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = check_load(state, req) {
        return resp;
    }
    reap_worker(state);
    if lock(&state.batch.status).is_running() || state.batch.pending.is_some() {
        return err(&req.id, "batch_running", "a batch export is already running", None);
    }
    let archive = match opt_bool(req, "archive") {
        Ok(v) => v.unwrap_or(false),
        Err(resp) => return resp,
    };

    let items = state.registry.checked_students();
    if items.is_empty() {
        return err(&req.id, "bad_params", "no students are checked", None);
    }
    let sheet_name = state
        .registry
        .sheet()
        .map(|s| s.sheet_name.clone())
        .unwrap_or_default();
    let dir = opt_str(req, "outDir")
        .map(PathBuf::from)
        .unwrap_or_else(|| state.settings.output_dir.clone());

    let sink: Result<Box<dyn DownloadSink>, ExportError> = if archive {
        ZipSink::create(&archive_path(&dir, &sheet_name), &sheet_name)
            .map(|s| Box::new(s) as Box<dyn DownloadSink>)
    } else {
        DirectorySink::create(&dir).map(|s| Box::new(s) as Box<dyn DownloadSink>)
    };
    let sink = match sink {
        Ok(s) => s,
        Err(e) => return export_err(req, &e),
    };

    let job_id = Uuid::new_v4();
    let total = items.len();
    *lock(&state.batch.status) = BatchStatus::Running {
        job_id,
        current: 0,
        total,
    };
    state.batch.cancel = Some(CancelToken::default());
    state.batch.pending = Some(PendingBatch {
        job_id,
        items,
        org: state.settings.resolved_org(),
        sink,
    });
    log::info!(
        "batch {job_id} started: {total} receipts to {}{}",
        dir.to_string_lossy(),
        if archive { " (zip)" } else { "" }
    );

    ok(
        &req.id,
        json!({
            "jobId": job_id.to_string(),
            "total": total,
            "archive": archive,
            "outDir": dir.to_string_lossy(),
        }),
    )
}

fn handle_batch_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, status_json(state))
}

fn handle_batch_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let running = lock(&state.batch.status).is_running();
    if running {
        if let Some(cancel) = &state.batch.cancel {
            cancel.cancel();
            log::info!("batch cancellation requested");
        }
    }
    ok(&req.id, json!({ "cancelling": running }))
}

/// Starts the worker for a batch accepted by `batch.start`. Called after the start
/// response has been queued, so every batch event follows it on the wire.
pub fn spawn_pending(state: &mut AppState) {
    let Some(pending) = state.batch.pending.take() else {
        return;
    };
    let job_id = pending.job_id;
    let cancel = state.batch.cancel.clone().unwrap_or_default();
    let status = Arc::clone(&state.batch.status);
    let clock = Arc::clone(&state.clock);
    let pipeline = state.pipeline.clone();
    let outbox = state.outbox.clone();
    let interval = state.settings.batch_interval();

    let spawned = std::thread::Builder::new()
        .name("receiptd-batch".to_string())
        .spawn(move || {
            let PendingBatch {
                job_id,
                items,
                org,
                mut sink,
            } = pending;
            let job = job_id.to_string();
            let sequencer = BatchSequencer {
                clock: clock.as_ref(),
                interval,
                cancel,
            };
            sequencer.run(
                &items,
                |student| Ok(pipeline.render_png(student, &org)?),
                sink.as_mut(),
                &mut |ev| match ev {
                    BatchEvent::Progress { completed, total } => {
                        *lock(&status) = BatchStatus::Running {
                            job_id,
                            current: completed,
                            total,
                        };
                        outbox.event(
                            "batch.progress",
                            json!({ "jobId": job, "completed": completed, "total": total }),
                        );
                    }
                    BatchEvent::ItemFailed {
                        student_id,
                        name,
                        message,
                    } => outbox.event(
                        "batch.itemFailed",
                        json!({
                            "jobId": job,
                            "studentId": student_id,
                            "name": name,
                            "message": message,
                        }),
                    ),
                    BatchEvent::Done(summary) => {
                        *lock(&status) = BatchStatus::Done {
                            job_id,
                            summary: summary.clone(),
                            finished_at: clock.now(),
                        };
                        outbox.event("batch.done", json!({ "jobId": job, "summary": summary }));
                    }
                },
            );
        });

    match spawned {
        Ok(handle) => state.batch.worker = Some(handle),
        Err(e) => {
            log::error!("failed to start batch worker: {e}");
            *lock(&state.batch.status) = BatchStatus::Idle;
            state.outbox.event(
                "batch.done",
                json!({ "jobId": job_id.to_string(), "error": e.to_string() }),
            );
        }
    }
}

/// Cancels a running batch and waits for its worker to stop.
pub fn shutdown(state: &mut AppState) {
    state.batch.pending = None;
    if let Some(cancel) = &state.batch.cancel {
        cancel.cancel();
    }
    if let Some(handle) = state.batch.worker.take() {
        if handle.join().is_err() {
            log::error!("batch worker panicked");
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "batch.start" => Some(handle_batch_start(state, req)),
        "batch.status" => Some(handle_batch_status(state, req)),
        "batch.cancel" => Some(handle_batch_cancel(state, req)),
        _ => None,
    }
}
