use std::path::PathBuf;

use serde_json::json;

use crate::export::{file_name_for, ClipboardOutcome, DirectorySink, DownloadSink, ExportError};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{check_load, export_err, opt_str, opt_student_id, registry_err, required_student_id};
use crate::ipc::types::{AppState, Request};
use crate::sheet::StudentRecord;

fn preview_json(state: &AppState, student: &StudentRecord, scale: f32) -> serde_json::Value {
    let ready = state
        .pipeline
        .preview(student, &state.settings.resolved_org(), scale);
    json!({
        "studentId": student.id,
        "name": student.name,
        "svg": ready.svg,
        "width": ready.width,
        "height": ready.height,
        "scale": ready.container_scale,
        "hidden": ready.hidden,
    })
}

fn preview_scale(state: &AppState, req: &Request) -> Result<f32, serde_json::Value> {
    match req.params.get("scale") {
        None | Some(serde_json::Value::Null) => Ok(state.settings.preview_scale),
        Some(v) => v
            .as_f64()
            .map(|f| f as f32)
            .filter(|f| f.is_finite() && *f > 0.0)
            .ok_or_else(|| err(&req.id, "bad_params", "scale must be a positive number", None)),
    }
}

/// Resolves the request's target student: `params.studentId`, else the open preview.
fn target_student(state: &AppState, req: &Request) -> Result<StudentRecord, serde_json::Value> {
    check_load(state, req)?;
    let id = opt_student_id(req, "studentId")?;
    state
        .registry
        .target(id)
        .cloned()
        .map_err(|e| registry_err(req, e))
}

fn handle_receipt_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = check_load(state, req) {
        return resp;
    }
    let id = match required_student_id(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let scale = match preview_scale(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student = match state.registry.select(id) {
        Ok(s) => s.clone(),
        Err(e) => return registry_err(req, e),
    };
    ok(&req.id, preview_json(state, &student, scale))
}

fn handle_receipt_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.registry.close_preview();
    ok(&req.id, json!({ "previewOpen": false }))
}

fn handle_receipt_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student = match target_student(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let scale = match preview_scale(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    ok(&req.id, preview_json(state, &student, scale))
}

fn handle_receipt_download(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student = match target_student(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let dir = opt_str(req, "outDir")
        .map(PathBuf::from)
        .unwrap_or_else(|| state.settings.output_dir.clone());

    let png = match state
        .pipeline
        .render_png(&student, &state.settings.resolved_org())
    {
        Ok(png) => png,
        Err(e) => {
            log::warn!("receipt for #{} {} failed: {e}", student.sequence_number, student.name);
            return export_err(req, &ExportError::from(e));
        }
    };

    let saved = DirectorySink::create(&dir).and_then(|mut sink| sink.save(&file_name_for(&student), &png));
    match saved {
        Ok(path) => {
            log::info!("saved receipt to {path}");
            ok(
                &req.id,
                json!({
                    "studentId": student.id,
                    "path": path,
                    "bytes": png.len(),
                }),
            )
        }
        Err(e) => export_err(req, &e),
    }
}

fn handle_receipt_copy(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student = match target_student(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let png = match state
        .pipeline
        .render_png(&student, &state.settings.resolved_org())
    {
        Ok(png) => png,
        Err(e) => {
            log::warn!("receipt for #{} {} failed: {e}", student.sequence_number, student.name);
            return export_err(req, &ExportError::from(e));
        }
    };

    match state.clipboard.write_png(&png) {
        Ok(outcome) => {
            let expires_at = state.clock.now() + state.settings.copied_ttl();
            state.registry.mark_copied(student.id, expires_at);
            let mut result = json!({
                "studentId": student.id,
                "copied": true,
                "copiedTtlMs": state.settings.copied_ttl_ms,
            });
            if let ClipboardOutcome::Forwarded { data_url } = outcome {
                result["dataUrl"] = json!(data_url);
            }
            ok(&req.id, result)
        }
        Err(e) => {
            log::warn!("clipboard write failed: {e}");
            export_err(req, &e)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "receipt.select" => Some(handle_receipt_select(state, req)),
        "receipt.close" => Some(handle_receipt_close(state, req)),
        "receipt.preview" => Some(handle_receipt_preview(state, req)),
        "receipt.download" => Some(handle_receipt_download(state, req)),
        "receipt.copy" => Some(handle_receipt_copy(state, req)),
        _ => None,
    }
}
