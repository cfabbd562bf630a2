use serde_json::json;

use crate::export::ExportError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::registry::RegistryError;
use crate::sheet::{StudentId, StudentRecord};

pub fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn opt_bool(req: &Request, key: &str) -> Result<Option<bool>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be a boolean", key), None)),
    }
}

fn as_student_id(v: &serde_json::Value) -> Option<StudentId> {
    v.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n > 0)
        .map(StudentId)
}

pub fn opt_student_id(req: &Request, key: &str) -> Result<Option<StudentId>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => as_student_id(v).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a positive integer", key),
                Some(json!({ "param": key, "value": v })),
            )
        }),
    }
}

pub fn required_student_id(req: &Request, key: &str) -> Result<StudentId, serde_json::Value> {
    opt_student_id(req, key)?
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn student_id_list(req: &Request, key: &str) -> Result<Vec<StudentId>, serde_json::Value> {
    let Some(arr) = req.params.get(key).and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    arr.iter()
        .map(|v| {
            as_student_id(v).ok_or_else(|| {
                err(
                    &req.id,
                    "bad_params",
                    format!("{} must contain positive integers", key),
                    Some(json!({ "value": v })),
                )
            })
        })
        .collect()
}

pub fn registry_err(req: &Request, e: RegistryError) -> serde_json::Value {
    let code = match &e {
        RegistryError::NoSheet => "no_sheet",
        RegistryError::StaleSheet => "stale_sheet",
        RegistryError::UnknownStudent(_) => "not_found",
        RegistryError::NoSelection => "bad_params",
    };
    let details = match &e {
        RegistryError::UnknownStudent(id) => Some(json!({ "studentId": *id })),
        _ => None,
    };
    err(&req.id, code, e.to_string(), details)
}

pub fn export_err(req: &Request, e: &ExportError) -> serde_json::Value {
    let code = match e {
        ExportError::Render(_) => "render_failed",
        ExportError::Io { .. } | ExportError::Archive(_) => "write_failed",
        ExportError::ClipboardUnsupported(_) => "clipboard_unsupported",
        ExportError::ClipboardFailed(_) => "clipboard_failed",
    };
    err(&req.id, code, e.to_string(), None)
}

/// Every mutating request may pin the load it was built against.
pub fn check_load(state: &AppState, req: &Request) -> Result<(), serde_json::Value> {
    let load_id = opt_str(req, "loadId");
    state
        .registry
        .ensure_load(load_id.as_deref())
        .map(|_| ())
        .map_err(|e| registry_err(req, e))
}

pub fn student_card(state: &AppState, s: &StudentRecord, now: std::time::Instant) -> serde_json::Value {
    let ui = &state.registry.ui;
    json!({
        "id": s.id,
        "sequenceNumber": s.sequence_number,
        "name": s.name,
        "className": s.class_name,
        "sessionCount": s.session_count,
        "pricePerSession": s.price_per_session,
        "totalFee": s.total_fee,
        "checked": ui.checked.contains(&s.id),
        "copied": state.registry.is_copied(s.id, now),
        "selected": ui.selected == Some(s.id),
    })
}
