use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::opt_str;
use crate::ipc::types::{AppState, Request};
use crate::registry::SheetState;
use crate::sheet::{read_workbook_bytes, read_workbook_path, ParsedSheet, SheetError};

fn sheet_json(sheet: &SheetState) -> serde_json::Value {
    json!({
        "loadId": sheet.load_id.to_string(),
        "sheetName": sheet.sheet_name,
        "sourceName": sheet.source_name,
        "studentCount": sheet.students.len(),
        "loadedAt": sheet.loaded_at.to_rfc3339(),
    })
}

/// Reads the first worksheet from `params.path` or from base64 `params.dataBase64`, and
/// replaces the active sheet and all UI state.
fn handle_sheet_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = opt_str(req, "path").map(PathBuf::from);
    let data = opt_str(req, "dataBase64");

    let (parsed, source_name): (Result<ParsedSheet, SheetError>, Option<String>) = match (path, data) {
        (Some(path), _) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string());
            (read_workbook_path(&path), name)
        }
        (None, Some(data)) => {
            let bytes = match STANDARD.decode(data.trim()) {
                Ok(b) => b,
                Err(e) => {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("dataBase64 is not valid base64: {}", e),
                        None,
                    )
                }
            };
            (read_workbook_bytes(bytes), opt_str(req, "fileName"))
        }
        (None, None) => {
            return err(&req.id, "bad_params", "missing params.path or params.dataBase64", None)
        }
    };

    let parsed = match parsed {
        Ok(p) => p,
        Err(e) => {
            log::warn!("spreadsheet load failed: {e}");
            return err(
                &req.id,
                "sheet_read_failed",
                e.to_string(),
                source_name.map(|n| json!({ "sourceName": n })),
            );
        }
    };

    let sheet = state.registry.load(parsed, source_name, Utc::now());
    log::info!(
        "loaded sheet {:?} with {} students",
        sheet.sheet_name,
        sheet.students.len()
    );
    ok(&req.id, sheet_json(sheet))
}

fn handle_sheet_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.registry.reset();
    ok(&req.id, json!({ "reset": true }))
}

fn handle_sheet_info(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.registry.sheet() {
        Some(sheet) => {
            let mut v = sheet_json(sheet);
            v["loaded"] = json!(true);
            ok(&req.id, v)
        }
        None => ok(&req.id, json!({ "loaded": false })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sheet.load" => Some(handle_sheet_load(state, req)),
        "sheet.reset" => Some(handle_sheet_reset(state, req)),
        "sheet.info" => Some(handle_sheet_info(state, req)),
        _ => None,
    }
}
