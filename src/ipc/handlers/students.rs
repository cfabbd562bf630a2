use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    check_load, opt_bool, registry_err, required_student_id, student_card, student_id_list,
};
use crate::ipc::types::{AppState, Request};
use crate::sheet::StudentId;

/// Cards for the current search. `params.search`, when present, replaces the stored term.
fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(term) = req.params.get("search").and_then(|v| v.as_str()) {
        state.registry.ui.search_term = term.to_string();
    }
    let now = state.clock.now();
    state.registry.prune_copied(now);
    let state: &AppState = state;

    let Some(sheet) = state.registry.sheet() else {
        return ok(
            &req.id,
            json!({ "loaded": false, "students": [], "total": 0, "visible": 0 }),
        );
    };

    let cards: Vec<serde_json::Value> = state
        .registry
        .visible()
        .into_iter()
        .map(|s| student_card(state, s, now))
        .collect();

    ok(
        &req.id,
        json!({
            "loaded": true,
            "loadId": sheet.load_id.to_string(),
            "sheetName": sheet.sheet_name,
            "searchTerm": state.registry.ui.search_term,
            "total": sheet.students.len(),
            "visible": cards.len(),
            "checkedCount": state.registry.ui.checked.len(),
            "students": cards,
        }),
    )
}

fn handle_students_toggle_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = check_load(state, req) {
        return resp;
    }
    let id = match required_student_id(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.registry.toggle_check(id) {
        Ok(checked) => ok(
            &req.id,
            json!({
                "studentId": id,
                "checked": checked,
                "checkedCount": state.registry.ui.checked.len(),
            }),
        ),
        Err(e) => registry_err(req, e),
    }
}

fn handle_students_set_checked(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = check_load(state, req) {
        return resp;
    }
    let ids = match student_id_list(req, "studentIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let checked = match opt_bool(req, "checked") {
        Ok(v) => v.unwrap_or(true),
        Err(resp) => return resp,
    };
    match state.registry.set_checked(&ids, checked) {
        Ok(changed) => ok(
            &req.id,
            json!({
                "changed": changed,
                "checkedCount": state.registry.ui.checked.len(),
            }),
        ),
        Err(e) => registry_err(req, e),
    }
}

/// Checks (or unchecks) every student matching the current search.
fn handle_students_check_visible(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = check_load(state, req) {
        return resp;
    }
    let checked = match opt_bool(req, "checked") {
        Ok(v) => v.unwrap_or(true),
        Err(resp) => return resp,
    };
    let ids: Vec<StudentId> = state.registry.visible().iter().map(|s| s.id).collect();
    match state.registry.set_checked(&ids, checked) {
        Ok(changed) => ok(
            &req.id,
            json!({
                "changed": changed,
                "checkedCount": state.registry.ui.checked.len(),
            }),
        ),
        Err(e) => registry_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.toggleCheck" => Some(handle_students_toggle_check(state, req)),
        "students.setChecked" => Some(handle_students_set_checked(state, req)),
        "students.checkVisible" => Some(handle_students_check_visible(state, req)),
        _ => None,
    }
}
