use crate::config::OrgInfo;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::batch::status_json;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const ORG_FIELDS: [&str; 6] = [
    "name",
    "contactLines",
    "title",
    "bank",
    "qrImagePath",
    "logoPath",
];

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let sheet = state.registry.sheet();
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "sheetLoaded": sheet.is_some(),
            "loadId": sheet.map(|s| s.load_id.to_string()),
            "batch": status_json(state),
        }),
    )
}

fn handle_org_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "org": state.settings.org }))
}

/// Partial update: only the keys present in params change; `null` clears optional blocks.
fn handle_org_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mut merged = match serde_json::to_value(&state.settings.org) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };
    let mut touched = Vec::new();
    for key in ORG_FIELDS {
        if let Some(v) = req.params.get(key) {
            merged[key] = v.clone();
            touched.push(key);
        }
    }
    if touched.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "nothing to update",
            Some(json!({ "allowed": ORG_FIELDS })),
        );
    }

    match serde_json::from_value::<OrgInfo>(merged) {
        Ok(org) => {
            log::info!("organization info updated: {}", touched.join(", "));
            state.settings.org = org;
            ok(&req.id, json!({ "org": state.settings.org }))
        }
        Err(e) => err(&req.id, "bad_params", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "org.get" => Some(handle_org_get(state, req)),
        "org.update" => Some(handle_org_update(state, req)),
        _ => None,
    }
}
