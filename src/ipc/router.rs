use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::sheet::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::receipt::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::batch::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

/// Work that must only begin once the current response is on its way out.
pub fn after_response(state: &mut AppState) {
    handlers::batch::spawn_pending(state);
}

pub fn shutdown(state: &mut AppState) {
    handlers::batch::shutdown(state);
}
