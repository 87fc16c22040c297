use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_auth;
use crate::ipc::types::{AppState, Request};
use crate::legacy;
use serde_json::json;
use std::path::PathBuf;

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_auth(state, &req.params) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(path) = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match legacy::import_sheet_export(conn, &path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "imported": summary.imported,
                "skipped": summary.skipped,
                "convertedAdjustments": summary.converted_adjustments
            }),
        ),
        Err(e) => err(&req.id, "import_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.importLegacy" => Some(handle_import(state, req)),
        _ => None,
    }
}
