use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_auth;
use crate::ipc::types::{AppState, EditSession, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(out_path) = req
        .params
        .get("outPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing params.outPath", None);
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "outPath": out_path.to_string_lossy(),
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:?}"), None),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_auth(state, &req.params) {
        return e.response(&req.id);
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(in_path) = req
        .params
        .get("inPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing params.inPath", None);
    };

    // Close the live connection before the database file is replaced.
    state.db = None;

    let summary = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(s) => s,
        Err(e) => {
            // Reopen whatever is on disk so the daemon stays usable.
            state.db = db::open_db(&workspace).ok();
            return err(&req.id, "io_failed", format!("{e:?}"), None);
        }
    };

    match db::open_db(&workspace) {
        Ok(conn) => {
            match db::load_fees(&conn) {
                Ok(fees) => state.fees = fees,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
            state.db = Some(conn);
            // The restored database brings its own credential; start locked.
            state.session = EditSession::Locked;
            ok(
                &req.id,
                json!({
                    "bundleFormat": summary.bundle_format_detected,
                    "checksumVerified": summary.checksum_verified
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_export(state, req)),
        "backup.import" => Some(handle_import(state, req)),
        _ => None,
    }
}
