use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{admin_digest, sha256_hex, ADMIN_DIGEST_KEY};
use crate::ipc::types::{AppState, EditSession, Request};
use serde_json::json;

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let has_password = match state.db.as_ref() {
        Some(conn) => match admin_digest(conn) {
            Ok(d) => d.is_some(),
            Err(e) => return e.response(&req.id),
        },
        None => false,
    };
    ok(
        &req.id,
        json!({
            "state": state.session.as_str(),
            "hasPassword": has_password
        }),
    )
}

fn handle_unlock(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(password) = req.params.get("password").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing password", None);
    };

    let digest = match admin_digest(conn) {
        Ok(Some(d)) => d,
        Ok(None) => {
            return err(
                &req.id,
                "no_admin_password",
                "set an admin password before editing",
                None,
            )
        }
        Err(e) => return e.response(&req.id),
    };

    if sha256_hex(password) != digest {
        // Wrong secret leaves the session LOCKED.
        return err(&req.id, "wrong_password", "wrong password", None);
    }

    state.session = EditSession::Unlocked;
    ok(&req.id, json!({ "state": state.session.as_str() }))
}

fn handle_lock(state: &mut AppState, req: &Request) -> serde_json::Value {
    if !state.session.is_unlocked() {
        return ok(&req.id, json!({ "state": state.session.as_str() }));
    }
    let confirmed = req
        .params
        .get("confirm")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !confirmed {
        return err(
            &req.id,
            "confirm_required",
            "locking the edit session requires confirm: true",
            None,
        );
    }
    state.session = EditSession::Locked;
    ok(&req.id, json!({ "state": state.session.as_str() }))
}

fn handle_set_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing/empty password", None),
    };

    match admin_digest(conn) {
        Ok(Some(existing)) => {
            // Rotation is gated by the current secret, unlocked or not.
            let current = req.params.get("current").and_then(|v| v.as_str());
            match current {
                Some(c) if sha256_hex(c) == existing => {}
                Some(_) => return err(&req.id, "wrong_password", "wrong password", None),
                None => {
                    return err(
                        &req.id,
                        "bad_params",
                        "changing the password requires the current one",
                        None,
                    )
                }
            }
        }
        Ok(None) => {}
        Err(e) => return e.response(&req.id),
    }

    if let Err(e) = db::settings_set_json(conn, ADMIN_DIGEST_KEY, &json!(sha256_hex(&password))) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.status" => Some(handle_status(state, req)),
        "session.unlock" => Some(handle_unlock(state, req)),
        "session.lock" => Some(handle_lock(state, req)),
        "admin.setPassword" => Some(handle_set_password(state, req)),
        _ => None,
    }
}
