use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_auth;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_fees_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mut fees = serde_json::Map::new();
    for (column, amount) in state.fees.entries() {
        fees.insert(column.to_string(), json!(amount));
    }
    ok(&req.id, json!({ "fees": serde_json::Value::Object(fees) }))
}

fn handle_fees_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_auth(state, &req.params) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(column) = req.params.get("column").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing column", None);
    };
    let columns = match db::load_columns(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !columns.iter().any(|c| c.name == column) {
        return err(
            &req.id,
            "bad_params",
            "unknown fee column",
            Some(json!({ "column": column })),
        );
    }

    let raw = req
        .params
        .get("amount")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    // Session-scoped: nothing hits the fees table until a save carries
    // the table along.
    let amount = state.fees.set(column, &raw);

    ok(&req.id, json!({ "column": column, "amount": amount }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.list" => Some(handle_fees_list(state, req)),
        "fees.set" => Some(handle_fees_set(state, req)),
        _ => None,
    }
}
