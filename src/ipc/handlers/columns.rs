use crate::calc::ToggleMode;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_auth;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_columns_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn
        .prepare("SELECT name, mode, sort_order FROM tick_columns ORDER BY sort_order")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "name": row.get::<_, String>(0)?,
                "mode": row.get::<_, String>(1)?,
                "sortOrder": row.get::<_, i64>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(columns) => ok(&req.id, json!({ "columns": columns })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_columns_set_mode(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_auth(state, &req.params) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(column) = req.params.get("column").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing column", None);
    };
    let mode = match req
        .params
        .get("mode")
        .and_then(|v| v.as_str())
        .and_then(ToggleMode::parse)
    {
        Some(m) => m,
        None => {
            return err(
                &req.id,
                "bad_params",
                "mode must be one of: tristate, checkbox",
                None,
            )
        }
    };

    let changed = match conn.execute(
        "UPDATE tick_columns SET mode = ? WHERE name = ?",
        (mode.as_str(), column),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(
            &req.id,
            "not_found",
            "column not found",
            Some(json!({ "column": column })),
        );
    }

    // Cells outside the narrowed domain collapse to TRUE so a checkbox
    // column never reads PAID.
    if mode == ToggleMode::Checkbox {
        if let Err(e) = conn.execute(
            "UPDATE ticks SET value = 'TRUE' WHERE column_name = ? AND value = 'PAID'",
            [column],
        ) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "column": column, "mode": mode.as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "columns.list" => Some(handle_columns_list(state, req)),
        "columns.setMode" => Some(handle_columns_set_mode(state, req)),
        _ => None,
    }
}
