use crate::calc::{self, TickState};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    now_stamp, require_auth, require_row_param, resolve_client_id_by_row, scalar_field_column,
    set_scalar_field, upsert_tick,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_clients_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT sort_order, id, name, email, university, phone, address, start_date,
                received_amount, notes, note_adjustment, updated_at
         FROM clients
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let sort_order: i64 = row.get(0)?;
            let id: String = row.get(1)?;
            let name: String = row.get(2)?;
            let email: Option<String> = row.get(3)?;
            let university: Option<String> = row.get(4)?;
            let phone: Option<String> = row.get(5)?;
            let address: Option<String> = row.get(6)?;
            let start_date: Option<String> = row.get(7)?;
            let received: String = row.get(8)?;
            let notes: String = row.get(9)?;
            let note_adjustment: Option<i64> = row.get(10)?;
            let updated_at: Option<String> = row.get(11)?;

            Ok(json!({
                "rowIndex": sort_order,
                "id": id,
                "name": name,
                "email": email,
                "university": university,
                "phone": phone,
                "address": address,
                "startDate": start_date,
                "received": received,
                "notes": notes,
                "noteAdjustment": note_adjustment,
                "updatedAt": updated_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(clients) => ok(&req.id, json!({ "clients": clients })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_clients_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_auth(state, &req.params) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = req
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if name.is_empty() {
        return err(&req.id, "bad_params", "client name is required", None);
    }

    let field = |key: &str| {
        req.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    let email = field("email");
    let uni = field("uni");
    let phone = field("phone");

    let next_row: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM clients",
        [],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let client_id = Uuid::new_v4().to_string();
    let insert = conn.execute(
        "INSERT INTO clients(id, sort_order, name, email, university, phone, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &client_id,
            next_row,
            &name,
            &email,
            &uni,
            &phone,
            now_stamp(),
        ),
    );
    if let Err(e) = insert {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "clients" })),
        );
    }

    ok(&req.id, json!({ "id": client_id, "rowIndex": next_row }))
}

fn handle_clients_edit(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_auth(state, &req.params) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let row = match require_row_param(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    // The old edit endpoint shipped updates as a JSON-encoded string;
    // accept that alongside a plain object.
    let updates_value = match req.params.get("updates") {
        Some(serde_json::Value::String(s)) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(v) => v,
            Err(_) => {
                return err(&req.id, "bad_params", "updates string is not valid JSON", None)
            }
        },
        Some(v) => v.clone(),
        None => return err(&req.id, "bad_params", "missing updates object", None),
    };
    let Some(updates) = updates_value.as_object() else {
        return err(&req.id, "bad_params", "updates must be an object", None);
    };

    let columns = match db::load_columns(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let client_id = match resolve_client_id_by_row(conn, row) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Validate the whole row edit before touching anything.
    enum Edit {
        Scalar(&'static str, String),
        Tick(String, TickState),
    }
    let mut edits: Vec<Edit> = Vec::with_capacity(updates.len());
    for (header, value) in updates {
        let raw = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => {
                if *b { "TRUE" } else { "FALSE" }.to_string()
            }
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "values must be strings, numbers, or booleans",
                    Some(json!({ "column": header })),
                )
            }
        };
        if let Some(def) = columns.iter().find(|c| c.name == *header) {
            match TickState::parse(&raw, def.mode) {
                Ok(s) => edits.push(Edit::Tick(def.name.clone(), s)),
                Err(e) => return err(&req.id, "bad_params", e.message, e.details),
            }
        } else if let Some(db_column) = scalar_field_column(header) {
            edits.push(Edit::Scalar(db_column, raw));
        } else {
            return err(
                &req.id,
                "bad_params",
                "unknown column",
                Some(json!({ "column": header })),
            );
        }
    }

    for edit in edits {
        let applied = match edit {
            Edit::Scalar(db_column, value) => {
                set_scalar_field(conn, &client_id, db_column, &value)
            }
            Edit::Tick(column, tick) => upsert_tick(conn, &client_id, &column, tick),
        };
        if let Err(e) = applied {
            return e.response(&req.id);
        }
    }

    ok(&req.id, json!({ "rowIndex": row, "applied": updates.len() }))
}

fn handle_notes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let row = match require_row_param(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let client_id = match resolve_client_id_by_row(conn, row) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let fetched = conn.query_row(
        "SELECT notes, note_adjustment FROM clients WHERE id = ?",
        [&client_id],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<i64>>(1)?,
            ))
        },
    );
    match fetched {
        Ok((notes, adjustment)) => ok(
            &req.id,
            json!({
                "rowIndex": row,
                "notes": notes,
                "noteAdjustment": adjustment,
                // What the totals will actually use, marker fallback included.
                "effectiveAdjustment": calc::effective_adjustment(adjustment, &notes)
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_notes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_auth(state, &req.params) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let row = match require_row_param(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(notes) = req.params.get("notes").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing notes", None);
    };
    let client_id = match resolve_client_id_by_row(conn, row) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let updated = conn.execute(
        "UPDATE clients SET notes = ?, updated_at = ? WHERE id = ?",
        (notes, now_stamp(), &client_id),
    );
    if let Err(e) = updated {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    // Optional structured adjustment: an integer sets it, null clears it
    // (falling back to any marker still in the note text).
    if let Some(adjustment) = req.params.get("noteAdjustment") {
        let set = match adjustment {
            serde_json::Value::Null => conn.execute(
                "UPDATE clients SET note_adjustment = NULL WHERE id = ?",
                [&client_id],
            ),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => conn.execute(
                    "UPDATE clients SET note_adjustment = ? WHERE id = ?",
                    (v, &client_id),
                ),
                None => {
                    return err(
                        &req.id,
                        "bad_params",
                        "noteAdjustment must be an integer or null",
                        None,
                    )
                }
            },
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "noteAdjustment must be an integer or null",
                    None,
                )
            }
        };
        if let Err(e) = set {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "rowIndex": row }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "clients.list" => Some(handle_clients_list(state, req)),
        "clients.add" => Some(handle_clients_add(state, req)),
        "clients.edit" => Some(handle_clients_edit(state, req)),
        "notes.get" => Some(handle_notes_get(state, req)),
        "notes.update" => Some(handle_notes_update(state, req)),
        _ => None,
    }
}
