use crate::calc::{self, ChangeSet, ColumnDef, RowSnapshot, TickState};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    require_auth, require_row_param, resolve_client_id_by_row, scalar_field_column,
    set_scalar_field, upsert_tick, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

const GRID_GET_MAX_ROWS: i64 = 2000;

struct ClientRow {
    row_index: i64,
    id: String,
    name: String,
    email: Option<String>,
    university: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    start_date: Option<String>,
    received: String,
    notes: String,
    note_adjustment: Option<i64>,
    ticks: BTreeMap<String, String>,
}

fn load_rows(
    conn: &Connection,
    row_start: i64,
    row_count: i64,
) -> Result<Vec<ClientRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT sort_order, id, name, email, university, phone, address, start_date,
                    received_amount, notes, note_adjustment
             FROM clients
             ORDER BY sort_order LIMIT ? OFFSET ?",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut rows = stmt
        .query_map((row_count, row_start), |row| {
            Ok(ClientRow {
                row_index: row.get(0)?,
                id: row.get(1)?,
                name: row.get(2)?,
                email: row.get(3)?,
                university: row.get(4)?,
                phone: row.get(5)?,
                address: row.get(6)?,
                start_date: row.get(7)?,
                received: row.get(8)?,
                notes: row.get(9)?,
                note_adjustment: row.get(10)?,
                ticks: BTreeMap::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    if rows.is_empty() {
        return Ok(rows);
    }

    let placeholders = std::iter::repeat("?")
        .take(rows.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT client_id, column_name, value FROM ticks WHERE client_id IN ({})",
        placeholders
    );
    let bind_values: Vec<Value> = rows
        .iter()
        .map(|r| Value::Text(r.id.clone()))
        .collect();

    let mut tick_stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let row_index_by_id: HashMap<String, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();

    let tick_rows = tick_stmt
        .query_map(params_from_iter(bind_values), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    for (client_id, column, value) in tick_rows {
        if let Some(&i) = row_index_by_id.get(&client_id) {
            rows[i].ticks.insert(column, value);
        }
    }

    Ok(rows)
}

fn find_column<'a>(columns: &'a [ColumnDef], name: &str) -> Option<&'a ColumnDef> {
    columns.iter().find(|c| c.name == name)
}

fn handle_grid_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let row_start = req
        .params
        .get("rowStart")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let row_count = req
        .params
        .get("rowCount")
        .and_then(|v| v.as_i64())
        .unwrap_or(GRID_GET_MAX_ROWS);
    if row_start < 0 || row_count < 0 {
        return err(
            &req.id,
            "bad_params",
            "rowStart/rowCount must be >= 0",
            Some(json!({ "rowStart": row_start, "rowCount": row_count })),
        );
    }
    if row_count > GRID_GET_MAX_ROWS {
        return err(
            &req.id,
            "bad_params",
            "requested grid range is too large",
            Some(json!({ "rowCount": row_count, "maxRows": GRID_GET_MAX_ROWS })),
        );
    }

    let columns = match db::load_columns(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match load_rows(conn, row_start, row_count) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };

    let column_json: Vec<serde_json::Value> = columns
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "mode": c.mode.as_str(),
                "fee": state.fees.resolve(&c.name)
            })
        })
        .collect();

    let mut row_json = Vec::with_capacity(rows.len());
    for row in &rows {
        // Normalize stored cells to discrete statuses; absent cells read
        // as FALSE so every row exposes the full column set.
        let mut cells = serde_json::Map::new();
        let mut statuses: Vec<(&str, TickState)> = Vec::with_capacity(columns.len());
        for col in &columns {
            let stored = row.ticks.get(&col.name).map(|s| s.as_str()).unwrap_or("");
            let tick = TickState::from_signal(stored, col.mode);
            cells.insert(col.name.clone(), json!(tick.as_str()));
            statuses.push((col.name.as_str(), tick));
        }

        let adjustment = calc::effective_adjustment(row.note_adjustment, &row.notes);
        let totals = calc::row_totals(
            statuses.iter().copied(),
            &state.fees,
            adjustment,
            &row.received,
        );

        row_json.push(json!({
            "rowIndex": row.row_index,
            "name": row.name,
            "cells": serde_json::Value::Object(cells),
            "received": row.received,
            "adjustment": adjustment,
            "totals": totals
        }));
    }

    ok(
        &req.id,
        json!({
            "rowStart": row_start,
            "rowCount": row_json.len(),
            "columns": column_json,
            "rows": row_json
        }),
    )
}

fn handle_grid_update_cell(state: &mut AppState, req: &Request) -> serde_json::Value {
    // The legacy single-cell endpoint shipped without any credential
    // check; every mutation now goes through the session gate.
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
    let Some(column_name) = req.params.get("columnName").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing columnName", None);
    };
    let raw_value = match req.params.get("value") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        _ => return err(&req.id, "bad_params", "missing/invalid value", None),
    };

    let columns = match db::load_columns(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let client_id = match resolve_client_id_by_row(conn, row) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if let Some(def) = find_column(&columns, column_name) {
        let tick = match TickState::parse(&raw_value, def.mode) {
            Ok(t) => t,
            Err(e) => return err(&req.id, "bad_params", e.message, e.details),
        };
        if let Err(e) = upsert_tick(conn, &client_id, column_name, tick) {
            return e.response(&req.id);
        }
        ok(
            &req.id,
            json!({ "rowIndex": row, "columnName": column_name, "value": tick.as_str() }),
        )
    } else if let Some(db_column) = scalar_field_column(column_name) {
        if let Err(e) = set_scalar_field(conn, &client_id, db_column, &raw_value) {
            return e.response(&req.id);
        }
        ok(
            &req.id,
            json!({ "rowIndex": row, "columnName": column_name, "value": raw_value }),
        )
    } else {
        err(
            &req.id,
            "bad_params",
            "unknown column",
            Some(json!({ "column": column_name })),
        )
    }
}

fn handle_grid_toggle(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(column_name) = req.params.get("columnName").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing columnName", None);
    };

    let columns = match db::load_columns(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(def) = find_column(&columns, column_name) else {
        return err(
            &req.id,
            "bad_params",
            "not a procedure column",
            Some(json!({ "column": column_name })),
        );
    };
    let client_id = match resolve_client_id_by_row(conn, row) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let stored: Option<String> = match conn
        .query_row(
            "SELECT value FROM ticks WHERE client_id = ? AND column_name = ?",
            (&client_id, column_name),
            |r| r.get(0),
        ) {
        Ok(v) => Some(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let current = TickState::from_signal(stored.as_deref().unwrap_or(""), def.mode);
    let next = current.cycled(def.mode);
    if let Err(e) = upsert_tick(conn, &client_id, column_name, next) {
        return e.response(&req.id);
    }

    ok(
        &req.id,
        json!({
            "rowIndex": row,
            "columnName": column_name,
            "previous": current.as_str(),
            "value": next.as_str()
        }),
    )
}

fn handle_roster_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_auth(state, &req.params) {
        return e.response(&req.id);
    }

    let columns = {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match db::load_columns(conn) {
            Ok(c) => c,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let Some(updates_raw) = req.params.get("updates") else {
        return err(&req.id, "bad_params", "missing updates", None);
    };
    let change_set = match ChangeSet::parse(updates_raw, &columns) {
        Ok(cs) => cs,
        Err(e) => return err(&req.id, e.code.as_str(), e.message, e.details),
    };

    // The optional fee map persists the session table; validate it fully
    // before any write.
    let mut fee_entries: Vec<(String, f64)> = Vec::new();
    if let Some(fees_raw) = req.params.get("fees") {
        let Some(fees_obj) = fees_raw.as_object() else {
            return err(&req.id, "bad_params", "fees must be an object", None);
        };
        let mut scratch = calc::FeeTable::default();
        for (column, raw) in fees_obj {
            if find_column(&columns, column).is_none() {
                return err(
                    &req.id,
                    "bad_params",
                    "unknown fee column",
                    Some(json!({ "column": column })),
                );
            }
            let amount = scratch.set(column, raw);
            fee_entries.push((column.clone(), amount));
        }
    }

    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let tx = match conn.transaction() {
        Ok(tx) => tx,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    // All-or-nothing: an unresolvable row or failed write rolls the whole
    // snapshot back.
    for (row, cells) in change_set.rows() {
        let client_id = match resolve_client_id_by_row(&tx, *row) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        for (column, value) in cells {
            let applied = if let Some(def) = find_column(&columns, column) {
                // Already normalized by the parse; re-read defensively.
                match TickState::parse(value, def.mode) {
                    Ok(tick) => upsert_tick(&tx, &client_id, column, tick),
                    Err(e) => return err(&req.id, "bad_params", e.message, e.details),
                }
            } else if let Some(db_column) = scalar_field_column(column) {
                set_scalar_field(&tx, &client_id, db_column, value)
            } else {
                return err(
                    &req.id,
                    "bad_params",
                    "unknown column",
                    Some(json!({ "row": row, "column": column })),
                );
            };
            if let Err(e) = applied {
                return e.response(&req.id);
            }
        }
    }

    for (column, amount) in &fee_entries {
        if let Err(e) = db::persist_fee(&tx, column, *amount) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    for (column, amount) in &fee_entries {
        state.fees.set_amount(column, *amount);
    }

    ok(
        &req.id,
        json!({
            "rowsApplied": change_set.len(),
            "feesSaved": fee_entries.len()
        }),
    )
}

fn handle_roster_snapshot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let columns = match db::load_columns(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match load_rows(conn, 0, GRID_GET_MAX_ROWS) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };

    let snapshots: Vec<RowSnapshot> = rows
        .iter()
        .map(|row| {
            let mut snap = RowSnapshot {
                row_index: row.row_index,
                ..Default::default()
            };
            snap.fields.insert("Name".into(), row.name.clone());
            snap.fields
                .insert("Email".into(), row.email.clone().unwrap_or_default());
            snap.fields.insert(
                "University".into(),
                row.university.clone().unwrap_or_default(),
            );
            snap.fields
                .insert("Phone".into(), row.phone.clone().unwrap_or_default());
            snap.fields
                .insert("Address".into(), row.address.clone().unwrap_or_default());
            snap.fields.insert(
                "Start Date".into(),
                row.start_date.clone().unwrap_or_default(),
            );
            snap.fields.insert("Received".into(), row.received.clone());
            snap.fields.insert("Notes".into(), row.notes.clone());
            for col in &columns {
                let stored = row.ticks.get(&col.name).map(|s| s.as_str()).unwrap_or("");
                snap.ticks
                    .insert(col.name.clone(), TickState::from_signal(stored, col.mode));
            }
            snap
        })
        .collect();

    let change_set = ChangeSet::collect(snapshots.iter());
    ok(
        &req.id,
        json!({
            "rowCount": change_set.len(),
            "rows": change_set.to_json()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grid.get" => Some(handle_grid_get(state, req)),
        "grid.updateCell" => Some(handle_grid_update_cell(state, req)),
        "grid.toggle" => Some(handle_grid_toggle(state, req)),
        "roster.save" => Some(handle_roster_save(state, req)),
        "roster.snapshot" => Some(handle_roster_snapshot(state, req)),
        _ => None,
    }
}
