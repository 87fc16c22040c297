use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::calc::TickState;
use crate::db;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, EditSession};

pub const ADMIN_DIGEST_KEY: &str = "security.admin_digest";

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

pub fn admin_digest(conn: &Connection) -> Result<Option<String>, HandlerErr> {
    let value = db::settings_get_json(conn, ADMIN_DIGEST_KEY)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(value.and_then(|v| v.as_str().map(|s| s.to_string())))
}

/// Authorization gate for every mutating method: passes while the session
/// is UNLOCKED, or when the request carries the correct shared secret — in
/// which case the session transitions to UNLOCKED, the same way the
/// original page captured the password on first successful prompt. A wrong
/// secret leaves the session LOCKED.
pub fn require_auth(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<(), HandlerErr> {
    let digest = {
        let Some(conn) = state.db.as_ref() else {
            return Err(HandlerErr::new("no_workspace", "select a workspace first"));
        };
        admin_digest(conn)?
    };
    let Some(digest) = digest else {
        return Err(HandlerErr::new(
            "no_admin_password",
            "set an admin password before editing",
        ));
    };

    if state.session.is_unlocked() {
        return Ok(());
    }

    match params.get("password").and_then(|v| v.as_str()) {
        Some(pwd) if sha256_hex(pwd) == digest => {
            state.session = EditSession::Unlocked;
            Ok(())
        }
        Some(_) => Err(HandlerErr::new("wrong_password", "wrong password")),
        None => Err(HandlerErr::new(
            "locked",
            "unlock the edit session or supply a password",
        )),
    }
}

pub fn resolve_client_id_by_row(
    conn: &Connection,
    row: i64,
) -> Result<String, HandlerErr> {
    let client_id: Option<String> = conn
        .query_row(
            "SELECT id FROM clients WHERE sort_order = ?",
            [row],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    client_id.ok_or_else(|| {
        HandlerErr::new("not_found", "client not found").with_details(json!({ "row": row }))
    })
}

pub fn require_row_param(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    match params.get("rowIndex").and_then(|v| v.as_i64()) {
        Some(v) if v >= 0 => Ok(v),
        _ => Err(HandlerErr::new("bad_params", "missing/invalid rowIndex")),
    }
}

/// Maps a sheet header to its clients-table column. Procedure columns are
/// not in this list; they live in the ticks table.
pub fn scalar_field_column(header: &str) -> Option<&'static str> {
    match header {
        "Name" => Some("name"),
        "Email" => Some("email"),
        "University" => Some("university"),
        "Phone" => Some("phone"),
        "Address" => Some("address"),
        "Start Date" => Some("start_date"),
        "Received" => Some("received_amount"),
        "Notes" => Some("notes"),
        _ => None,
    }
}

pub fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn upsert_tick(
    conn: &Connection,
    client_id: &str,
    column: &str,
    state: TickState,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO ticks(client_id, column_name, value, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(client_id, column_name) DO UPDATE SET
           value = excluded.value,
           updated_at = excluded.updated_at",
        (client_id, column, state.as_str(), now_stamp()),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "ticks" }))
    })?;
    Ok(())
}

pub fn set_scalar_field(
    conn: &Connection,
    client_id: &str,
    db_column: &str,
    value: &str,
) -> Result<(), HandlerErr> {
    // db_column comes from the static header mapping, never from input.
    let sql = format!(
        "UPDATE clients SET {} = ?, updated_at = ? WHERE id = ?",
        db_column
    );
    conn.execute(&sql, (value, now_stamp(), client_id))
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(())
}
