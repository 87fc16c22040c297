use rusqlite::Connection;
use std::path::Path;

use crate::calc;

/// Procedure columns of the original sheet, seeded into fresh workspaces.
pub const DEFAULT_TICK_COLUMNS: &[&str] = &[
    "Secondary Cert",
    "Bachelor Cert",
    "Master Cert",
    "Equivalency Cert",
    "Internship Cert",
    "Documents",
    "National ID",
    "Power of Attorney",
    "Preliminary Accept",
    "Data Completion",
    "Foreign Fees",
    "Final Selection",
];

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("clientdesk.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS clients(
            id TEXT PRIMARY KEY,
            sort_order INTEGER NOT NULL,
            name TEXT NOT NULL,
            email TEXT,
            university TEXT,
            phone TEXT,
            address TEXT,
            start_date TEXT,
            received_amount TEXT NOT NULL DEFAULT '',
            notes TEXT NOT NULL DEFAULT '',
            note_adjustment INTEGER,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_clients_sort ON clients(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tick_columns(
            name TEXT PRIMARY KEY,
            sort_order INTEGER NOT NULL,
            mode TEXT NOT NULL DEFAULT 'tristate'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ticks(
            client_id TEXT NOT NULL,
            column_name TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(client_id, column_name),
            FOREIGN KEY(client_id) REFERENCES clients(id),
            FOREIGN KEY(column_name) REFERENCES tick_columns(name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ticks_client ON ticks(client_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ticks_column ON ticks(column_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fees(
            column_name TEXT PRIMARY KEY,
            amount REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before the column registry grew a toggle mode.
    ensure_tick_columns_mode(&conn)?;
    // Workspaces created before the structured adjustment column existed.
    ensure_clients_note_adjustment(&conn)?;

    seed_default_columns(&conn)?;

    // Conversion step for legacy note markers: rows without a structured
    // adjustment but with a parseable EXTRA:<int> marker get the column
    // filled from the note. Idempotent; malformed markers stay NULL.
    migrate_note_adjustments(&conn)?;

    Ok(conn)
}

fn ensure_tick_columns_mode(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "tick_columns", "mode")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE tick_columns ADD COLUMN mode TEXT NOT NULL DEFAULT 'tristate'",
        [],
    )?;
    Ok(())
}

fn ensure_clients_note_adjustment(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "clients", "note_adjustment")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE clients ADD COLUMN note_adjustment INTEGER", [])?;
    Ok(())
}

fn seed_default_columns(conn: &Connection) -> anyhow::Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM tick_columns", [], |r| r.get(0))?;
    if count > 0 {
        return Ok(());
    }
    for (i, name) in DEFAULT_TICK_COLUMNS.iter().enumerate() {
        conn.execute(
            "INSERT INTO tick_columns(name, sort_order, mode) VALUES(?, ?, 'tristate')",
            (name, i as i64),
        )?;
    }
    Ok(())
}

pub fn migrate_note_adjustments(conn: &Connection) -> anyhow::Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT id, notes FROM clients
         WHERE note_adjustment IS NULL AND notes LIKE '%EXTRA:%'",
    )?;
    let candidates = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut converted = 0;
    for (id, notes) in candidates {
        if let Some(adjustment) = calc::note_adjustment(&notes) {
            conn.execute(
                "UPDATE clients SET note_adjustment = ? WHERE id = ?",
                (adjustment, &id),
            )?;
            converted += 1;
        }
    }
    Ok(converted)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?")?;
    let mut rows = stmt.query([key])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let text: String = row.get(0)?;
    Ok(Some(serde_json::from_str(&text)?))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn load_columns(conn: &Connection) -> anyhow::Result<Vec<calc::ColumnDef>> {
    let mut stmt = conn.prepare("SELECT name, mode FROM tick_columns ORDER BY sort_order")?;
    let columns = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(name, mode)| calc::ColumnDef {
            name,
            // Unrecognized stored modes read as tri-state rather than failing
            // the whole workspace open.
            mode: calc::ToggleMode::parse(&mode).unwrap_or(calc::ToggleMode::TriState),
        })
        .collect();
    Ok(columns)
}

pub fn load_fees(conn: &Connection) -> anyhow::Result<calc::FeeTable> {
    let mut stmt = conn.prepare("SELECT column_name, amount FROM fees")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut fees = calc::FeeTable::default();
    for (column, amount) in rows {
        fees.set_amount(&column, amount);
    }
    Ok(fees)
}

pub fn persist_fee(conn: &Connection, column: &str, amount: f64) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO fees(column_name, amount) VALUES(?, ?)
         ON CONFLICT(column_name) DO UPDATE SET amount = excluded.amount",
        (column, amount),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
