use anyhow::{anyhow, Context};
use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

use crate::calc;
use crate::db;

/// One row of the old hosted sheet, as exported by its API: an object per
/// row keyed by header name, cells arriving as strings or numbers.
#[derive(Debug, Clone, Default)]
pub struct LegacyClientRecord {
    pub name: String,
    pub email: String,
    pub university: String,
    pub phone: String,
    pub address: String,
    pub start_date: String,
    pub received: String,
    pub notes: String,
    /// Remaining headers, candidate procedure cells.
    pub extra_cells: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ParseSummary {
    pub records: Vec<LegacyClientRecord>,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub converted_adjustments: usize,
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => {
            if *b { "TRUE" } else { "FALSE" }.to_string()
        }
        _ => String::new(),
    }
}

/// Parses a JSON sheet export (array of header-keyed row objects). Rows
/// without a usable Name are skipped, not fatal; the sheet kept trailing
/// blank rows around.
pub fn parse_sheet_export(text: &str) -> anyhow::Result<ParseSummary> {
    let value: serde_json::Value =
        serde_json::from_str(text).context("sheet export is not valid JSON")?;
    let Some(rows) = value.as_array() else {
        return Err(anyhow!("sheet export must be a JSON array of row objects"));
    };

    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in rows {
        let Some(obj) = row.as_object() else {
            skipped += 1;
            continue;
        };

        let mut record = LegacyClientRecord::default();
        for (header, cell) in obj {
            let text = cell_text(cell);
            match header.as_str() {
                "Name" => record.name = text.trim().to_string(),
                "Email" => record.email = text,
                "University" => record.university = text,
                "Phone" => record.phone = text,
                "Address" => record.address = text,
                "Start Date" => record.start_date = text,
                "Received" => record.received = text,
                "Notes" => record.notes = text,
                _ => record.extra_cells.push((header.clone(), text)),
            }
        }

        if record.name.is_empty() {
            skipped += 1;
            continue;
        }
        records.push(record);
    }

    Ok(ParseSummary { records, skipped })
}

/// Seeds a workspace from a sheet export. Appends after any existing rows;
/// note markers convert into the structured adjustment column on the way
/// in. Cells under headers the column registry does not know are dropped.
pub fn import_sheet_export(conn: &Connection, path: &Path) -> anyhow::Result<ImportSummary> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read sheet export {}", path.to_string_lossy()))?;
    let parsed = parse_sheet_export(&text)?;
    let columns = db::load_columns(conn)?;

    let mut next_row: i64 =
        conn.query_row("SELECT COALESCE(MAX(sort_order) + 1, 0) FROM clients", [], |r| {
            r.get(0)
        })?;

    let mut imported = 0;
    let mut converted = 0;
    for record in &parsed.records {
        let adjustment = calc::note_adjustment(&record.notes);
        if adjustment.is_some() {
            converted += 1;
        }

        let client_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO clients(id, sort_order, name, email, university, phone, address,
                                 start_date, received_amount, notes, note_adjustment, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &client_id,
                next_row,
                &record.name,
                &record.email,
                &record.university,
                &record.phone,
                &record.address,
                &record.start_date,
                &record.received,
                &record.notes,
                adjustment,
                chrono::Utc::now().to_rfc3339(),
            ),
        )?;

        for (header, cell) in &record.extra_cells {
            let Some(def) = columns.iter().find(|c| c.name == *header) else {
                continue;
            };
            let tick = calc::TickState::from_signal(cell, def.mode);
            conn.execute(
                "INSERT INTO ticks(client_id, column_name, value, updated_at)
                 VALUES(?, ?, ?, ?)",
                (
                    &client_id,
                    &def.name,
                    tick.as_str(),
                    chrono::Utc::now().to_rfc3339(),
                ),
            )?;
        }

        next_row += 1;
        imported += 1;
    }

    Ok(ImportSummary {
        imported,
        skipped: parsed.skipped,
        converted_adjustments: converted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_and_skips_nameless_ones() {
        let text = r#"[
            { "Name": "Amina", "Email": "a@x.com", "Received": 26000,
              "Documents": "PAID", "Notes": "EXTRA:-200" },
            { "Name": "", "Email": "ghost@x.com" },
            { "Name": "Basem", "Documents": "TRUE", "Mystery Column": "??" }
        ]"#;
        let parsed = parse_sheet_export(text).expect("parse export");
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.skipped, 1);

        let amina = &parsed.records[0];
        assert_eq!(amina.name, "Amina");
        // Numeric cells arrive as numbers; they read back as text.
        assert_eq!(amina.received, "26000");
        assert_eq!(amina.notes, "EXTRA:-200");
        assert!(amina
            .extra_cells
            .iter()
            .any(|(h, v)| h == "Documents" && v == "PAID"));

        let basem = &parsed.records[1];
        assert!(basem
            .extra_cells
            .iter()
            .any(|(h, _)| h == "Mystery Column"));
    }

    #[test]
    fn rejects_non_array_exports() {
        assert!(parse_sheet_export("{}").is_err());
        assert!(parse_sheet_export("not json").is_err());
    }

    #[test]
    fn import_converts_note_markers() {
        let dir = std::env::temp_dir().join(format!(
            "clientdesk-legacy-import-{}",
            Uuid::new_v4()
        ));
        let conn = db::open_db(&dir).expect("open workspace");

        let export_path = dir.join("sheet-export.json");
        std::fs::write(
            &export_path,
            r#"[
                { "Name": "Amina", "Notes": "EXTRA:-200", "Documents": "PAID" },
                { "Name": "Basem", "Notes": "EXTRA:abc" }
            ]"#,
        )
        .expect("write export");

        let summary = import_sheet_export(&conn, &export_path).expect("import");
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.converted_adjustments, 1);

        let adjustment: Option<i64> = conn
            .query_row(
                "SELECT note_adjustment FROM clients WHERE name = 'Amina'",
                [],
                |r| r.get(0),
            )
            .expect("query adjustment");
        assert_eq!(adjustment, Some(-200));

        // Malformed markers stay NULL and contribute zero downstream.
        let adjustment: Option<i64> = conn
            .query_row(
                "SELECT note_adjustment FROM clients WHERE name = 'Basem'",
                [],
                |r| r.get(0),
            )
            .expect("query adjustment");
        assert_eq!(adjustment, None);

        let tick: String = conn
            .query_row(
                "SELECT value FROM ticks t JOIN clients c ON c.id = t.client_id
                 WHERE c.name = 'Amina' AND t.column_name = 'Documents'",
                [],
                |r| r.get(0),
            )
            .expect("query tick");
        assert_eq!(tick, "PAID");
    }
}
