use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_clientdeskd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn clientdeskd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn open_unlocked(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) {
    request_ok(
        stdin,
        reader,
        "setup-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "setup-2",
        "admin.setPassword",
        json!({ "password": "scarab" }),
    );
    request_ok(
        stdin,
        reader,
        "setup-3",
        "session.unlock",
        json!({ "password": "scarab" }),
    );
}

#[test]
fn snapshot_covers_every_row_and_save_applies_it() {
    let workspace = temp_dir("clientdesk-save-snapshot");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_unlocked(&mut stdin, &mut reader, &workspace);

    for (i, name) in ["Amina", "Basem", "Dina"].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("add-{i}"),
            "clients.add",
            json!({ "name": name }),
        );
    }

    // The collector emits one entry per row even though nothing changed.
    let snapshot = request_ok(&mut stdin, &mut reader, "1", "roster.snapshot", json!({}));
    assert_eq!(snapshot.get("rowCount").and_then(|v| v.as_u64()), Some(3));
    let rows = snapshot
        .get("rows")
        .and_then(|v| v.as_object())
        .cloned()
        .expect("snapshot rows");
    assert_eq!(rows.len(), 3);
    for idx in ["0", "1", "2"] {
        let row = rows.get(idx).and_then(|v| v.as_object()).expect("row entry");
        assert!(row.contains_key("Name"));
        assert_eq!(
            row.get("Documents").and_then(|v| v.as_str()),
            Some("FALSE")
        );
    }

    // Saving the full snapshot back is idempotent and applies edits in it.
    let mut edited = rows.clone();
    let row0 = edited
        .get_mut("0")
        .and_then(|v| v.as_object_mut())
        .expect("row 0");
    row0.insert("Documents".into(), json!("PAID"));
    row0.insert("Received".into(), json!("12000"));

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.save",
        json!({
            "updates": serde_json::Value::Object(edited),
            "fees": { "Documents": 500 }
        }),
    );
    assert_eq!(result.get("rowsApplied").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(result.get("feesSaved").and_then(|v| v.as_u64()), Some(1));

    let grid = request_ok(&mut stdin, &mut reader, "3", "grid.get", json!({}));
    let grid_rows = grid.get("rows").and_then(|v| v.as_array()).cloned().unwrap();
    assert_eq!(
        grid_rows[0]
            .get("cells")
            .and_then(|c| c.get("Documents"))
            .and_then(|v| v.as_str()),
        Some("PAID")
    );
    assert_eq!(
        grid_rows[0].get("received").and_then(|v| v.as_str()),
        Some("12000")
    );
    // Untouched rows kept their snapshot values.
    assert_eq!(
        grid_rows[1]
            .get("cells")
            .and_then(|c| c.get("Documents"))
            .and_then(|v| v.as_str()),
        Some("FALSE")
    );
}

#[test]
fn save_is_all_or_nothing() {
    let workspace = temp_dir("clientdesk-save-atomic");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_unlocked(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "clients.add",
        json!({ "name": "Amina" }),
    );

    // Row 57 does not exist; the valid row 0 edit must not survive.
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "roster.save",
        json!({
            "updates": {
                "0": { "Documents": "PAID" },
                "57": { "Documents": "TRUE" }
            }
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_found")
    );

    let grid = request_ok(&mut stdin, &mut reader, "3", "grid.get", json!({}));
    let cell = grid
        .get("rows")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .and_then(|r| r.get("cells"))
        .and_then(|c| c.get("Documents"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    assert_eq!(cell.as_deref(), Some("FALSE"));

    // An invalid status value also rejects the whole payload.
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "roster.save",
        json!({ "updates": { "0": { "Documents": "sideways" } } }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn saved_fees_persist_across_reopen_but_unsaved_ones_do_not() {
    let workspace = temp_dir("clientdesk-save-fees");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_unlocked(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "clients.add",
        json!({ "name": "Amina" }),
    );

    // Session-only fee edit.
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.set",
        json!({ "column": "National ID", "amount": 900 }),
    );
    // Fee persisted through a save.
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.save",
        json!({ "updates": {}, "fees": { "Documents": 500 } }),
    );

    // Reopening the workspace drops the session-only edit and reloads the
    // persisted table.
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fees = request_ok(&mut stdin, &mut reader, "5", "fees.list", json!({}));
    let table = fees.get("fees").and_then(|v| v.as_object()).cloned().unwrap();
    assert_eq!(table.get("Documents").and_then(|v| v.as_f64()), Some(500.0));
    assert!(table.get("National ID").is_none());
}
