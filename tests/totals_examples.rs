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

fn request_ok(
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

fn first_row_totals(grid: &serde_json::Value) -> (f64, f64, String) {
    let totals = grid
        .get("rows")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .and_then(|r| r.get("totals"))
        .cloned()
        .expect("row totals");
    (
        totals
            .get("requiredTotal")
            .and_then(|v| v.as_f64())
            .expect("requiredTotal"),
        totals
            .get("remaining")
            .and_then(|v| v.as_f64())
            .expect("remaining"),
        totals
            .get("balance")
            .and_then(|v| v.as_str())
            .expect("balance")
            .to_string(),
    )
}

#[test]
fn one_paid_procedure_with_negative_marker_leaves_a_due_balance() {
    let workspace = temp_dir("clientdesk-totals-due");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_unlocked(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "clients.add",
        json!({ "name": "Amina" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.set",
        json!({ "column": "Documents", "amount": 500 }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grid.updateCell",
        json!({ "rowIndex": 0, "columnName": "Documents", "value": "PAID" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "notes.update",
        json!({ "rowIndex": 0, "notes": "EXTRA:-200" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grid.updateCell",
        json!({ "rowIndex": 0, "columnName": "Received", "value": "26000" }),
    );

    let grid = request_ok(&mut stdin, &mut reader, "6", "grid.get", json!({}));
    let (required, remaining, balance) = first_row_totals(&grid);
    assert_eq!(required, 26300.0);
    assert_eq!(remaining, 300.0);
    assert_eq!(balance, "due");

    // Recomputation with unchanged inputs is identical.
    let grid_again = request_ok(&mut stdin, &mut reader, "7", "grid.get", json!({}));
    assert_eq!(first_row_totals(&grid_again), (required, remaining, balance));
}

#[test]
fn no_procedures_and_full_payment_settles() {
    let workspace = temp_dir("clientdesk-totals-settled");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_unlocked(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "clients.add",
        json!({ "name": "Basem" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grid.updateCell",
        json!({ "rowIndex": 0, "columnName": "Received", "value": "26000" }),
    );

    let grid = request_ok(&mut stdin, &mut reader, "3", "grid.get", json!({}));
    let (required, remaining, balance) = first_row_totals(&grid);
    assert_eq!(required, 26000.0);
    assert_eq!(remaining, 0.0);
    assert_eq!(balance, "settled");
}

#[test]
fn malformed_marker_and_inactive_fees_contribute_nothing() {
    let workspace = temp_dir("clientdesk-totals-malformed");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_unlocked(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "clients.add",
        json!({ "name": "Dina" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "notes.update",
        json!({ "rowIndex": 0, "notes": "EXTRA:abc" }),
    );
    // A configured fee on a FALSE column stays out of the total.
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fees.set",
        json!({ "column": "National ID", "amount": 900 }),
    );

    let grid = request_ok(&mut stdin, &mut reader, "4", "grid.get", json!({}));
    let (required, remaining, balance) = first_row_totals(&grid);
    assert_eq!(required, 26000.0);
    assert_eq!(remaining, 26000.0);
    assert_eq!(balance, "due");
}

#[test]
fn fee_edits_recompute_totals_for_active_columns() {
    let workspace = temp_dir("clientdesk-totals-fees");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_unlocked(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "clients.add",
        json!({ "name": "Amina" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grid.updateCell",
        json!({ "rowIndex": 0, "columnName": "Documents", "value": "TRUE" }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fees.set",
        json!({ "column": "Documents", "amount": 500 }),
    );
    let grid = request_ok(&mut stdin, &mut reader, "4", "grid.get", json!({}));
    assert_eq!(first_row_totals(&grid).0, 26500.0);

    // Junk amounts store as zero.
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.set",
        json!({ "column": "Documents", "amount": "junk" }),
    );
    let grid = request_ok(&mut stdin, &mut reader, "6", "grid.get", json!({}));
    assert_eq!(first_row_totals(&grid).0, 26000.0);
}
