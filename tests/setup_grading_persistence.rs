use rusqlite::Connection;
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
    let exe = env!("CARGO_BIN_EXE_gradecalcd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradecalcd");
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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn setup_defaults_are_served_without_a_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let setup = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(setup["grading"]["displayDecimals"], json!(1));
    assert_eq!(setup["grading"]["defaultLateInterval"], json!("day"));
    assert_eq!(setup["grading"]["graceMinutes"], json!(0));
    assert_eq!(setup["attendance"]["lateCode"], json!("L"));

    let update = request(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "grading", "patch": { "displayDecimals": 2 } }),
    );
    assert_eq!(error_code(&update), "no_workspace");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn setup_update_validates_and_persists_across_restarts() {
    let workspace = temp_dir("gradecalc-setup-persist");

    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );

        let bad_section = request(
            &mut stdin,
            &mut reader,
            "2",
            "setup.update",
            json!({ "section": "printer", "patch": {} }),
        );
        assert_eq!(error_code(&bad_section), "bad_params");

        let bad_value = request(
            &mut stdin,
            &mut reader,
            "3",
            "setup.update",
            json!({ "section": "grading", "patch": { "defaultLateInterval": "month" } }),
        );
        assert_eq!(error_code(&bad_value), "bad_params");

        let updated = request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "setup.update",
            json!({
                "section": "grading",
                "patch": { "defaultLateInterval": "WEEK", "defaultLatePenaltyPercent": 15 }
            }),
        );
        assert_eq!(updated["section"], json!("grading"));
        assert_eq!(updated["values"]["defaultLateInterval"], json!("week"));

        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "5",
            "setup.update",
            json!({ "section": "attendance", "patch": { "lateCreditPercent": 0, "lateCode": "t" } }),
        );

        drop(stdin);
        let _ = child.wait();
    }

    let conn = Connection::open(workspace.join("gradecalc.sqlite3")).expect("open db");
    let raw: String = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = 'setup.grading'",
            [],
            |r| r.get(0),
        )
        .expect("grading settings row");
    let saved: serde_json::Value = serde_json::from_str(&raw).expect("parse saved settings");
    assert_eq!(saved["defaultLateInterval"], json!("week"));
    assert_eq!(saved["defaultLatePenaltyPercent"], json!(15.0));
    drop(conn);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(setup["grading"]["defaultLateInterval"], json!("week"));
    assert_eq!(setup["attendance"]["lateCode"], json!("T"));

    // Workspace defaults now drive lateness: 8 days late is 2 started weeks at 15% each.
    let late = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "late.resolve",
        json!({
            "dueAt": "2026-05-01T17:00:00Z",
            "submittedAt": "2026-05-09T17:00:00Z",
            "score": { "categoryId": "hw", "pointsEarned": 90, "maxPoints": 100 }
        }),
    );
    assert_eq!(late["isLate"], json!(true));
    assert_eq!(late["lateIntervalsElapsed"], json!(2));
    assert_eq!(late["policy"]["interval"], json!("week"));
    assert_eq!(late["item"]["latePenaltyPercent"], json!(15.0));
    assert_eq!(late["displayPercentage"], json!(60.0));

    let att = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.toItems",
        json!({ "categoryId": "att", "records": [{ "status": "T" }, { "status": "present" }] }),
    );
    let items = att["items"].as_array().expect("items");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["pointsEarned"], json!(0.0));
    assert_eq!(items[1]["pointsEarned"], json!(1.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn corrupt_saved_settings_do_not_lock_the_workspace() {
    let workspace = temp_dir("gradecalc-setup-corrupt");
    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        drop(stdin);
        let _ = child.wait();
    }
    {
        let conn = Connection::open(workspace.join("gradecalc.sqlite3")).expect("open db");
        conn.execute(
            "INSERT INTO settings(key, value_json) VALUES('setup.grading', '{not json')",
            [],
        )
        .expect("seed corrupt row");
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(setup["grading"]["displayDecimals"], json!(1));

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grade.submission",
        json!({ "item": { "categoryId": "hw", "pointsEarned": 87, "maxPoints": 100 } }),
    );
    assert_eq!(graded["letterGrade"], json!("B+"));

    // Saving over the corrupt row repairs it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "grading", "patch": { "displayDecimals": 2 } }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "5", "setup.get", json!({}));
    assert_eq!(setup["grading"]["displayDecimals"], json!(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn attendance_codes_must_name_one_status() {
    let workspace = temp_dir("gradecalc-setup-codes");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let clash = request(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "attendance", "patch": { "lateCode": "P" } }),
    );
    assert_eq!(error_code(&clash), "bad_params");

    let word = request(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "attendance", "patch": { "absentCode": "excused" } }),
    );
    assert_eq!(error_code(&word), "bad_params");

    let setup = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    assert_eq!(setup["attendance"]["lateCode"], json!("L"));
    assert_eq!(setup["attendance"]["absentCode"], json!("A"));

    let att = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.toItems",
        json!({ "categoryId": "att", "records": [{ "status": "P" }, { "status": "L" }] }),
    );
    assert_eq!(att["items"][0]["pointsEarned"], json!(1.0));
    assert_eq!(att["items"][1]["pointsEarned"], json!(0.5));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
