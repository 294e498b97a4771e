#![allow(clippy::uninlined_format_args)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use rusqlite::Connection;
use serde_json::Value;
use ulid::Ulid;

const EVENTS: &str = r#"{"kind":"publish","mission_id":"m1","reward":"5000000000000000000","context":"ctx","publisher":"0xp","block":10,"tx":"0x1","tx_time":1700000000}
{"kind":"solve","solution_id":"s1","mission_id":"m1","context":"answer","solver":"0xs","block":11,"tx":"0x2","tx_time":1700000060}

{"kind":"accept","solution_id":"s1","block":12,"tx":"0x3","tx_time":1700000120}
{"kind":"publish","mission_id":"m2","reward":"1","context":"other","publisher":"0xp","block":12,"tx":"0x4","tx_time":1700000130}
{"kind":"solve","solution_id":"s2","mission_id":"m2","context":"try","solver":"0xq","block":13,"tx":"0x5","tx_time":1700000180}
{"kind":"reject","solution_id":"s2","block":14,"tx":"0x6","tx_time":1700000240}
"#;

fn otl_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_otl") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/otl");
            if !path.exists() {
                let status = Command::new("cargo")
                    .args(["build", "-p", "ot-ledger-cli", "--bin", "otl"])
                    .status();
                match status {
                    Ok(value) if value.success() => {}
                    Ok(value) => panic!("failed to build otl binary (status={value})"),
                    Err(err) => panic!("failed to invoke cargo build: {err}"),
                }
            }
            path
        }
    }
}

fn temp_path(label: &str, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!("otl-{label}-{}.{extension}", Ulid::new()))
}

fn otl_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(otl_binary_path());
    command.arg("--db").arg(db_path);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run otl command {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn ingest_fixture(db_path: &Path) -> Value {
    let events_path = temp_path("events", "jsonl");
    if let Err(err) = std::fs::write(&events_path, EVENTS) {
        panic!("failed to write events fixture: {err}");
    }
    let events_arg = events_path.to_string_lossy().to_string();
    let output = otl_output(db_path, &["ingest", "--events", &events_arg]);
    let _ = std::fs::remove_file(&events_path);
    assert!(
        output.status.success(),
        "ingest failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    stdout_json(&output)
}

#[test]
fn help_lists_expected_subcommands() {
    let output = match Command::new(otl_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in [
        "migrate",
        "ingest",
        "apply",
        "checkpoint",
        "missions",
        "solutions",
        "process",
        "status",
    ] {
        assert!(
            stdout.contains(required),
            "missing subcommand {required} in help output: {stdout}"
        );
    }
}

#[test]
fn ingest_then_query_reports_ledger_state() {
    let db_path = temp_path("ingest", "sqlite3");

    let report = ingest_fixture(&db_path);
    assert_eq!(report["applied"], Value::from(6));
    assert_eq!(report["skipped"], Value::from(0));
    assert_eq!(report["checkpoint"], Value::String("14".to_string()));

    let unsolved = stdout_json(&otl_output(&db_path, &["missions", "unsolved"]));
    let ids: Vec<&str> = match unsolved.as_array() {
        Some(rows) => rows.iter().filter_map(|row| row["mission_id"].as_str()).collect(),
        None => panic!("expected mission array, got {unsolved}"),
    };
    assert_eq!(ids, vec!["m2"]);

    let mission = stdout_json(&otl_output(&db_path, &["missions", "get", "--id", "m1"]));
    assert_eq!(mission["status"], Value::String("solved".to_string()));
    assert_eq!(mission["reward"], Value::String("5000000000000000000".to_string()));
    assert_eq!(mission["reward_in_det"], Value::String("5.0".to_string()));

    let by_publisher = stdout_json(&otl_output(
        &db_path,
        &["missions", "by-publisher", "--address", "0xp", "--limit", "1"],
    ));
    match by_publisher.as_array() {
        Some(rows) => {
            assert_eq!(rows.len(), 1);
            assert!(rows[0].get("context").is_none());
        }
        None => panic!("expected mission array, got {by_publisher}"),
    }

    let process = stdout_json(&otl_output(
        &db_path,
        &["process", "--solution", "s1", "--solution", "s2"],
    ));
    let statuses: Vec<&str> = match process["process"].as_array() {
        Some(rows) => rows.iter().filter_map(|row| row["status"].as_str()).collect(),
        None => panic!("expected process array, got {process}"),
    };
    assert_eq!(statuses, vec!["accept", "reject"]);

    let status = stdout_json(&otl_output(&db_path, &["status"]));
    assert_eq!(status["missions"], Value::from(2));
    assert_eq!(status["solved_missions"], Value::from(1));
    assert_eq!(status["schema_version"], Value::from(1));

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn second_ingest_replays_only_the_checkpoint_block() {
    let db_path = temp_path("restart", "sqlite3");

    ingest_fixture(&db_path);
    let report = ingest_fixture(&db_path);
    assert_eq!(report["skipped"], Value::from(5));
    assert_eq!(report["applied"], Value::from(1));

    let status = stdout_json(&otl_output(&db_path, &["status"]));
    assert_eq!(status["rejects"], Value::from(2));
    assert_eq!(status["accepts"], Value::from(1));

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn ingest_reads_events_from_stdin() {
    let db_path = temp_path("stdin", "sqlite3");

    let mut child = match Command::new(otl_binary_path())
        .arg("--db")
        .arg(&db_path)
        .args(["ingest", "--events", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => panic!("failed to spawn otl: {err}"),
    };
    match child.stdin.take() {
        Some(mut stdin) => {
            if let Err(err) = stdin.write_all(EVENTS.as_bytes()) {
                panic!("failed to write stdin: {err}");
            }
        }
        None => panic!("stdin was not piped"),
    }
    let output = match child.wait_with_output() {
        Ok(output) => output,
        Err(err) => panic!("failed to wait for otl: {err}"),
    };

    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["applied"], Value::from(6));

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn malformed_event_line_fails_before_any_write() {
    let db_path = temp_path("malformed", "sqlite3");
    let events_path = temp_path("malformed-events", "jsonl");
    let first = EVENTS.lines().next().unwrap_or_default();
    let body = format!("{first}\n{{\"kind\":\"publish\",\"reward\":\"0x10\"}}\n");
    if let Err(err) = std::fs::write(&events_path, body) {
        panic!("failed to write events fixture: {err}");
    }

    let events_arg = events_path.to_string_lossy().to_string();
    let output = otl_output(&db_path, &["ingest", "--events", &events_arg]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("invalid event on line 2"),
        "expected line context, got stderr={stderr}"
    );

    let status = stdout_json(&otl_output(&db_path, &["status"]));
    assert_eq!(status["missions"], Value::from(0));

    let _ = std::fs::remove_file(&events_path);
    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn unreadable_rows_are_skipped_in_listings() {
    let db_path = temp_path("lenient", "sqlite3");
    ingest_fixture(&db_path);

    let conn = match Connection::open(&db_path) {
        Ok(value) => value,
        Err(err) => panic!("failed to open setup db: {err}"),
    };
    if let Err(err) = conn.execute(
        "INSERT INTO mission (mission_id, reward, publisher, block, tx, tx_time)
         VALUES ('broken', 'abc', '0xp', 'not-a-block', '0x9', 1700000300)",
        [],
    ) {
        panic!("failed to seed broken row: {err}");
    }
    drop(conn);

    let output = otl_output(&db_path, &["missions", "list"]);
    assert!(output.status.success());
    match stdout_json(&output).as_array() {
        Some(rows) => assert_eq!(rows.len(), 2),
        None => panic!("expected mission array"),
    }

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn checkpoint_set_and_get_round_trip_through_the_binary() {
    let db_path = temp_path("checkpoint", "sqlite3");

    let set = otl_output(&db_path, &["checkpoint", "set", "--block", "77"]);
    assert!(set.status.success());
    let get = stdout_json(&otl_output(&db_path, &["checkpoint", "get"]));
    assert_eq!(get["from"], Value::String("77".to_string()));

    let bad = otl_output(&db_path, &["checkpoint", "set", "--block", "-1"]);
    assert!(!bad.status.success());

    let _ = std::fs::remove_file(&db_path);
}
