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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    ctx: serde_json::Value,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
        "ctx": ctx,
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
    ctx: serde_json::Value,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, ctx, params);
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
fn lists_are_lenient_and_writes_are_gated_before_select() {
    let workspace = temp_dir("gradebook-workspace-gating");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let teacher = json!({ "userId": "tina", "role": "teacher" });
    let admin = json!({ "userId": "ada", "role": "admin" });

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!(null), json!({}));
    assert!(health["workspacePath"].is_null());
    assert!(health["version"].is_string());

    // Listing before a workspace is selected is an empty answer, not an error.
    let courses = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.list",
        teacher.clone(),
        json!({}),
    );
    assert_eq!(courses["courses"].as_array().map(|a| a.len()), Some(0));

    let users = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.list",
        admin.clone(),
        json!({}),
    );
    assert_eq!(users["users"].as_array().map(|a| a.len()), Some(0));

    // Role gates run before leniency.
    let anonymous = request(
        &mut stdin,
        &mut reader,
        "4",
        "courses.list",
        json!(null),
        json!({}),
    );
    assert_eq!(error_code(&anonymous), "forbidden");

    // Writes and aggregates refuse to run without a workspace.
    let register = request(
        &mut stdin,
        &mut reader,
        "5",
        "users.register",
        json!(null),
        json!({
            "username": "sam",
            "email": "sam@school.test",
            "passwordHash": "hash:sam",
            "role": "student"
        }),
    );
    assert_eq!(error_code(&register), "no_workspace");

    let grade = request(
        &mut stdin,
        &mut reader,
        "6",
        "grading.gradeQuiz",
        teacher.clone(),
        json!({ "quizId": "q", "studentId": "s", "grade": 5.0 }),
    );
    assert_eq!(error_code(&grade), "no_workspace");

    let board = request(
        &mut stdin,
        &mut reader,
        "7",
        "reports.classScoreboard",
        teacher.clone(),
        json!({}),
    );
    assert_eq!(error_code(&board), "no_workspace");

    let missing_path = request(
        &mut stdin,
        &mut reader,
        "8",
        "workspace.select",
        json!(null),
        json!({}),
    );
    assert_eq!(error_code(&missing_path), "bad_params");

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "workspace.select",
        json!(null),
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(selected["workspacePath"].is_string());

    let health_after = request_ok(&mut stdin, &mut reader, "10", "health", json!(null), json!({}));
    assert_eq!(
        health_after["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );

    // Unknown methods fall through the whole chain.
    let unknown = request(
        &mut stdin,
        &mut reader,
        "11",
        "grades.export",
        teacher.clone(),
        json!({}),
    );
    assert_eq!(error_code(&unknown), "not_implemented");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
