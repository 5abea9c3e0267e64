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

fn register_user(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    username: &str,
    role: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        id,
        "users.register",
        json!(null),
        json!({
            "username": username,
            "email": format!("{}@school.test", username),
            "passwordHash": format!("hash:{}", username),
            "role": role
        }),
    );
    result
        .get("user")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("user id")
        .to_string()
}

fn teacher_ctx(id: &str) -> serde_json::Value {
    json!({ "userId": id, "role": "teacher" })
}

#[test]
fn due_dates_must_be_rfc3339_and_optionals_round_trip() {
    let workspace = temp_dir("gradebook-assignment-due");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!(null),
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher_id = register_user(&mut stdin, &mut reader, "2", "tina", "teacher");

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.create",
        teacher_ctx(&teacher_id),
        json!({ "title": "Writing", "description": "" }),
    );
    let course_id = course["course"]["id"].as_str().expect("course id").to_string();

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "4",
        "assignments.create",
        teacher_ctx(&teacher_id),
        json!({ "title": "Essay", "courseId": course_id, "dueDate": "next friday" }),
    );
    assert_eq!(error_code(&bad_date), "bad_params");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assignments.create",
        teacher_ctx(&teacher_id),
        json!({
            "title": "Essay",
            "courseId": course_id,
            "dueDate": "2026-09-15T12:00:00Z",
            "fileUrl": "materials/essay-brief.pdf"
        }),
    );
    assert_eq!(created["assignment"]["dueDate"], json!("2026-09-15T12:00:00Z"));
    assert_eq!(created["assignment"]["fileUrl"], json!("materials/essay-brief.pdf"));

    // Both optionals stay null when omitted.
    let bare = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assignments.create",
        teacher_ctx(&teacher_id),
        json!({ "title": "Free reading", "courseId": course_id }),
    );
    assert!(bare["assignment"]["dueDate"].is_null());
    assert!(bare["assignment"]["fileUrl"].is_null());

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assignments.list",
        teacher_ctx(&teacher_id),
        json!({ "courseId": course_id }),
    );
    let rows = listed["assignments"].as_array().expect("assignments");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["dueDate"], json!("2026-09-15T12:00:00Z"));
    assert!(rows[1]["dueDate"].is_null());

    // Filtering on a course with nothing in it is an empty list.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "assignments.list",
        teacher_ctx(&teacher_id),
        json!({ "courseId": "no-such-course" }),
    );
    assert_eq!(other["assignments"].as_array().map(|a| a.len()), Some(0));

    let ghost_course = request(
        &mut stdin,
        &mut reader,
        "9",
        "assignments.create",
        teacher_ctx(&teacher_id),
        json!({ "title": "Orphan", "courseId": "no-such-course" }),
    );
    assert_eq!(error_code(&ghost_course), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
