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

fn admin_ctx(id: &str) -> serde_json::Value {
    json!({ "userId": id, "role": "admin" })
}

fn teacher_ctx(id: &str) -> serde_json::Value {
    json!({ "userId": id, "role": "teacher" })
}

fn student_ctx(id: &str) -> serde_json::Value {
    json!({ "userId": id, "role": "student" })
}

#[test]
fn course_counts_track_content_and_delete_takes_enrollments() {
    let workspace = temp_dir("gradebook-course-dashboard");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!(null),
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin_id = register_user(&mut stdin, &mut reader, "2", "ada", "admin");
    let teacher_id = register_user(&mut stdin, &mut reader, "3", "tina", "teacher");
    let sam = register_user(&mut stdin, &mut reader, "4", "sam", "student");
    let sara = register_user(&mut stdin, &mut reader, "5", "sara", "student");

    // Creating courses is a teacher action.
    let student_create = request(
        &mut stdin,
        &mut reader,
        "6",
        "courses.create",
        student_ctx(&sam),
        json!({ "title": "Sneaky", "description": "" }),
    );
    assert_eq!(error_code(&student_create), "forbidden");

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "courses.create",
        teacher_ctx(&teacher_id),
        json!({ "title": "Latin", "description": "declensions" }),
    );
    let course_id = course["course"]["id"].as_str().expect("course id").to_string();
    assert_eq!(course["course"]["teacherId"].as_str(), Some(teacher_id.as_str()));

    let quiz = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "quizzes.create",
        teacher_ctx(&teacher_id),
        json!({ "title": "Nouns", "courseId": course_id, "questions": [] }),
    );
    let quiz_id = quiz["quiz"]["id"].as_str().expect("quiz id").to_string();

    for (rid, title) in [("9", "Reading I"), ("10", "Reading II")] {
        request_ok(
            &mut stdin,
            &mut reader,
            rid,
            "assignments.create",
            teacher_ctx(&teacher_id),
            json!({ "title": title, "courseId": course_id }),
        );
    }

    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "enrollment.enrollCourse",
        student_ctx(&sam),
        json!({ "courseId": course_id }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "enrollment.enrollCourse",
        student_ctx(&sara),
        json!({ "courseId": course_id }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "enrollment.enrollQuiz",
        student_ctx(&sam),
        json!({ "quizId": quiz_id }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "courses.list",
        teacher_ctx(&teacher_id),
        json!({}),
    );
    let courses = listed["courses"].as_array().expect("courses");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["title"], json!("Latin"));
    assert_eq!(courses[0]["studentCount"], json!(2));
    assert_eq!(courses[0]["quizCount"], json!(1));
    assert_eq!(courses[0]["assignmentCount"], json!(2));

    // Deleting courses is an admin action.
    let teacher_delete = request(
        &mut stdin,
        &mut reader,
        "15",
        "courses.delete",
        teacher_ctx(&teacher_id),
        json!({ "courseId": course_id }),
    );
    assert_eq!(error_code(&teacher_delete), "forbidden");

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "courses.delete",
        admin_ctx(&admin_id),
        json!({ "courseId": course_id }),
    );
    assert_eq!(deleted["ok"], json!(true));

    let roster = request(
        &mut stdin,
        &mut reader,
        "17",
        "courses.students",
        teacher_ctx(&teacher_id),
        json!({ "courseId": course_id }),
    );
    assert_eq!(error_code(&roster), "not_found");

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "courses.list",
        teacher_ctx(&teacher_id),
        json!({}),
    );
    assert_eq!(after["courses"].as_array().map(|a| a.len()), Some(0));

    // Course enrollments went with the course; quiz enrollments did not.
    let overview = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "enrollment.overview",
        teacher_ctx(&teacher_id),
        json!({}),
    );
    let rows = overview["students"].as_array().expect("overview rows");
    assert_eq!(rows[0]["student"]["username"], json!("sam"));
    assert_eq!(rows[0]["enrolledCourses"].as_array().map(|a| a.len()), Some(0));
    assert_eq!(rows[0]["enrolledQuizzes"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(rows[0]["enrolledQuizzes"][0]["title"], json!("Nouns"));

    // The quiz itself survives, now pointing at a gone course.
    let quizzes = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "quizzes.list",
        teacher_ctx(&teacher_id),
        json!({}),
    );
    assert_eq!(quizzes["quizzes"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn course_list_filters_by_teacher() {
    let workspace = temp_dir("gradebook-course-filter");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!(null),
        json!({ "path": workspace.to_string_lossy() }),
    );
    let tina = register_user(&mut stdin, &mut reader, "2", "tina", "teacher");
    let theo = register_user(&mut stdin, &mut reader, "3", "theo", "teacher");

    // description is not optional.
    let bare = request(
        &mut stdin,
        &mut reader,
        "4",
        "courses.create",
        teacher_ctx(&tina),
        json!({ "title": "Bare" }),
    );
    assert_eq!(error_code(&bare), "bad_params");

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        teacher_ctx(&tina),
        json!({ "title": "Greek", "description": "alphabet" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.create",
        teacher_ctx(&theo),
        json!({ "title": "Drama", "description": "stagecraft" }),
    );

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "courses.list",
        teacher_ctx(&tina),
        json!({}),
    );
    assert_eq!(all["courses"].as_array().map(|a| a.len()), Some(2));

    let tinas = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "courses.list",
        teacher_ctx(&tina),
        json!({ "teacherId": tina }),
    );
    let courses = tinas["courses"].as_array().expect("filtered courses");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["title"], json!("Greek"));
    assert_eq!(courses[0]["teacherId"].as_str(), Some(tina.as_str()));

    // The filter names any teacher, not just the caller.
    let theos = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "courses.list",
        teacher_ctx(&tina),
        json!({ "teacherId": theo }),
    );
    let courses = theos["courses"].as_array().expect("filtered courses");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["title"], json!("Drama"));

    let nobody = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "courses.list",
        teacher_ctx(&tina),
        json!({ "teacherId": "no-such-teacher" }),
    );
    assert_eq!(nobody["courses"].as_array().map(|a| a.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
