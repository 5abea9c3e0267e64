use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

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

fn send_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    line: &str,
) -> serde_json::Value {
    writeln!(stdin, "{}", line).expect("write line");
    stdin.flush().expect("flush line");

    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    serde_json::from_str(out.trim()).expect("parse response json")
}

#[test]
fn garbage_lines_answer_bad_json_without_wedging_the_stream() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let garbage = send_raw(&mut stdin, &mut reader, "this is not json");
    assert!(garbage["id"].is_null());
    assert_eq!(garbage["ok"], json!(false));
    assert_eq!(garbage["error"]["code"], json!("bad_json"));

    // Valid JSON that does not fit the request envelope gets the same
    // answer. An unrecognized role in ctx fails the whole parse.
    let bad_ctx = send_raw(
        &mut stdin,
        &mut reader,
        r#"{"id":"1","method":"health","params":{},"ctx":{"userId":"x","role":"emperor"}}"#,
    );
    assert!(bad_ctx["id"].is_null());
    assert_eq!(bad_ctx["error"]["code"], json!("bad_json"));

    // The daemon keeps serving after the bad lines.
    let health = send_raw(
        &mut stdin,
        &mut reader,
        r#"{"id":"2","method":"health","params":{}}"#,
    );
    assert_eq!(health["id"], json!("2"));
    assert_eq!(health["ok"], json!(true));

    drop(stdin);
    let _ = child.wait();
}
