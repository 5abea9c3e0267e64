use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    assignment_exists, db_conn, now_rfc3339, quiz_exists, require_role, require_self_or_staff,
    require_staff, required_str, user_exists,
};
use crate::ipc::types::{AppState, Request, Role};
use serde_json::json;
use uuid::Uuid;

fn handle_submit_assignment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ctx = match require_role(req, Role::Student) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let file_url = match req.params.get("fileUrl").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "missing_file", "a submission file is required", None),
    };

    match assignment_exists(conn, &assignment_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "assignment not found", None),
        Err(e) => return e.response(&req.id),
    }
    // The caller id is taken on trust for role, not for existence: a
    // submission row must never reference a user that was never registered.
    match user_exists(conn, &ctx.user_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return e.response(&req.id),
    }

    let submission_id = Uuid::new_v4().to_string();
    let created_at = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO student_submissions(id, assignment_id, student_id, file_url, grade, created_at)
         VALUES(?, ?, ?, ?, NULL, ?)",
        (
            &submission_id,
            &assignment_id,
            &ctx.user_id,
            &file_url,
            &created_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "student_submissions" })),
        );
    }

    ok(
        &req.id,
        json!({
            "submission": {
                "id": submission_id,
                "assignmentId": assignment_id,
                "studentId": ctx.user_id,
                "fileUrl": file_url,
                "grade": null,
                "createdAt": created_at
            }
        }),
    )
}

fn handle_attempt_quiz(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(req, Role::Student) {
        return e.response(&req.id);
    }
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let quiz_id = match required_str(req, "quizId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(answers_arr) = req.params.get("answers").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing answers[]", None);
    };
    let mut answers = Vec::with_capacity(answers_arr.len());
    for (i, a) in answers_arr.iter().enumerate() {
        match a.as_str() {
            Some(s) => answers.push(s.to_string()),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("answer at index {} must be a string", i),
                    None,
                )
            }
        }
    }

    match quiz_exists(conn, &quiz_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "quiz not found", None),
        Err(e) => return e.response(&req.id),
    }

    let mut stmt = match conn.prepare(
        "SELECT correct_answer FROM quiz_questions WHERE quiz_id = ? ORDER BY idx",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let correct = match stmt
        .query_map([&quiz_id], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Display-only feedback for the student. A grade is only stored when
    // a teacher later grades the quiz.
    let scored = calc::auto_score(&correct, &answers);

    ok(
        &req.id,
        json!({
            "quizId": quiz_id,
            "score": scored.score,
            "total": scored.total,
            "percentage": scored.percentage
        }),
    )
}

fn submission_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let assignment_id: String = row.get(1)?;
    let student_id: String = row.get(2)?;
    let file_url: String = row.get(3)?;
    let grade: Option<f64> = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(json!({
        "id": id,
        "assignmentId": assignment_id,
        "studentId": student_id,
        "fileUrl": file_url,
        "grade": grade,
        "createdAt": created_at
    }))
}

fn handle_list_by_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_self_or_staff(req, &student_id) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "submissions": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, assignment_id, student_id, file_url, grade, created_at
         FROM student_submissions
         WHERE student_id = ?
         ORDER BY created_at, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&student_id], submission_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_staff(req) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "submissions": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, assignment_id, student_id, file_url, grade, created_at
         FROM student_submissions
         ORDER BY created_at, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], submission_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.submitAssignment" => Some(handle_submit_assignment(state, req)),
        "submissions.attemptQuiz" => Some(handle_attempt_quiz(state, req)),
        "submissions.listByStudent" => Some(handle_list_by_student(state, req)),
        "submissions.listAll" => Some(handle_list_all(state, req)),
        _ => None,
    }
}
