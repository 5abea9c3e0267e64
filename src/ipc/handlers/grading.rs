use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, now_rfc3339, quiz_exists, require_role, required_f64, required_str, user_exists,
};
use crate::ipc::types::{AppState, Request, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn check_grade(req: &Request) -> Result<f64, serde_json::Value> {
    let grade = match required_f64(req, "grade") {
        Ok(v) => v,
        Err(e) => return Err(e.response(&req.id)),
    };
    if !calc::grade_is_valid(grade) {
        return Err(err(
            &req.id,
            "invalid_grade",
            format!(
                "grade must be between {} and {}",
                calc::GRADE_MIN,
                calc::GRADE_MAX
            ),
            Some(json!({ "grade": grade })),
        ));
    }
    Ok(grade)
}

fn handle_grade_assignment(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(req, Role::Teacher) {
        return e.response(&req.id);
    }
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let submission_id = match required_str(req, "submissionId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    // Validated before any read or write so a rejected grade can never
    // touch the stored row.
    let grade = match check_grade(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM student_submissions WHERE id = ?",
            [&submission_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "submission not found", None);
    }

    // Re-grading replaces the previous value in place.
    if let Err(e) = conn.execute(
        "UPDATE student_submissions SET grade = ? WHERE id = ?",
        (grade, &submission_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "student_submissions" })),
        );
    }

    match fetch_submission(conn, &submission_id) {
        Ok(submission) => ok(&req.id, json!({ "submission": submission })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn fetch_submission(
    conn: &Connection,
    submission_id: &str,
) -> rusqlite::Result<serde_json::Value> {
    conn.query_row(
        "SELECT id, assignment_id, student_id, file_url, grade, created_at
         FROM student_submissions
         WHERE id = ?",
        [submission_id],
        |row| {
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
        },
    )
}

fn handle_grade_quiz(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(req, Role::Teacher) {
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
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let grade = match check_grade(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match quiz_exists(conn, &quiz_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "quiz not found", None),
        Err(e) => return e.response(&req.id),
    }
    match user_exists(conn, &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return e.response(&req.id),
    }

    // Single-statement upsert keyed on the unique (quiz, student) index;
    // two concurrent grades for the same pair can never leave two rows.
    // On conflict the original record id is kept.
    let record_id = Uuid::new_v4().to_string();
    let graded_at = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO student_quizzes(id, quiz_id, student_id, grade, graded_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(quiz_id, student_id) DO UPDATE SET
           grade = excluded.grade,
           graded_at = excluded.graded_at",
        (&record_id, &quiz_id, &student_id, grade, &graded_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "student_quizzes" })),
        );
    }

    let record = conn.query_row(
        "SELECT id, quiz_id, student_id, grade, graded_at
         FROM student_quizzes
         WHERE quiz_id = ? AND student_id = ?",
        (&quiz_id, &student_id),
        |row| {
            let id: String = row.get(0)?;
            let quiz_id: String = row.get(1)?;
            let student_id: String = row.get(2)?;
            let grade: Option<f64> = row.get(3)?;
            let graded_at: Option<String> = row.get(4)?;
            Ok(json!({
                "id": id,
                "quizId": quiz_id,
                "studentId": student_id,
                "grade": grade,
                "gradedAt": graded_at
            }))
        },
    );

    match record {
        Ok(record) => ok(&req.id, json!({ "record": record })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.gradeAssignment" => Some(handle_grade_assignment(state, req)),
        "grading.gradeQuiz" => Some(handle_grade_quiz(state, req)),
        _ => None,
    }
}
