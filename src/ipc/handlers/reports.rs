use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_self_or_staff, require_staff, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, GradeLine, ReportData};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn fetch_username(conn: &Connection, student_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT username FROM users WHERE id = ?",
        [student_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn assignment_grade_rows(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<(String, Option<f64>)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT COALESCE(a.title, 'Unknown Assignment'), s.grade
             FROM student_submissions s
             LEFT JOIN assignments a ON a.id = s.assignment_id
             WHERE s.student_id = ?
             ORDER BY s.created_at, s.rowid",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    stmt.query_map([student_id], |row| {
        let title: String = row.get(0)?;
        let grade: Option<f64> = row.get(1)?;
        Ok((title, grade))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn quiz_grade_rows(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<(String, Option<f64>)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT COALESCE(q.title, 'Unknown Quiz'), sq.grade
             FROM student_quizzes sq
             LEFT JOIN quizzes q ON q.id = sq.quiz_id
             WHERE sq.student_id = ?
             ORDER BY sq.rowid",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    stmt.query_map([student_id], |row| {
        let title: String = row.get(0)?;
        let grade: Option<f64> = row.get(1)?;
        Ok((title, grade))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn enrolled_course_titles(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT COALESCE(c.title, 'Unknown Course')
             FROM course_enrollments e
             LEFT JOIN courses c ON c.id = e.course_id
             WHERE e.user_id = ?
             ORDER BY e.enrolled_at, e.rowid",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    stmt.query_map([student_id], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn handle_student_grade_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_self_or_staff(req, &student_id) {
        return e.response(&req.id);
    }
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match fetch_username(conn, &student_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return e.response(&req.id),
    }

    let assignment_grades = match assignment_grade_rows(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let quiz_grades = match quiz_grade_rows(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    ok(
        &req.id,
        json!({
            "assignmentGrades": assignment_grades
                .iter()
                .map(|(title, grade)| json!({ "assignmentTitle": title, "grade": grade }))
                .collect::<Vec<_>>(),
            "quizGrades": quiz_grades
                .iter()
                .map(|(title, grade)| json!({ "quizTitle": title, "grade": grade }))
                .collect::<Vec<_>>()
        }),
    )
}

fn handle_class_scoreboard(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_staff(req) {
        return e.response(&req.id);
    }
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Labels are joined in leniently: a deleted assignment, quiz or user
    // must never make historical submissions unreadable.
    let mut sub_stmt = match conn.prepare(
        "SELECT s.id, s.assignment_id, COALESCE(a.title, 'Unknown Assignment'),
                s.student_id, COALESCE(u.username, 'Unknown Student'),
                s.grade, s.created_at
         FROM student_submissions s
         LEFT JOIN assignments a ON a.id = s.assignment_id
         LEFT JOIN users u ON u.id = s.student_id
         ORDER BY s.created_at, s.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assignment_submissions = match sub_stmt
        .query_map([], |row| {
            let submission_id: String = row.get(0)?;
            let assignment_id: String = row.get(1)?;
            let assignment_title: String = row.get(2)?;
            let student_id: String = row.get(3)?;
            let student_name: String = row.get(4)?;
            let grade: Option<f64> = row.get(5)?;
            let submitted_at: String = row.get(6)?;
            Ok(json!({
                "submissionId": submission_id,
                "assignmentId": assignment_id,
                "assignmentTitle": assignment_title,
                "studentId": student_id,
                "studentName": student_name,
                "grade": grade,
                "submittedAt": submitted_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut quiz_stmt = match conn.prepare(
        "SELECT sq.id, sq.quiz_id, COALESCE(q.title, 'Unknown Quiz'),
                sq.student_id, COALESCE(u.username, 'Unknown Student'),
                sq.grade
         FROM student_quizzes sq
         LEFT JOIN quizzes q ON q.id = sq.quiz_id
         LEFT JOIN users u ON u.id = sq.student_id
         ORDER BY sq.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let quiz_submissions = match quiz_stmt
        .query_map([], |row| {
            let record_id: String = row.get(0)?;
            let quiz_id: String = row.get(1)?;
            let quiz_title: String = row.get(2)?;
            let student_id: String = row.get(3)?;
            let student_name: String = row.get(4)?;
            let grade: Option<f64> = row.get(5)?;
            Ok(json!({
                "recordId": record_id,
                "quizId": quiz_id,
                "quizTitle": quiz_title,
                "studentId": student_id,
                "studentName": student_name,
                "grade": grade
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "assignmentSubmissions": assignment_submissions,
            "quizSubmissions": quiz_submissions
        }),
    )
}

fn handle_student_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_self_or_staff(req, &student_id) {
        return e.response(&req.id);
    }
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let username = match fetch_username(conn, &student_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return e.response(&req.id),
    };

    let assignment_grades = match assignment_grade_rows(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let quiz_grades = match quiz_grade_rows(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let courses = match enrolled_course_titles(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let data = ReportData {
        username,
        assignment_grades: assignment_grades
            .into_iter()
            .map(|(title, grade)| GradeLine { title, grade })
            .collect(),
        quiz_grades: quiz_grades
            .into_iter()
            .map(|(title, grade)| GradeLine { title, grade })
            .collect(),
        courses,
    };

    let rendered = match report::render_pdf(&data) {
        Ok(v) => v,
        Err(e) => {
            log::error!("report render failed for student {}: {:?}", student_id, e);
            return err(&req.id, "report_failed", e.to_string(), None);
        }
    };

    // The bytes go out through a transient file so the streaming path is
    // identical for every caller; the file is gone once this scope ends.
    let file = match report::ReportFile::create(&student_id, &rendered) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "report_failed", e.to_string(), None),
    };
    log::debug!("report staged at {}", file.path().display());
    let bytes = match file.read() {
        Ok(v) => v,
        Err(e) => return err(&req.id, "report_failed", e.to_string(), None),
    };

    log::info!(
        "rendered report for student {} ({} bytes)",
        student_id,
        bytes.len()
    );

    ok(
        &req.id,
        json!({
            "fileName": format!("report_{}.pdf", student_id),
            "contentType": "application/pdf",
            "sizeBytes": bytes.len(),
            "data": BASE64.encode(&bytes)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.studentGradeSummary" => Some(handle_student_grade_summary(state, req)),
        "reports.classScoreboard" => Some(handle_class_scoreboard(state, req)),
        "reports.studentReport" => Some(handle_student_report(state, req)),
        _ => None,
    }
}
