use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    course_exists, db_conn, now_rfc3339, optional_str, quiz_exists, require_ctx, require_role,
    required_str,
};
use crate::ipc::types::{AppState, Request, Role};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

struct ParsedQuestion {
    text: String,
    options: Vec<String>,
    correct_answer: String,
}

fn parse_questions(req: &Request) -> Result<Vec<ParsedQuestion>, serde_json::Value> {
    let Some(arr) = req.params.get("questions").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing questions[]", None));
    };

    let mut parsed = Vec::with_capacity(arr.len());
    for (i, q) in arr.iter().enumerate() {
        let Some(obj) = q.as_object() else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("question at index {} must be an object", i),
                None,
            ));
        };
        let text = match obj.get("text").and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("question at index {} missing text", i),
                    None,
                ))
            }
        };
        let Some(options_arr) = obj.get("options").and_then(|v| v.as_array()) else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("question at index {} missing options[]", i),
                None,
            ));
        };
        let mut options = Vec::with_capacity(options_arr.len());
        for opt in options_arr {
            match opt.as_str() {
                Some(s) => options.push(s.to_string()),
                None => {
                    return Err(err(
                        &req.id,
                        "bad_params",
                        format!("question at index {} options must be strings", i),
                        None,
                    ))
                }
            }
        }
        let correct_answer = match obj.get("correctAnswer").and_then(|v| v.as_str()) {
            Some(v) => v.to_string(),
            None => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("question at index {} missing correctAnswer", i),
                    None,
                ))
            }
        };
        parsed.push(ParsedQuestion {
            text,
            options,
            correct_answer,
        });
    }
    Ok(parsed)
}

fn handle_quizzes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(req, Role::Teacher) {
        return e.response(&req.id);
    }
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let title = match required_str(req, "title") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let questions = match parse_questions(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return e.response(&req.id),
    }

    // The quiz and its ordered questions land together or not at all, so
    // a reader can never observe a quiz with half its questions.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let quiz_id = Uuid::new_v4().to_string();
    let created_at = now_rfc3339();
    if let Err(e) = tx.execute(
        "INSERT INTO quizzes(id, title, course_id, created_at) VALUES(?, ?, ?, ?)",
        (&quiz_id, &title, &course_id, &created_at),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "quizzes" })),
        );
    }

    for (i, q) in questions.iter().enumerate() {
        let options_json = match serde_json::to_string(&q.options) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "server_error", e.to_string(), None);
            }
        };
        let question_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO quiz_questions(id, quiz_id, idx, text, options, correct_answer)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &question_id,
                &quiz_id,
                i as i64,
                &q.text,
                &options_json,
                &q.correct_answer,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "quiz_questions" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "quiz": {
                "id": quiz_id,
                "title": title,
                "courseId": course_id,
                "questionCount": questions.len(),
                "createdAt": created_at
            }
        }),
    )
}

fn quiz_list_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let course_id: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    let question_count: i64 = row.get(4)?;
    Ok(json!({
        "id": id,
        "title": title,
        "courseId": course_id,
        "createdAt": created_at,
        "questionCount": question_count
    }))
}

fn handle_quizzes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_ctx(req) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "quizzes": [] }));
    };

    let course_filter = optional_str(req, "courseId");
    let rows = if let Some(course_id) = &course_filter {
        let mut stmt = match conn.prepare(
            "SELECT q.id, q.title, q.course_id, q.created_at,
               (SELECT COUNT(*) FROM quiz_questions qq WHERE qq.quiz_id = q.id) AS question_count
             FROM quizzes q
             WHERE q.course_id = ?
             ORDER BY q.created_at, q.rowid",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([course_id], quiz_list_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        let mut stmt = match conn.prepare(
            "SELECT q.id, q.title, q.course_id, q.created_at,
               (SELECT COUNT(*) FROM quiz_questions qq WHERE qq.quiz_id = q.id) AS question_count
             FROM quizzes q
             ORDER BY q.created_at, q.rowid",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([], quiz_list_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(quizzes) => ok(&req.id, json!({ "quizzes": quizzes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_quizzes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ctx = match require_ctx(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let quiz_id = match required_str(req, "quizId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let quiz_row: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT title, course_id, created_at FROM quizzes WHERE id = ?",
            [&quiz_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((title, course_id, created_at)) = quiz_row else {
        return err(&req.id, "not_found", "quiz not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT idx, text, options, correct_answer
         FROM quiz_questions
         WHERE quiz_id = ?
         ORDER BY idx",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let raw = match stmt
        .query_map([&quiz_id], |row| {
            let idx: i64 = row.get(0)?;
            let text: String = row.get(1)?;
            let options: String = row.get(2)?;
            let correct_answer: String = row.get(3)?;
            Ok((idx, text, options, correct_answer))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Students get the questions without the answer key.
    let include_answers = ctx.role.is_staff();
    let mut questions = Vec::with_capacity(raw.len());
    for (idx, text, options_json, correct_answer) in raw {
        let options: serde_json::Value =
            serde_json::from_str(&options_json).unwrap_or_else(|_| json!([]));
        let mut q = json!({
            "index": idx,
            "text": text,
            "options": options
        });
        if include_answers {
            q["correctAnswer"] = json!(correct_answer);
        }
        questions.push(q);
    }

    ok(
        &req.id,
        json!({
            "quiz": {
                "id": quiz_id,
                "title": title,
                "courseId": course_id,
                "createdAt": created_at,
                "questions": questions
            }
        }),
    )
}

fn handle_quizzes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(req, Role::Admin) {
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

    match quiz_exists(conn, &quiz_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "quiz not found", None),
        Err(e) => return e.response(&req.id),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Delete in dependency order (no ON DELETE CASCADE). Grade records in
    // student_quizzes are kept; readers label them "Unknown Quiz".
    if let Err(e) = tx.execute("DELETE FROM quiz_questions WHERE quiz_id = ?", [&quiz_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "quiz_questions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM quiz_enrollments WHERE quiz_id = ?", [&quiz_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "quiz_enrollments" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM quizzes WHERE id = ?", [&quiz_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "quizzes" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quizzes.create" => Some(handle_quizzes_create(state, req)),
        "quizzes.list" => Some(handle_quizzes_list(state, req)),
        "quizzes.get" => Some(handle_quizzes_get(state, req)),
        "quizzes.delete" => Some(handle_quizzes_delete(state, req)),
        _ => None,
    }
}
