use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    course_exists, db_conn, now_rfc3339, optional_str, require_ctx, require_role, require_staff,
    required_str,
};
use crate::ipc::types::{AppState, Request, Role};
use serde_json::json;
use uuid::Uuid;

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ctx = match require_role(req, Role::Teacher) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
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
    let description = match required_str(req, "description") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let course_id = Uuid::new_v4().to_string();
    let created_at = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, title, description, teacher_id, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&course_id, &title, &description, &ctx.user_id, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(
        &req.id,
        json!({
            "course": {
                "id": course_id,
                "title": title,
                "description": description,
                "teacherId": ctx.user_id,
                "createdAt": created_at
            }
        }),
    )
}

fn course_list_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let description: String = row.get(2)?;
    let teacher_id: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let student_count: i64 = row.get(5)?;
    let quiz_count: i64 = row.get(6)?;
    let assignment_count: i64 = row.get(7)?;
    Ok(json!({
        "id": id,
        "title": title,
        "description": description,
        "teacherId": teacher_id,
        "createdAt": created_at,
        "studentCount": student_count,
        "quizCount": quiz_count,
        "assignmentCount": assignment_count
    }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_ctx(req) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    // Include basic counts so the UI can show a useful dashboard.
    // Use correlated subqueries to avoid double-counting from joins.
    let teacher_filter = optional_str(req, "teacherId");
    let rows = if let Some(teacher_id) = &teacher_filter {
        let mut stmt = match conn.prepare(
            "SELECT
               c.id,
               c.title,
               c.description,
               c.teacher_id,
               c.created_at,
               (SELECT COUNT(*) FROM course_enrollments e WHERE e.course_id = c.id) AS student_count,
               (SELECT COUNT(*) FROM quizzes q WHERE q.course_id = c.id) AS quiz_count,
               (SELECT COUNT(*) FROM assignments a WHERE a.course_id = c.id) AS assignment_count
             FROM courses c
             WHERE c.teacher_id = ?
             ORDER BY c.created_at, c.rowid",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([teacher_id], course_list_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        let mut stmt = match conn.prepare(
            "SELECT
               c.id,
               c.title,
               c.description,
               c.teacher_id,
               c.created_at,
               (SELECT COUNT(*) FROM course_enrollments e WHERE e.course_id = c.id) AS student_count,
               (SELECT COUNT(*) FROM quizzes q WHERE q.course_id = c.id) AS quiz_count,
               (SELECT COUNT(*) FROM assignments a WHERE a.course_id = c.id) AS assignment_count
             FROM courses c
             ORDER BY c.created_at, c.rowid",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([], course_list_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_staff(req) {
        return e.response(&req.id);
    }
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return e.response(&req.id),
    }

    // The roster is a projection of the enrollment table, user side first.
    let mut stmt = match conn.prepare(
        "SELECT u.id, u.username, u.email, e.enrolled_at
         FROM course_enrollments e
         JOIN users u ON u.id = e.user_id
         WHERE e.course_id = ?
         ORDER BY e.enrolled_at, e.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&course_id], |row| {
            let id: String = row.get(0)?;
            let username: String = row.get(1)?;
            let email: String = row.get(2)?;
            let enrolled_at: String = row.get(3)?;
            Ok(json!({
                "id": id,
                "username": username,
                "email": email,
                "enrolledAt": enrolled_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "courseId": course_id, "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(req, Role::Admin) {
        return e.response(&req.id);
    }
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return e.response(&req.id),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Enrollment rows go with the course. Quizzes, assignments and
    // submission history stay; readers label the orphans.
    if let Err(e) = tx.execute(
        "DELETE FROM course_enrollments WHERE course_id = ?",
        [&course_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "course_enrollments" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM courses WHERE id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.students" => Some(handle_courses_students(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        _ => None,
    }
}
