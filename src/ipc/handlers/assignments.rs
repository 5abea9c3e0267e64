use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    assignment_exists, course_exists, db_conn, now_rfc3339, optional_str, require_ctx,
    require_role, required_str,
};
use crate::ipc::types::{AppState, Request, Role};
use serde_json::json;
use uuid::Uuid;

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let due_date = optional_str(req, "dueDate");
    if let Some(d) = &due_date {
        if chrono::DateTime::parse_from_rfc3339(d).is_err() {
            return err(
                &req.id,
                "bad_params",
                "dueDate must be an RFC 3339 timestamp",
                Some(json!({ "dueDate": d })),
            );
        }
    }
    // Optional teacher-provided material; stored as an opaque reference.
    let file_url = optional_str(req, "fileUrl");

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return e.response(&req.id),
    }

    let assignment_id = Uuid::new_v4().to_string();
    let created_at = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO assignments(id, title, course_id, due_date, file_url, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &title,
            &course_id,
            &due_date,
            &file_url,
            &created_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }

    ok(
        &req.id,
        json!({
            "assignment": {
                "id": assignment_id,
                "title": title,
                "courseId": course_id,
                "dueDate": due_date,
                "fileUrl": file_url,
                "createdAt": created_at
            }
        }),
    )
}

fn assignment_list_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let course_id: String = row.get(2)?;
    let due_date: Option<String> = row.get(3)?;
    let file_url: Option<String> = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(json!({
        "id": id,
        "title": title,
        "courseId": course_id,
        "dueDate": due_date,
        "fileUrl": file_url,
        "createdAt": created_at
    }))
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_ctx(req) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "assignments": [] }));
    };

    let course_filter = optional_str(req, "courseId");
    let rows = if let Some(course_id) = &course_filter {
        let mut stmt = match conn.prepare(
            "SELECT id, title, course_id, due_date, file_url, created_at
             FROM assignments
             WHERE course_id = ?
             ORDER BY created_at, rowid",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([course_id], assignment_list_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        let mut stmt = match conn.prepare(
            "SELECT id, title, course_id, due_date, file_url, created_at
             FROM assignments
             ORDER BY created_at, rowid",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([], assignment_list_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assignments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(req, Role::Admin) {
        return e.response(&req.id);
    }
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match assignment_exists(conn, &assignment_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "assignment not found", None),
        Err(e) => return e.response(&req.id),
    }

    // Submission history is kept; the scoreboard labels the orphans
    // "Unknown Assignment".
    if let Err(e) = conn.execute("DELETE FROM assignments WHERE id = ?", [&assignment_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        "assignments.delete" => Some(handle_assignments_delete(state, req)),
        _ => None,
    }
}
