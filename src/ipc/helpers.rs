use crate::ipc::error::err;
use crate::ipc::types::{AppState, CallerCtx, Request, Role};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing/invalid {}", key)))
}

pub fn require_ctx(req: &Request) -> Result<&CallerCtx, HandlerErr> {
    req.ctx
        .as_ref()
        .ok_or_else(|| HandlerErr::new("forbidden", "caller context required"))
}

pub fn require_role(req: &Request, role: Role) -> Result<&CallerCtx, HandlerErr> {
    let ctx = require_ctx(req)?;
    if ctx.role != role {
        return Err(HandlerErr::with_details(
            "forbidden",
            format!("{} role required", role.as_str()),
            json!({ "role": ctx.role.as_str() }),
        ));
    }
    Ok(ctx)
}

pub fn require_staff(req: &Request) -> Result<&CallerCtx, HandlerErr> {
    let ctx = require_ctx(req)?;
    if !ctx.role.is_staff() {
        return Err(HandlerErr::with_details(
            "forbidden",
            "teacher or admin role required",
            json!({ "role": ctx.role.as_str() }),
        ));
    }
    Ok(ctx)
}

/// Students may only read their own records; staff may read anyone's.
pub fn require_self_or_staff<'a>(
    req: &'a Request,
    student_id: &str,
) -> Result<&'a CallerCtx, HandlerErr> {
    let ctx = require_ctx(req)?;
    if ctx.role.is_staff() || ctx.user_id == student_id {
        return Ok(ctx);
    }
    Err(HandlerErr::new(
        "forbidden",
        "students may only access their own records",
    ))
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    let hit: Option<i64> = conn
        .query_row(sql, [id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(hit.is_some())
}

pub fn user_exists(conn: &Connection, user_id: &str) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM users WHERE id = ?", user_id)
}

pub fn course_exists(conn: &Connection, course_id: &str) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM courses WHERE id = ?", course_id)
}

pub fn quiz_exists(conn: &Connection, quiz_id: &str) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM quizzes WHERE id = ?", quiz_id)
}

pub fn assignment_exists(conn: &Connection, assignment_id: &str) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM assignments WHERE id = ?", assignment_id)
}
