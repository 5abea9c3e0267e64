use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_rfc3339, require_role, required_str};
use crate::ipc::types::{AppState, Request, Role};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_users_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let username = match required_str(req, "username") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if username.is_empty() {
        return err(&req.id, "bad_params", "username must not be empty", None);
    }
    let email = match required_str(req, "email") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if email.is_empty() {
        return err(&req.id, "bad_params", "email must not be empty", None);
    }
    // The host hashes the password before it reaches this daemon; plain
    // passwords are never on the wire.
    let password_hash = match required_str(req, "passwordHash") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let role_raw = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(role) = Role::from_param(&role_raw) else {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: admin, teacher, student",
            Some(json!({ "role": role_raw })),
        );
    };

    let taken: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ? OR email = ?",
            (&username, &email),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "duplicate_user",
            "username or email already registered",
            None,
        );
    }

    let user_id = Uuid::new_v4().to_string();
    let created_at = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, username, email, password_hash, role, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&user_id, &username, &email, &password_hash, role.as_str(), &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(
        &req.id,
        json!({
            "user": {
                "id": user_id,
                "username": username,
                "email": email,
                "role": role.as_str(),
                "createdAt": created_at
            }
        }),
    )
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(req, Role::Admin) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, username, email, role, created_at
         FROM users
         ORDER BY username, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let username: String = row.get(1)?;
            let email: String = row.get(2)?;
            let role: String = row.get(3)?;
            let created_at: String = row.get(4)?;
            Ok(json!({
                "id": id,
                "username": username,
                "email": email,
                "role": role,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.register" => Some(handle_users_register(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        _ => None,
    }
}
