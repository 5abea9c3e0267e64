use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    course_exists, db_conn, now_rfc3339, quiz_exists, require_role, require_staff, required_str,
};
use crate::ipc::types::{AppState, Request, Role};
use serde_json::json;
use std::collections::HashMap;

fn handle_enroll_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ctx = match require_role(req, Role::Student) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
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

    // Append-only with dedup: the primary key absorbs a repeat enroll and
    // the changed-row count tells us which case we hit.
    let changed = match conn.execute(
        "INSERT INTO course_enrollments(user_id, course_id, enrolled_at)
         VALUES(?, ?, ?)
         ON CONFLICT(user_id, course_id) DO NOTHING",
        (&ctx.user_id, &course_id, &now_rfc3339()),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "course_enrollments" })),
            )
        }
    };

    ok(
        &req.id,
        json!({ "courseId": course_id, "alreadyEnrolled": changed == 0 }),
    )
}

fn handle_enroll_quiz(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ctx = match require_role(req, Role::Student) {
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

    match quiz_exists(conn, &quiz_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "quiz not found", None),
        Err(e) => return e.response(&req.id),
    }

    let changed = match conn.execute(
        "INSERT INTO quiz_enrollments(user_id, quiz_id, enrolled_at)
         VALUES(?, ?, ?)
         ON CONFLICT(user_id, quiz_id) DO NOTHING",
        (&ctx.user_id, &quiz_id, &now_rfc3339()),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "quiz_enrollments" })),
            )
        }
    };

    ok(
        &req.id,
        json!({ "quizId": quiz_id, "alreadyEnrolled": changed == 0 }),
    )
}

fn handle_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_staff(req) {
        return e.response(&req.id);
    }
    let conn = match db_conn(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut student_stmt = match conn.prepare(
        "SELECT id, username FROM users WHERE role = 'student' ORDER BY username, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match student_stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let username: String = row.get(1)?;
            Ok((id, username))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // One pass over each junction table; deleted targets keep their rows
    // and fall back to a placeholder label.
    let mut course_stmt = match conn.prepare(
        "SELECT e.user_id, e.course_id, COALESCE(c.title, 'Unknown Course')
         FROM course_enrollments e
         LEFT JOIN courses c ON c.id = e.course_id
         ORDER BY e.enrolled_at, e.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let course_rows = match course_stmt
        .query_map([], |row| {
            let user_id: String = row.get(0)?;
            let course_id: String = row.get(1)?;
            let title: String = row.get(2)?;
            Ok((user_id, course_id, title))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut quiz_stmt = match conn.prepare(
        "SELECT e.user_id, e.quiz_id, COALESCE(q.title, 'Unknown Quiz')
         FROM quiz_enrollments e
         LEFT JOIN quizzes q ON q.id = e.quiz_id
         ORDER BY e.enrolled_at, e.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let quiz_rows = match quiz_stmt
        .query_map([], |row| {
            let user_id: String = row.get(0)?;
            let quiz_id: String = row.get(1)?;
            let title: String = row.get(2)?;
            Ok((user_id, quiz_id, title))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut courses_by_user: HashMap<&str, Vec<(&str, &str)>> = HashMap::new();
    for (user_id, course_id, title) in &course_rows {
        courses_by_user
            .entry(user_id.as_str())
            .or_default()
            .push((course_id.as_str(), title.as_str()));
    }
    let mut quizzes_by_user: HashMap<&str, Vec<(&str, &str)>> = HashMap::new();
    for (user_id, quiz_id, title) in &quiz_rows {
        quizzes_by_user
            .entry(user_id.as_str())
            .or_default()
            .push((quiz_id.as_str(), title.as_str()));
    }

    // Tallies for the bar-chart payload, counted over the listed students
    // only so ghost enrollments never inflate the chart.
    let mut course_tally: HashMap<&str, (&str, i64)> = HashMap::new();
    let mut quiz_tally: HashMap<&str, (&str, i64)> = HashMap::new();

    let mut out = Vec::with_capacity(students.len());
    for (student_id, username) in &students {
        let enrolled_courses: Vec<serde_json::Value> = courses_by_user
            .get(student_id.as_str())
            .map(|list| {
                list.iter()
                    .map(|&(course_id, title)| {
                        let slot = course_tally.entry(course_id).or_insert((title, 0));
                        slot.1 += 1;
                        json!({ "courseId": course_id, "title": title })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let enrolled_quizzes: Vec<serde_json::Value> = quizzes_by_user
            .get(student_id.as_str())
            .map(|list| {
                list.iter()
                    .map(|&(quiz_id, title)| {
                        let slot = quiz_tally.entry(quiz_id).or_insert((title, 0));
                        slot.1 += 1;
                        json!({ "quizId": quiz_id, "title": title })
                    })
                    .collect()
            })
            .unwrap_or_default();

        out.push(json!({
            "student": { "id": student_id, "username": username },
            "enrolledCourses": enrolled_courses,
            "enrolledQuizzes": enrolled_quizzes
        }));
    }

    let mut course_tallies: Vec<(&str, &str, i64)> = course_tally
        .into_iter()
        .map(|(id, (title, count))| (id, title, count))
        .collect();
    course_tallies.sort_by(|a, b| b.2.cmp(&a.2).then(a.1.cmp(b.1)).then(a.0.cmp(b.0)));
    let mut quiz_tallies: Vec<(&str, &str, i64)> = quiz_tally
        .into_iter()
        .map(|(id, (title, count))| (id, title, count))
        .collect();
    quiz_tallies.sort_by(|a, b| b.2.cmp(&a.2).then(a.1.cmp(b.1)).then(a.0.cmp(b.0)));

    ok(
        &req.id,
        json!({
            "students": out,
            "courseTallies": course_tallies
                .iter()
                .map(|(id, title, count)| json!({
                    "courseId": id,
                    "title": title,
                    "students": count
                }))
                .collect::<Vec<_>>(),
            "quizTallies": quiz_tallies
                .iter()
                .map(|(id, title, count)| json!({
                    "quizId": id,
                    "title": title,
                    "students": count
                }))
                .collect::<Vec<_>>()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollment.enrollCourse" => Some(handle_enroll_course(state, req)),
        "enrollment.enrollQuiz" => Some(handle_enroll_quiz(state, req)),
        "enrollment.overview" => Some(handle_overview(state, req)),
        _ => None,
    }
}
