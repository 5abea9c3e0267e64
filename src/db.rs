use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradebook.sqlite3");
    let conn = Connection::open(db_path)?;

    // Cross-table references are checked at write time (handlers probe the
    // parent row before inserting) and tolerated at read time with placeholder
    // labels, so administrative deletes leave historical submissions readable.
    // Hence no FOREIGN KEY clauses here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_teacher ON courses(teacher_id)",
        [],
    )?;

    // Enrollment is stored once, keyed from the student side; course rosters
    // are a projection computed on read. The primary key doubles as the
    // dedup check for the append-only enroll operations.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_enrollments(
            user_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            PRIMARY KEY(user_id, course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_enrollments_course
         ON course_enrollments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_enrollments(
            user_id TEXT NOT NULL,
            quiz_id TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            PRIMARY KEY(user_id, quiz_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_enrollments_quiz
         ON quiz_enrollments(quiz_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quizzes(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            course_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quizzes_course ON quizzes(course_id)",
        [],
    )?;

    // Questions are an ordered sequence; answers are submitted positionally
    // against idx, so the (quiz_id, idx) pair must be unique.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_questions(
            id TEXT PRIMARY KEY,
            quiz_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            text TEXT NOT NULL,
            options TEXT NOT NULL,
            correct_answer TEXT NOT NULL,
            UNIQUE(quiz_id, idx)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_questions_quiz
         ON quiz_questions(quiz_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            course_id TEXT NOT NULL,
            due_date TEXT,
            file_url TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_course ON assignments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_submissions(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            file_url TEXT NOT NULL,
            grade REAL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_student
         ON student_submissions(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_assignment
         ON student_submissions(assignment_id)",
        [],
    )?;

    // One grade record per (quiz, student); the unique index backs the
    // conflict-clause upsert in the grading engine.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_quizzes(
            id TEXT PRIMARY KEY,
            quiz_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            grade REAL,
            graded_at TEXT,
            UNIQUE(quiz_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_quizzes_student
         ON student_quizzes(student_id)",
        [],
    )?;

    Ok(conn)
}
