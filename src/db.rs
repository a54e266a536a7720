use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradebook.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS component_types(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            base_max_score REAL NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(subject_id, name)
        )",
        [],
    )?;
    // Workspaces created before soft deactivation existed lack the column.
    ensure_component_types_is_active(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_component_types_subject ON component_types(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_types(
            ordinal INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            ceiling REAL NOT NULL,
            weight REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS degrees(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            exam_type INTEGER NOT NULL,
            uses_components INTEGER NOT NULL,
            score REAL,
            max_score REAL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(exam_type) REFERENCES exam_types(ordinal),
            UNIQUE(student_id, subject_id, exam_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_degrees_student ON degrees(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_degrees_subject ON degrees(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS degree_components(
            id TEXT PRIMARY KEY,
            degree_id TEXT NOT NULL,
            component_type_id TEXT NOT NULL,
            score REAL NOT NULL,
            scaled_max_score REAL NOT NULL,
            FOREIGN KEY(degree_id) REFERENCES degrees(id),
            FOREIGN KEY(component_type_id) REFERENCES component_types(id),
            UNIQUE(degree_id, component_type_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_degree_components_degree ON degree_components(degree_id)",
        [],
    )?;

    seed_default_exam_types(conn)?;
    Ok(())
}

/// Conventional 4-entry table: two midterms out of 20, two finals out of 80.
/// Each weight is its ceiling as a fraction of 100 points; the ceilings sum
/// to the 200-point overall denominator.
fn seed_default_exam_types(conn: &Connection) -> anyhow::Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM exam_types", [], |r| r.get(0))?;
    if count > 0 {
        return Ok(());
    }
    let defaults: [(i64, &str, f64, f64); 4] = [
        (1, "MidTerm1", 20.0, 0.2),
        (2, "MidTerm2", 20.0, 0.2),
        (3, "Final1", 80.0, 0.8),
        (4, "Final2", 80.0, 0.8),
    ];
    for (ordinal, name, ceiling, weight) in defaults {
        conn.execute(
            "INSERT INTO exam_types(ordinal, name, ceiling, weight) VALUES(?, ?, ?, ?)",
            (ordinal, name, ceiling, weight),
        )?;
    }
    Ok(())
}

fn ensure_component_types_is_active(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "component_types", "is_active")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE component_types ADD COLUMN is_active INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
