use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::model::{
    ComponentType, DegreeComponentRecord, DegreeRecord, ExamType, ExamTypeRegistry, ScoreValue,
    StudentDegreeSet,
};

pub fn load_registry(conn: &Connection) -> rusqlite::Result<ExamTypeRegistry> {
    let mut stmt =
        conn.prepare("SELECT ordinal, name, ceiling, weight FROM exam_types ORDER BY ordinal")?;
    let entries = stmt
        .query_map([], |r| {
            Ok(ExamType {
                ordinal: r.get(0)?,
                name: r.get(1)?,
                ceiling: r.get(2)?,
                weight: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ExamTypeRegistry::new(entries))
}

/// Full component list for one subject, active and inactive, in display
/// order. The engine filters on `is_active` itself.
pub fn load_components(conn: &Connection, subject_id: &str) -> rusqlite::Result<Vec<ComponentType>> {
    let mut stmt = conn.prepare(
        "SELECT id, subject_id, name, sort_order, base_max_score, is_active
         FROM component_types
         WHERE subject_id = ?
         ORDER BY sort_order",
    )?;
    let components = stmt
        .query_map([subject_id], |r| {
            Ok(ComponentType {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                name: r.get(2)?,
                sort_order: r.get(3)?,
                base_max_score: r.get(4)?,
                is_active: r.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(components)
}

fn load_degree_components(
    conn: &Connection,
    degree_id: &str,
) -> rusqlite::Result<Vec<DegreeComponentRecord>> {
    let mut stmt = conn.prepare(
        "SELECT dc.component_type_id, dc.score, dc.scaled_max_score
         FROM degree_components dc
         JOIN component_types ct ON ct.id = dc.component_type_id
         WHERE dc.degree_id = ?
         ORDER BY ct.sort_order",
    )?;
    let components = stmt
        .query_map([degree_id], |r| {
            Ok(DegreeComponentRecord {
                component_type_id: r.get(0)?,
                score: r.get(1)?,
                scaled_max_score: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(components)
}

fn record_from_row(
    conn: &Connection,
    degree_id: &str,
    subject_id: String,
    exam_type: i64,
    uses_components: bool,
    score: Option<f64>,
    max_score: Option<f64>,
    updated_at: Option<String>,
) -> rusqlite::Result<DegreeRecord> {
    let value = if uses_components {
        ScoreValue::Components {
            components: load_degree_components(conn, degree_id)?,
        }
    } else {
        ScoreValue::Single {
            score: score.unwrap_or(0.0),
            max_score: max_score.unwrap_or(0.0),
        }
    };
    Ok(DegreeRecord {
        subject_id,
        exam_type,
        value,
        updated_at,
    })
}

pub fn load_degree(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    exam_type: i64,
) -> rusqlite::Result<Option<DegreeRecord>> {
    let row: Option<(String, bool, Option<f64>, Option<f64>, Option<String>)> = conn
        .query_row(
            "SELECT id, uses_components, score, max_score, updated_at
             FROM degrees
             WHERE student_id = ? AND subject_id = ? AND exam_type = ?",
            (student_id, subject_id, exam_type),
            |r| {
                Ok((
                    r.get(0)?,
                    r.get::<_, i64>(1)? != 0,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()?;

    let Some((degree_id, uses_components, score, max_score, updated_at)) = row else {
        return Ok(None);
    };
    record_from_row(
        conn,
        &degree_id,
        subject_id.to_string(),
        exam_type,
        uses_components,
        score,
        max_score,
        updated_at,
    )
    .map(Some)
}

/// All recorded degrees for one student, optionally narrowed to a subject.
pub fn load_student_degrees(
    conn: &Connection,
    student_id: &str,
    subject_id: Option<&str>,
) -> rusqlite::Result<StudentDegreeSet> {
    let mut stmt = conn.prepare(
        "SELECT id, subject_id, exam_type, uses_components, score, max_score, updated_at
         FROM degrees
         WHERE student_id = ?1 AND (?2 IS NULL OR subject_id = ?2)
         ORDER BY subject_id, exam_type",
    )?;
    let rows = stmt
        .query_map((student_id, subject_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)? != 0,
                r.get::<_, Option<f64>>(4)?,
                r.get::<_, Option<f64>>(5)?,
                r.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut set = StudentDegreeSet::new();
    for (degree_id, subj, exam_type, uses_components, score, max_score, updated_at) in rows {
        set.insert(record_from_row(
            conn,
            &degree_id,
            subj,
            exam_type,
            uses_components,
            score,
            max_score,
            updated_at,
        )?);
    }
    Ok(set)
}

/// Persist one degree record, replacing whatever was stored for the same
/// (student, subject, exam type). The degree row and its component rows move
/// together in one transaction; a failed save leaves the prior record intact.
pub fn save_degree(
    conn: &mut Connection,
    student_id: &str,
    record: &DegreeRecord,
) -> rusqlite::Result<String> {
    let tx = conn.transaction()?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM degrees WHERE student_id = ? AND subject_id = ? AND exam_type = ?",
            (student_id, &record.subject_id, record.exam_type),
            |r| r.get(0),
        )
        .optional()?;
    let degree_id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = chrono::Utc::now().to_rfc3339();

    let (uses_components, score, max_score) = match &record.value {
        ScoreValue::Single { score, max_score } => (0_i64, Some(*score), Some(*max_score)),
        ScoreValue::Components { .. } => (1_i64, None, None),
    };

    tx.execute(
        "INSERT INTO degrees(id, student_id, subject_id, exam_type, uses_components, score, max_score, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, exam_type) DO UPDATE SET
           uses_components = excluded.uses_components,
           score = excluded.score,
           max_score = excluded.max_score,
           updated_at = excluded.updated_at",
        (
            &degree_id,
            student_id,
            &record.subject_id,
            record.exam_type,
            uses_components,
            score,
            max_score,
            &now,
        ),
    )?;

    tx.execute(
        "DELETE FROM degree_components WHERE degree_id = ?",
        [&degree_id],
    )?;
    if let ScoreValue::Components { components } = &record.value {
        for c in components {
            tx.execute(
                "INSERT INTO degree_components(id, degree_id, component_type_id, score, scaled_max_score)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &degree_id,
                    &c.component_type_id,
                    c.score,
                    c.scaled_max_score,
                ),
            )?;
        }
    }

    tx.commit()?;
    Ok(degree_id)
}
