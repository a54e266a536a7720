use crate::aggregate;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::handlers::classes::class_exists;
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;

fn handle_subject_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let registry = match store::load_registry(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let set = match store::load_student_degrees(conn, &student_id, Some(&subject_id)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let summary = match aggregate::subject_summary(&subject_id, set.records(), &registry) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, &e),
    };
    let mut result = match serde_json::to_value(&summary) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };
    result["studentId"] = json!(student_id);
    ok(&req.id, result)
}

/// Per-student percentages for one subject across a class, plus the integer
/// class average. Inactive students are excluded, matching the roster rules
/// used everywhere else.
fn handle_class_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    match class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let registry = match store::load_registry(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name
         FROM students
         WHERE class_id = ? AND active = 1
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students: Vec<(String, String)> = match stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let last: String = row.get(1)?;
            let first: String = row.get(2)?;
            Ok((id, format!("{}, {}", last, first)))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(students.len());
    let mut percentages: Vec<f64> = Vec::with_capacity(students.len());
    for (student_id, display_name) in &students {
        let set = match store::load_student_degrees(conn, student_id, Some(&subject_id)) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let percentage = match aggregate::percentage_for_student(set.records(), &registry) {
            Ok(v) => v,
            Err(e) => return engine_err(&req.id, &e),
        };
        percentages.push(percentage);
        rows.push(json!({
            "studentId": student_id,
            "displayName": display_name,
            "percentage": percentage,
            "recordedExamTypes": set.records().len()
        }));
    }

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "subjectId": subject_id,
            "students": rows,
            "classAverage": aggregate::class_average(&percentages),
            "totalPossible": registry.total_possible()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.subjectSummary" => Some(handle_subject_summary(state, req)),
        "calc.classSummary" => Some(handle_class_summary(state, req)),
        _ => None,
    }
}
