use crate::aggregate;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::handlers::classes::student_exists;
use crate::ipc::types::{AppState, Request};
use crate::model::ScoreValue;
use crate::normalize;
use crate::store;
use serde_json::json;

/// Build the editable score sheet for one (student, subject, exam type).
///
/// Prior scores are rescaled to the requested exam type's ceiling. When no
/// record exists for that exam type yet, `seedFromExamType` lets the caller
/// carry scores over from a record authored under a different exam type.
fn handle_sheet_build(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let exam_type = match req.params.get("examType").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid examType", None),
    };
    let seed_from = req.params.get("seedFromExamType").and_then(|v| v.as_i64());

    match student_exists(conn, &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let registry = match store::load_registry(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = registry.validate() {
        return engine_err(&req.id, &e);
    }
    let Some(exam) = registry.get(exam_type) else {
        return err(
            &req.id,
            "not_found",
            "unknown exam type",
            Some(json!({ "examType": exam_type })),
        );
    };

    let components = match store::load_components(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let existing = match store::load_degree(conn, &student_id, &subject_id, exam_type) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // A subject without active components has no breakdown; the sheet is a
    // single score against the exam type's ceiling.
    if !components.iter().any(|c| c.is_active) {
        let score = match &existing {
            Some(record) => match &record.value {
                ScoreValue::Single { score, max_score } => {
                    normalize::rescale_recorded_score(*score, *max_score, exam.ceiling)
                }
                ScoreValue::Components { .. } => match aggregate::component_total(record) {
                    Ok(total) => normalize::rescale_recorded_score(
                        total.achieved,
                        total.possible,
                        exam.ceiling,
                    ),
                    Err(_) => 0.0,
                },
            },
            None => 0.0,
        };
        return ok(
            &req.id,
            json!({
                "mode": "single",
                "examType": exam,
                "score": score,
                "maxScore": exam.ceiling
            }),
        );
    }

    let prior_components = match &existing {
        Some(record) => match &record.value {
            ScoreValue::Components { components } => Some(components.clone()),
            ScoreValue::Single { .. } => None,
        },
        None => match seed_from {
            Some(source) => {
                match store::load_degree(conn, &student_id, &subject_id, source) {
                    Ok(Some(record)) => match record.value {
                        ScoreValue::Components { components } => Some(components),
                        ScoreValue::Single { .. } => None,
                    },
                    Ok(None) => None,
                    Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
                }
            }
            None => None,
        },
    };

    let rows = match normalize::build_component_records(
        &components,
        prior_components.as_deref(),
        exam.ceiling,
    ) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, &e),
    };

    let row_models: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            let name = components
                .iter()
                .find(|c| c.id == r.component_type_id)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            json!({
                "componentTypeId": r.component_type_id,
                "name": name,
                "score": r.score,
                "scaledMaxScore": r.scaled_max_score
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "mode": "components",
            "examType": exam,
            "rows": row_models
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sheet.build" => Some(handle_sheet_build(state, req)),
        _ => None,
    }
}
