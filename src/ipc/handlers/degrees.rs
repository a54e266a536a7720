use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::handlers::classes::student_exists;
use crate::ipc::types::{AppState, Request};
use crate::model::{DegreeComponentRecord, DegreeRecord, EngineError, ScoreValue};
use crate::normalize;
use crate::store;
use serde_json::json;
use std::collections::HashMap;

/// Slack for comparing a submitted score against a 2-decimal scaled maximum.
const SCORE_EPSILON: f64 = 1e-9;

fn parse_component_scores(
    raw: &[serde_json::Value],
) -> Result<HashMap<String, f64>, (String, Option<serde_json::Value>)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for (i, entry) in raw.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            return Err((format!("components[{}] must be an object", i), None));
        };
        let Some(component_type_id) = obj.get("componentTypeId").and_then(|v| v.as_str()) else {
            return Err((format!("components[{}] missing componentTypeId", i), None));
        };
        let Some(score) = obj.get("score").and_then(|v| v.as_f64()) else {
            return Err((format!("components[{}] missing/invalid score", i), None));
        };
        if score < 0.0 {
            return Err((
                "negative scores are not allowed".to_string(),
                Some(json!({ "componentTypeId": component_type_id, "score": score })),
            ));
        }
        if scores.insert(component_type_id.to_string(), score).is_some() {
            return Err((
                "duplicate componentTypeId in components".to_string(),
                Some(json!({ "componentTypeId": component_type_id })),
            ));
        }
    }
    Ok(scores)
}

fn handle_degrees_save(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match student_exists(conn, &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let single = req.params.get("single");
    let components = req.params.get("components");
    if single.is_some() == components.is_some() {
        return err(
            &req.id,
            "bad_params",
            "provide exactly one of single or components[]",
            None,
        );
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
    let ceiling = exam.ceiling;

    let value = if let Some(single) = single {
        let Some(score) = single.get("score").and_then(|v| v.as_f64()) else {
            return err(&req.id, "bad_params", "missing/invalid single.score", None);
        };
        if score < 0.0 {
            return err(
                &req.id,
                "bad_params",
                "negative scores are not allowed",
                Some(json!({ "score": score })),
            );
        }
        // Strict mode: reject rather than clamp; the UI shows the message.
        if score > ceiling + SCORE_EPSILON {
            return engine_err(
                &req.id,
                &EngineError::OutOfRange {
                    component_type_id: None,
                    score,
                    max: ceiling,
                },
            );
        }
        ScoreValue::Single {
            score,
            max_score: ceiling,
        }
    } else {
        let Some(raw) = components.and_then(|v| v.as_array()) else {
            return err(&req.id, "bad_params", "components must be an array", None);
        };
        if raw.is_empty() {
            return engine_err(
                &req.id,
                &EngineError::EmptyRecord(
                    "component record submitted with no entries".to_string(),
                ),
            );
        }
        let submitted = match parse_component_scores(raw) {
            Ok(v) => v,
            Err((message, details)) => return err(&req.id, "bad_params", message, details),
        };

        let catalog = match store::load_components(conn, &subject_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let active: Vec<_> = catalog.iter().filter(|c| c.is_active).collect();
        if active.is_empty() {
            return engine_err(
                &req.id,
                &EngineError::EmptyRecord(format!(
                    "subject {} has no active components; use single-score mode",
                    subject_id
                )),
            );
        }
        if let Some(unknown) = submitted.keys().find(|id| !active.iter().any(|c| &c.id == *id)) {
            return err(
                &req.id,
                "bad_params",
                "unknown or inactive componentTypeId",
                Some(json!({ "componentTypeId": unknown })),
            );
        }

        let scaled = match normalize::compute_scaled_maxima(&catalog, ceiling) {
            Ok(v) => v,
            Err(e) => return engine_err(&req.id, &e),
        };

        // The save replaces the full record: every active component gets a
        // row, defaulting to 0 where the sheet left it blank.
        let mut rows = Vec::with_capacity(active.len());
        for c in &active {
            let max = scaled.get(&c.id).copied().unwrap_or(0.0);
            let score = submitted.get(&c.id).copied().unwrap_or(0.0);
            if score > max + SCORE_EPSILON {
                return engine_err(
                    &req.id,
                    &EngineError::OutOfRange {
                        component_type_id: Some(c.id.clone()),
                        score,
                        max,
                    },
                );
            }
            rows.push(DegreeComponentRecord {
                component_type_id: c.id.clone(),
                score,
                scaled_max_score: max,
            });
        }
        ScoreValue::Components { components: rows }
    };

    let record = DegreeRecord {
        subject_id: subject_id.clone(),
        exam_type,
        value,
        updated_at: None,
    };

    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match store::save_degree(conn, &student_id, &record) {
        Ok(degree_id) => ok(
            &req.id,
            json!({
                "degreeId": degree_id,
                "record": record
            }),
        ),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "degrees" })),
        ),
    }
}

fn handle_degrees_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let subject_id = req
        .params
        .get("subjectId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let set = match store::load_student_degrees(conn, &student_id, subject_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "records": set.records() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "degrees.save" => Some(handle_degrees_save(state, req)),
        "degrees.get" => Some(handle_degrees_get(state, req)),
        _ => None,
    }
}
