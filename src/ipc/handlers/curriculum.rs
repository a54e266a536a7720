use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

fn subject_exists(conn: &Connection, subject_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name) VALUES(?, ?)",
        (&subject_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    ok(&req.id, json!({ "subjectId": subject_id }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare("SELECT id, name FROM subjects ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_component_types_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    match subject_exists(conn, &subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let components = match store::load_components(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "componentTypes": components }))
}

fn handle_component_types_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let base_max_score = match req.params.get("baseMaxScore").and_then(|v| v.as_f64()) {
        Some(v) if v > 0.0 => v,
        Some(v) => {
            return err(
                &req.id,
                "bad_params",
                "baseMaxScore must be > 0",
                Some(json!({ "baseMaxScore": v })),
            )
        }
        None => return err(&req.id, "bad_params", "missing baseMaxScore", None),
    };

    match subject_exists(conn, &subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM component_types WHERE subject_id = ?",
        [&subject_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let component_type_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO component_types(id, subject_id, name, sort_order, base_max_score, is_active)
         VALUES(?, ?, ?, ?, ?, 1)",
        (
            &component_type_id,
            &subject_id,
            &name,
            sort_order,
            base_max_score,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "component_types" })),
        );
    }
    ok(&req.id, json!({ "componentTypeId": component_type_id }))
}

fn handle_component_types_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let component_type_id = match req.params.get("componentTypeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing componentTypeId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("baseMaxScore") {
        let Some(n) = v.as_f64() else {
            return err(
                &req.id,
                "bad_params",
                "patch.baseMaxScore must be a number",
                None,
            );
        };
        if n <= 0.0 {
            return err(
                &req.id,
                "bad_params",
                "baseMaxScore must be > 0",
                Some(json!({ "baseMaxScore": n })),
            );
        }
        set_parts.push("base_max_score = ?".into());
        bind_values.push(Value::Real(n));
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    let sql = format!(
        "UPDATE component_types SET {} WHERE id = ? AND subject_id = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(component_type_id.clone()));
    bind_values.push(Value::Text(subject_id.clone()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "component_types" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "component type not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_component_types_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let Some(ordered) = req.params.get("orderedIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing orderedIds[]", None);
    };
    let ordered_ids: Vec<String> = match ordered
        .iter()
        .map(|v| v.as_str().map(|s| s.to_string()))
        .collect::<Option<Vec<_>>>()
    {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "orderedIds must be strings", None),
    };

    let mut stmt = match conn.prepare("SELECT id FROM component_types WHERE subject_id = ?") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let existing: HashSet<String> = match stmt
        .query_map([&subject_id], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let submitted: HashSet<String> = ordered_ids.iter().cloned().collect();
    if submitted.len() != ordered_ids.len() || submitted != existing {
        return err(
            &req.id,
            "bad_params",
            "orderedIds must list every component type of the subject exactly once",
            Some(json!({
                "expectedCount": existing.len(),
                "gotCount": ordered_ids.len()
            })),
        );
    }

    for (i, id) in ordered_ids.iter().enumerate() {
        if let Err(e) = conn.execute(
            "UPDATE component_types SET sort_order = ? WHERE id = ? AND subject_id = ?",
            (i as i64, id, &subject_id),
        ) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "component_types" })),
            );
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_component_types_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let component_type_id = match req.params.get("componentTypeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing componentTypeId", None),
    };

    // Historical degree components keep their referent, so this is a soft
    // flag rather than a delete.
    let changed = match conn.execute(
        "UPDATE component_types SET is_active = 0 WHERE id = ? AND subject_id = ?",
        (&component_type_id, &subject_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "component_types" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "component type not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_exam_types_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let registry = match store::load_registry(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "examTypes": registry.entries(),
            "totalPossible": registry.total_possible()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "componentTypes.list" => Some(handle_component_types_list(state, req)),
        "componentTypes.create" => Some(handle_component_types_create(state, req)),
        "componentTypes.update" => Some(handle_component_types_update(state, req)),
        "componentTypes.reorder" => Some(handle_component_types_reorder(state, req)),
        "componentTypes.deactivate" => Some(handle_component_types_deactivate(state, req)),
        "examTypes.list" => Some(handle_exam_types_list(state, req)),
        _ => None,
    }
}
