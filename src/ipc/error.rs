use serde_json::json;

use crate::model::EngineError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Engine failures keep their taxonomy code on the wire so the UI can show
/// a field-level message instead of a generic one.
pub fn engine_err(id: &str, e: &EngineError) -> serde_json::Value {
    err(id, e.code(), e.to_string(), e.details())
}
