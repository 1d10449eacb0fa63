use serde_json::json;
use tracing::error;

use crate::error::GradeError;

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
    status: u16,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "status": status,
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

pub fn grade_err(id: &str, e: GradeError) -> serde_json::Value {
    if let GradeError::Persistence { .. } = e {
        error!(request = %id, error = %e, "store operation failed");
    }
    err(id, e.code(), e.status(), e.to_string(), e.details())
}

/// Wraps a handler result into a response envelope.
pub fn respond(id: &str, result: crate::error::Result<serde_json::Value>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => grade_err(id, e),
    }
}
