use serde_json::json;

use crate::error::{GradeError, Result};
use crate::ipc::error::err;
use crate::model::parse_entity_id;

pub fn no_workspace(id: &str) -> serde_json::Value {
    err(id, "no_workspace", 503, "select a workspace first", None)
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GradeError::validation(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.trim().to_string()))
            .ok_or_else(|| GradeError::validation(format!("{} must be a string", key))),
    }
}

/// A required entity id param; must be a UUID.
pub fn get_id(params: &serde_json::Value, key: &str) -> Result<String> {
    let raw = get_required_str(params, key)?;
    parse_entity_id(key, &raw)
}

pub fn get_optional_id(params: &serde_json::Value, key: &str) -> Result<Option<String>> {
    match get_optional_str(params, key)? {
        None => Ok(None),
        Some(raw) => parse_entity_id(key, &raw).map(Some),
    }
}

pub fn get_id_list(params: &serde_json::Value, key: &str) -> Result<Vec<String>> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(GradeError::validation(format!("{} must be an array of ids", key)));
    };
    arr.iter()
        .enumerate()
        .map(|(i, v)| {
            let raw = v.as_str().ok_or_else(|| {
                GradeError::validation_with(
                    format!("{}[{}] must be a string", key, i),
                    json!({ "index": i }),
                )
            })?;
            parse_entity_id(key, raw)
        })
        .collect()
}

pub fn get_array<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a Vec<serde_json::Value>> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| GradeError::validation(format!("missing {}[]", key)))
}

pub fn get_number(params: &serde_json::Value, key: &str) -> Result<f64> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| GradeError::validation(format!("missing/invalid {}", key)))
}

pub fn decode<T: serde::de::DeserializeOwned>(
    params: &serde_json::Value,
    key: &str,
) -> Result<T> {
    let Some(v) = params.get(key) else {
        return Err(GradeError::validation(format!("missing {}", key)));
    };
    serde_json::from_value(v.clone())
        .map_err(|e| GradeError::validation(format!("invalid {}: {}", key, e)))
}
