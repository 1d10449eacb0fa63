use rusqlite::Connection;
use serde_json::json;
use tracing::debug;

use crate::config::Config;
use crate::db::SqliteStore;
use crate::error::{GradeError, Result};
use crate::formula;
use crate::ipc::error::respond;
use crate::ipc::helpers::{decode, get_array, get_id, get_required_str, no_workspace};
use crate::ipc::types::{AppState, Request};
use crate::model::{FormulaComponent, FormulaKey};
use crate::store::GradeStore;

fn formula_key(params: &serde_json::Value) -> Result<FormulaKey> {
    let section_id = get_id(params, "sectionId")?;
    let subject_id = get_id(params, "subjectId")?;
    let term = get_required_str(params, "term")?;
    Ok(FormulaKey::new(&section_id, &subject_id, &term))
}

fn formulas_apply_changes(
    conn: &Connection,
    config: &Config,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let key = formula_key(params)?;
    let changes = get_array(params, "changes")?;
    let max = config.limits.max_changes_per_batch;
    if changes.len() > max {
        return Err(GradeError::validation_with(
            format!("change batch exceeds max changes: {} > {}", changes.len(), max),
            json!({ "count": changes.len(), "max": max }),
        ));
    }
    debug!(term = %key.term, changes = changes.len(), "applying formula changes");
    let outcome = formula::submit_changes(&SqliteStore::new(conn), &key, changes)?;
    Ok(json!({
        "message": "Grade formula updated successfully",
        "applied": outcome.applied,
        "version": outcome.version,
        "synced": outcome.synced,
    }))
}

fn formulas_create_for_assignment(
    conn: &Connection,
    config: &Config,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let section_id = get_id(params, "sectionId")?;
    let subject_id = get_id(params, "subjectId")?;
    let year_level = get_required_str(params, "yearLevel")?;
    let created = formula::create_for_assignment(
        &SqliteStore::new(conn),
        &section_id,
        &subject_id,
        &year_level,
        &config.terms.formula,
        &config.default_formula,
    )?;
    Ok(json!({
        "message": "Grade formulas created successfully",
        "created": created.len(),
        "formulas": created,
    }))
}

fn formulas_create(
    conn: &Connection,
    config: &Config,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let key = formula_key(params)?;
    if !config.terms.is_formula_term(&key.term) {
        return Err(GradeError::validation_with(
            format!("term must be one of: {}", config.terms.formula.join(", ")),
            json!({ "term": key.term }),
        ));
    }
    let year_level = get_required_str(params, "yearLevel")?;
    let components: Vec<FormulaComponent> = decode(params, "components")?;
    let created = formula::create_formula(&SqliteStore::new(conn), &key, &year_level, components)?;
    Ok(json!({ "message": "Grade formula created", "formula": created }))
}

fn formulas_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = get_id(params, "sectionId")?;
    let subject_id = get_id(params, "subjectId")?;
    let formulas = SqliteStore::new(conn).list_formulas(&section_id, &subject_id)?;
    if formulas.is_empty() {
        return Err(GradeError::not_found(
            "No grade formulas found for this section and subject",
        ));
    }
    Ok(json!({ "formulas": formulas }))
}

fn formulas_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let key = formula_key(params)?;
    let Some(found) = SqliteStore::new(conn).find_formula(&key)? else {
        return Err(GradeError::not_found("Grade formula not found"));
    };
    Ok(json!({ "formula": found }))
}

fn formulas_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = get_id(params, "sectionId")?;
    let subject_id = get_id(params, "subjectId")?;
    let deleted = formula::delete_for_assignment(&SqliteStore::new(conn), &section_id, &subject_id)?;
    Ok(json!({ "message": "Grade formulas deleted successfully", "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let method = req.method.as_str();
    if !method.starts_with("formulas.") {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(no_workspace(&req.id));
    };
    let config = &state.config;
    let result = match method {
        "formulas.applyChanges" => formulas_apply_changes(conn, config, &req.params),
        "formulas.createForAssignment" => formulas_create_for_assignment(conn, config, &req.params),
        "formulas.create" => formulas_create(conn, config, &req.params),
        "formulas.list" => formulas_list(conn, &req.params),
        "formulas.get" => formulas_get(conn, &req.params),
        "formulas.delete" => formulas_delete(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
