use rusqlite::Connection;
use serde_json::json;

use crate::calc;
use crate::config::Config;
use crate::db::SqliteStore;
use crate::error::{GradeError, Result};
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    decode, get_id, get_id_list, get_number, get_optional_id, get_optional_str, get_required_str,
    no_workspace,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{FormulaKey, GradeComponent, RecordFilter};
use crate::records::{self, StudentGradeUpdate};
use crate::store::GradeStore;
use crate::sync;

fn record_key(params: &serde_json::Value) -> Result<(String, FormulaKey)> {
    let student_id = get_id(params, "studentId")?;
    let subject_id = get_id(params, "subjectId")?;
    let section_id = get_id(params, "sectionId")?;
    let term = get_required_str(params, "term")?;
    Ok((student_id, FormulaKey::new(&section_id, &subject_id, &term)))
}

fn grades_sync(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = get_id(params, "sectionId")?;
    let subject_id = get_id(params, "subjectId")?;
    let term = get_required_str(params, "term")?;
    let key = FormulaKey::new(&section_id, &subject_id, &term);
    let synced = sync::sync_grades(&SqliteStore::new(conn), &key)?;
    Ok(json!({
        "message": "Grades synced with updated formula and scores retained",
        "synced": synced,
    }))
}

fn grades_calculate(
    conn: &Connection,
    config: &Config,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let student_id = get_id(params, "studentId")?;
    let subject_id = get_id(params, "subjectId")?;
    let section_id = get_id(params, "sectionId")?;
    let report = calc::calculate(
        &SqliteStore::new(conn),
        &student_id,
        &subject_id,
        &section_id,
        &config.terms.report,
    )?;
    Ok(serde_json::to_value(report)?)
}

fn grades_batch_update(
    conn: &Connection,
    config: &Config,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let section_id = get_id(params, "sectionId")?;
    let subject_id = get_id(params, "subjectId")?;
    let updates: Vec<StudentGradeUpdate> = decode(params, "updatedGrades")?;
    let entries: usize = updates.iter().map(|u| u.terms.len()).sum();
    let max = config.limits.max_grades_per_batch;
    if entries > max {
        return Err(GradeError::validation_with(
            format!("grade batch exceeds max entries: {} > {}", entries, max),
            json!({ "count": entries, "max": max }),
        ));
    }
    let outcome = records::batch_update(&SqliteStore::new(conn), &section_id, &subject_id, &updates)?;
    Ok(json!({
        "message": "Grades updated successfully",
        "updated": outcome.updated,
        "created": outcome.created,
    }))
}

fn grades_assign_subjects(
    conn: &Connection,
    config: &Config,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let student_id = get_id(params, "studentId")?;
    let section_id = get_id(params, "sectionId")?;
    let year_level = get_required_str(params, "yearLevel")?;
    let subject_ids = get_id_list(params, "subjectIds")?;
    let created = records::assign_subjects(
        &SqliteStore::new(conn),
        &student_id,
        &section_id,
        &year_level,
        &subject_ids,
        &config.terms.formula,
    )?;
    Ok(json!({ "created": created }))
}

fn grades_unassign_subjects(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = get_id(params, "studentId")?;
    let section_id = get_id(params, "sectionId")?;
    let subject_ids = get_id_list(params, "subjectIds")?;
    let deleted =
        records::unassign_subjects(&SqliteStore::new(conn), &student_id, &section_id, &subject_ids)?;
    Ok(json!({ "deleted": deleted }))
}

fn grades_delete_for_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = get_id(params, "studentId")?;
    let deleted = records::delete_for_student(&SqliteStore::new(conn), &student_id)?;
    Ok(json!({ "deleted": deleted }))
}

fn grades_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let (student_id, key) = record_key(params)?;
    let year_level = get_optional_str(params, "yearLevel")?.filter(|s| !s.is_empty());
    let components: Vec<GradeComponent> = decode(params, "components")?;
    let (record, created) = records::upsert_record(
        &SqliteStore::new(conn),
        &student_id,
        &key,
        year_level.as_deref(),
        components,
    )?;
    Ok(json!({ "record": record, "created": created }))
}

fn grades_update_score(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let (student_id, key) = record_key(params)?;
    let component_name = get_required_str(params, "componentName")?;
    let item_name = get_required_str(params, "itemName")?;
    let score = get_number(params, "score")?;
    let record = records::update_score(
        &SqliteStore::new(conn),
        &student_id,
        &key,
        &component_name,
        &item_name,
        score,
    )?;
    Ok(json!({ "record": record }))
}

fn grades_list_by_section_subject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let section_id = get_id(params, "sectionId")?;
    let subject_id = get_id(params, "subjectId")?;
    let students = records::list_by_section_subject(&SqliteStore::new(conn), &section_id, &subject_id)?;
    Ok(json!({ "students": students }))
}

fn grades_list_for_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = get_id(params, "studentId")?;
    let section_id = get_optional_id(params, "sectionId")?;
    let subject_id = get_optional_id(params, "subjectId")?;
    let scoped = section_id.is_some() && subject_id.is_some();
    let filter = RecordFilter {
        section_id,
        subject_ids: subject_id.map(|s| vec![s]),
        ..RecordFilter::student(&student_id)
    };
    let found = SqliteStore::new(conn).list_grade_records(&filter)?;
    if scoped && found.is_empty() {
        return Err(GradeError::not_found(
            "No grades found for this student in the section and subject",
        ));
    }
    Ok(json!({ "records": found }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let method = req.method.as_str();
    if !method.starts_with("grades.") {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(no_workspace(&req.id));
    };
    let config = &state.config;
    let result = match method {
        "grades.sync" => grades_sync(conn, &req.params),
        "grades.calculate" => grades_calculate(conn, config, &req.params),
        "grades.batchUpdate" => grades_batch_update(conn, config, &req.params),
        "grades.assignSubjects" => grades_assign_subjects(conn, config, &req.params),
        "grades.unassignSubjects" => grades_unassign_subjects(conn, &req.params),
        "grades.deleteForStudent" => grades_delete_for_student(conn, &req.params),
        "grades.upsert" => grades_upsert(conn, &req.params),
        "grades.updateScore" => grades_update_score(conn, &req.params),
        "grades.listBySectionSubject" => grades_list_by_section_subject(conn, &req.params),
        "grades.listForStudent" => grades_list_for_student(conn, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
