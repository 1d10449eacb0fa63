use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use crate::db::now_timestamp;
use crate::error::{GradeError, Result};
use crate::model::{
    parse_entity_id, validate_grade_components, FormulaKey, GradeComponent, GradeRecord,
    RecordFilter,
};
use crate::store::GradeStore;
use crate::sync::components_from_formula;

fn new_record(
    student_id: &str,
    key: &FormulaKey,
    year_level: &str,
    components: Vec<GradeComponent>,
) -> GradeRecord {
    let now = now_timestamp();
    GradeRecord {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        subject_id: key.subject_id.clone(),
        section_id: key.section_id.clone(),
        term: key.term.clone(),
        year_level: year_level.to_string(),
        components,
        created_at: now.clone(),
        updated_at: now,
    }
}

/// Creates one grade record per (subject, term) for a student, seeded from
/// the formula of that key, or with no components when there is none yet.
/// Records that already exist are left alone. Returns how many were created.
pub fn assign_subjects<S: GradeStore>(
    store: &S,
    student_id: &str,
    section_id: &str,
    year_level: &str,
    subject_ids: &[String],
    terms: &[String],
) -> Result<usize> {
    let created = store.transaction(|s| {
        let mut created = 0;
        for subject_id in subject_ids {
            for term in terms {
                let key = FormulaKey::new(section_id, subject_id, term);
                if s.find_grade_record(student_id, &key)?.is_some() {
                    continue;
                }
                let components = s
                    .find_formula(&key)?
                    .map(|f| components_from_formula(&f))
                    .unwrap_or_default();
                s.save_grade_record(&new_record(student_id, &key, year_level, components))?;
                created += 1;
            }
        }
        Ok(created)
    })?;
    info!(student = %student_id, section = %section_id, created, "grade records created for subjects");
    Ok(created)
}

pub fn unassign_subjects<S: GradeStore>(
    store: &S,
    student_id: &str,
    section_id: &str,
    subject_ids: &[String],
) -> Result<usize> {
    let deleted = store.delete_grade_records(&RecordFilter {
        student_id: Some(student_id.to_string()),
        section_id: Some(section_id.to_string()),
        subject_ids: Some(subject_ids.to_vec()),
        term: None,
    })?;
    info!(student = %student_id, section = %section_id, deleted, "grade records removed for subjects");
    Ok(deleted)
}

pub fn delete_for_student<S: GradeStore>(store: &S, student_id: &str) -> Result<usize> {
    let deleted = store.delete_grade_records(&RecordFilter::student(student_id))?;
    info!(student = %student_id, deleted, "grade records removed for student");
    Ok(deleted)
}

/// Replaces a record's components wholesale, creating the record if needed.
/// New records take `year_level`, falling back to the formula's year level.
pub fn upsert_record<S: GradeStore>(
    store: &S,
    student_id: &str,
    key: &FormulaKey,
    year_level: Option<&str>,
    components: Vec<GradeComponent>,
) -> Result<(GradeRecord, bool)> {
    validate_grade_components(&components)?;
    store.transaction(|s| match s.find_grade_record(student_id, key)? {
        Some(mut record) => {
            record.components = components;
            if let Some(y) = year_level {
                record.year_level = y.to_string();
            }
            record.updated_at = now_timestamp();
            s.save_grade_record(&record)?;
            Ok((record, false))
        }
        None => {
            let year_level = match year_level {
                Some(y) => y.to_string(),
                None => s
                    .find_formula(key)?
                    .map(|f| f.year_level)
                    .unwrap_or_default(),
            };
            let record = new_record(student_id, key, &year_level, components);
            s.save_grade_record(&record)?;
            Ok((record, true))
        }
    })
}

pub fn update_score<S: GradeStore>(
    store: &S,
    student_id: &str,
    key: &FormulaKey,
    component_name: &str,
    item_name: &str,
    score: f64,
) -> Result<GradeRecord> {
    if !score.is_finite() || score < 0.0 {
        return Err(GradeError::validation("score must be a non-negative number"));
    }
    let Some(mut record) = store.find_grade_record(student_id, key)? else {
        return Err(GradeError::not_found("Grade record not found"));
    };
    let Some(component) = record.component_mut(component_name) else {
        return Err(GradeError::not_found("Component not found"));
    };
    let Some(item) = component.item_mut(item_name) else {
        return Err(GradeError::not_found("Item not found"));
    };
    item.score = score;
    record.updated_at = now_timestamp();
    store.save_grade_record(&record)?;
    Ok(record)
}

/// One student's entry in a batch grade update: term label → full component list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradeUpdate {
    pub student_id: String,
    pub terms: BTreeMap<String, Vec<GradeComponent>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub updated: usize,
    pub created: usize,
}

/// Upserts every (student, term) entry for one section/subject. The whole
/// payload is validated first and written in a single transaction.
pub fn batch_update<S: GradeStore>(
    store: &S,
    section_id: &str,
    subject_id: &str,
    updates: &[StudentGradeUpdate],
) -> Result<BatchOutcome> {
    let mut planned: Vec<(String, FormulaKey, &Vec<GradeComponent>)> = Vec::new();
    for (i, update) in updates.iter().enumerate() {
        let student_id = parse_entity_id("studentId", &update.student_id).map_err(|e| {
            GradeError::validation_with(
                format!("updatedGrades[{}]: {}", i, e),
                serde_json::json!({ "index": i }),
            )
        })?;
        for (term, components) in &update.terms {
            if term.trim().is_empty() {
                return Err(GradeError::validation_with(
                    format!("updatedGrades[{}]: empty term name", i),
                    serde_json::json!({ "index": i }),
                ));
            }
            validate_grade_components(components)?;
            planned.push((student_id.clone(), FormulaKey::new(section_id, subject_id, term), components));
        }
    }

    let outcome = store.transaction(|s| {
        let mut outcome = BatchOutcome::default();
        for (student_id, key, components) in &planned {
            let (_, created) = upsert_record(s, student_id, key, None, (*components).clone())?;
            if created {
                outcome.created += 1;
            } else {
                outcome.updated += 1;
            }
        }
        Ok(outcome)
    })?;
    info!(
        section = %section_id,
        subject = %subject_id,
        updated = outcome.updated,
        created = outcome.created,
        "grade batch applied"
    );
    Ok(outcome)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentTerms {
    pub student_id: String,
    pub terms: BTreeMap<String, Vec<GradeComponent>>,
}

/// Every record of a section/subject grouped per student and keyed by term.
pub fn list_by_section_subject<S: GradeStore>(
    store: &S,
    section_id: &str,
    subject_id: &str,
) -> Result<Vec<StudentTerms>> {
    let records = store.list_grade_records(&RecordFilter {
        section_id: Some(section_id.to_string()),
        subject_ids: Some(vec![subject_id.to_string()]),
        ..RecordFilter::default()
    })?;
    let mut grouped: Vec<StudentTerms> = Vec::new();
    for record in records {
        if grouped.last().map(|g| g.student_id != record.student_id).unwrap_or(true) {
            grouped.push(StudentTerms {
                student_id: record.student_id.clone(),
                terms: BTreeMap::new(),
            });
        }
        if let Some(entry) = grouped.last_mut() {
            entry
                .terms
                .entry(record.term)
                .or_default()
                .extend(record.components);
        }
    }
    Ok(grouped)
}
