use tracing::info;

use crate::db::now_timestamp;
use crate::error::{GradeError, Result};
use crate::model::{FormulaKey, GradeComponent, GradeItem, GradingFormula};
use crate::store::GradeStore;

/// Fresh grade components for a formula: same tree, every score 0.
pub fn components_from_formula(formula: &GradingFormula) -> Vec<GradeComponent> {
    merge_components(formula, &[])
}

/// Rebuilds a grade record's components so they mirror `formula` exactly
/// (names, order, maxPoints). Scores carry over by (componentName, itemName);
/// anything the formula no longer has is dropped.
pub fn merge_components(formula: &GradingFormula, existing: &[GradeComponent]) -> Vec<GradeComponent> {
    formula
        .components
        .iter()
        .map(|fc| {
            let old = existing.iter().find(|c| c.component_name == fc.component_name);
            GradeComponent {
                component_name: fc.component_name.clone(),
                items: fc
                    .items
                    .iter()
                    .map(|fi| GradeItem {
                        name: fi.name.clone(),
                        max_points: fi.max_points,
                        score: old
                            .and_then(|c| c.item(&fi.name))
                            .map(|i| i.score)
                            .unwrap_or(0.0),
                    })
                    .collect(),
            }
        })
        .collect()
}

/// Brings every grade record of `key` in line with its current formula.
/// Returns how many records were rewritten.
pub fn sync_grades<S: GradeStore>(store: &S, key: &FormulaKey) -> Result<usize> {
    store.transaction(|s| {
        let Some(formula) = s.find_formula(key)? else {
            return Err(GradeError::not_found("Grade formula not found"));
        };
        let records = s.find_grade_records(key)?;
        let now = now_timestamp();
        for mut record in records.iter().cloned() {
            record.components = merge_components(&formula, &record.components);
            record.updated_at = now.clone();
            s.save_grade_record(&record)?;
        }
        info!(
            section = %key.section_id,
            subject = %key.subject_id,
            term = %key.term,
            records = records.len(),
            "grade records synced with formula"
        );
        Ok(records.len())
    })
}
