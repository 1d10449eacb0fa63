use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{GradeError, Result};
use crate::model::{
    valid_max_points, validate_formula_components, FormulaComponent, FormulaItem, FormulaKey,
    GradingFormula,
};
use crate::store::GradeStore;
use crate::sync;

/// One incremental edit to a grading formula, decoded from a `{action, ...}` object.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOp {
    EditWeight {
        component_name: String,
        new_weight: f64,
    },
    AddItem {
        component_name: String,
        new_item: FormulaItem,
    },
    RemoveItem {
        component_name: String,
        item_name: String,
    },
    EditItemMaxPoints {
        component_name: String,
        item_name: String,
        new_max_points: f64,
    },
    AddComponent {
        component_name: String,
        new_weight: Option<f64>,
        new_item: Option<FormulaItem>,
    },
    RemoveComponent {
        component_name: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChange {
    action: Option<String>,
    component_name: Option<String>,
    item_name: Option<String>,
    new_weight: Option<f64>,
    new_item: Option<RawItem>,
    new_max_points: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    name: Option<String>,
    max_points: Option<f64>,
}

fn bad_change(index: usize, message: impl Into<String>) -> GradeError {
    GradeError::validation_with(message, json!({ "index": index }))
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

impl ChangeOp {
    pub fn decode(index: usize, raw: &serde_json::Value) -> Result<ChangeOp> {
        if !raw.is_object() {
            return Err(bad_change(index, format!("change at index {} must be an object", index)));
        }
        let raw: RawChange = serde_json::from_value(raw.clone()).map_err(|e| {
            bad_change(index, format!("change at index {} is malformed: {}", index, e))
        })?;
        let Some(action) = raw.action else {
            return Err(bad_change(index, format!("change at index {} missing action", index)));
        };
        let component_name = non_empty(raw.component_name);
        let need_component = || {
            component_name
                .clone()
                .ok_or_else(|| bad_change(index, format!("missing componentName for {}", action)))
        };
        let need_item_name = || {
            non_empty(raw.item_name.clone())
                .ok_or_else(|| bad_change(index, format!("missing itemName for {}", action)))
        };

        match action.as_str() {
            "editWeight" => {
                let component_name = need_component()?;
                let new_weight = raw
                    .new_weight
                    .filter(|w| w.is_finite())
                    .ok_or_else(|| bad_change(index, "missing newWeight for editWeight"))?;
                Ok(ChangeOp::EditWeight {
                    component_name,
                    new_weight,
                })
            }
            "addItem" => {
                let component_name = need_component()?;
                let new_item = raw
                    .new_item
                    .and_then(|i| decode_item(i).ok())
                    .ok_or_else(|| bad_change(index, "Invalid newItem for addItem"))?;
                Ok(ChangeOp::AddItem {
                    component_name,
                    new_item,
                })
            }
            "removeItem" => Ok(ChangeOp::RemoveItem {
                component_name: need_component()?,
                item_name: need_item_name()?,
            }),
            "editItemMaxPoints" => {
                let component_name = need_component()?;
                let item_name = need_item_name()?;
                let new_max_points = raw.new_max_points.filter(|v| valid_max_points(*v)).ok_or_else(
                    || bad_change(index, "newMaxPoints must be a positive number"),
                )?;
                Ok(ChangeOp::EditItemMaxPoints {
                    component_name,
                    item_name,
                    new_max_points,
                })
            }
            "addComponent" => {
                let component_name = component_name
                    .clone()
                    .ok_or_else(|| bad_change(index, "Missing componentName for addComponent"))?;
                if let Some(w) = raw.new_weight {
                    if !w.is_finite() {
                        return Err(bad_change(index, "newWeight must be a number"));
                    }
                }
                let new_item = match raw.new_item {
                    None => None,
                    Some(i) => Some(
                        decode_item(i)
                            .map_err(|_| bad_change(index, "Invalid newItem for addComponent"))?,
                    ),
                };
                Ok(ChangeOp::AddComponent {
                    component_name,
                    new_weight: raw.new_weight,
                    new_item,
                })
            }
            "removeComponent" => Ok(ChangeOp::RemoveComponent {
                component_name: need_component()?,
            }),
            other => Err(GradeError::validation_with(
                format!("Invalid action '{}'", other),
                json!({ "index": index, "action": other }),
            )),
        }
    }

    pub fn component_name(&self) -> &str {
        match self {
            ChangeOp::EditWeight { component_name, .. }
            | ChangeOp::AddItem { component_name, .. }
            | ChangeOp::RemoveItem { component_name, .. }
            | ChangeOp::EditItemMaxPoints { component_name, .. }
            | ChangeOp::AddComponent { component_name, .. }
            | ChangeOp::RemoveComponent { component_name } => component_name,
        }
    }

    /// Applies this edit to `formula` in place.
    pub fn apply(&self, formula: &mut GradingFormula) -> Result<()> {
        match self {
            ChangeOp::AddComponent {
                component_name,
                new_weight,
                new_item,
            } => {
                if formula.component(component_name).is_some() {
                    return Err(GradeError::conflict(format!(
                        "Component '{}' already exists",
                        component_name
                    )));
                }
                formula.components.push(FormulaComponent {
                    component_name: component_name.clone(),
                    weight: new_weight.unwrap_or(0.0),
                    items: new_item.iter().cloned().collect(),
                });
                Ok(())
            }
            ChangeOp::RemoveComponent { component_name } => {
                formula
                    .components
                    .retain(|c| &c.component_name != component_name);
                Ok(())
            }
            _ => {
                let name = self.component_name();
                let Some(component) = formula.component_mut(name) else {
                    return Err(GradeError::not_found(format!(
                        "Component '{}' not found",
                        name
                    )));
                };
                apply_to_component(self, component)
            }
        }
    }
}

fn decode_item(raw: RawItem) -> std::result::Result<FormulaItem, ()> {
    let name = non_empty(raw.name).ok_or(())?;
    let max_points = raw.max_points.filter(|v| valid_max_points(*v)).ok_or(())?;
    Ok(FormulaItem { name, max_points })
}

fn apply_to_component(op: &ChangeOp, component: &mut FormulaComponent) -> Result<()> {
    match op {
        ChangeOp::EditWeight { new_weight, .. } => {
            component.weight = *new_weight;
        }
        ChangeOp::AddItem { new_item, .. } => {
            if component.item(&new_item.name).is_some() {
                return Err(GradeError::conflict(format!(
                    "Item '{}' already exists in component '{}'",
                    new_item.name, component.component_name
                )));
            }
            component.items.push(new_item.clone());
        }
        ChangeOp::RemoveItem { item_name, .. } => {
            component.items.retain(|i| &i.name != item_name);
        }
        ChangeOp::EditItemMaxPoints {
            item_name,
            new_max_points,
            ..
        } => {
            let component_name = component.component_name.clone();
            let Some(item) = component.item_mut(item_name) else {
                return Err(GradeError::not_found(format!(
                    "Item '{}' not found in component '{}'",
                    item_name, component_name
                )));
            };
            item.max_points = *new_max_points;
        }
        ChangeOp::AddComponent { .. } | ChangeOp::RemoveComponent { .. } => {}
    }
    Ok(())
}

/// Decodes and applies `changes` in order against a copy of `formula`.
/// The first failing change aborts the batch; `formula` itself is never touched.
pub fn apply_changes(
    formula: &GradingFormula,
    changes: &[serde_json::Value],
) -> Result<GradingFormula> {
    let mut edited = formula.clone();
    for (index, raw) in changes.iter().enumerate() {
        let op = ChangeOp::decode(index, raw)?;
        op.apply(&mut edited)?;
    }
    Ok(edited)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeOutcome {
    pub applied: usize,
    pub version: i64,
    pub synced: usize,
}

/// Applies a change batch to the stored formula, persists it once, and syncs
/// every grade record of the same key. All of it commits together.
pub fn submit_changes<S: GradeStore>(
    store: &S,
    key: &FormulaKey,
    changes: &[serde_json::Value],
) -> Result<ChangeOutcome> {
    store.transaction(|s| {
        let Some(formula) = s.find_formula(key)? else {
            return Err(GradeError::not_found("Grade formula not found"));
        };
        let edited = apply_changes(&formula, changes)?;
        let version = s.save_formula(&edited)?;
        let synced = sync::sync_grades(s, key)?;
        info!(
            section = %key.section_id,
            subject = %key.subject_id,
            term = %key.term,
            changes = changes.len(),
            version,
            synced,
            "grade formula updated"
        );
        Ok(ChangeOutcome {
            applied: changes.len(),
            version,
            synced,
        })
    })
}

pub fn new_formula(
    key: &FormulaKey,
    year_level: &str,
    components: Vec<FormulaComponent>,
) -> GradingFormula {
    GradingFormula {
        id: Uuid::new_v4().to_string(),
        section_id: key.section_id.clone(),
        subject_id: key.subject_id.clone(),
        term: key.term.clone(),
        year_level: year_level.to_string(),
        components,
        version: 1,
    }
}

pub fn create_formula<S: GradeStore>(
    store: &S,
    key: &FormulaKey,
    year_level: &str,
    components: Vec<FormulaComponent>,
) -> Result<GradingFormula> {
    validate_formula_components(&components)?;
    let formula = new_formula(key, year_level, components);
    store.transaction(|s| {
        s.insert_formula(&formula)?;
        sync::sync_grades(s, key)?;
        Ok(())
    })?;
    info!(section = %key.section_id, subject = %key.subject_id, term = %key.term, "grade formula created");
    Ok(formula)
}

/// Creates the template formula for each term that has none yet, then seeds
/// existing grade records of those terms. Returns only the newly created formulas.
pub fn create_for_assignment<S: GradeStore>(
    store: &S,
    section_id: &str,
    subject_id: &str,
    year_level: &str,
    terms: &[String],
    template: &[FormulaComponent],
) -> Result<Vec<GradingFormula>> {
    let created = store.transaction(|s| {
        let mut created = Vec::new();
        for term in terms {
            let key = FormulaKey::new(section_id, subject_id, term);
            if s.find_formula(&key)?.is_some() {
                continue;
            }
            let formula = new_formula(&key, year_level, template.to_vec());
            s.insert_formula(&formula)?;
            sync::sync_grades(s, &key)?;
            created.push(formula);
        }
        Ok(created)
    })?;
    info!(
        section = %section_id,
        subject = %subject_id,
        created = created.len(),
        "grade formulas created for assignment"
    );
    Ok(created)
}

pub fn delete_for_assignment<S: GradeStore>(
    store: &S,
    section_id: &str,
    subject_id: &str,
) -> Result<usize> {
    let deleted = store.delete_formulas(section_id, subject_id)?;
    if deleted == 0 {
        return Err(GradeError::not_found(
            "No grade formulas found for the provided section and subject",
        ));
    }
    info!(section = %section_id, subject = %subject_id, deleted, "grade formulas deleted");
    Ok(deleted)
}
