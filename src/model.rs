use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{GradeError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaItem {
    pub name: String,
    pub max_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaComponent {
    pub component_name: String,
    pub weight: f64,
    #[serde(default)]
    pub items: Vec<FormulaItem>,
}

impl FormulaComponent {
    pub fn item(&self, name: &str) -> Option<&FormulaItem> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn item_mut(&mut self, name: &str) -> Option<&mut FormulaItem> {
        self.items.iter_mut().find(|i| i.name == name)
    }
}

/// Identifies one grading formula: a section/subject assignment for one term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormulaKey {
    pub section_id: String,
    pub subject_id: String,
    pub term: String,
}

impl FormulaKey {
    pub fn new(section_id: &str, subject_id: &str, term: &str) -> Self {
        Self {
            section_id: section_id.to_string(),
            subject_id: subject_id.to_string(),
            term: term.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingFormula {
    pub id: String,
    pub section_id: String,
    pub subject_id: String,
    pub term: String,
    pub year_level: String,
    pub components: Vec<FormulaComponent>,
    pub version: i64,
}

impl GradingFormula {
    pub fn key(&self) -> FormulaKey {
        FormulaKey::new(&self.section_id, &self.subject_id, &self.term)
    }

    pub fn component(&self, name: &str) -> Option<&FormulaComponent> {
        self.components.iter().find(|c| c.component_name == name)
    }

    pub fn component_mut(&mut self, name: &str) -> Option<&mut FormulaComponent> {
        self.components.iter_mut().find(|c| c.component_name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeItem {
    pub name: String,
    pub max_points: f64,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeComponent {
    pub component_name: String,
    #[serde(default)]
    pub items: Vec<GradeItem>,
}

impl GradeComponent {
    pub fn item(&self, name: &str) -> Option<&GradeItem> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn item_mut(&mut self, name: &str) -> Option<&mut GradeItem> {
        self.items.iter_mut().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    pub section_id: String,
    pub term: String,
    pub year_level: String,
    pub components: Vec<GradeComponent>,
    pub created_at: String,
    pub updated_at: String,
}

impl GradeRecord {
    pub fn component(&self, name: &str) -> Option<&GradeComponent> {
        self.components.iter().find(|c| c.component_name == name)
    }

    pub fn component_mut(&mut self, name: &str) -> Option<&mut GradeComponent> {
        self.components.iter_mut().find(|c| c.component_name == name)
    }
}

/// Selects grade records by any combination of key fields. Unset fields match
/// everything; an empty `subject_ids` list matches nothing.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub student_id: Option<String>,
    pub section_id: Option<String>,
    pub subject_ids: Option<Vec<String>>,
    pub term: Option<String>,
}

impl RecordFilter {
    pub fn student(student_id: &str) -> Self {
        Self {
            student_id: Some(student_id.to_string()),
            ..Self::default()
        }
    }
}

/// Student, section, and subject ids are UUID strings.
pub fn parse_entity_id(field: &str, raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GradeError::validation(format!("missing {}", field)));
    }
    uuid::Uuid::parse_str(trimmed)
        .map(|u| u.to_string())
        .map_err(|_| {
            GradeError::validation_with(
                format!("Invalid {}", field),
                serde_json::json!({ "field": field, "value": raw }),
            )
        })
}

pub fn valid_max_points(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

pub fn validate_formula_components(components: &[FormulaComponent]) -> Result<()> {
    let mut seen = HashSet::new();
    for c in components {
        if c.component_name.trim().is_empty() {
            return Err(GradeError::validation("componentName must not be empty"));
        }
        if !seen.insert(c.component_name.as_str()) {
            return Err(GradeError::conflict(format!(
                "duplicate component '{}'",
                c.component_name
            )));
        }
        if !c.weight.is_finite() {
            return Err(GradeError::validation(format!(
                "weight of component '{}' must be a number",
                c.component_name
            )));
        }
        let mut items = HashSet::new();
        for i in &c.items {
            if i.name.trim().is_empty() {
                return Err(GradeError::validation("item name must not be empty"));
            }
            if !valid_max_points(i.max_points) {
                return Err(GradeError::validation_with(
                    "maxPoints must be a positive number",
                    serde_json::json!({ "componentName": c.component_name, "itemName": i.name }),
                ));
            }
            if !items.insert(i.name.as_str()) {
                return Err(GradeError::conflict(format!(
                    "duplicate item '{}' in component '{}'",
                    i.name, c.component_name
                )));
            }
        }
    }
    Ok(())
}

pub fn validate_grade_components(components: &[GradeComponent]) -> Result<()> {
    let mut seen = HashSet::new();
    for c in components {
        if c.component_name.trim().is_empty() {
            return Err(GradeError::validation("componentName must not be empty"));
        }
        if !seen.insert(c.component_name.as_str()) {
            return Err(GradeError::conflict(format!(
                "duplicate component '{}'",
                c.component_name
            )));
        }
        let mut items = HashSet::new();
        for i in &c.items {
            if i.name.trim().is_empty() {
                return Err(GradeError::validation("item name must not be empty"));
            }
            if !valid_max_points(i.max_points) {
                return Err(GradeError::validation_with(
                    "maxPoints must be a positive number",
                    serde_json::json!({ "componentName": c.component_name, "itemName": i.name }),
                ));
            }
            if !i.score.is_finite() || i.score < 0.0 {
                return Err(GradeError::validation_with(
                    "score must be a non-negative number",
                    serde_json::json!({ "componentName": c.component_name, "itemName": i.name }),
                ));
            }
            if !items.insert(i.name.as_str()) {
                return Err(GradeError::conflict(format!(
                    "duplicate item '{}' in component '{}'",
                    i.name, c.component_name
                )));
            }
        }
    }
    Ok(())
}
