use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::{FormulaKey, GradeRecord, GradingFormula};
use crate::store::GradeStore;

/// Two-decimal rounding used for every reported grade.
pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Weighted percentage for one term.
///
/// Each formula component contributes `(Σ score / Σ maxPoints) * weight`, using
/// the items in the student's record. Components missing from the record, with
/// no items, or with zero max points contribute 0; their weight is not handed
/// to the remaining components.
pub fn term_grade(formula: &GradingFormula, record: &GradeRecord) -> f64 {
    let mut total = 0.0_f64;
    for component in &formula.components {
        let Some(scored) = record.component(&component.component_name) else {
            continue;
        };
        if scored.items.is_empty() {
            continue;
        }
        let (score_sum, max_sum) = scored
            .items
            .iter()
            .fold((0.0_f64, 0.0_f64), |(s, m), i| (s + i.score, m + i.max_points));
        if max_sum == 0.0 {
            continue;
        }
        let component_percentage = score_sum / max_sum;
        total += component_percentage * (component.weight / 100.0) * 100.0;
    }
    round_2_decimals(total)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeReport {
    pub student_id: String,
    pub subject_id: String,
    pub section_id: String,
    pub term_grades: BTreeMap<String, f64>,
    pub total_grade: f64,
}

/// Per-term and overall grade for one student in one subject/section.
///
/// `terms` are the report labels; each is looked up as-is in both the formula
/// and the grade record stores. A term with no formula or no record counts as 0
/// and still takes part in the average.
pub fn calculate<S: GradeStore>(
    store: &S,
    student_id: &str,
    subject_id: &str,
    section_id: &str,
    terms: &[String],
) -> Result<GradeReport> {
    let mut term_grades = BTreeMap::new();
    let mut overall = 0.0_f64;
    for term in terms {
        let key = FormulaKey::new(section_id, subject_id, term);
        let grade = match store.find_formula(&key)? {
            None => 0.0,
            Some(formula) => match store.find_grade_record(student_id, &key)? {
                None => 0.0,
                Some(record) => term_grade(&formula, &record),
            },
        };
        overall += grade;
        term_grades.insert(term.clone(), grade);
    }
    let total_grade = if terms.is_empty() {
        0.0
    } else {
        round_2_decimals(overall / terms.len() as f64)
    };
    Ok(GradeReport {
        student_id: student_id.to_string(),
        subject_id: subject_id.to_string(),
        section_id: section_id.to_string(),
        term_grades,
        total_grade,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_schema, now_timestamp, SqliteStore};
    use crate::formula::new_formula;
    use crate::model::{FormulaComponent, FormulaItem, GradeComponent, GradeItem};
    use rusqlite::Connection;

    fn exams_formula(term: &str) -> GradingFormula {
        new_formula(
            &FormulaKey::new("sec", "sub", term),
            "1",
            vec![FormulaComponent {
                component_name: "exams".into(),
                weight: 100.0,
                items: vec![FormulaItem {
                    name: "exam".into(),
                    max_points: 50.0,
                }],
            }],
        )
    }

    fn record(term: &str, components: Vec<GradeComponent>) -> GradeRecord {
        let now = now_timestamp();
        GradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: "stu".into(),
            subject_id: "sub".into(),
            section_id: "sec".into(),
            term: term.into(),
            year_level: "1".into(),
            components,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn exam_scored(score: f64) -> Vec<GradeComponent> {
        vec![GradeComponent {
            component_name: "exams".into(),
            items: vec![GradeItem {
                name: "exam".into(),
                max_points: 50.0,
                score,
            }],
        }]
    }

    fn terms(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round_2_decimals(26.666_666), 26.67);
        assert_eq!(round_2_decimals(80.0), 80.0);
        assert_eq!(round_2_decimals(0.004), 0.0);
    }

    #[test]
    fn single_component_term() {
        assert_eq!(term_grade(&exams_formula("Prelim"), &record("Prelim", exam_scored(40.0))), 80.0);
    }

    #[test]
    fn missing_component_weight_is_not_redistributed() {
        let mut f = exams_formula("Prelim");
        f.components[0].weight = 40.0;
        f.components.push(FormulaComponent {
            component_name: "quizzes".into(),
            weight: 60.0,
            items: vec![FormulaItem {
                name: "quiz_1".into(),
                max_points: 10.0,
            }],
        });
        // Perfect exam, no quizzes component in the record: 40, not 100.
        assert_eq!(term_grade(&f, &record("Prelim", exam_scored(50.0))), 40.0);

        // An empty quizzes component is skipped the same way.
        let mut comps = exam_scored(50.0);
        comps.push(GradeComponent {
            component_name: "quizzes".into(),
            items: vec![],
        });
        assert_eq!(term_grade(&f, &record("Prelim", comps)), 40.0);
    }

    #[test]
    fn weighted_components_combine() {
        let mut f = exams_formula("Prelim");
        f.components[0].weight = 40.0;
        f.components.push(FormulaComponent {
            component_name: "quizzes".into(),
            weight: 30.0,
            items: vec![],
        });
        let mut comps = exam_scored(25.0);
        comps.push(GradeComponent {
            component_name: "quizzes".into(),
            items: vec![
                GradeItem {
                    name: "quiz_1".into(),
                    max_points: 10.0,
                    score: 10.0,
                },
                GradeItem {
                    name: "quiz_2".into(),
                    max_points: 10.0,
                    score: 5.0,
                },
            ],
        });
        // 0.5 * 40 + 0.75 * 30
        assert_eq!(term_grade(&f, &record("Prelim", comps)), 42.5);
    }

    #[test]
    fn overall_is_mean_including_missing_terms() {
        let conn = Connection::open_in_memory().expect("db");
        init_schema(&conn).expect("schema");
        let store = SqliteStore::new(&conn);
        store.insert_formula(&exams_formula("Prelim")).expect("formula");
        store
            .save_grade_record(&record("Prelim", exam_scored(40.0)))
            .expect("record");
        // Midterm has a formula but no record.
        store.insert_formula(&exams_formula("Midterm")).expect("formula");

        let report = calculate(&store, "stu", "sub", "sec", &terms(&["Prelim", "Midterm", "Final"]))
            .expect("calculate");
        assert_eq!(report.term_grades["Prelim"], 80.0);
        assert_eq!(report.term_grades["Midterm"], 0.0);
        assert_eq!(report.term_grades["Final"], 0.0);
        assert_eq!(report.total_grade, 26.67);
    }

    #[test]
    fn finalterm_records_never_reach_final_label() {
        let conn = Connection::open_in_memory().expect("db");
        init_schema(&conn).expect("schema");
        let store = SqliteStore::new(&conn);
        store.insert_formula(&exams_formula("Finalterm")).expect("formula");
        store
            .save_grade_record(&record("Finalterm", exam_scored(50.0)))
            .expect("record");

        let report = calculate(&store, "stu", "sub", "sec", &terms(&["Prelim", "Midterm", "Final"]))
            .expect("calculate");
        assert_eq!(report.term_grades["Final"], 0.0);
        assert_eq!(report.total_grade, 0.0);

        let aligned = calculate(&store, "stu", "sub", "sec", &terms(&["Prelim", "Midterm", "Finalterm"]))
            .expect("calculate");
        assert_eq!(aligned.term_grades["Finalterm"], 100.0);
        assert_eq!(aligned.total_grade, 33.33);
    }
}
