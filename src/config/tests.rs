use super::*;

#[test]
fn test_default_terms_keep_label_mismatch() {
    let terms = TermsConfig::default();
    assert_eq!(terms.formula, vec!["Prelim", "Midterm", "Finalterm"]);
    assert_eq!(terms.report, vec!["Prelim", "Midterm", "Final"]);
    assert!(terms.is_formula_term("Finalterm"));
    assert!(!terms.is_formula_term("Final"));
}

#[test]
fn test_default_formula_weights_sum_to_100() {
    let total: f64 = default_formula_template().iter().map(|c| c.weight).sum();
    assert_eq!(total, 100.0);
}

#[test]
fn test_empty_toml_uses_defaults() {
    let cfg = Config::from_toml("").expect("parse empty config");
    assert_eq!(cfg.workspace.db_file, "gradebook.sqlite3");
    assert_eq!(cfg.limits.max_changes_per_batch, 500);
    assert_eq!(cfg.default_formula.len(), 3);
    assert_eq!(cfg.log.filter, "info");
}

#[test]
fn test_toml_overrides_terms_and_template() {
    let cfg = Config::from_toml(
        r#"
        [terms]
        formula = ["Q1", "Q2"]
        report = ["Q1", "Q2"]

        [[default_formula]]
        componentName = "exams"
        weight = 100
        items = [{ name = "exam", maxPoints = 50 }]
        "#,
    )
    .expect("parse config");
    assert_eq!(cfg.terms.formula, vec!["Q1", "Q2"]);
    assert_eq!(cfg.default_formula.len(), 1);
    assert_eq!(cfg.default_formula[0].items[0].max_points, 50.0);
}

#[test]
fn test_rejects_duplicate_formula_terms() {
    let err = Config::from_toml(
        r#"
        [terms]
        formula = ["Prelim", "Prelim"]
        "#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("twice"));
}
