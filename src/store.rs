use crate::error::Result;
use crate::model::{FormulaKey, GradeRecord, GradingFormula, RecordFilter};

/// Persistence seam for the grading core. Formula editing, sync, and grade
/// calculation only ever talk to storage through this trait.
pub trait GradeStore {
    fn find_formula(&self, key: &FormulaKey) -> Result<Option<GradingFormula>>;

    fn list_formulas(&self, section_id: &str, subject_id: &str) -> Result<Vec<GradingFormula>>;

    /// Fails with `Conflict` if a formula already exists for the key.
    fn insert_formula(&self, formula: &GradingFormula) -> Result<()>;

    /// Writes the formula if the stored version still equals `formula.version`
    /// and returns the new version. A stale version is a `Conflict`.
    fn save_formula(&self, formula: &GradingFormula) -> Result<i64>;

    fn delete_formulas(&self, section_id: &str, subject_id: &str) -> Result<usize>;

    fn find_grade_records(&self, key: &FormulaKey) -> Result<Vec<GradeRecord>>;

    fn find_grade_record(&self, student_id: &str, key: &FormulaKey) -> Result<Option<GradeRecord>>;

    fn list_grade_records(&self, filter: &RecordFilter) -> Result<Vec<GradeRecord>>;

    /// Insert-or-replace keyed by (student, subject, section, term).
    fn save_grade_record(&self, record: &GradeRecord) -> Result<()>;

    fn delete_grade_records(&self, filter: &RecordFilter) -> Result<usize>;

    /// Runs `f` atomically: everything it writes is committed together or not at all.
    fn transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T>;
}
