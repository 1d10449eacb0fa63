use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use tracing::debug;

use crate::error::{GradeError, Result};
use crate::model::{
    FormulaComponent, FormulaKey, GradeComponent, GradeRecord, GradingFormula, RecordFilter,
};
use crate::store::GradeStore;

pub fn open_db(workspace: &Path, db_file: &str) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(db_file);
    let conn = Connection::open(&db_path)?;
    init_schema(&conn)?;
    debug!(path = %db_path.display(), "database opened");
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Components are stored as JSON documents; the key columns are what we query on.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_formulas(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            term TEXT NOT NULL,
            year_level TEXT NOT NULL,
            components TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE(section_id, subject_id, term)
        )",
        [],
    )?;
    ensure_grade_formulas_version(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_formulas_assignment
         ON grade_formulas(section_id, subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            term TEXT NOT NULL,
            year_level TEXT NOT NULL,
            components TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(student_id, subject_id, section_id, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_grades_key
         ON student_grades(section_id, subject_id, term)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_grades_student ON student_grades(student_id)",
        [],
    )?;

    Ok(())
}

// Workspaces created before optimistic versioning have no version column.
fn ensure_grade_formulas_version(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "grade_formulas", "version")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE grade_formulas ADD COLUMN version INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}

type FormulaRow = (String, String, String, String, String, String, i64);
type RecordRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

const FORMULA_COLUMNS: &str =
    "id, section_id, subject_id, term, year_level, components, version";
const RECORD_COLUMNS: &str =
    "id, student_id, subject_id, section_id, term, year_level, components, created_at, updated_at";

fn formula_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<FormulaRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
    ))
}

fn record_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
        r.get(8)?,
    ))
}

fn decode_formula(row: FormulaRow) -> Result<GradingFormula> {
    let (id, section_id, subject_id, term, year_level, components, version) = row;
    let components: Vec<FormulaComponent> = serde_json::from_str(&components)?;
    Ok(GradingFormula {
        id,
        section_id,
        subject_id,
        term,
        year_level,
        components,
        version,
    })
}

fn decode_record(row: RecordRow) -> Result<GradeRecord> {
    let (id, student_id, subject_id, section_id, term, year_level, components, created_at, updated_at) =
        row;
    let components: Vec<GradeComponent> = serde_json::from_str(&components)?;
    Ok(GradeRecord {
        id,
        student_id,
        subject_id,
        section_id,
        term,
        year_level,
        components,
        created_at,
        updated_at,
    })
}

/// Builds the WHERE clause for a record filter. `None` means the filter can
/// match nothing (an explicit empty subject list).
fn record_filter_sql(filter: &RecordFilter) -> Option<(String, Vec<Value>)> {
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(id) = &filter.student_id {
        clauses.push("student_id = ?".to_string());
        binds.push(Value::Text(id.clone()));
    }
    if let Some(id) = &filter.section_id {
        clauses.push("section_id = ?".to_string());
        binds.push(Value::Text(id.clone()));
    }
    if let Some(ids) = &filter.subject_ids {
        if ids.is_empty() {
            return None;
        }
        let placeholders = std::iter::repeat_n("?", ids.len())
            .collect::<Vec<_>>()
            .join(",");
        clauses.push(format!("subject_id IN ({})", placeholders));
        for id in ids {
            binds.push(Value::Text(id.clone()));
        }
    }
    if let Some(term) = &filter.term {
        clauses.push("term = ?".to_string());
        binds.push(Value::Text(term.clone()));
    }
    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    Some((sql, binds))
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_formulas(&self, sql: &str, binds: Vec<Value>) -> Result<Vec<GradingFormula>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), formula_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_formula).collect()
    }

    fn query_records(&self, sql: &str, binds: Vec<Value>) -> Result<Vec<GradeRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), record_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_record).collect()
    }
}

impl GradeStore for SqliteStore<'_> {
    fn find_formula(&self, key: &FormulaKey) -> Result<Option<GradingFormula>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM grade_formulas
                     WHERE section_id = ? AND subject_id = ? AND term = ?",
                    FORMULA_COLUMNS
                ),
                (&key.section_id, &key.subject_id, &key.term),
                formula_row,
            )
            .optional()?;
        row.map(decode_formula).transpose()
    }

    fn list_formulas(&self, section_id: &str, subject_id: &str) -> Result<Vec<GradingFormula>> {
        self.query_formulas(
            &format!(
                "SELECT {} FROM grade_formulas
                 WHERE section_id = ? AND subject_id = ?
                 ORDER BY rowid",
                FORMULA_COLUMNS
            ),
            vec![
                Value::Text(section_id.to_string()),
                Value::Text(subject_id.to_string()),
            ],
        )
    }

    fn insert_formula(&self, formula: &GradingFormula) -> Result<()> {
        let components = serde_json::to_string(&formula.components)?;
        let res = self.conn.execute(
            "INSERT INTO grade_formulas(id, section_id, subject_id, term, year_level, components, version, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &formula.id,
                &formula.section_id,
                &formula.subject_id,
                &formula.term,
                &formula.year_level,
                &components,
                formula.version,
                now_timestamp(),
            ),
        );
        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(GradeError::conflict(format!(
                "grade formula already exists for term '{}'",
                formula.term
            ))),
            Err(e) => Err(GradeError::persistence("inserting grade formula", e)),
        }
    }

    fn save_formula(&self, formula: &GradingFormula) -> Result<i64> {
        let components = serde_json::to_string(&formula.components)?;
        let changed = self
            .conn
            .execute(
                "UPDATE grade_formulas
                 SET components = ?, year_level = ?, version = version + 1, updated_at = ?
                 WHERE id = ? AND version = ?",
                (
                    &components,
                    &formula.year_level,
                    now_timestamp(),
                    &formula.id,
                    formula.version,
                ),
            )
            .map_err(|e| GradeError::persistence("saving grade formula", e))?;
        if changed == 1 {
            return Ok(formula.version + 1);
        }
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM grade_formulas WHERE id = ?",
                [&formula.id],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            Err(GradeError::conflict("grade formula was modified concurrently"))
        } else {
            Err(GradeError::not_found("Grade formula not found"))
        }
    }

    fn delete_formulas(&self, section_id: &str, subject_id: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM grade_formulas WHERE section_id = ? AND subject_id = ?",
                (section_id, subject_id),
            )
            .map_err(|e| GradeError::persistence("deleting grade formulas", e))
    }

    fn find_grade_records(&self, key: &FormulaKey) -> Result<Vec<GradeRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM student_grades
                 WHERE section_id = ? AND subject_id = ? AND term = ?
                 ORDER BY rowid",
                RECORD_COLUMNS
            ),
            vec![
                Value::Text(key.section_id.clone()),
                Value::Text(key.subject_id.clone()),
                Value::Text(key.term.clone()),
            ],
        )
    }

    fn find_grade_record(&self, student_id: &str, key: &FormulaKey) -> Result<Option<GradeRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM student_grades
                     WHERE student_id = ? AND subject_id = ? AND section_id = ? AND term = ?",
                    RECORD_COLUMNS
                ),
                (student_id, &key.subject_id, &key.section_id, &key.term),
                record_row,
            )
            .optional()?;
        row.map(decode_record).transpose()
    }

    fn list_grade_records(&self, filter: &RecordFilter) -> Result<Vec<GradeRecord>> {
        let Some((where_sql, binds)) = record_filter_sql(filter) else {
            return Ok(Vec::new());
        };
        self.query_records(
            &format!(
                "SELECT {} FROM student_grades{} ORDER BY student_id, subject_id, rowid",
                RECORD_COLUMNS, where_sql
            ),
            binds,
        )
    }

    fn save_grade_record(&self, record: &GradeRecord) -> Result<()> {
        let components = serde_json::to_string(&record.components)?;
        self.conn
            .execute(
                "INSERT INTO student_grades(id, student_id, subject_id, section_id, term, year_level, components, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(student_id, subject_id, section_id, term) DO UPDATE SET
                   year_level = excluded.year_level,
                   components = excluded.components,
                   updated_at = excluded.updated_at",
                (
                    &record.id,
                    &record.student_id,
                    &record.subject_id,
                    &record.section_id,
                    &record.term,
                    &record.year_level,
                    &components,
                    &record.created_at,
                    &record.updated_at,
                ),
            )
            .map_err(|e| GradeError::persistence("saving grade record", e))?;
        Ok(())
    }

    fn delete_grade_records(&self, filter: &RecordFilter) -> Result<usize> {
        let Some((where_sql, binds)) = record_filter_sql(filter) else {
            return Ok(0);
        };
        self.conn
            .execute(
                &format!("DELETE FROM student_grades{}", where_sql),
                params_from_iter(binds),
            )
            .map_err(|e| GradeError::persistence("deleting grade records", e))
    }

    fn transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        // Already inside a transaction: join it.
        if !self.conn.is_autocommit() {
            return f(self);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| GradeError::persistence("starting transaction", e))?;
        let out = f(self)?;
        tx.commit()
            .map_err(|e| GradeError::persistence("committing transaction", e))?;
        Ok(out)
    }
}
