//! Daemon configuration.
//! Reads gradebookd.toml from the current directory or the path in GRADEBOOKD_CONFIG.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::{validate_formula_components, FormulaComponent, FormulaItem};

#[cfg(test)]
mod tests;

pub const CONFIG_ENV: &str = "GRADEBOOKD_CONFIG";
pub const LOG_ENV: &str = "GRADEBOOKD_LOG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub terms: TermsConfig,
    #[serde(default = "default_formula_template")]
    pub default_formula: Vec<FormulaComponent>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: WorkspaceConfig::default(),
            terms: TermsConfig::default(),
            default_formula: default_formula_template(),
            log: LogConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Opened at startup when set; otherwise the client sends `workspace.select`.
    pub path: Option<PathBuf>,
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: None,
            db_file: default_db_file(),
        }
    }
}

fn default_db_file() -> String {
    "gradebook.sqlite3".to_string()
}

/// Term labels. Formulas and grade records are keyed by `formula` labels while
/// the grade report walks `report` labels; the two sets are looked up
/// independently and a report label with no matching formula scores 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermsConfig {
    #[serde(default = "default_formula_terms")]
    pub formula: Vec<String>,
    #[serde(default = "default_report_terms")]
    pub report: Vec<String>,
}

impl Default for TermsConfig {
    fn default() -> Self {
        Self {
            formula: default_formula_terms(),
            report: default_report_terms(),
        }
    }
}

fn default_formula_terms() -> Vec<String> {
    vec!["Prelim".to_string(), "Midterm".to_string(), "Finalterm".to_string()]
}

fn default_report_terms() -> Vec<String> {
    vec!["Prelim".to_string(), "Midterm".to_string(), "Final".to_string()]
}

impl TermsConfig {
    pub fn is_formula_term(&self, term: &str) -> bool {
        self.formula.iter().any(|t| t == term)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_changes")]
    pub max_changes_per_batch: usize,
    #[serde(default = "default_max_grades")]
    pub max_grades_per_batch: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_changes_per_batch: default_max_changes(),
            max_grades_per_batch: default_max_grades(),
        }
    }
}

fn default_max_changes() -> usize {
    500
}
fn default_max_grades() -> usize {
    5000
}

fn item(name: &str, max_points: f64) -> FormulaItem {
    FormulaItem {
        name: name.to_string(),
        max_points,
    }
}

pub fn default_formula_template() -> Vec<FormulaComponent> {
    vec![
        FormulaComponent {
            component_name: "quizzes".to_string(),
            weight: 30.0,
            items: vec![item("quiz_1", 10.0), item("quiz_2", 10.0)],
        },
        FormulaComponent {
            component_name: "exams".to_string(),
            weight: 40.0,
            items: vec![item("exam", 50.0)],
        },
        FormulaComponent {
            component_name: "activities".to_string(),
            weight: 30.0,
            items: vec![item("activity_1", 20.0), item("activity_2", 20.0)],
        },
    ]
}

impl Config {
    /// Resolution order: `$GRADEBOOKD_CONFIG`, then `./gradebookd.toml`, then defaults.
    /// A `.env` file is loaded first so either variable may live there.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&p));
        }
        let local = Path::new("gradebookd.toml");
        if local.is_file() {
            return Self::from_file(local);
        }
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.terms.formula.is_empty() {
            anyhow::bail!("terms.formula must list at least one term");
        }
        if self.terms.report.is_empty() {
            anyhow::bail!("terms.report must list at least one term");
        }
        for (i, t) in self.terms.formula.iter().enumerate() {
            if t.trim().is_empty() {
                anyhow::bail!("terms.formula[{}] is empty", i);
            }
            if self.terms.formula[..i].contains(t) {
                anyhow::bail!("terms.formula lists '{}' twice", t);
            }
        }
        if self.workspace.db_file.trim().is_empty() {
            anyhow::bail!("workspace.db_file must not be empty");
        }
        validate_formula_components(&self.default_formula)
            .map_err(|e| anyhow::anyhow!("default_formula: {}", e))?;
        Ok(())
    }

    /// `GRADEBOOKD_LOG` wins over the configured filter.
    pub fn log_filter(&self) -> String {
        std::env::var(LOG_ENV).unwrap_or_else(|_| self.log.filter.clone())
    }
}
