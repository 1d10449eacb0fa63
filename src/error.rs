use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GradeError>;

#[derive(Debug, Error)]
pub enum GradeError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{context}: {cause}")]
    Persistence { context: String, cause: String },
}

impl GradeError {
    pub fn validation(message: impl Into<String>) -> Self {
        GradeError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        GradeError::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        GradeError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        GradeError::Conflict(message.into())
    }

    pub fn persistence(context: impl Into<String>, cause: impl ToString) -> Self {
        GradeError::Persistence {
            context: context.into(),
            cause: cause.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GradeError::Validation { .. } => "bad_params",
            GradeError::NotFound(_) => "not_found",
            GradeError::Conflict(_) => "conflict",
            GradeError::Persistence { .. } => "db_error",
        }
    }

    /// HTTP-equivalent status reported alongside the error code.
    pub fn status(&self) -> u16 {
        match self {
            GradeError::Validation { .. } => 400,
            GradeError::NotFound(_) => 404,
            GradeError::Conflict(_) => 409,
            GradeError::Persistence { .. } => 500,
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            GradeError::Validation { details, .. } => details.clone(),
            GradeError::Persistence { context, cause } => {
                Some(json!({ "context": context, "cause": cause }))
            }
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for GradeError {
    fn from(err: rusqlite::Error) -> Self {
        GradeError::persistence("database error", err)
    }
}

impl From<serde_json::Error> for GradeError {
    fn from(err: serde_json::Error) -> Self {
        GradeError::persistence("document encoding error", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(GradeError::validation("x").status(), 400);
        assert_eq!(GradeError::not_found("x").status(), 404);
        assert_eq!(GradeError::conflict("x").status(), 409);
        assert_eq!(GradeError::persistence("ctx", "boom").status(), 500);
        assert_eq!(GradeError::persistence("ctx", "boom").code(), "db_error");
    }

    #[test]
    fn persistence_details_carry_cause() {
        let e = GradeError::persistence("saving formula", "disk I/O error");
        let d = e.details().expect("details");
        assert_eq!(d["cause"], "disk I/O error");
        assert_eq!(e.to_string(), "saving formula: disk I/O error");
    }
}
