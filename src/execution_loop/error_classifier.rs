//! Error Classifier
//!
//! Labels database rejections for logging and attempt reports. The label
//! never changes the retry policy; the raw message is what the model sees.

use crate::db::ExecutionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL error classification taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    SyntaxError,
    TableNotFound,
    ColumnNotFound,
    AmbiguousColumn,
    TypeMismatch,
    PermissionDenied,
    Other(String),
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlErrorClass::SyntaxError => write!(f, "SyntaxError"),
            SqlErrorClass::TableNotFound => write!(f, "TableNotFound"),
            SqlErrorClass::ColumnNotFound => write!(f, "ColumnNotFound"),
            SqlErrorClass::AmbiguousColumn => write!(f, "AmbiguousColumn"),
            SqlErrorClass::TypeMismatch => write!(f, "TypeMismatch"),
            SqlErrorClass::PermissionDenied => write!(f, "PermissionDenied"),
            SqlErrorClass::Other(code) => write!(f, "Other({})", code),
        }
    }
}

/// Error classifier
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify by SQLSTATE when present, otherwise by message text.
    pub fn classify(&self, error: &ExecutionError) -> SqlErrorClass {
        if let Some(class) = error.code.as_deref().and_then(classify_sqlstate) {
            return class;
        }

        let error_msg = error.message.to_lowercase();

        if error_msg.contains("syntax error") {
            return SqlErrorClass::SyntaxError;
        }

        if error_msg.contains("ambiguous") && error_msg.contains("column") {
            return SqlErrorClass::AmbiguousColumn;
        }

        if error_msg.contains("column")
            && (error_msg.contains("not found") || error_msg.contains("does not exist"))
        {
            return SqlErrorClass::ColumnNotFound;
        }

        if (error_msg.contains("relation") || error_msg.contains("table"))
            && (error_msg.contains("not found") || error_msg.contains("does not exist"))
        {
            return SqlErrorClass::TableNotFound;
        }

        if error_msg.contains("operator does not exist")
            || error_msg.contains("invalid input syntax")
            || error_msg.contains("is of type")
        {
            return SqlErrorClass::TypeMismatch;
        }

        if error_msg.contains("permission denied") {
            return SqlErrorClass::PermissionDenied;
        }

        SqlErrorClass::Other(error.code.clone().unwrap_or_else(|| "unknown".to_string()))
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_sqlstate(code: &str) -> Option<SqlErrorClass> {
    match code {
        "42601" => Some(SqlErrorClass::SyntaxError),
        "42P01" => Some(SqlErrorClass::TableNotFound),
        "42703" => Some(SqlErrorClass::ColumnNotFound),
        "42702" => Some(SqlErrorClass::AmbiguousColumn),
        "42804" | "42883" | "22P02" => Some(SqlErrorClass::TypeMismatch),
        "42501" => Some(SqlErrorClass::PermissionDenied),
        _ => None,
    }
}
