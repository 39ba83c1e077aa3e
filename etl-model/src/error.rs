//! FILENAME: etl-model/src/error.rs
//! PURPOSE: Error type shared by the model and the engine.
//! CONTEXT: Errors fall into three classes. Fixable errors carry a structured
//! `Fix` payload the UI can present; invalid-state errors are logged and
//! recovered where a safe default exists; design errors mean a caller broke a
//! precondition and are always fatal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::span::Span;

pub type EtlResult<T> = Result<T, EtlError>;

/// The three ways an engine error is handled by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    Fixable,
    InvalidState,
    Design,
}

/// Structured correction hint attached to a fixable error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    /// The field the user was editing.
    pub field: String,
    /// The name that caused the conflict, if any.
    pub conflicts_with: Option<String>,
    /// The file the conflict was found in, if any.
    pub filename: Option<String>,
    /// A replacement name that would not conflict.
    pub suggestion: Option<String>,
}

impl Fix {
    pub fn for_field(field: impl Into<String>) -> Self {
        Fix {
            field: field.into(),
            ..Fix::default()
        }
    }

    pub fn conflicts_with(mut self, name: impl Into<String>) -> Self {
        self.conflicts_with = Some(name.into());
        self
    }

    pub fn in_file(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn suggest(mut self, name: impl Into<String>) -> Self {
        self.suggestion = Some(name.into());
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EtlError {
    #[error("{message}")]
    Fixable { message: String, fix: Box<Fix> },

    #[error("Reduced span cannot take part in set operations: {0:?}")]
    ReducedSpan(Span),

    #[error("No enabled files to pivot")]
    NoEnabledFiles,

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid edit for '{key}': {reason}")]
    InvalidEdit { key: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Design error: {0}")]
    Design(String),
}

impl EtlError {
    pub fn fixable(message: impl Into<String>, fix: Fix) -> Self {
        EtlError::Fixable {
            message: message.into(),
            fix: Box::new(fix),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            EtlError::Fixable { .. } => ErrorClass::Fixable,
            EtlError::Design(_) => ErrorClass::Design,
            EtlError::ReducedSpan(_)
            | EtlError::NoEnabledFiles
            | EtlError::MissingField(_)
            | EtlError::UnknownField(_)
            | EtlError::InvalidState(_)
            | EtlError::InvalidEdit { .. }
            | EtlError::Config(_) => ErrorClass::InvalidState,
        }
    }

    pub fn is_fixable(&self) -> bool {
        self.class() == ErrorClass::Fixable
    }

    /// The fix payload, when this is a fixable error.
    pub fn fix(&self) -> Option<&Fix> {
        match self {
            EtlError::Fixable { fix, .. } => Some(fix),
            _ => None,
        }
    }
}

/// First `<base>_<n>` (n >= 1) for which `taken` returns false.
pub fn suggest_free_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut n = 1;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
