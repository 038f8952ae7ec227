//! Definitions files.
//!
//! ```text
//! (a + 2) * [b - 1]
//! a = 3
//! b = 0,5
//! ```
//!
//! The first line is the expression. Every later non-blank line binds one
//! name as `name = value`; values accept `.` or `,` as the decimal separator.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::expr::Bindings;

#[derive(Debug, Error)]
pub enum DefinitionsError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line 1: missing expression")]
    MissingExpression,

    #[error("line {line}: expected 'name = value'")]
    MissingEquals { line: usize },

    #[error("line {line}: missing operand name")]
    MissingName { line: usize },

    #[error("line {line}: operand name cannot be a number: '{name}'")]
    NumericName { line: usize, name: String },

    #[error("line {line}: '{name}' is not a valid operand name")]
    InvalidName { line: usize, name: String },

    #[error("line {line}: missing operand value")]
    MissingValue { line: usize },

    #[error("line {line}: invalid value '{value}'")]
    InvalidValue { line: usize, value: String },

    #[error("line {line}: '{name}' is already defined")]
    DuplicateName { line: usize, name: String },
}

/// An expression and its operand values.
#[derive(Debug, Clone, PartialEq)]
pub struct Definitions {
    pub expression: String,
    pub bindings: Bindings,
}

impl Definitions {
    pub fn parse(text: &str) -> Result<Self, DefinitionsError> {
        let mut lines = text.lines();
        let expression = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or(DefinitionsError::MissingExpression)?
            .to_string();

        let mut bindings = Bindings::new();
        for (index, raw) in lines.enumerate() {
            let line = index + 2;
            if raw.trim().is_empty() {
                continue;
            }
            let (name, value) = parse_binding(raw, line)?;
            if bindings.contains_key(&name) {
                return Err(DefinitionsError::DuplicateName { line, name });
            }
            bindings.insert(name, value);
        }

        Ok(Self {
            expression,
            bindings,
        })
    }

    pub fn load(path: &Path) -> Result<Self, DefinitionsError> {
        let text = std::fs::read_to_string(path).map_err(|source| DefinitionsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }
}

fn parse_binding(raw: &str, line: usize) -> Result<(String, f64), DefinitionsError> {
    let (name, value) = raw
        .split_once('=')
        .ok_or(DefinitionsError::MissingEquals { line })?;

    let name = name.trim();
    if name.is_empty() {
        return Err(DefinitionsError::MissingName { line });
    }
    if name.chars().all(|c| c.is_ascii_digit()) {
        return Err(DefinitionsError::NumericName {
            line,
            name: name.to_string(),
        });
    }
    if !is_identifier(name) {
        return Err(DefinitionsError::InvalidName {
            line,
            name: name.to_string(),
        });
    }

    let value = value.trim();
    if value.is_empty() {
        return Err(DefinitionsError::MissingValue { line });
    }
    let parsed = value
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DefinitionsError::InvalidValue {
            line,
            value: value.to_string(),
        })?;

    Ok((name.to_string(), parsed))
}

/// Same shape the expression lexer reads: a letter, then letters or digits.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(char::is_alphabetic) && chars.all(char::is_alphanumeric)
}

/// Mismatch between the names an expression uses and the names bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnosis {
    /// Bound but never referenced.
    pub unused: Vec<String>,
    /// Referenced but never bound; evaluation will fail on the first one.
    pub undefined: Vec<String>,
}

impl Diagnosis {
    pub fn is_clean(&self) -> bool {
        self.unused.is_empty() && self.undefined.is_empty()
    }
}

pub fn diagnose(identifiers: &BTreeSet<String>, bindings: &Bindings) -> Diagnosis {
    Diagnosis {
        unused: bindings
            .keys()
            .filter(|name| !identifiers.contains(*name))
            .cloned()
            .collect(),
        undefined: identifiers
            .iter()
            .filter(|name| !bindings.contains_key(*name))
            .cloned()
            .collect(),
    }
}
