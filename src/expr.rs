//! Expression compilation pipeline.
//!
//! ```text
//! "(a+2)*[b-1]"  ──tokenize──►  ( a + 2 ) * [ b - 1 ]  ──to_rpn──►  a 2 + b 1 - *  ──evaluate──►  f64
//! ```
//!
//! - [`lexer`]   : tokenizer and syntax validator (positions for every error)
//! - [`convert`] : shunting-yard conversion to postfix
//! - [`eval`]    : stack evaluation against a binding table
//! - [`token`]   : tokens, operator table and the [`RpnProgram`] value
//!
//! Client and server run the same [`compile`] so that the RPN a client
//! reports can be checked against the server's own.
//!
//! # Usage
//!
//! ```ignore
//! use exprcalc::expr::{compile, evaluate, Bindings, CompileOptions};
//!
//! let compiled = compile("x*(y+1)", &CompileOptions::default())?;
//! assert_eq!(compiled.program().to_string(), "x y 1 + *");
//!
//! let bindings: Bindings = [("x".to_string(), 2.0), ("y".to_string(), 4.0)].into();
//! assert_eq!(evaluate(compiled.program(), &bindings)?, 10.0);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

pub mod convert;
pub mod eval;
pub mod lexer;
pub mod token;

pub use convert::{to_rpn, ConvertError};
pub use eval::{evaluate, format_value, EvalError};
pub use lexer::{tokenize, SyntaxError, SyntaxErrorKind, TokenStream};
pub use token::{Associativity, BracketKind, Operator, RpnProgram, Token};

/// Operand values keyed by identifier name (case-sensitive).
pub type Bindings = BTreeMap<String, f64>;

/// Dialect switches shared by client and server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Accept the right-associative `^` operator.
    pub allow_power: bool,
}

/// Failure to turn expression text into an RPN program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("conversion error: {0}")]
    Convert(#[from] ConvertError),
}

/// A compiled expression: the RPN program and the identifiers it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    program: RpnProgram,
    identifiers: BTreeSet<String>,
}

impl Compiled {
    pub fn program(&self) -> &RpnProgram {
        &self.program
    }

    pub fn identifiers(&self) -> &BTreeSet<String> {
        &self.identifiers
    }

    pub fn into_program(self) -> RpnProgram {
        self.program
    }
}

/// Tokenize, validate and convert `input`.
pub fn compile(input: &str, options: &CompileOptions) -> Result<Compiled, CompileError> {
    let (tokens, identifiers) = tokenize(input, options)?.into_parts();
    let program = to_rpn(&tokens)?;
    Ok(Compiled {
        program,
        identifiers,
    })
}
