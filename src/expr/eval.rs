//! Stack evaluation of an [`RpnProgram`] against a binding table.

use thiserror::Error;

use super::token::{Operator, RpnProgram, Token};
use super::Bindings;

/// Why an RPN program could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("not enough operands for '{0}'")]
    InsufficientOperands(char),

    #[error("division by zero")]
    DivisionByZero,

    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("malformed program: {0}")]
    MalformedProgram(String),
}

/// Evaluate `program` with operand values taken from `bindings`.
///
/// Pure: the same program and bindings always give the same result.
pub fn evaluate(program: &RpnProgram, bindings: &Bindings) -> Result<f64, EvalError> {
    let mut stack: Vec<f64> = Vec::with_capacity(program.len());

    for token in program.tokens() {
        match token {
            Token::Number(n) => stack.push(*n),
            Token::Identifier(name) => {
                let value = bindings
                    .get(name)
                    .ok_or_else(|| EvalError::UndefinedVariable(name.clone()))?;
                stack.push(*value);
            }
            Token::Operator(op) if op.is_unary() => {
                let a = stack
                    .pop()
                    .ok_or(EvalError::InsufficientOperands(op.symbol()))?;
                stack.push(if *op == Operator::Neg { -a } else { a });
            }
            Token::Operator(op) => {
                if stack.len() < 2 {
                    return Err(EvalError::InsufficientOperands(op.symbol()));
                }
                let b = stack.pop().unwrap_or_default();
                let a = stack.pop().unwrap_or_default();
                stack.push(apply(*op, a, b)?);
            }
            Token::Open(_) | Token::Close(_) => {
                return Err(EvalError::MalformedProgram(format!(
                    "bracket '{token}' in RPN"
                )))
            }
        }
    }

    match stack.as_slice() {
        [value] => Ok(*value),
        [] => Err(EvalError::MalformedProgram("no value produced".into())),
        values => Err(EvalError::MalformedProgram(format!(
            "{} values left on the stack",
            values.len()
        ))),
    }
}

fn apply(op: Operator, a: f64, b: f64) -> Result<f64, EvalError> {
    Ok(match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mul => a * b,
        Operator::Div => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            a / b
        }
        Operator::Pow => a.powf(b),
        Operator::Neg => -b,
        Operator::Pos => b,
    })
}

/// Significant digits kept by [`format_value`].
const SIGNIFICANT_DIGITS: i32 = 10;

/// Render a result with at most ten significant digits and no trailing zeros.
///
/// `11.0` becomes `"11"`, `1.0 / 3.0` becomes `"0.3333333333"`. Once rounded,
/// values whose decimal exponent is below -4 or at least 10 switch to exponent
/// form (`1.23456789e14`), like printf's `%.10g`.
pub fn format_value(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".into();
    }

    // Round to the kept digits first; rounding can carry into the exponent.
    let scientific = format!("{:.*e}", (SIGNIFICANT_DIGITS - 1) as usize, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = match exponent.parse() {
        Ok(exponent) => exponent,
        Err(_) => return scientific,
    };

    if !(-4..SIGNIFICANT_DIGITS).contains(&exponent) {
        return format!("{}e{}", trim_fraction(mantissa), exponent);
    }

    let decimals = (SIGNIFICANT_DIGITS - 1 - exponent) as usize;
    let text = format!("{value:.decimals$}");
    let text = trim_fraction(&text);
    if text == "-0" {
        "0".into()
    } else {
        text.to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}
