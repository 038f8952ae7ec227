//! Tokenizer and syntax validator.
//!
//! A single left-to-right pass turns the expression text into [`Token`]s while
//! checking everything that can be decided from the previous significant
//! token and the stack of open brackets. Malformed input is rejected here
//! with the character position of the fault, so the converter only ever sees
//! well-formed streams.

use std::collections::BTreeSet;

use thiserror::Error;

use super::token::{BracketKind, Operator, Token};
use super::CompileOptions;

/// What went wrong while tokenizing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyntaxErrorKind {
    #[error("empty expression")]
    EmptyExpression,

    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),

    #[error("missing operator")]
    MissingOperator,

    #[error("missing operand")]
    MissingOperand,

    #[error("two operators in a row")]
    ConsecutiveOperators,

    #[error("operator '{0}' needs a left operand")]
    InvalidUnary(char),

    #[error("expression ends with an operator")]
    TrailingOperator,

    #[error("unmatched closing bracket '{0}'")]
    UnmatchedClose(char),

    #[error("expected '{expected}' but found '{found}'")]
    MismatchedBracket { expected: char, found: char },

    #[error("empty brackets")]
    EmptyBrackets,

    #[error("bracket '{open}' opened at position {opened_at} is never closed")]
    UnclosedBracket { open: char, opened_at: usize },

    #[error("decimal point must be followed by a digit")]
    DanglingDecimalPoint,

    #[error("number has more than one decimal point")]
    RepeatedDecimalPoint,

    #[error("invalid number '{0}'")]
    InvalidNumber(String),
}

/// A syntax error with the 0-based character position it was detected at.
///
/// Errors about unclosed brackets point one past the last character.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} at position {position}")]
pub struct SyntaxError {
    pub position: usize,
    pub kind: SyntaxErrorKind,
}

impl SyntaxError {
    fn new(position: usize, kind: SyntaxErrorKind) -> Self {
        Self { position, kind }
    }
}

/// Validated tokens plus the identifiers they reference.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
    identifiers: BTreeSet<String>,
}

impl TokenStream {
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Every identifier the expression mentions, sorted.
    pub fn identifiers(&self) -> &BTreeSet<String> {
        &self.identifiers
    }

    pub fn into_parts(self) -> (Vec<Token>, BTreeSet<String>) {
        (self.tokens, self.identifiers)
    }
}

/// The last significant thing seen, which decides what may come next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    Operand,
    Operator(usize),
    Open,
    Close,
}

/// Tokenize and validate `input`.
///
/// # Errors
///
/// Returns the first [`SyntaxError`] found scanning left to right; an unclosed
/// bracket is only known at the end and is reported at `input.chars().count()`.
pub fn tokenize(input: &str, options: &CompileOptions) -> Result<TokenStream, SyntaxError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut identifiers = BTreeSet::new();
    let mut open: Vec<(BracketKind, usize)> = Vec::new();
    let mut prev = Prev::Start;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            if matches!(prev, Prev::Operand | Prev::Close) {
                return Err(SyntaxError::new(i, SyntaxErrorKind::MissingOperator));
            }
            let (value, end) = scan_number(&chars, i)?;
            tokens.push(Token::Number(value));
            prev = Prev::Operand;
            i = end;
            continue;
        }

        if c.is_alphabetic() {
            if matches!(prev, Prev::Operand | Prev::Close) {
                return Err(SyntaxError::new(i, SyntaxErrorKind::MissingOperator));
            }
            let start = i;
            while i < chars.len() && chars[i].is_alphanumeric() {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            identifiers.insert(name.clone());
            tokens.push(Token::Identifier(name));
            prev = Prev::Operand;
            continue;
        }

        if let Some(kind) = BracketKind::from_open(c) {
            if matches!(prev, Prev::Operand | Prev::Close) {
                return Err(SyntaxError::new(i, SyntaxErrorKind::MissingOperator));
            }
            open.push((kind, i));
            tokens.push(Token::Open(kind));
            prev = Prev::Open;
            i += 1;
            continue;
        }

        if let Some(kind) = BracketKind::from_close(c) {
            let (top, _) = *open
                .last()
                .ok_or_else(|| SyntaxError::new(i, SyntaxErrorKind::UnmatchedClose(c)))?;
            if top != kind {
                return Err(SyntaxError::new(
                    i,
                    SyntaxErrorKind::MismatchedBracket {
                        expected: top.close_char(),
                        found: c,
                    },
                ));
            }
            match prev {
                Prev::Open => return Err(SyntaxError::new(i, SyntaxErrorKind::EmptyBrackets)),
                Prev::Operator(_) => {
                    return Err(SyntaxError::new(i, SyntaxErrorKind::MissingOperand))
                }
                _ => {}
            }
            open.pop();
            tokens.push(Token::Close(kind));
            prev = Prev::Close;
            i += 1;
            continue;
        }

        let binary = Operator::binary_from_char(c)
            .filter(|op| *op != Operator::Pow || options.allow_power);
        if let Some(op) = binary {
            let op = match prev {
                Prev::Operand | Prev::Close => op,
                Prev::Start | Prev::Open | Prev::Operator(_) => match op.unary_form() {
                    Some(unary) => unary,
                    None if matches!(prev, Prev::Operator(_)) => {
                        return Err(SyntaxError::new(i, SyntaxErrorKind::ConsecutiveOperators))
                    }
                    None => return Err(SyntaxError::new(i, SyntaxErrorKind::InvalidUnary(c))),
                },
            };
            tokens.push(Token::Operator(op));
            prev = Prev::Operator(i);
            i += 1;
            continue;
        }

        return Err(SyntaxError::new(i, SyntaxErrorKind::UnexpectedCharacter(c)));
    }

    match prev {
        Prev::Start => return Err(SyntaxError::new(0, SyntaxErrorKind::EmptyExpression)),
        Prev::Operator(at) => return Err(SyntaxError::new(at, SyntaxErrorKind::TrailingOperator)),
        _ => {}
    }

    if let Some(&(kind, opened_at)) = open.last() {
        return Err(SyntaxError::new(
            chars.len(),
            SyntaxErrorKind::UnclosedBracket {
                open: kind.open_char(),
                opened_at,
            },
        ));
    }

    Ok(TokenStream {
        tokens,
        identifiers,
    })
}

/// Scan a numeric literal starting at `start`; returns the value and the index after it.
///
/// `,` is accepted as a decimal separator and treated like `.`.
fn scan_number(chars: &[char], start: usize) -> Result<(f64, usize), SyntaxError> {
    let mut end = start;
    let mut seen_point = false;

    while end < chars.len() {
        let c = chars[end];
        if c.is_ascii_digit() {
            end += 1;
        } else if c == '.' || c == ',' {
            if seen_point {
                return Err(SyntaxError::new(end, SyntaxErrorKind::RepeatedDecimalPoint));
            }
            if !chars.get(end + 1).is_some_and(|d| d.is_ascii_digit()) {
                return Err(SyntaxError::new(end, SyntaxErrorKind::DanglingDecimalPoint));
            }
            seen_point = true;
            end += 1;
        } else {
            break;
        }
    }

    let text: String = chars[start..end]
        .iter()
        .map(|&c| if c == ',' { '.' } else { c })
        .collect();
    let value = text
        .parse::<f64>()
        .map_err(|_| SyntaxError::new(start, SyntaxErrorKind::InvalidNumber(text.clone())))?;
    Ok((value, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex(input: &str) -> Result<Vec<Token>, SyntaxError> {
        tokenize(input, &CompileOptions::default()).map(|s| s.into_parts().0)
    }

    fn err(input: &str) -> SyntaxError {
        lex(input).expect_err("expected a syntax error")
    }

    #[test]
    fn test_simple_expression() {
        assert_eq!(
            lex("3+4*2").unwrap(),
            vec![
                Token::Number(3.0),
                Token::Operator(Operator::Add),
                Token::Number(4.0),
                Token::Operator(Operator::Mul),
                Token::Number(2.0),
            ]
        );
    }

    #[test]
    fn test_unary_operators_are_tagged() {
        assert_eq!(
            lex("-5+(+x)").unwrap(),
            vec![
                Token::Operator(Operator::Neg),
                Token::Number(5.0),
                Token::Operator(Operator::Add),
                Token::Open(BracketKind::Paren),
                Token::Operator(Operator::Pos),
                Token::Identifier("x".into()),
                Token::Close(BracketKind::Paren),
            ]
        );
        // unary after a binary operator, and stacked unary signs
        assert_eq!(
            lex("2*-3").unwrap()[2],
            Token::Operator(Operator::Neg)
        );
        assert_eq!(
            lex("--1").unwrap()[..2].to_vec(),
            vec![Token::Operator(Operator::Neg), Token::Operator(Operator::Neg)]
        );
    }

    #[test]
    fn test_numbers_and_identifiers() {
        let stream = tokenize("alpha2 * 1.25 + .5 - 3,75 + beta", &CompileOptions::default())
            .unwrap();
        assert_eq!(stream.tokens()[2], Token::Number(1.25));
        assert_eq!(stream.tokens()[4], Token::Number(0.5));
        assert_eq!(stream.tokens()[6], Token::Number(3.75));
        let names: Vec<&str> = stream.identifiers().iter().map(String::as_str).collect();
        assert_eq!(names, vec!["alpha2", "beta"]);
    }

    #[test]
    fn test_whitespace_is_ignored() {
        assert_eq!(lex(" 1 +\t2 ").unwrap(), lex("1+2").unwrap());
    }

    #[test]
    fn test_unclosed_bracket_reported_at_end() {
        let e = err("(1+2");
        assert_eq!(e.position, 4);
        assert_eq!(
            e.kind,
            SyntaxErrorKind::UnclosedBracket {
                open: '(',
                opened_at: 0
            }
        );
    }

    #[test]
    fn test_stray_close_reported_at_bracket() {
        let e = err("1+2)");
        assert_eq!(e.position, 3);
        assert_eq!(e.kind, SyntaxErrorKind::UnmatchedClose(')'));
    }

    #[test]
    fn test_mismatched_bracket_kind() {
        let e = err("[1+2)");
        assert_eq!(e.position, 4);
        assert_eq!(
            e.kind,
            SyntaxErrorKind::MismatchedBracket {
                expected: ']',
                found: ')'
            }
        );
        assert_eq!(err("{(1]").position, 3);
    }

    #[test]
    fn test_empty_brackets() {
        for input in ["()", "1+[]", "{}*2"] {
            assert_eq!(err(input).kind, SyntaxErrorKind::EmptyBrackets, "{input}");
        }
    }

    #[test]
    fn test_missing_operator() {
        assert_eq!(err("2(3)").kind, SyntaxErrorKind::MissingOperator);
        assert_eq!(err("(1)(2)").position, 3);
        assert_eq!(err("(1)2").position, 3);
        assert_eq!(err("1 2").position, 2);
        assert_eq!(err("2x").position, 1);
    }

    #[test]
    fn test_operator_placement() {
        assert_eq!(err("1+*2").kind, SyntaxErrorKind::ConsecutiveOperators);
        assert_eq!(err("*2").kind, SyntaxErrorKind::InvalidUnary('*'));
        assert_eq!(err("(/2)").kind, SyntaxErrorKind::InvalidUnary('/'));
        let trailing = err("1+2-");
        assert_eq!(trailing.kind, SyntaxErrorKind::TrailingOperator);
        assert_eq!(trailing.position, 3);
        assert_eq!(err("(1+)").kind, SyntaxErrorKind::MissingOperand);
    }

    #[test]
    fn test_decimal_point_rules() {
        assert_eq!(err("1.+2").kind, SyntaxErrorKind::DanglingDecimalPoint);
        assert_eq!(err("3.").position, 1);
        assert_eq!(err("1.2.3").kind, SyntaxErrorKind::RepeatedDecimalPoint);
        assert_eq!(err("x+.").kind, SyntaxErrorKind::DanglingDecimalPoint);
    }

    #[test]
    fn test_unexpected_characters() {
        assert_eq!(err("1%2").kind, SyntaxErrorKind::UnexpectedCharacter('%'));
        assert_eq!(err("a_b").kind, SyntaxErrorKind::UnexpectedCharacter('_'));
        assert_eq!(err("").kind, SyntaxErrorKind::EmptyExpression);
        assert_eq!(err("   ").kind, SyntaxErrorKind::EmptyExpression);
    }

    #[test]
    fn test_power_requires_flag() {
        assert_eq!(err("2^3").kind, SyntaxErrorKind::UnexpectedCharacter('^'));
        let options = CompileOptions { allow_power: true };
        let tokens = tokenize("2^-3", &options).unwrap().into_parts().0;
        assert_eq!(tokens[1], Token::Operator(Operator::Pow));
        assert_eq!(tokens[2], Token::Operator(Operator::Neg));
        assert_eq!(
            tokenize("^2", &options).unwrap_err().kind,
            SyntaxErrorKind::InvalidUnary('^')
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(err("1+2)").to_string(), "unmatched closing bracket ')' at position 3");
    }
}
