//! Shunting-yard conversion from validated infix tokens to an [`RpnProgram`].
//!
//! Rules:
//! - operands go straight to the output;
//! - an opening bracket is pushed onto the operator stack;
//! - a closing bracket pops operators until the opening bracket of the same
//!   kind, which is discarded;
//! - a binary operator first pops every stacked operator that binds at least
//!   as tightly (strictly tighter for the right-associative `^`), stopping at
//!   a bracket;
//! - a prefix unary operator is pushed without popping, since nothing to its
//!   left belongs to it;
//! - whatever remains on the stack is flushed at the end.
//!
//! The lexer already guarantees balance, so every error here means the token
//! stream did not come from [`super::lexer::tokenize`].

use thiserror::Error;

use super::token::{Associativity, BracketKind, Operator, RpnProgram, Token};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("closing '{}' without a matching opening bracket", .0.close_char())]
    UnmatchedClose(BracketKind),

    #[error("closing '{}' does not match opening '{}'", .found.close_char(), .open.open_char())]
    MismatchedClose { open: BracketKind, found: BracketKind },

    #[error("opening '{}' is never closed", .0.open_char())]
    UnclosedBracket(BracketKind),

    #[error("expression produced no output")]
    Empty,
}

/// Entries of the operator stack.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Op(Operator),
    Bracket(BracketKind),
}

/// Convert infix tokens to postfix order.
pub fn to_rpn(tokens: &[Token]) -> Result<RpnProgram, ConvertError> {
    let mut output: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Pending> = Vec::new();

    for token in tokens {
        match token {
            Token::Number(_) | Token::Identifier(_) => output.push(token.clone()),

            Token::Open(kind) => stack.push(Pending::Bracket(*kind)),

            Token::Close(kind) => loop {
                match stack.pop() {
                    Some(Pending::Op(op)) => output.push(Token::Operator(op)),
                    Some(Pending::Bracket(open)) if open == *kind => break,
                    Some(Pending::Bracket(open)) => {
                        return Err(ConvertError::MismatchedClose { open, found: *kind })
                    }
                    None => return Err(ConvertError::UnmatchedClose(*kind)),
                }
            },

            Token::Operator(op) if op.is_unary() => stack.push(Pending::Op(*op)),

            Token::Operator(op) => {
                while let Some(Pending::Op(top)) = stack.last() {
                    if !pops_before(*top, *op) {
                        break;
                    }
                    output.push(Token::Operator(*top));
                    stack.pop();
                }
                stack.push(Pending::Op(*op));
            }
        }
    }

    while let Some(pending) = stack.pop() {
        match pending {
            Pending::Op(op) => output.push(Token::Operator(op)),
            Pending::Bracket(kind) => return Err(ConvertError::UnclosedBracket(kind)),
        }
    }

    if output.is_empty() {
        return Err(ConvertError::Empty);
    }
    Ok(RpnProgram::new(output))
}

/// Whether the stacked `top` must be emitted before pushing `incoming`.
fn pops_before(top: Operator, incoming: Operator) -> bool {
    match incoming.associativity() {
        Associativity::Left => top.precedence() >= incoming.precedence(),
        Associativity::Right => top.precedence() > incoming.precedence(),
    }
}
