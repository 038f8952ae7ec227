//! Token types shared by the lexer, the converter and the evaluator.

use std::fmt;

// =============================================================================
// Brackets
// =============================================================================

/// The three bracket families. They nest freely but never close each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BracketKind {
    Paren,
    Square,
    Curly,
}

impl BracketKind {
    /// Classify an opening bracket character.
    pub fn from_open(c: char) -> Option<Self> {
        match c {
            '(' => Some(BracketKind::Paren),
            '[' => Some(BracketKind::Square),
            '{' => Some(BracketKind::Curly),
            _ => None,
        }
    }

    /// Classify a closing bracket character.
    pub fn from_close(c: char) -> Option<Self> {
        match c {
            ')' => Some(BracketKind::Paren),
            ']' => Some(BracketKind::Square),
            '}' => Some(BracketKind::Curly),
            _ => None,
        }
    }

    pub fn open_char(&self) -> char {
        match self {
            BracketKind::Paren => '(',
            BracketKind::Square => '[',
            BracketKind::Curly => '{',
        }
    }

    pub fn close_char(&self) -> char {
        match self {
            BracketKind::Paren => ')',
            BracketKind::Square => ']',
            BracketKind::Curly => '}',
        }
    }
}

// =============================================================================
// Operators
// =============================================================================

/// Operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

/// Arithmetic operators, binary and prefix-unary.
///
/// Unary minus and plus are tagged `~` and `#` so an RPN program never has
/// to guess whether a `-` takes one operand or two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Pos,
}

impl Operator {
    /// Binding strength; higher binds tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            Operator::Add | Operator::Sub => 1,
            Operator::Mul | Operator::Div => 2,
            Operator::Neg | Operator::Pos => 3,
            Operator::Pow => 4,
        }
    }

    pub fn associativity(&self) -> Associativity {
        match self {
            Operator::Pow => Associativity::Right,
            _ => Associativity::Left,
        }
    }

    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::Neg | Operator::Pos)
    }

    /// Number of operands consumed during evaluation.
    pub fn arity(&self) -> usize {
        if self.is_unary() {
            1
        } else {
            2
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Sub => '-',
            Operator::Mul => '*',
            Operator::Div => '/',
            Operator::Pow => '^',
            Operator::Neg => '~',
            Operator::Pos => '#',
        }
    }

    /// Binary operator written with `c`, if any.
    pub fn binary_from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Operator::Add),
            '-' => Some(Operator::Sub),
            '*' => Some(Operator::Mul),
            '/' => Some(Operator::Div),
            '^' => Some(Operator::Pow),
            _ => None,
        }
    }

    /// Prefix form of `+`/`-`; every other operator has none.
    pub fn unary_form(&self) -> Option<Self> {
        match self {
            Operator::Add => Some(Operator::Pos),
            Operator::Sub => Some(Operator::Neg),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

// =============================================================================
// Tokens
// =============================================================================

/// A lexical token of an infix expression or of an RPN program.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Identifier(String),
    Operator(Operator),
    Open(BracketKind),
    Close(BracketKind),
}

impl Token {
    /// Numbers and identifiers.
    pub fn is_operand(&self) -> bool {
        matches!(self, Token::Number(_) | Token::Identifier(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Identifier(name) => write!(f, "{name}"),
            Token::Operator(op) => write!(f, "{op}"),
            Token::Open(kind) => write!(f, "{}", kind.open_char()),
            Token::Close(kind) => write!(f, "{}", kind.close_char()),
        }
    }
}

// =============================================================================
// RPN program
// =============================================================================

/// A compiled postfix program. Contains no brackets and never changes once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RpnProgram {
    tokens: Vec<Token>,
}

impl RpnProgram {
    pub(crate) fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Compare against a textual RPN token by token.
    ///
    /// Runs of whitespace in `text` count as a single separator.
    pub fn matches_text(&self, text: &str) -> bool {
        let mut theirs = text.split_whitespace();
        for token in &self.tokens {
            match theirs.next() {
                Some(t) if t == token.to_string() => {}
                _ => return false,
            }
        }
        theirs.next().is_none()
    }
}

impl fmt::Display for RpnProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}
