use proptest::prelude::*;

use exprcalc::expr::{compile, evaluate, Bindings, CompileOptions, EvalError};
use exprcalc::protocol::{ClientMessage, ServerMessage, Session};

const NAMES: [&str; 4] = ["a", "b", "x", "y1"];

/// Expression tree used to generate inputs with a known value.
#[derive(Debug, Clone)]
enum Tree {
    Num(u8),
    Var(usize),
    Neg(Box<Tree>),
    Bin(char, Box<Tree>, Box<Tree>, usize),
}

fn tree() -> impl Strategy<Value = Tree> {
    let leaf = prop_oneof![
        any::<u8>().prop_map(Tree::Num),
        (0..NAMES.len()).prop_map(Tree::Var),
    ];
    leaf.prop_recursive(5, 32, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(|t| Tree::Neg(Box::new(t))),
            (
                prop::sample::select(vec!['+', '-', '*', '/']),
                inner.clone(),
                inner,
                0usize..3,
            )
                .prop_map(|(op, l, r, bracket)| Tree::Bin(op, Box::new(l), Box::new(r), bracket)),
        ]
    })
}

/// Render with every binary node bracketed, joining tokens with `sep`.
fn render(tree: &Tree, sep: &str) -> String {
    match tree {
        Tree::Num(n) => n.to_string(),
        Tree::Var(i) => NAMES[*i].to_string(),
        Tree::Neg(t) => format!("-{sep}{}", render(t, sep)),
        Tree::Bin(op, l, r, bracket) => {
            let (open, close) = [('(', ')'), ('[', ']'), ('{', '}')][*bracket];
            format!(
                "{open}{sep}{}{sep}{op}{sep}{}{sep}{close}",
                render(l, sep),
                render(r, sep)
            )
        }
    }
}

fn precedence(op: char) -> u8 {
    match op {
        '+' | '-' => 1,
        _ => 2,
    }
}

/// Render with only the brackets precedence requires. A right operand of
/// equal precedence keeps its brackets even for `+` and `*`, since float
/// addition and multiplication are not associative.
fn render_minimal(tree: &Tree) -> String {
    match tree {
        Tree::Num(_) | Tree::Var(_) => render(tree, ""),
        Tree::Neg(t) => match t.as_ref() {
            Tree::Bin(..) => format!("-({})", render_minimal(t)),
            _ => format!("-{}", render_minimal(t)),
        },
        Tree::Bin(op, l, r, _) => {
            let operand = |child: &Tree, needs: fn(u8, u8) -> bool| match child {
                Tree::Bin(inner, ..) if needs(precedence(*inner), precedence(*op)) => {
                    format!("({})", render_minimal(child))
                }
                _ => render_minimal(child),
            };
            format!(
                "{}{op}{}",
                operand(l, |inner, outer| inner < outer),
                operand(r, |inner, outer| inner <= outer)
            )
        }
    }
}

fn reference(tree: &Tree, bindings: &Bindings) -> Result<f64, EvalError> {
    Ok(match tree {
        Tree::Num(n) => f64::from(*n),
        Tree::Var(i) => bindings[NAMES[*i]],
        Tree::Neg(t) => -reference(t, bindings)?,
        Tree::Bin(op, l, r, _) => {
            let a = reference(l, bindings)?;
            let b = reference(r, bindings)?;
            match op {
                '+' => a + b,
                '-' => a - b,
                '*' => a * b,
                _ => {
                    if b == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    a / b
                }
            }
        }
    })
}

fn bindings_strategy() -> impl Strategy<Value = Bindings> {
    prop::collection::vec(-50i32..50, NAMES.len()).prop_map(|values| {
        NAMES
            .iter()
            .zip(values)
            .map(|(name, v)| (name.to_string(), f64::from(v) / 4.0))
            .collect()
    })
}

proptest! {
    /// Compiling and evaluating agrees with a direct walk of the tree.
    #[test]
    fn compiled_value_matches_tree(t in tree(), bindings in bindings_strategy()) {
        let text = render(&t, "");
        let compiled = compile(&text, &CompileOptions::default())
            .unwrap_or_else(|e| panic!("{text:?} failed to compile: {e}"));
        prop_assert_eq!(evaluate(compiled.program(), &bindings), reference(&t, &bindings));
    }

    /// Leaving out redundant brackets keeps precedence and left
    /// associativity intact.
    #[test]
    fn minimal_brackets_keep_precedence(t in tree(), bindings in bindings_strategy()) {
        let options = CompileOptions::default();
        let text = render_minimal(&t);
        let compiled = compile(&text, &options)
            .unwrap_or_else(|e| panic!("{text:?} failed to compile: {e}"));
        let bracketed = compile(&render(&t, ""), &options).unwrap();
        prop_assert_eq!(compiled.program(), bracketed.program());
        prop_assert_eq!(evaluate(compiled.program(), &bindings), reference(&t, &bindings));
    }

    /// Whitespace between tokens never changes the RPN.
    #[test]
    fn whitespace_is_insignificant(t in tree()) {
        let options = CompileOptions::default();
        let tight = compile(&render(&t, ""), &options).unwrap();
        let spaced = compile(&render(&t, "  "), &options).unwrap();
        prop_assert_eq!(tight.program(), spaced.program());
        prop_assert!(tight.program().matches_text(&spaced.program().to_string()));
    }

    /// Arbitrary input yields Ok or Err, never a panic.
    #[test]
    fn compile_does_not_panic(s in "\\PC*") {
        let _ = compile(&s, &CompileOptions { allow_power: true });
    }

    /// However the bytes are split, the session answers the same way.
    #[test]
    fn session_ignores_chunk_boundaries(t in tree(), bindings in bindings_strategy(), cut in 0usize..512) {
        let text = render(&t, "");
        let rpn = compile(&text, &CompileOptions::default()).unwrap().program().to_string();

        let mut bytes = ClientMessage::ExpressionSubmission {
            expression: text,
            client_rpn: rpn,
        }
        .encode()
        .unwrap();
        bytes.extend(ClientMessage::CoefficientsSubmission { bindings }.encode().unwrap());

        let mut whole = Session::new(CompileOptions::default());
        let expected = whole.feed(&bytes).replies;

        let cut = cut.min(bytes.len());
        let mut split = Session::new(CompileOptions::default());
        let mut replies = split.feed(&bytes[..cut]).replies;
        replies.extend(split.feed(&bytes[cut..]).replies);

        prop_assert_eq!(replies.len(), 2);
        prop_assert_eq!(&replies[0], &ServerMessage::RpnMatchRequestCoefficients);
        prop_assert_eq!(replies, expected);
    }
}
