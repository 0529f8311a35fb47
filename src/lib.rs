//! Compile textual expressions into typed expression trees and evaluate
//! them against named parameter bindings.
//!
//! The pipeline is `text → Scanner → tokens → Parser → Expr → Evaluator → Value`.
//!
//! ```
//! use exprtree::{Bindings, Value};
//!
//! let bindings = Bindings::new().with("a", 10i64).with("b", 2i64);
//! let value = exprtree::evaluate_str("a + b * 30 + 5 - 20 - 900", &bindings).unwrap();
//! assert_eq!(value, Value::I64(-845));
//! ```

use miette::Diagnostic;
use thiserror::Error;

pub mod eval;
pub mod lex;
pub mod parse;
pub mod tree;
pub mod value;

pub use eval::{EvalError, Evaluator, evaluate};
pub use lex::{LexError, Scanner, Token, TokenKind, scan};
pub use parse::{BindMode, ParseError, Parser, check_parens, parse, tokenize};
pub use tree::{BinaryOp, Expr, MAX_DEPTH, Node, NodeType, TypeError, UnaryOp};
pub use value::{Bindings, Kind, Value};

/// Any failure of the parse-then-evaluate round trip.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),
}

/// Parse `source` with `mode`, binding identifiers from `bindings`.
pub fn compile(source: &str, bindings: &Bindings, mode: BindMode) -> Result<Expr, ParseError> {
    Parser::new(source)?
        .with_bindings(bindings)
        .with_mode(mode)
        .parse()
}

/// Parse and evaluate `source` in one go.
pub fn evaluate_str(source: &str, bindings: &Bindings) -> Result<Value, Error> {
    let expr = parse(source, bindings)?;
    Ok(Evaluator::with_bindings(bindings).evaluate(&expr)?)
}
