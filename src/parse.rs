use std::borrow::Cow;

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;
use tracing::debug;

use crate::{
    lex::{LexError, Scanner, Token, TokenKind, scan},
    tree::{self, BinaryOp, Expr, MAX_DEPTH, TypeError},
    value::{Bindings, Value},
};

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error("invalid paren order: closed parenthesis without an open parenthesis")]
    #[diagnostic(code(exprtree::parse::invalid_paren_order))]
    InvalidParenOrder {
        #[label("nothing to close here")]
        span: SourceSpan,
    },

    #[error("unbalanced parens: {open} left open")]
    #[diagnostic(code(exprtree::parse::unbalanced_parens))]
    UnbalancedParens {
        open: usize,
        #[label("never closed")]
        span: SourceSpan,
    },

    #[error("expected {expected}, found {found}")]
    #[diagnostic(code(exprtree::parse::expected_token))]
    ExpectedToken {
        expected: TokenKind,
        found: TokenKind,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("unknown identifier: {name}")]
    #[diagnostic(
        code(exprtree::parse::unknown_identifier),
        help("bind a value for `{name}` before parsing")
    )]
    UnknownIdentifier {
        name: String,
        #[label("not bound")]
        span: SourceSpan,
    },

    #[error("expression expected, found {found}")]
    #[diagnostic(code(exprtree::parse::expression_expected))]
    ExpressionExpected {
        found: TokenKind,
        #[label("this does not start an expression")]
        span: SourceSpan,
    },

    #[error("unexpected end of expression")]
    #[diagnostic(
        code(exprtree::parse::unexpected_end),
        help("the expression ended while an operand was still expected")
    )]
    UnexpectedEnd {
        #[label("operand expected")]
        span: SourceSpan,
    },

    #[error("unexpected {found} `{text}` after the expression")]
    #[diagnostic(code(exprtree::parse::trailing_input))]
    TrailingInput {
        found: TokenKind,
        text: String,
        #[label("remove this")]
        span: SourceSpan,
    },

    #[error("invalid literal `{text}`: {reason}")]
    #[diagnostic(code(exprtree::parse::invalid_literal))]
    InvalidLiteral {
        text: String,
        reason: String,
        #[label("this literal")]
        span: SourceSpan,
    },

    #[error("{error}")]
    #[diagnostic(code(exprtree::parse::type_mismatch))]
    Type {
        error: TypeError,
        #[label("operator applied here")]
        span: SourceSpan,
    },

    #[error("expression nests deeper than {limit} levels")]
    #[diagnostic(
        code(exprtree::parse::nesting_too_deep),
        help("split the expression or remove redundant parentheses")
    )]
    NestingTooDeep {
        limit: usize,
        #[label("limit reached here")]
        span: SourceSpan,
    },

    #[error("{feature} is not implemented")]
    #[diagnostic(code(exprtree::parse::unimplemented))]
    Unimplemented {
        feature: &'static str,
        #[label("here")]
        span: SourceSpan,
    },
}

/// How identifiers found in the source are bound to the caller's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindMode {
    /// Replace the identifier with a constant holding the bound value.
    #[default]
    Inline,
    /// Keep a parameter node typed by the bound value's kind; the value is
    /// looked up again when the tree is evaluated.
    Deferred,
}

/// Precedence-climbing recursive descent parser, lowest to highest:
///
/// ```text
/// expression     := logical_or ("?" expression ":" expression)?
/// logical_or     := logical_and (("||" | "|" | "or") logical_and)*
/// logical_and    := comparison (("&&" | "&" | "and") comparison)*
/// comparison     := additive (("=" | "==" | "!=" | ">" | ">=" | "<" | "<=") additive)*
/// additive       := multiplicative (("+" | "-") multiplicative)*
/// multiplicative := unary (("*" | "/" | "%" | "mod") unary)*
/// unary          := ("-" | "!" | "+") unary | primary
/// primary        := IDENTIFIER | STRING | INTEGER | REAL | "(" expression ")"
/// ```
///
/// A parser is good for exactly one expression: [`Parser::parse`] consumes it.
///
/// Parentheses, prefix operators and conditional branches may nest at most
/// [`MAX_DEPTH`] levels, and no tree deeper than that is built.
pub struct Parser<'de> {
    scanner: Scanner<'de>,
    current: Token<'de>,
    bindings: Option<&'de Bindings>,
    mode: BindMode,
    depth: usize,
}

impl<'de> Parser<'de> {
    pub fn new(source: &'de str) -> Result<Self, ParseError> {
        let mut scanner = Scanner::new(source)?;
        let current = scanner.next_token()?;
        Ok(Parser {
            scanner,
            current,
            bindings: None,
            mode: BindMode::default(),
            depth: 0,
        })
    }

    pub fn with_bindings(mut self, bindings: &'de Bindings) -> Self {
        self.bindings = Some(bindings);
        self
    }

    pub fn with_mode(mut self, mode: BindMode) -> Self {
        self.mode = mode;
        self
    }

    #[tracing::instrument(level = "debug", skip(self), fields(source = self.scanner.source()))]
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expression()?;
        match self.current.kind {
            TokenKind::End => {}
            TokenKind::CloseParen => {
                return Err(ParseError::InvalidParenOrder {
                    span: self.current.span(),
                });
            }
            found => {
                return Err(ParseError::TrailingInput {
                    found,
                    text: self.current.text.to_string(),
                    span: self.current.span(),
                });
            }
        }
        debug!(tree = %expr, kind = %expr.kind(), "parsed expression");
        Ok(expr)
    }

    /// Move to the next token, handing back the one just passed.
    fn advance(&mut self) -> Result<Token<'de>, ParseError> {
        let next = self.scanner.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token<'de>, ParseError> {
        if self.current.kind == expected {
            return self.advance();
        }
        Err(ParseError::ExpectedToken {
            expected,
            found: self.current.kind,
            span: self.current.span(),
        })
    }

    /// Run `parse` one nesting level down, failing at `span` past the limit.
    fn nested(
        &mut self,
        span: SourceSpan,
        parse: impl FnOnce(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::NestingTooDeep {
                limit: MAX_DEPTH,
                span,
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let condition = self.parse_logical_or()?;
        if self.current.kind != TokenKind::Question {
            return Ok(condition);
        }

        let question = self.advance()?;
        let _when_true = self.nested(question.span(), Self::parse_expression)?;
        let colon = self.expect(TokenKind::Colon)?;
        let _when_false = self.nested(colon.span(), Self::parse_expression)?;

        Err(ParseError::Unimplemented {
            feature: "conditional expression",
            span: question.span(),
        })
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_logical_and()?;
        while matches!(self.current.kind, TokenKind::DoubleBar | TokenKind::Bar)
            || self.current.is_identifier("or")
        {
            let op = self.advance()?;
            let right = self.parse_logical_and()?;
            left = combine(BinaryOp::Or, &op, left, right)?;
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        while matches!(
            self.current.kind,
            TokenKind::DoubleAmpersand | TokenKind::Ampersand
        ) || self.current.is_identifier("and")
        {
            let op = self.advance()?;
            let right = self.parse_comparison()?;
            left = combine(BinaryOp::And, &op, left, right)?;
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Equal | TokenKind::DoubleEqual => BinaryOp::Equal,
                TokenKind::ExclamationEqual => BinaryOp::NotEqual,
                TokenKind::GreaterThan => BinaryOp::GreaterThan,
                TokenKind::GreaterThanEqual => BinaryOp::GreaterThanOrEqual,
                TokenKind::LessThan => BinaryOp::LessThan,
                TokenKind::LessThanEqual => BinaryOp::LessThanOrEqual,
                _ => break,
            };
            let token = self.advance()?;
            let right = self.parse_additive()?;
            left = combine(op, &token, left, right)?;
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => break,
            };
            let token = self.advance()?;
            let right = self.parse_multiplicative()?;
            left = combine(op, &token, left, right)?;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Asterisk => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Modulo,
                TokenKind::Identifier if self.current.is_identifier("mod") => BinaryOp::Modulo,
                _ => break,
            };
            let token = self.advance()?;
            let right = self.parse_unary()?;
            left = combine(op, &token, left, right)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if !matches!(
            self.current.kind,
            TokenKind::Minus | TokenKind::Exclamation | TokenKind::Plus
        ) {
            return self.parse_primary();
        }

        let op = self.advance()?;
        // `-5` is the literal -5, not Negate(5)
        if op.kind == TokenKind::Minus
            && matches!(
                self.current.kind,
                TokenKind::IntegerLiteral | TokenKind::RealLiteral
            )
        {
            return self.parse_number(Some(op));
        }

        let operand = self.nested(op.span(), Self::parse_unary)?;
        let created = match op.kind {
            TokenKind::Minus => tree::create_negate(operand),
            TokenKind::Plus => tree::create_unary_plus(operand),
            _ => tree::create_not(operand),
        };
        let expr = created.map_err(|error| ParseError::Type {
            error,
            span: op.span(),
        })?;
        bounded(expr, &op)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.current.kind {
            TokenKind::Identifier => self.parse_identifier(),
            TokenKind::StringLiteral => self.parse_string(),
            TokenKind::IntegerLiteral | TokenKind::RealLiteral => self.parse_number(None),
            TokenKind::OpenParen => self.parse_parenthesized(),
            TokenKind::End => Err(ParseError::UnexpectedEnd {
                span: self.current.span(),
            }),
            found => Err(ParseError::ExpressionExpected {
                found,
                span: self.current.span(),
            }),
        }
    }

    fn parse_identifier(&mut self) -> Result<Expr, ParseError> {
        let token = self.expect(TokenKind::Identifier)?;
        let Some(value) = self.bindings.and_then(|bindings| bindings.get(token.text)) else {
            return Err(ParseError::UnknownIdentifier {
                name: token.text.to_string(),
                span: token.span(),
            });
        };
        Ok(match self.mode {
            BindMode::Inline => tree::constant(value.clone()),
            BindMode::Deferred => tree::parameter(token.text, value.kind()),
        })
    }

    fn parse_string(&mut self) -> Result<Expr, ParseError> {
        let token = self.expect(TokenKind::StringLiteral)?;
        // the scanner only produces string tokens with both quotes present
        let inner = token
            .text
            .get(1..token.text.len().saturating_sub(1))
            .unwrap_or_default();
        Ok(tree::constant(inner))
    }

    /// Integer literals are `u64` unless a preceding minus was folded in,
    /// which makes them `i64`. Reals are always `f64`.
    fn parse_number(&mut self, minus: Option<Token<'de>>) -> Result<Expr, ParseError> {
        let token = self.advance()?;
        let (text, span) = match minus {
            Some(minus) => (
                Cow::Owned(format!("-{}", token.text)),
                SourceSpan::from(minus.position..token.position + token.text.len()),
            ),
            None => (Cow::Borrowed(token.text), token.span()),
        };

        let value = match token.kind {
            TokenKind::RealLiteral => text
                .trim_end_matches(['F', 'f'])
                .parse::<f64>()
                .map(Value::F64)
                .map_err(|e| e.to_string()),
            _ if minus.is_some() => text
                .parse::<i64>()
                .map(Value::I64)
                .map_err(|e| e.to_string()),
            _ => text
                .parse::<u64>()
                .map(Value::U64)
                .map_err(|e| e.to_string()),
        };

        match value {
            Ok(value) => Ok(tree::constant(value)),
            Err(reason) => Err(ParseError::InvalidLiteral {
                text: text.into_owned(),
                reason,
                span,
            }),
        }
    }

    fn parse_parenthesized(&mut self) -> Result<Expr, ParseError> {
        let open = self.expect(TokenKind::OpenParen)?;
        let expr = self.nested(open.span(), Self::parse_expression)?;
        self.expect(TokenKind::CloseParen)?;
        Ok(expr)
    }
}

fn combine(op: BinaryOp, token: &Token<'_>, left: Expr, right: Expr) -> Result<Expr, ParseError> {
    let expr = tree::create_binary(op, left, right).map_err(|error| ParseError::Type {
        error,
        span: token.span(),
    })?;
    bounded(expr, token)
}

// Long operator chains stay flat in the parser but not in the tree.
fn bounded(expr: Expr, token: &Token<'_>) -> Result<Expr, ParseError> {
    if expr.depth() > MAX_DEPTH {
        return Err(ParseError::NestingTooDeep {
            limit: MAX_DEPTH,
            span: token.span(),
        });
    }
    Ok(expr)
}

/// Parse `source`, resolving identifiers against `bindings`.
pub fn parse(source: &str, bindings: &Bindings) -> Result<Expr, ParseError> {
    Parser::new(source)?.with_bindings(bindings).parse()
}

/// Check that parentheses in a token stream nest properly, without looking
/// at the rest of the grammar.
pub fn check_parens(tokens: &[Token<'_>]) -> Result<(), ParseError> {
    let mut open = Vec::new();
    for token in tokens {
        match token.kind {
            TokenKind::OpenParen => open.push(token.span()),
            TokenKind::CloseParen => {
                if open.pop().is_none() {
                    return Err(ParseError::InvalidParenOrder { span: token.span() });
                }
            }
            _ => {}
        }
    }
    match open.first() {
        Some(&span) => Err(ParseError::UnbalancedParens {
            open: open.len(),
            span,
        }),
        None => Ok(()),
    }
}

/// Scan `source` into tokens and validate their parentheses.
pub fn tokenize(source: &str) -> Result<Vec<Token<'_>>, ParseError> {
    let tokens = scan(source)?;
    check_parens(&tokens)?;
    Ok(tokens)
}
