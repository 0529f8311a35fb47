use std::fmt::Display;

use miette::Diagnostic;
use thiserror::Error;

use crate::value::{Kind, Value};

/// Deepest tree, and deepest parser nesting, the crate accepts.
pub const MAX_DEPTH: usize = 100;

/// Tag for every node shape the tree can describe. Several binary tags are
/// reserved: they can be constructed, but the evaluator rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Add,
    AddChecked,
    And,
    AndAlso,
    Constant,
    Divide,
    Equal,
    ExclusiveOr,
    GreaterThan,
    GreaterThanOrEqual,
    LeftShift,
    LessThan,
    LessThanOrEqual,
    Modulo,
    Multiply,
    MultiplyChecked,
    Negate,
    Not,
    NotEqual,
    Or,
    OrElse,
    Parameter,
    Power,
    RightShift,
    Subtract,
    SubtractChecked,
    UnaryPlus,
}

impl Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    UnaryPlus,
    Not,
}

impl UnaryOp {
    pub fn node_type(self) -> NodeType {
        match self {
            UnaryOp::Negate => NodeType::Negate,
            UnaryOp::UnaryPlus => NodeType::UnaryPlus,
            UnaryOp::Not => NodeType::Not,
        }
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Negate => write!(f, "-"),
            UnaryOp::UnaryPlus => write!(f, "+"),
            UnaryOp::Not => write!(f, "!"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    AddChecked,
    Subtract,
    SubtractChecked,
    Multiply,
    MultiplyChecked,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    And,
    AndAlso,
    Or,
    OrElse,
    ExclusiveOr,
    LeftShift,
    RightShift,
}

impl BinaryOp {
    pub fn node_type(self) -> NodeType {
        match self {
            BinaryOp::Add => NodeType::Add,
            BinaryOp::AddChecked => NodeType::AddChecked,
            BinaryOp::Subtract => NodeType::Subtract,
            BinaryOp::SubtractChecked => NodeType::SubtractChecked,
            BinaryOp::Multiply => NodeType::Multiply,
            BinaryOp::MultiplyChecked => NodeType::MultiplyChecked,
            BinaryOp::Divide => NodeType::Divide,
            BinaryOp::Modulo => NodeType::Modulo,
            BinaryOp::Power => NodeType::Power,
            BinaryOp::Equal => NodeType::Equal,
            BinaryOp::NotEqual => NodeType::NotEqual,
            BinaryOp::GreaterThan => NodeType::GreaterThan,
            BinaryOp::GreaterThanOrEqual => NodeType::GreaterThanOrEqual,
            BinaryOp::LessThan => NodeType::LessThan,
            BinaryOp::LessThanOrEqual => NodeType::LessThanOrEqual,
            BinaryOp::And => NodeType::And,
            BinaryOp::AndAlso => NodeType::AndAlso,
            BinaryOp::Or => NodeType::Or,
            BinaryOp::OrElse => NodeType::OrElse,
            BinaryOp::ExclusiveOr => NodeType::ExclusiveOr,
            BinaryOp::LeftShift => NodeType::LeftShift,
            BinaryOp::RightShift => NodeType::RightShift,
        }
    }

    /// Infix form used when rendering. The checked variants and `Power`
    /// have none and render call-like instead.
    pub fn symbol(self) -> Option<&'static str> {
        Some(match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "!=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::And => "&",
            BinaryOp::AndAlso => "&&",
            BinaryOp::Or => "|",
            BinaryOp::OrElse => "||",
            BinaryOp::ExclusiveOr => "^",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
            BinaryOp::AddChecked
            | BinaryOp::SubtractChecked
            | BinaryOp::MultiplyChecked
            | BinaryOp::Power => return None,
        })
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(
            self,
            BinaryOp::And | BinaryOp::AndAlso | BinaryOp::Or | BinaryOp::OrElse
        )
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.symbol() {
            Some(symbol) => write!(f, "{symbol}"),
            None => write!(f, "{}", self.node_type()),
        }
    }
}

/// Operand kinds rejected by one of the `create_*` factories.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("operator `{op}` cannot be applied to {left} and {right}")]
    #[diagnostic(code(exprtree::tree::binary_operands))]
    Binary { op: BinaryOp, left: Kind, right: Kind },

    #[error("operator `{op}` cannot be applied to {operand}")]
    #[diagnostic(code(exprtree::tree::unary_operand))]
    Unary { op: UnaryOp, operand: Kind },
}

/// A node of the expression tree together with its static element kind.
///
/// Nodes are only built through the `create_*` factories and the
/// [`constant`]/[`parameter`] constructors, so the kind always agrees with
/// the operands it was validated against. Children are owned; a tree never
/// shares nodes with another.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    kind: Kind,
    depth: usize,
    node: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Constant(Value),
    Parameter(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Length of the longest path from this node to a leaf, counting both.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn node_type(&self) -> NodeType {
        match &self.node {
            Node::Constant(_) => NodeType::Constant,
            Node::Parameter(_) => NodeType::Parameter,
            Node::Unary { op, .. } => op.node_type(),
            Node::Binary { op, .. } => op.node_type(),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node {
            Node::Constant(Value::Str(s)) => {
                let quote = quote_for(s);
                write!(f, "{quote}{s}{quote}")
            }
            Node::Constant(value) => write!(f, "{value}"),
            Node::Parameter(name) => write!(f, "{name}"),
            Node::Unary { op, operand } => match op {
                UnaryOp::Negate => write!(f, "-{operand}"),
                UnaryOp::UnaryPlus => write!(f, "+{operand}"),
                UnaryOp::Not => write!(f, "Not({operand})"),
            },
            Node::Binary { op, left, right } => match op.symbol() {
                Some(symbol) => write!(f, "({left} {symbol} {right})"),
                None => write!(f, "{}({left}, {right})", op.node_type()),
            },
        }
    }
}

/// String constants are kept verbatim, so they render inside a quote whose
/// every occurrence in the text is doubled; the scanner reads those back
/// as part of the literal.
fn quote_for(text: &str) -> char {
    let reads_back = |quote: char| text.split(|c| c != quote).all(|run| run.len() % 2 == 0);
    if !reads_back('"') && reads_back('\'') {
        '\''
    } else {
        '"'
    }
}

pub fn constant(value: impl Into<Value>) -> Expr {
    let value = value.into();
    Expr {
        kind: value.kind(),
        depth: 1,
        node: Node::Constant(value),
    }
}

pub fn parameter(name: impl Into<String>, kind: Kind) -> Expr {
    Expr {
        kind,
        depth: 1,
        node: Node::Parameter(name.into()),
    }
}

/// Validate operand kinds for `op` and build the node.
///
/// - comparisons accept any operands and are always `bool`;
/// - logical operators need two `bool` operands;
/// - everything else is arithmetic: both operands must be integer or
///   floating kinds, and the node is `i64`, the representation the
///   evaluator computes in.
pub fn create_binary(op: BinaryOp, left: Expr, right: Expr) -> Result<Expr, TypeError> {
    let mismatch = || TypeError::Binary {
        op,
        left: left.kind,
        right: right.kind,
    };

    let kind = if op.is_comparison() {
        Kind::Bool
    } else if op.is_logical() {
        if left.kind != Kind::Bool || right.kind != Kind::Bool {
            return Err(mismatch());
        }
        Kind::Bool
    } else {
        if !left.kind.is_arithmetic() || !right.kind.is_arithmetic() {
            return Err(mismatch());
        }
        Kind::I64
    };

    Ok(Expr {
        kind,
        depth: 1 + left.depth.max(right.depth),
        node: Node::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    })
}

pub fn create_add(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::Add, left, right)
}

pub fn create_subtract(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::Subtract, left, right)
}

pub fn create_multiply(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::Multiply, left, right)
}

pub fn create_divide(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::Divide, left, right)
}

pub fn create_modulo(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::Modulo, left, right)
}

pub fn create_equal(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::Equal, left, right)
}

pub fn create_not_equal(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::NotEqual, left, right)
}

pub fn create_greater_than(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::GreaterThan, left, right)
}

pub fn create_greater_than_or_equal(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::GreaterThanOrEqual, left, right)
}

pub fn create_less_than(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::LessThan, left, right)
}

pub fn create_less_than_or_equal(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::LessThanOrEqual, left, right)
}

pub fn create_and(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::And, left, right)
}

pub fn create_or(left: Expr, right: Expr) -> Result<Expr, TypeError> {
    create_binary(BinaryOp::Or, left, right)
}

/// Negation accepts signed, unsigned and floating operands alike and
/// produces an `i64`.
pub fn create_negate(operand: Expr) -> Result<Expr, TypeError> {
    if !operand.kind.is_arithmetic() {
        return Err(TypeError::Unary {
            op: UnaryOp::Negate,
            operand: operand.kind,
        });
    }
    Ok(unary(UnaryOp::Negate, Kind::I64, operand))
}

pub fn create_unary_plus(operand: Expr) -> Result<Expr, TypeError> {
    if !operand.kind.is_arithmetic() {
        return Err(TypeError::Unary {
            op: UnaryOp::UnaryPlus,
            operand: operand.kind,
        });
    }
    let kind = operand.kind;
    Ok(unary(UnaryOp::UnaryPlus, kind, operand))
}

pub fn create_not(operand: Expr) -> Result<Expr, TypeError> {
    if operand.kind != Kind::Bool {
        return Err(TypeError::Unary {
            op: UnaryOp::Not,
            operand: operand.kind,
        });
    }
    Ok(unary(UnaryOp::Not, Kind::Bool, operand))
}

fn unary(op: UnaryOp, kind: Kind, operand: Expr) -> Expr {
    Expr {
        kind,
        depth: 1 + operand.depth,
        node: Node::Unary {
            op,
            operand: Box::new(operand),
        },
    }
}
