use std::cmp::Ordering;

use miette::Diagnostic;
use thiserror::Error;
use tracing::trace;

use crate::{
    tree::{BinaryOp, Expr, MAX_DEPTH, Node, NodeType, UnaryOp},
    value::{Bindings, Kind, Value},
};

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum EvalError {
    #[error("{node} is not implemented")]
    #[diagnostic(code(exprtree::eval::unimplemented))]
    Unimplemented { node: NodeType },

    #[error("expression tree is {depth} levels deep, the limit is {limit}")]
    #[diagnostic(code(exprtree::eval::nesting_too_deep))]
    NestingTooDeep { depth: usize, limit: usize },

    #[error("division by zero")]
    #[diagnostic(code(exprtree::eval::divide_by_zero))]
    DivideByZero,

    #[error("unable to convert {kind} value `{value}` to an integer")]
    #[diagnostic(code(exprtree::eval::conversion))]
    Conversion { kind: Kind, value: String },

    #[error("{node} expects a bool operand, found {found}")]
    #[diagnostic(code(exprtree::eval::not_boolean))]
    NotBoolean { node: NodeType, found: Kind },

    #[error("cannot order {left} against {right}")]
    #[diagnostic(code(exprtree::eval::incomparable))]
    Incomparable { left: Kind, right: Kind },

    #[error("no value bound for parameter `{name}`")]
    #[diagnostic(
        code(exprtree::eval::unbound_parameter),
        help("parameters kept by deferred binding must be bound again when evaluating")
    )]
    UnboundParameter { name: String },

    #[error("parameter `{name}` was parsed as {expected} but is bound to a {found} value")]
    #[diagnostic(code(exprtree::eval::parameter_kind))]
    ParameterKind {
        name: String,
        expected: Kind,
        found: Kind,
    },
}

/// Tree-walking evaluator. Children are fully evaluated left before right.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator<'b> {
    bindings: Option<&'b Bindings>,
}

impl<'b> Evaluator<'b> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve [`Node::Parameter`] nodes against `bindings`.
    pub fn with_bindings(bindings: &'b Bindings) -> Self {
        Evaluator {
            bindings: Some(bindings),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, root), fields(tree = %root))]
    pub fn evaluate(&self, root: &Expr) -> Result<Value, EvalError> {
        if root.depth() > MAX_DEPTH {
            return Err(EvalError::NestingTooDeep {
                depth: root.depth(),
                limit: MAX_DEPTH,
            });
        }
        self.visit(root)
    }

    fn visit(&self, expr: &Expr) -> Result<Value, EvalError> {
        let value = match expr.node() {
            Node::Constant(value) => value.clone(),
            Node::Parameter(name) => self.resolve(name, expr.kind())?,
            Node::Unary { op, operand } => {
                let operand = self.visit(operand)?;
                unary(*op, operand)?
            }
            Node::Binary { op, left, right } => {
                let left = self.visit(left)?;
                let right = self.visit(right)?;
                binary(*op, left, right)?
            }
        };
        trace!(node = %expr.node_type(), %value, "evaluated");
        Ok(value)
    }

    fn resolve(&self, name: &str, kind: Kind) -> Result<Value, EvalError> {
        let Some(value) = self.bindings.and_then(|bindings| bindings.get(name)) else {
            return Err(EvalError::UnboundParameter {
                name: name.to_string(),
            });
        };
        if value.kind() != kind {
            return Err(EvalError::ParameterKind {
                name: name.to_string(),
                expected: kind,
                found: value.kind(),
            });
        }
        Ok(value.clone())
    }
}

/// Evaluate a tree that holds no parameter nodes.
pub fn evaluate(root: &Expr) -> Result<Value, EvalError> {
    Evaluator::new().evaluate(root)
}

fn integral(value: &Value) -> Result<i64, EvalError> {
    value.as_integer().ok_or_else(|| EvalError::Conversion {
        kind: value.kind(),
        value: value.to_string(),
    })
}

fn boolean(node: NodeType, value: &Value) -> Result<bool, EvalError> {
    value.as_bool().ok_or(EvalError::NotBoolean {
        node,
        found: value.kind(),
    })
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value, EvalError> {
    Ok(match op {
        UnaryOp::Negate => Value::I64(integral(&operand)?.wrapping_neg()),
        UnaryOp::UnaryPlus => {
            integral(&operand)?;
            operand
        }
        UnaryOp::Not => Value::Bool(!boolean(NodeType::Not, &operand)?),
    })
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Add => arithmetic(&left, &right, |l, r| Ok(l.wrapping_add(r))),
        BinaryOp::Subtract => arithmetic(&left, &right, |l, r| Ok(l.wrapping_sub(r))),
        BinaryOp::Multiply => arithmetic(&left, &right, |l, r| Ok(l.wrapping_mul(r))),
        BinaryOp::Divide => arithmetic(&left, &right, |l, r| {
            if r == 0 {
                return Err(EvalError::DivideByZero);
            }
            Ok(l.wrapping_div(r))
        }),
        BinaryOp::Modulo => arithmetic(&left, &right, |l, r| {
            if r == 0 {
                return Err(EvalError::DivideByZero);
            }
            Ok(l.wrapping_rem(r))
        }),
        BinaryOp::Equal
        | BinaryOp::NotEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual
        | BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual => compare(op, &left, &right).map(Value::Bool),
        BinaryOp::And | BinaryOp::Or => {
            let l = boolean(op.node_type(), &left)?;
            let r = boolean(op.node_type(), &right)?;
            Ok(Value::Bool(if op == BinaryOp::And { l && r } else { l || r }))
        }
        BinaryOp::AddChecked
        | BinaryOp::SubtractChecked
        | BinaryOp::MultiplyChecked
        | BinaryOp::Power
        | BinaryOp::AndAlso
        | BinaryOp::OrElse
        | BinaryOp::ExclusiveOr
        | BinaryOp::LeftShift
        | BinaryOp::RightShift => Err(EvalError::Unimplemented {
            node: op.node_type(),
        }),
    }
}

fn arithmetic(
    left: &Value,
    right: &Value,
    apply: impl FnOnce(i64, i64) -> Result<i64, EvalError>,
) -> Result<Value, EvalError> {
    let l = integral(left)?;
    let r = integral(right)?;
    apply(l, r).map(Value::I64)
}

/// Integers compare exactly across signedness, any float makes it a float
/// comparison, strings and bools compare with their own kind. Values of
/// different families are never equal and cannot be ordered.
fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    let ordering = if let (Some(l), Some(r)) = (left.as_i128(), right.as_i128()) {
        l.partial_cmp(&r)
    } else if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        l.partial_cmp(&r)
    } else {
        match (left, right) {
            (Value::Str(l), Value::Str(r)) => l.partial_cmp(r),
            (Value::Bool(l), Value::Bool(r)) => l.partial_cmp(r),
            _ => match op {
                BinaryOp::Equal => return Ok(false),
                BinaryOp::NotEqual => return Ok(true),
                _ => {
                    return Err(EvalError::Incomparable {
                        left: left.kind(),
                        right: right.kind(),
                    });
                }
            },
        }
    };

    // NaN leaves `ordering` empty: only != holds
    Ok(match op {
        BinaryOp::Equal => ordering == Some(Ordering::Equal),
        BinaryOp::NotEqual => ordering != Some(Ordering::Equal),
        BinaryOp::GreaterThan => ordering == Some(Ordering::Greater),
        BinaryOp::GreaterThanOrEqual => {
            matches!(ordering, Some(Ordering::Greater | Ordering::Equal))
        }
        BinaryOp::LessThan => ordering == Some(Ordering::Less),
        BinaryOp::LessThanOrEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        _ => {
            return Err(EvalError::Unimplemented {
                node: op.node_type(),
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{self, constant, parameter};

    #[test]
    fn constants_evaluate_to_themselves() {
        assert_eq!(evaluate(&constant("hi")).unwrap(), Value::from("hi"));
        assert_eq!(evaluate(&constant(3u16)).unwrap(), Value::U16(3));
    }

    #[test]
    fn arithmetic_coerces_to_integers() {
        let expr = tree::create_add(constant(1u64), constant(5u64)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::I64(6));

        let expr = tree::create_multiply(constant(2.9f64), constant(3i8)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::I64(6));

        let expr = tree::create_subtract(constant(1u8), constant(3u32)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::I64(-2));
    }

    #[test]
    fn division_truncates() {
        let expr = tree::create_divide(constant(-7i64), constant(2u64)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::I64(-3));
        let expr = tree::create_modulo(constant(-7i64), constant(2u64)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::I64(-1));
    }

    #[test]
    fn division_by_zero_is_a_domain_error() {
        let expr = tree::create_divide(constant(5u64), constant(0u64)).unwrap();
        assert_eq!(evaluate(&expr).unwrap_err(), EvalError::DivideByZero);
        // a float divisor that truncates to zero is still zero
        let expr = tree::create_divide(constant(5u64), constant(0.5f64)).unwrap();
        assert_eq!(evaluate(&expr).unwrap_err(), EvalError::DivideByZero);
        let expr = tree::create_modulo(constant(5u64), constant(0u64)).unwrap();
        assert_eq!(evaluate(&expr).unwrap_err(), EvalError::DivideByZero);
    }

    #[test]
    fn overflow_wraps() {
        let expr = tree::create_add(constant(i64::MAX), constant(1u64)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::I64(i64::MIN));
        let expr = tree::create_divide(constant(i64::MIN), constant(-1i64)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::I64(i64::MIN));
    }

    #[test]
    fn non_numeric_values_do_not_coerce() {
        assert_eq!(
            integral(&Value::Bool(true)).unwrap_err(),
            EvalError::Conversion {
                kind: Kind::Bool,
                value: "true".to_string(),
            }
        );
        assert!(arithmetic(&Value::from("1"), &Value::I64(1), |l, r| Ok(l + r)).is_err());
        assert!(matches!(
            unary(UnaryOp::Not, Value::I64(1)).unwrap_err(),
            EvalError::NotBoolean {
                node: NodeType::Not,
                found: Kind::I64
            }
        ));
    }

    #[test]
    fn unary_operators() {
        let expr = tree::create_negate(constant(5u64)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::I64(-5));
        let expr = tree::create_negate(constant(-2.7f64)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::I64(2));
        let expr = tree::create_unary_plus(constant(1.5f32)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::F32(1.5));
        let expr = tree::create_not(constant(false)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::Bool(true));
    }

    #[test]
    fn comparisons() {
        let cases = [
            (BinaryOp::GreaterThan, constant(10i32), constant(15i32), false),
            (BinaryOp::LessThanOrEqual, constant(5u8), constant(5i64), true),
            (BinaryOp::Equal, constant(u64::MAX), constant(-1i64), false),
            (BinaryOp::NotEqual, constant(2.5f64), constant(2u64), true),
            (BinaryOp::GreaterThanOrEqual, constant(3u64), constant(2.5f32), true),
            (BinaryOp::LessThan, constant("apple"), constant("banana"), true),
            (BinaryOp::Equal, constant(true), constant(true), true),
            (BinaryOp::Equal, constant("100"), constant(100u64), false),
            (BinaryOp::NotEqual, constant("100"), constant(100u64), true),
            (BinaryOp::Equal, constant(f64::NAN), constant(f64::NAN), false),
            (BinaryOp::NotEqual, constant(f64::NAN), constant(1u64), true),
        ];
        for (op, left, right, expected) in cases {
            let rendered = format!("{left} {op} {right}");
            let expr = tree::create_binary(op, left, right).unwrap();
            assert_eq!(
                evaluate(&expr).unwrap(),
                Value::Bool(expected),
                "{rendered}"
            );
        }
    }

    #[test]
    fn ordering_across_families_fails() {
        let expr = tree::create_greater_than(constant("100"), constant(0u64)).unwrap();
        assert_eq!(
            evaluate(&expr).unwrap_err(),
            EvalError::Incomparable {
                left: Kind::Str,
                right: Kind::U64,
            }
        );
    }

    #[test]
    fn logical_operators_are_eager() {
        let expr = tree::create_and(constant(true), constant(false)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::Bool(false));
        let expr = tree::create_or(constant(false), constant(true)).unwrap();
        assert_eq!(evaluate(&expr).unwrap(), Value::Bool(true));

        // the right side is still evaluated when the left already decides
        let failing = tree::create_equal(
            constant(1u64),
            tree::create_divide(constant(1u64), constant(0u64)).unwrap(),
        )
        .unwrap();
        let expr = tree::create_or(constant(true), failing).unwrap();
        assert_eq!(evaluate(&expr).unwrap_err(), EvalError::DivideByZero);
    }

    #[test]
    fn reserved_operators_are_unimplemented() {
        for op in [
            BinaryOp::AddChecked,
            BinaryOp::SubtractChecked,
            BinaryOp::MultiplyChecked,
            BinaryOp::Power,
            BinaryOp::ExclusiveOr,
            BinaryOp::LeftShift,
            BinaryOp::RightShift,
        ] {
            let expr = tree::create_binary(op, constant(1u64), constant(2u64)).unwrap();
            assert_eq!(
                evaluate(&expr).unwrap_err(),
                EvalError::Unimplemented {
                    node: op.node_type()
                }
            );
        }
        let expr = tree::create_binary(BinaryOp::AndAlso, constant(true), constant(true)).unwrap();
        assert!(matches!(
            evaluate(&expr).unwrap_err(),
            EvalError::Unimplemented {
                node: NodeType::AndAlso
            }
        ));
    }

    #[test]
    fn built_trees_deeper_than_the_limit_are_refused() {
        let mut expr = constant(0u64);
        for _ in 0..MAX_DEPTH {
            expr = tree::create_add(expr, constant(1u64)).unwrap();
        }
        assert_eq!(
            evaluate(&expr).unwrap_err(),
            EvalError::NestingTooDeep {
                depth: MAX_DEPTH + 1,
                limit: MAX_DEPTH,
            }
        );

        let mut expr = constant(0u64);
        for _ in 1..MAX_DEPTH {
            expr = tree::create_add(expr, constant(1u64)).unwrap();
        }
        assert_eq!(evaluate(&expr).unwrap(), Value::I64(MAX_DEPTH as i64 - 1));
    }

    #[test]
    fn left_is_evaluated_before_right() {
        let bindings = Bindings::new();
        let expr = tree::create_add(parameter("first", Kind::I64), parameter("second", Kind::I64))
            .unwrap();
        assert_eq!(
            Evaluator::with_bindings(&bindings)
                .evaluate(&expr)
                .unwrap_err(),
            EvalError::UnboundParameter {
                name: "first".to_string()
            }
        );
    }

    #[test]
    fn parameters_resolve_against_bindings() {
        let expr = tree::create_multiply(parameter("a", Kind::I64), constant(3u64)).unwrap();

        let bindings = Bindings::new().with("a", 7i64);
        let evaluator = Evaluator::with_bindings(&bindings);
        assert_eq!(evaluator.evaluate(&expr).unwrap(), Value::I64(21));

        let bindings = Bindings::new().with("a", 7u8);
        assert_eq!(
            Evaluator::with_bindings(&bindings)
                .evaluate(&expr)
                .unwrap_err(),
            EvalError::ParameterKind {
                name: "a".to_string(),
                expected: Kind::I64,
                found: Kind::U8,
            }
        );

        assert!(matches!(
            evaluate(&expr).unwrap_err(),
            EvalError::UnboundParameter { .. }
        ));
    }
}
