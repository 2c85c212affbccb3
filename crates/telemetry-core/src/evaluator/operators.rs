use std::fmt;

use super::{ExecutionContext, Expression, ScriptError, Value};
use crate::ast::Position;

/// Binary operators in increasing binding strength groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "!",
        })
    }
}

pub(super) fn unary(
    op: UnaryOp,
    operand: &Expression,
    context: &ExecutionContext<'_>,
    position: Position,
) -> Result<Value, ScriptError> {
    let value = operand.evaluate(context)?;
    match (op, &value) {
        (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
        (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
        _ => Err(ScriptError::UnaryType {
            operation: match op {
                UnaryOp::Negate => "negate".to_string(),
                UnaryOp::Not => "logically invert".to_string(),
            },
            operand: value.type_name().to_string(),
            position,
        }),
    }
}

pub(super) fn binary(
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
    context: &ExecutionContext<'_>,
    position: Position,
) -> Result<Value, ScriptError> {
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        return logical(op, left, right, context, position);
    }

    let lhs = left.evaluate(context)?;
    let rhs = right.evaluate(context)?;

    match op {
        BinaryOp::Equal => Ok(Value::Boolean(lhs == rhs)),
        BinaryOp::NotEqual => Ok(Value::Boolean(lhs != rhs)),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            compare(op, &lhs, &rhs, position)
        }
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l + r)),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{lhs}{rhs}")))
            }
            _ => Err(mismatch("add", &lhs, &rhs, position)),
        },
        BinaryOp::Subtract => arithmetic("subtract", &lhs, &rhs, position, |l, r| l - r),
        BinaryOp::Multiply => arithmetic("multiply", &lhs, &rhs, position, |l, r| l * r),
        BinaryOp::Divide | BinaryOp::Modulo => {
            if rhs == Value::Number(0.0) {
                return Err(ScriptError::DivisionByZero { position });
            }
            if op == BinaryOp::Divide {
                arithmetic("divide", &lhs, &rhs, position, |l, r| l / r)
            } else {
                arithmetic("take the remainder of", &lhs, &rhs, position, |l, r| l % r)
            }
        }
        BinaryOp::And | BinaryOp::Or => logical(op, left, right, context, position),
    }
}

/// `&&` and `||` only evaluate the right side when it decides the result
fn logical(
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
    context: &ExecutionContext<'_>,
    position: Position,
) -> Result<Value, ScriptError> {
    let lhs = boolean_operand(op, left.evaluate(context)?, position)?;
    if (op == BinaryOp::And && !lhs) || (op == BinaryOp::Or && lhs) {
        return Ok(Value::Boolean(lhs));
    }
    let rhs = boolean_operand(op, right.evaluate(context)?, position)?;
    Ok(Value::Boolean(rhs))
}

fn boolean_operand(op: BinaryOp, value: Value, position: Position) -> Result<bool, ScriptError> {
    match value {
        Value::Boolean(b) => Ok(b),
        other => Err(ScriptError::UnaryType {
            operation: format!("apply `{op}` to"),
            operand: other.type_name().to_string(),
            position,
        }),
    }
}

fn mismatch(operation: &str, lhs: &Value, rhs: &Value, position: Position) -> ScriptError {
    ScriptError::type_error(operation, lhs.type_name(), rhs.type_name(), position)
}

fn arithmetic(
    operation: &str,
    lhs: &Value,
    rhs: &Value,
    position: Position,
    apply: impl Fn(f64, f64) -> f64,
) -> Result<Value, ScriptError> {
    match (lhs, rhs) {
        (Value::Number(l), Value::Number(r)) => Ok(Value::Number(apply(*l, *r))),
        _ => Err(mismatch(operation, lhs, rhs, position)),
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value, position: Position) -> Result<Value, ScriptError> {
    let ordering = match (lhs, rhs) {
        (Value::Number(l), Value::Number(r)) => l.partial_cmp(r),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => return Err(mismatch("compare", lhs, rhs, position)),
    };

    // NaN compares false both ways
    let Some(ordering) = ordering else {
        return Ok(Value::Boolean(false));
    };

    Ok(Value::Boolean(match op {
        BinaryOp::Less => ordering.is_lt(),
        BinaryOp::LessEqual => ordering.is_le(),
        BinaryOp::Greater => ordering.is_gt(),
        _ => ordering.is_ge(),
    }))
}
