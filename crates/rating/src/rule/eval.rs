use quota_core::{QuotaError, QuotaResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

use super::parser::{BinaryOp, Expr, Literal, LogicalOp, UnaryOp};
use super::variables::static_path;
use crate::preset::OPEN_MAP_PATHS;

/// Result of evaluating a rule expression.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleValue {
    Null,
    Bool(bool),
    Number(Decimal),
    Str(String),
    /// Objects and arrays taken from the context.
    Json(Value),
}

impl RuleValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => json_number(n).map_or(Self::Null, Self::Number),
            Value::String(s) => Self::Str(s.clone()),
            composite => Self::Json(composite.clone()),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => !n.is_zero(),
            Self::Str(s) => !s.is_empty(),
            Self::Json(_) => true,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { Decimal::ONE } else { Decimal::ZERO }),
            Self::Null => Some(Decimal::ZERO),
            Self::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Some(Decimal::ZERO)
                } else {
                    parse_number(trimmed)
                }
            }
            Self::Json(_) => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Json(Value::Array(_)) => "array",
            Self::Json(_) => "object",
        }
    }
}

impl std::fmt::Display for RuleValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n.normalize()),
            Self::Str(s) => f.write_str(s),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

pub(crate) fn parse_number(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

fn json_number(n: &serde_json::Number) -> Option<Decimal> {
    if let Some(i) = n.as_i64() {
        return Some(Decimal::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(Decimal::from(u));
    }
    parse_number(&n.to_string())
}

fn fail(message: impl Into<String>) -> QuotaError {
    QuotaError::RuleEvaluation(message.into())
}

/// Evaluates `expr` against the JSON object `root`. Never mutates the context.
pub fn evaluate(expr: &Expr, root: &Value) -> QuotaResult<RuleValue> {
    match expr {
        Expr::Literal(literal) => Ok(match literal {
            Literal::Null => RuleValue::Null,
            Literal::Bool(b) => RuleValue::Bool(*b),
            Literal::Number(n) => RuleValue::Number(*n),
            Literal::Str(s) => RuleValue::Str(s.clone()),
        }),
        Expr::Variable(name) => root
            .get(name)
            .map(RuleValue::from_json)
            .ok_or_else(|| fail(format!("[{}] is not defined", name))),
        Expr::Member(object, name) => {
            let target = evaluate(object, root)?;
            member(object, target, name)
        }
        Expr::Index(object, index) => {
            let target = evaluate(object, root)?;
            match evaluate(index, root)? {
                RuleValue::Str(key) => member(object, target, &key),
                RuleValue::Number(n) => element(target, n),
                other => Err(fail(format!("cannot index with a {}", other.kind()))),
            }
        }
        Expr::Unary(UnaryOp::Not, operand) => Ok(RuleValue::Bool(!evaluate(operand, root)?.is_truthy())),
        Expr::Unary(UnaryOp::Neg, operand) => {
            let value = evaluate(operand, root)?;
            let n = value
                .as_number()
                .ok_or_else(|| fail(format!("cannot negate a {}", value.kind())))?;
            Ok(RuleValue::Number(-n))
        }
        Expr::Logical(op, left, right) => {
            let left = evaluate(left, root)?;
            match (op, left.is_truthy()) {
                (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                _ => evaluate(right, root),
            }
        }
        Expr::Conditional(condition, then, otherwise) => {
            if evaluate(condition, root)?.is_truthy() {
                evaluate(then, root)
            } else {
                evaluate(otherwise, root)
            }
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, root)?;
            let right = evaluate(right, root)?;
            binary(*op, left, right)
        }
    }
}

fn member(object: &Expr, target: RuleValue, name: &str) -> QuotaResult<RuleValue> {
    match target {
        RuleValue::Json(Value::Object(map)) => match map.get(name) {
            Some(value) => Ok(RuleValue::from_json(value)),
            None => {
                let path = static_path(object);
                if path.as_deref().is_some_and(|p| OPEN_MAP_PATHS.contains(&p)) {
                    Ok(RuleValue::Null)
                } else {
                    Err(fail(format!(
                        "[{}] is not defined on [{}]",
                        name,
                        path.unwrap_or_else(|| "object".into())
                    )))
                }
            }
        },
        RuleValue::Json(Value::Array(items)) if name == "length" => Ok(RuleValue::Number(Decimal::from(items.len()))),
        RuleValue::Str(s) if name == "length" => Ok(RuleValue::Number(Decimal::from(s.chars().count()))),
        other => Err(fail(format!(
            "cannot read property [{}] of {}",
            name,
            other.kind()
        ))),
    }
}

fn element(target: RuleValue, index: Decimal) -> QuotaResult<RuleValue> {
    let items = match target {
        RuleValue::Json(Value::Array(items)) => items,
        other => return Err(fail(format!("cannot index into {}", other.kind()))),
    };
    if index.is_sign_negative() || !index.fract().is_zero() {
        return Ok(RuleValue::Null);
    }
    Ok(index
        .to_usize()
        .and_then(|p| items.get(p))
        .map_or(RuleValue::Null, RuleValue::from_json))
}

fn numbers(op: BinaryOp, left: &RuleValue, right: &RuleValue) -> QuotaResult<(Decimal, Decimal)> {
    match (left.as_number(), right.as_number()) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(fail(format!(
            "operator {:?} is not defined for {} and {}",
            op,
            left.kind(),
            right.kind()
        ))),
    }
}

fn binary(op: BinaryOp, left: RuleValue, right: RuleValue) -> QuotaResult<RuleValue> {
    let overflow = || fail(format!("arithmetic overflow in {:?}", op));
    match op {
        BinaryOp::Add => {
            if matches!(left, RuleValue::Str(_)) || matches!(right, RuleValue::Str(_)) {
                return Ok(RuleValue::Str(format!("{}{}", left, right)));
            }
            let (l, r) = numbers(op, &left, &right)?;
            l.checked_add(r).map(RuleValue::Number).ok_or_else(overflow)
        }
        BinaryOp::Sub => {
            let (l, r) = numbers(op, &left, &right)?;
            l.checked_sub(r).map(RuleValue::Number).ok_or_else(overflow)
        }
        BinaryOp::Mul => {
            let (l, r) = numbers(op, &left, &right)?;
            l.checked_mul(r).map(RuleValue::Number).ok_or_else(overflow)
        }
        BinaryOp::Div | BinaryOp::Rem => {
            let (l, r) = numbers(op, &left, &right)?;
            if r.is_zero() {
                return Err(fail("division by zero"));
            }
            let result = if op == BinaryOp::Div {
                l.checked_div(r)
            } else {
                l.checked_rem(r)
            };
            result.map(RuleValue::Number).ok_or_else(overflow)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (RuleValue::Str(l), RuleValue::Str(r)) => l.cmp(r),
                _ => {
                    let (l, r) = numbers(op, &left, &right)?;
                    l.cmp(&r)
                }
            };
            Ok(RuleValue::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::StrictEq => Ok(RuleValue::Bool(left == right)),
        BinaryOp::StrictNotEq => Ok(RuleValue::Bool(left != right)),
        BinaryOp::Eq => Ok(RuleValue::Bool(loose_eq(&left, &right))),
        BinaryOp::NotEq => Ok(RuleValue::Bool(!loose_eq(&left, &right))),
    }
}

fn loose_eq(left: &RuleValue, right: &RuleValue) -> bool {
    match (left, right) {
        (RuleValue::Null, RuleValue::Null) => true,
        (RuleValue::Null, _) | (_, RuleValue::Null) => false,
        (RuleValue::Json(_), _) | (_, RuleValue::Json(_)) => left == right,
        (RuleValue::Str(l), RuleValue::Str(r)) => l == r,
        _ => match (left.as_number(), right.as_number()) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        },
    }
}
