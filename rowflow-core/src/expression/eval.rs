//! Tree-walking interpreter for parsed expressions.
//!
//! Only the bindings handed to [`Bindings`] are visible; there is no ambient
//! access to anything outside the record being evaluated.

use super::parser::{BinaryOp, Expr, LogicalOp, UnaryOp};
use crate::error::ExpressionError;
use crate::types::{Record, as_number, canonical_key, number_value};
use serde_json::Value;

/// A single named binding: either a whole record or a plain value.
#[derive(Debug, Clone, Copy)]
pub enum Binding<'a> {
    Record(&'a Record),
    Value(&'a Value),
}

/// The variables visible to an expression.
#[derive(Debug, Default, Clone)]
pub struct Bindings<'a> {
    vars: Vec<(&'a str, Binding<'a>)>,
}

impl<'a> Bindings<'a> {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn with_record(mut self, name: &'a str, record: &'a Record) -> Self {
        self.vars.push((name, Binding::Record(record)));
        self
    }

    pub fn with_value(mut self, name: &'a str, value: &'a Value) -> Self {
        self.vars.push((name, Binding::Value(value)));
        self
    }

    fn get(&self, name: &str) -> Option<Binding<'a>> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| *b)
    }
}

/// Intermediate result that avoids cloning records for member access.
enum Place<'a> {
    Record(&'a Record),
    Borrowed(&'a Value),
    Owned(Value),
}

impl Place<'_> {
    fn into_value(self) -> Value {
        match self {
            Place::Record(r) => Value::Object(r.clone()),
            Place::Borrowed(v) => v.clone(),
            Place::Owned(v) => v,
        }
    }
}

/// JS-style truthiness: `null`, `false`, `0`, and `""` are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn evaluate(expr: &Expr, bindings: &Bindings<'_>) -> Result<Value, ExpressionError> {
    Ok(place(expr, bindings)?.into_value())
}

fn place<'a>(expr: &Expr, bindings: &Bindings<'a>) -> Result<Place<'a>, ExpressionError> {
    match expr {
        Expr::Ident(name) => match bindings.get(name) {
            Some(Binding::Record(r)) => Ok(Place::Record(r)),
            Some(Binding::Value(v)) => Ok(Place::Borrowed(v)),
            None => Err(ExpressionError::UnknownIdentifier { name: name.clone() }),
        },
        Expr::Member(object, field) => {
            let base = place(object, bindings)?;
            Ok(member(base, field))
        }
        Expr::Index(object, index) => {
            let base = place(object, bindings)?;
            let index = evaluate(index, bindings)?;
            Ok(match index {
                Value::String(key) => member(base, &key),
                Value::Number(n) => match (base, n.as_u64()) {
                    (Place::Borrowed(Value::Array(items)), Some(i)) => items
                        .get(i as usize)
                        .map(Place::Borrowed)
                        .unwrap_or(Place::Owned(Value::Null)),
                    (Place::Owned(Value::Array(mut items)), Some(i)) if (i as usize) < items.len() => {
                        Place::Owned(items.swap_remove(i as usize))
                    }
                    (base, _) => member(base, &n.to_string()),
                },
                _ => Place::Owned(Value::Null),
            })
        }
        other => Ok(Place::Owned(eval_value(other, bindings)?)),
    }
}

fn member<'a>(base: Place<'a>, field: &str) -> Place<'a> {
    match base {
        Place::Record(r) => r
            .get(field)
            .map(Place::Borrowed)
            .unwrap_or(Place::Owned(Value::Null)),
        Place::Borrowed(Value::Object(map)) => map
            .get(field)
            .map(Place::Borrowed)
            .unwrap_or(Place::Owned(Value::Null)),
        Place::Owned(Value::Object(mut map)) => {
            Place::Owned(map.remove(field).unwrap_or(Value::Null))
        }
        Place::Borrowed(v) if field == "length" => Place::Owned(length_of(v)),
        Place::Owned(v) if field == "length" => Place::Owned(length_of(&v)),
        _ => Place::Owned(Value::Null),
    }
}

fn eval_value(expr: &Expr, bindings: &Bindings<'_>) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(_) | Expr::Member(_, _) | Expr::Index(_, _) => evaluate(expr, bindings),
        Expr::Unary(op, operand) => {
            let v = evaluate(operand, bindings)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!truthy(&v)),
                UnaryOp::Neg => negate(&v),
                UnaryOp::Plus => to_number(&v),
            })
        }
        Expr::Binary(op, left, right) => {
            let l = evaluate(left, bindings)?;
            let r = evaluate(right, bindings)?;
            Ok(binary(*op, &l, &r))
        }
        Expr::Logical(op, left, right) => {
            let l = evaluate(left, bindings)?;
            match (op, truthy(&l)) {
                (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(l),
                _ => evaluate(right, bindings),
            }
        }
        Expr::Conditional(cond, then, otherwise) => {
            if truthy(&evaluate(cond, bindings)?) {
                evaluate(then, bindings)
            } else {
                evaluate(otherwise, bindings)
            }
        }
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|a| evaluate(a, bindings))
                .collect::<Result<Vec<_>, _>>()?;
            call_builtin(name, args)
        }
        Expr::MethodCall(receiver, name, args) => {
            // `Math.round(x)` and friends: an unbound `Math` namespace.
            let is_math_namespace =
                matches!(receiver.as_ref(), Expr::Ident(ns) if ns == "Math" && bindings.get(ns).is_none());
            let mut values = Vec::with_capacity(args.len() + 1);
            if !is_math_namespace {
                values.push(evaluate(receiver, bindings)?);
            }
            for arg in args {
                values.push(evaluate(arg, bindings)?);
            }
            call_builtin(name, values)
        }
    }
}

fn negate(v: &Value) -> Value {
    match v {
        Value::Number(n) => match n.as_i64().and_then(|i| i.checked_neg()) {
            Some(i) => Value::from(i),
            None => n.as_f64().map(|f| number_value(-f)).unwrap_or(Value::Null),
        },
        _ => Value::Null,
    }
}

fn to_number(v: &Value) -> Value {
    match v {
        Value::Number(_) => v.clone(),
        Value::Bool(b) => Value::from(*b as i64),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(number_value)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Render a value the way string concatenation sees it.
pub fn display_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(_) => canonical_key(v),
        other => other.to_string(),
    }
}

fn length_of(v: &Value) -> Value {
    match v {
        Value::String(s) => Value::from(s.chars().count() as i64),
        Value::Array(items) => Value::from(items.len() as i64),
        Value::Object(map) => Value::from(map.len() as i64),
        _ => Value::Null,
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            if l.is_string() || r.is_string() {
                Value::String(format!("{}{}", display_string(l), display_string(r)))
            } else {
                arithmetic(l, r, i64::checked_add, |a, b| a + b)
            }
        }
        BinaryOp::Sub => arithmetic(l, r, i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => arithmetic(l, r, i64::checked_mul, |a, b| a * b),
        BinaryOp::Div => match (as_number(l), as_number(r)) {
            (Some(_), Some(b)) if b == 0.0 => Value::Null,
            (Some(a), Some(b)) => number_value(a / b),
            _ => Value::Null,
        },
        BinaryOp::Rem => match (as_number(l), as_number(r)) {
            (Some(_), Some(b)) if b == 0.0 => Value::Null,
            _ => arithmetic(l, r, i64::checked_rem, |a, b| a % b),
        },
        BinaryOp::Lt => compare(l, r).map_or(Value::Bool(false), |o| Value::Bool(o.is_lt())),
        BinaryOp::Le => compare(l, r).map_or(Value::Bool(false), |o| Value::Bool(o.is_le())),
        BinaryOp::Gt => compare(l, r).map_or(Value::Bool(false), |o| Value::Bool(o.is_gt())),
        BinaryOp::Ge => compare(l, r).map_or(Value::Bool(false), |o| Value::Bool(o.is_ge())),
        BinaryOp::Eq => Value::Bool(loose_eq(l, r)),
        BinaryOp::NotEq => Value::Bool(!loose_eq(l, r)),
        BinaryOp::StrictEq => Value::Bool(strict_eq(l, r)),
        BinaryOp::StrictNotEq => Value::Bool(!strict_eq(l, r)),
    }
}

fn arithmetic(
    l: &Value,
    r: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        if let Some(result) = int_op(a, b) {
            return Value::from(result);
        }
    }
    match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => number_value(float_op(a, b)),
        _ => Value::Null,
    }
}

fn numeric_view(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(*b as i64 as f64),
        _ => None,
    }
}

fn compare(l: &Value, r: &Value) -> Option<std::cmp::Ordering> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Null, _) | (_, Value::Null) => None,
        _ => numeric_view(l)?.partial_cmp(&numeric_view(r)?),
    }
}

fn strict_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            canonical_key(l) == canonical_key(r)
        }
        _ => l == r,
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(_), Value::String(_)) => l == r,
        (Value::Number(_) | Value::Bool(_) | Value::String(_), Value::Number(_) | Value::Bool(_) | Value::String(_)) => {
            match (numeric_view(l), numeric_view(r)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => strict_eq(l, r),
    }
}

fn expect_args(name: &str, args: &[Value], range: std::ops::RangeInclusive<usize>) -> Result<(), ExpressionError> {
    if range.contains(&args.len()) {
        return Ok(());
    }
    let expected = if range.start() == range.end() {
        range.start().to_string()
    } else if *range.end() == usize::MAX {
        format!("at least {}", range.start())
    } else {
        format!("{}..={}", range.start(), range.end())
    };
    Err(ExpressionError::Arity {
        name: name.to_string(),
        expected,
        got: args.len(),
    })
}

fn string_fn(args: &[Value], f: impl Fn(&str) -> Value) -> Value {
    match args.first() {
        Some(Value::String(s)) => f(s),
        _ => Value::Null,
    }
}

fn math_fn(args: &[Value], f: fn(f64) -> f64) -> Value {
    args.first()
        .and_then(as_number)
        .map(|x| number_value(f(x)))
        .unwrap_or(Value::Null)
}

/// The fixed builtin library. Method calls pass the receiver as the first
/// argument.
fn call_builtin(name: &str, args: Vec<Value>) -> Result<Value, ExpressionError> {
    let value = match name {
        "lower" | "toLowerCase" => {
            expect_args(name, &args, 1..=1)?;
            string_fn(&args, |s| Value::String(s.to_lowercase()))
        }
        "upper" | "toUpperCase" => {
            expect_args(name, &args, 1..=1)?;
            string_fn(&args, |s| Value::String(s.to_uppercase()))
        }
        "trim" => {
            expect_args(name, &args, 1..=1)?;
            string_fn(&args, |s| Value::String(s.trim().to_string()))
        }
        "len" | "length" => {
            expect_args(name, &args, 1..=1)?;
            length_of(&args[0])
        }
        "contains" | "includes" => {
            expect_args(name, &args, 2..=2)?;
            match (&args[0], &args[1]) {
                (Value::String(hay), Value::String(needle)) => Value::Bool(hay.contains(needle.as_str())),
                (Value::Array(items), needle) => Value::Bool(items.iter().any(|i| strict_eq(i, needle))),
                _ => Value::Bool(false),
            }
        }
        "startsWith" | "starts_with" => {
            expect_args(name, &args, 2..=2)?;
            match (&args[0], &args[1]) {
                (Value::String(s), Value::String(p)) => Value::Bool(s.starts_with(p.as_str())),
                _ => Value::Bool(false),
            }
        }
        "endsWith" | "ends_with" => {
            expect_args(name, &args, 2..=2)?;
            match (&args[0], &args[1]) {
                (Value::String(s), Value::String(p)) => Value::Bool(s.ends_with(p.as_str())),
                _ => Value::Bool(false),
            }
        }
        "number" | "Number" => {
            expect_args(name, &args, 1..=1)?;
            to_number(&args[0])
        }
        "string" | "String" | "toString" => {
            expect_args(name, &args, 1..=1)?;
            Value::String(display_string(&args[0]))
        }
        "round" => {
            expect_args(name, &args, 1..=1)?;
            math_fn(&args, f64::round)
        }
        "floor" => {
            expect_args(name, &args, 1..=1)?;
            math_fn(&args, f64::floor)
        }
        "ceil" => {
            expect_args(name, &args, 1..=1)?;
            math_fn(&args, f64::ceil)
        }
        "abs" => {
            expect_args(name, &args, 1..=1)?;
            math_fn(&args, f64::abs)
        }
        "coalesce" => {
            expect_args(name, &args, 1..=usize::MAX)?;
            args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null)
        }
        "isNull" | "is_null" => {
            expect_args(name, &args, 1..=1)?;
            Value::Bool(args[0].is_null())
        }
        _ => {
            return Err(ExpressionError::UnknownFunction {
                name: name.to_string(),
            });
        }
    };
    Ok(value)
}
