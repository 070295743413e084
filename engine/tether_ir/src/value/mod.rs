//! Values produced by compiled functions and read from host properties.

use std::fmt;
use std::rc::Rc;

use crate::ObjectId;

/// Tagged result of an evaluation.
///
/// `Undefined` doubles as the engine's "no result" sentinel: every soft
/// failure (missing context, missing function, exception) evaluates to it.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Object(ObjectId),
    List(Rc<[Value]>),
}

/// Discriminant of [`Value`], used to request a typed result.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Undefined,
    Null,
    Bool,
    Int,
    Float,
    Str,
    Object,
    List,
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `null` or `undefined`.
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Undefined => ValueKind::Undefined,
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Object(_) => ValueKind::Object,
            Value::List(_) => ValueKind::List,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Loose truthiness, as a script would see it.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) | Value::List(_) => true,
        }
    }

    /// Convert to `kind`, or `None` when no sensible conversion exists.
    #[expect(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        reason = "script-style numeric coercion is lossy by definition"
    )]
    pub fn coerce(&self, kind: ValueKind) -> Option<Value> {
        if self.kind() == kind {
            return Some(self.clone());
        }
        match (self, kind) {
            (_, ValueKind::Bool) => Some(Value::Bool(self.truthy())),
            (_, ValueKind::Str) => Some(Value::str(&self.to_string())),
            (Value::Bool(b), ValueKind::Int) => Some(Value::Int(i64::from(*b))),
            (Value::Float(f), ValueKind::Int) if f.is_finite() => {
                Some(Value::Int(f.trunc() as i64))
            }
            (Value::Str(s), ValueKind::Int) => s.trim().parse().ok().map(Value::Int),
            (Value::Bool(b), ValueKind::Float) => Some(Value::Float(if *b { 1.0 } else { 0.0 })),
            (Value::Int(n), ValueKind::Float) => Some(Value::Float(*n as f64)),
            (Value::Str(s), ValueKind::Float) => s.trim().parse().ok().map(Value::Float),
            (Value::Undefined | Value::Null, ValueKind::Null) => Some(Value::Null),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::Object(id) => write!(f, "[object {}]", id.raw()),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}
