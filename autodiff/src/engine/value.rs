//! Runtime values, their tangents and evaluation errors.

use std::fmt;
use tangent_core::AdditiveArithmetic;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Bool(bool),
    Unit,
    Tuple(Vec<Value>),
    Struct { name: String, fields: Vec<Value> },
    Optional(Option<Box<Value>>),
    Enum { name: String, case: usize, payload: Option<Box<Value>> },
    Object { class: String },
}

impl Value {
    pub fn some(value: Value) -> Value {
        Value::Optional(Some(Box::new(value)))
    }

    pub fn none() -> Value {
        Value::Optional(None)
    }

    pub fn as_float(&self) -> Result<f64, RuntimeError> {
        match self {
            Value::Float(x) => Ok(*x),
            other => Err(RuntimeError::type_mismatch("Float", other)),
        }
    }

    pub fn as_int(&self) -> Result<i64, RuntimeError> {
        match self {
            Value::Int(x) => Ok(*x),
            other => Err(RuntimeError::type_mismatch("Int", other)),
        }
    }

    pub fn as_bool(&self) -> Result<bool, RuntimeError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(RuntimeError::type_mismatch("Bool", other)),
        }
    }

    /// Name of the dynamic type, as used for protocol conformances.
    pub fn type_name(&self) -> String {
        match self {
            Value::Float(_) => "Float".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::Unit => "()".to_string(),
            Value::Tuple(elements) => format!("tuple of {}", elements.len()),
            Value::Struct { name, .. } | Value::Enum { name, .. } => name.clone(),
            Value::Optional(_) => "Optional".to_string(),
            Value::Object { class } => class.clone(),
        }
    }

    fn components(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(elements) => Some(elements),
            Value::Struct { fields, .. } => Some(fields),
            _ => None,
        }
    }

    fn components_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Tuple(elements) => Some(elements),
            Value::Struct { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// The component at `path`.
    pub fn project(&self, path: &[usize]) -> Result<&Value, RuntimeError> {
        path.iter().try_fold(self, |value, &index| {
            value
                .components()
                .and_then(|components| components.get(index))
                .ok_or_else(|| RuntimeError::BadProjection {
                    index,
                    value: value.type_name(),
                })
        })
    }

    /// Mutable access to the component at `path`.
    pub fn project_mut(&mut self, path: &[usize]) -> Result<&mut Value, RuntimeError> {
        let mut value = self;
        for &index in path {
            let name = value.type_name();
            value = value
                .components_mut()
                .and_then(|components| components.get_mut(index))
                .ok_or(RuntimeError::BadProjection { index, value: name })?;
        }
        Ok(value)
    }

    /// Number of components of a tuple or struct.
    pub fn arity(&self) -> Option<usize> {
        self.components().map(<[Value]>::len)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(x) => write!(f, "{x}"),
            Value::Int(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Unit => f.write_str("()"),
            Value::Tuple(elements) => {
                f.write_str("(")?;
                write_list(f, elements)?;
                f.write_str(")")
            }
            Value::Struct { name, fields } => {
                write!(f, "{name}(")?;
                write_list(f, fields)?;
                f.write_str(")")
            }
            Value::Optional(None) => f.write_str("nil"),
            Value::Optional(Some(value)) => write!(f, "{value}?"),
            Value::Enum { name, case, payload } => {
                write!(f, "{name}.{case}")?;
                match payload {
                    Some(payload) => write!(f, "({payload})"),
                    None => Ok(()),
                }
            }
            Value::Object { class } => write!(f, "<{class}>"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{value}")?;
    }
    Ok(())
}

/// The tangent of a runtime value.
///
/// `Zero` is a shape-free zero that stands for the zero tangent of any
/// value. Aggregates carry one component per tuple element or struct
/// field; components of `@noDerivative` fields stay zero. An absent
/// optional tangent is zero too.
#[derive(Debug, Clone, PartialEq)]
pub enum Tangent {
    Zero,
    Float(f64),
    Aggregate(Vec<Tangent>),
    Optional(Option<Box<Tangent>>),
}

impl Default for Tangent {
    fn default() -> Self {
        Tangent::Zero
    }
}

impl Tangent {
    pub fn is_zero(&self) -> bool {
        match self {
            Tangent::Zero | Tangent::Optional(None) => true,
            Tangent::Float(x) => *x == 0.0,
            Tangent::Aggregate(components) => components.iter().all(Tangent::is_zero),
            Tangent::Optional(Some(inner)) => inner.is_zero(),
        }
    }

    /// The scalar, treating `Zero` as `0.0`.
    pub fn as_float(&self) -> Result<f64, RuntimeError> {
        match self {
            Tangent::Zero => Ok(0.0),
            Tangent::Float(x) => Ok(*x),
            other => Err(RuntimeError::TangentShape(format!("expected a scalar tangent, got {other:?}"))),
        }
    }

    /// `self += other`.
    pub fn accumulate(&mut self, other: Tangent) -> Result<(), RuntimeError> {
        if matches!(other, Tangent::Zero | Tangent::Optional(None)) {
            return Ok(());
        }
        if matches!(self, Tangent::Zero | Tangent::Optional(None)) {
            *self = other;
            return Ok(());
        }
        match (self, other) {
            (Tangent::Float(x), Tangent::Float(y)) => {
                *x += y;
                Ok(())
            }
            (Tangent::Aggregate(xs), Tangent::Aggregate(ys)) if xs.len() == ys.len() => {
                for (x, y) in xs.iter_mut().zip(ys) {
                    x.accumulate(y)?;
                }
                Ok(())
            }
            (Tangent::Optional(Some(x)), Tangent::Optional(Some(y))) => x.accumulate(*y),
            (lhs, rhs) => Err(RuntimeError::TangentShape(format!(
                "cannot add {rhs:?} to {lhs:?}"
            ))),
        }
    }

    /// `factor * self`.
    pub fn scaled(&self, factor: f64) -> Tangent {
        match self {
            Tangent::Zero => Tangent::Zero,
            Tangent::Float(x) => Tangent::Float(factor * x),
            Tangent::Aggregate(components) => {
                Tangent::Aggregate(components.iter().map(|c| c.scaled(factor)).collect())
            }
            Tangent::Optional(inner) => Tangent::Optional(inner.as_ref().map(|t| Box::new(t.scaled(factor)))),
        }
    }

    /// The component at `path`; components of `Zero` are `Zero`.
    pub fn project(&self, path: &[usize]) -> Result<Tangent, RuntimeError> {
        let mut tangent = self;
        for &index in path {
            match tangent {
                Tangent::Zero => return Ok(Tangent::Zero),
                Tangent::Aggregate(components) if index < components.len() => {
                    tangent = &components[index];
                }
                other => {
                    return Err(RuntimeError::TangentShape(format!(
                        "cannot project component {index} of {other:?}"
                    )))
                }
            }
        }
        Ok(tangent.clone())
    }

    /// Takes the component at `path`, leaving zero behind.
    pub fn take_at(&mut self, path: &[usize]) -> Result<Tangent, RuntimeError> {
        let Some((&index, rest)) = path.split_first() else {
            return Ok(std::mem::take(self));
        };
        match self {
            Tangent::Zero => Ok(Tangent::Zero),
            Tangent::Aggregate(components) if index < components.len() => components[index].take_at(rest),
            other => Err(RuntimeError::TangentShape(format!(
                "cannot take component {index} of {other:?}"
            ))),
        }
    }

    /// Replaces the component at `path`. `arities` gives the number of
    /// components at each step, used to expand a shape-free zero.
    pub fn set_at(&mut self, path: &[usize], arities: &[usize], value: Tangent) -> Result<(), RuntimeError> {
        let (Some((&index, rest)), Some((&arity, rest_arities))) = (path.split_first(), arities.split_first()) else {
            *self = value;
            return Ok(());
        };
        if matches!(self, Tangent::Zero) {
            if value.is_zero() {
                return Ok(());
            }
            *self = Tangent::Aggregate(vec![Tangent::Zero; arity]);
        }
        match self {
            Tangent::Aggregate(components) if index < components.len() => {
                components[index].set_at(rest, rest_arities, value)
            }
            other => Err(RuntimeError::TangentShape(format!(
                "cannot set component {index} of {other:?}"
            ))),
        }
    }

    /// A tangent that is `value` at `path` and zero elsewhere.
    pub fn embedded(path: &[usize], arities: &[usize], value: Tangent) -> Result<Tangent, RuntimeError> {
        let mut tangent = Tangent::Zero;
        tangent.set_at(path, arities, value)?;
        Ok(tangent)
    }
}

impl From<f64> for Tangent {
    fn from(x: f64) -> Self {
        Tangent::Float(x)
    }
}

/// Shape-checked addition; mismatched shapes panic, the way
/// `DifferentiableView` counts do.
impl AdditiveArithmetic for Tangent {
    fn zero() -> Self {
        Tangent::Zero
    }

    fn plus(&self, other: &Self) -> Self {
        let mut sum = self.clone();
        if let Err(err) = sum.accumulate(other.clone()) {
            panic!("{err}");
        }
        sum
    }

    fn minus(&self, other: &Self) -> Self {
        self.plus(&other.scaled(-1.0))
    }
}

/// Errors raised while evaluating a module.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("unknown global '{0}'")]
    UnknownGlobal(String),
    #[error("no implementation of '{callee}' for '{receiver}'")]
    NoImplementation { callee: String, receiver: String },
    #[error("unexpectedly found nil while unwrapping an optional value")]
    UnwrapNone,
    #[error("enum value is case {found}, not case {expected}")]
    WrongCase { expected: usize, found: usize },
    #[error("cannot project component {index} of {value}")]
    BadProjection { index: usize, value: String },
    #[error("reached unreachable code in '{0}'")]
    Unreachable(String),
    #[error("'{function}' expects {expected} arguments, got {found}")]
    Arity { function: String, expected: usize, found: usize },
    #[error("call depth exceeded {0}")]
    CallDepthExceeded(usize),
    #[error("integer division by zero")]
    DivisionByZero,
    #[error("local {0} read before it was written")]
    Uninitialized(usize),
    #[error("tangent shape mismatch: {0}")]
    TangentShape(String),
    #[error("JVP does not exist. Differential-first differentiation APIs are experimental and should not be used. ('{0}')")]
    MissingDifferential(String),
    #[error("no pullback was recorded for '{0}'")]
    MissingPullback(String),
}

impl RuntimeError {
    pub(crate) fn type_mismatch(expected: &str, found: &Value) -> Self {
        RuntimeError::TypeMismatch {
            expected: expected.to_string(),
            found: found.type_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_the_identity() {
        let mut t = Tangent::Zero;
        t.accumulate(Tangent::Float(2.0)).unwrap();
        t.accumulate(Tangent::Zero).unwrap();
        assert_eq!(t, Tangent::Float(2.0));

        let mut none = Tangent::Optional(None);
        none.accumulate(Tangent::Optional(Some(Box::new(Tangent::Float(1.0))))).unwrap();
        assert_eq!(none, Tangent::Optional(Some(Box::new(Tangent::Float(1.0)))));
    }

    #[test]
    fn aggregates_add_componentwise() {
        let mut t = Tangent::Aggregate(vec![Tangent::Float(1.0), Tangent::Zero]);
        t.accumulate(Tangent::Aggregate(vec![Tangent::Float(1.0), Tangent::Float(3.0)]))
            .unwrap();
        assert_eq!(t, Tangent::Aggregate(vec![Tangent::Float(2.0), Tangent::Float(3.0)]));
        assert!(t.accumulate(Tangent::Float(1.0)).is_err());
    }

    #[test]
    fn paths_expand_zero() {
        let mut t = Tangent::Zero;
        t.set_at(&[1, 0], &[2, 2], Tangent::Float(5.0)).unwrap();
        assert_eq!(t.project(&[1, 0]).unwrap(), Tangent::Float(5.0));
        assert_eq!(t.project(&[0]).unwrap(), Tangent::Zero);
        assert_eq!(t.take_at(&[1, 0]).unwrap(), Tangent::Float(5.0));
        assert!(t.is_zero());
    }

    #[test]
    fn values_project_by_index() {
        let mut v = Value::Tuple(vec![Value::Float(1.0), Value::Tuple(vec![Value::Int(2)])]);
        assert_eq!(v.project(&[1, 0]).unwrap(), &Value::Int(2));
        *v.project_mut(&[0]).unwrap() = Value::Float(3.0);
        assert_eq!(v.to_string(), "(3, (2))");
        assert_eq!(
            v.project(&[2]).unwrap_err(),
            RuntimeError::BadProjection { index: 2, value: "tuple of 2".into() }
        );
    }

    #[test]
    fn tangent_arithmetic() {
        let a = Tangent::Float(3.0);
        assert_eq!(a.minus(&Tangent::Float(1.0)), Tangent::Float(2.0));
        assert_eq!(Tangent::zero().plus(&a), a);
    }
}
