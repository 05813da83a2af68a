//! Typed handles over engine derivatives.
//!
//! [`Compiled`], [`Compiled2`] and [`Compiled3`] implement
//! [`DifferentiableFn`] for functions of one, two and three arguments, so
//! every operator in [`crate::operators`] accepts them. Runtime errors
//! of the engine become panics here.

use super::value::{RuntimeError, Tangent, Value};
use super::Derivative;
use crate::operators::{Differential, DifferentiableFn, Pullback};
use crate::tracked::Tracked;
use num_traits::{Float, NumCast};
use std::marker::PhantomData;
use tangent_core::{Differentiable, OptionalTangent};

/// A Rust type with an engine representation for values and tangents.
pub trait EngineValue: Differentiable + Clone + 'static {
    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, RuntimeError>;

    fn tangent_to_engine(tangent: &Self::TangentVector) -> Tangent;

    /// Converts an engine tangent at the point `at`. A shape-free zero
    /// becomes `at.zero_tangent_vector()`.
    fn tangent_from_engine(tangent: Tangent, at: &Self) -> Result<Self::TangentVector, RuntimeError>;
}

fn shape_error(expected: &str, found: &Tangent) -> RuntimeError {
    RuntimeError::TangentShape(format!("expected {expected}, got {found:?}"))
}

impl EngineValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        value.as_float()
    }

    fn tangent_to_engine(tangent: &f64) -> Tangent {
        Tangent::Float(*tangent)
    }

    fn tangent_from_engine(tangent: Tangent, _at: &f64) -> Result<f64, RuntimeError> {
        tangent.as_float()
    }
}

impl EngineValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float(<f64 as From<f32>>::from(*self))
    }

    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        Ok(value.as_float()? as f32)
    }

    fn tangent_to_engine(tangent: &f32) -> Tangent {
        Tangent::Float(<f64 as From<f32>>::from(*tangent))
    }

    fn tangent_from_engine(tangent: Tangent, _at: &f32) -> Result<f32, RuntimeError> {
        Ok(tangent.as_float()? as f32)
    }
}

fn to_f64<T: Float>(x: T) -> f64 {
    x.to_f64().unwrap_or(f64::NAN)
}

fn from_f64<T: Float>(x: f64) -> Result<T, RuntimeError> {
    <T as NumCast>::from(x).ok_or_else(|| RuntimeError::TypeMismatch {
        expected: std::any::type_name::<T>().to_string(),
        found: x.to_string(),
    })
}

impl<T: Float + 'static> EngineValue for Tracked<T> {
    fn to_value(&self) -> Value {
        Value::Float(to_f64(self.value()))
    }

    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        Ok(Tracked::new(from_f64(value.as_float()?)?))
    }

    fn tangent_to_engine(tangent: &Tracked<T>) -> Tangent {
        Tangent::Float(to_f64(tangent.value()))
    }

    fn tangent_from_engine(tangent: Tangent, _at: &Tracked<T>) -> Result<Tracked<T>, RuntimeError> {
        Ok(Tracked::new(from_f64(tangent.as_float()?)?))
    }
}

impl<T: EngineValue> EngineValue for Option<T> {
    fn to_value(&self) -> Value {
        Value::Optional(self.as_ref().map(|v| Box::new(v.to_value())))
    }

    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Optional(inner) => inner.map(|v| T::from_value(*v)).transpose(),
            other => Err(RuntimeError::type_mismatch("Optional", &other)),
        }
    }

    fn tangent_to_engine(tangent: &OptionalTangent<T::TangentVector>) -> Tangent {
        Tangent::Optional(tangent.value.as_ref().map(|t| Box::new(T::tangent_to_engine(t))))
    }

    fn tangent_from_engine(
        tangent: Tangent,
        at: &Option<T>,
    ) -> Result<OptionalTangent<T::TangentVector>, RuntimeError> {
        match (tangent, at) {
            (Tangent::Zero, _) => Ok(at.zero_tangent_vector()),
            (Tangent::Optional(None), _) => Ok(OptionalTangent::new(None)),
            (Tangent::Optional(Some(inner)), Some(at)) => Ok(OptionalTangent::some(T::tangent_from_engine(*inner, at)?)),
            (other, _) => Err(shape_error("an optional tangent at a present value", &other)),
        }
    }
}

impl<A: EngineValue, B: EngineValue> EngineValue for (A, B) {
    fn to_value(&self) -> Value {
        Value::Tuple(vec![self.0.to_value(), self.1.to_value()])
    }

    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        let elements = match value {
            Value::Tuple(elements) => elements,
            other => return Err(RuntimeError::type_mismatch("tuple of 2", &other)),
        };
        let [a, b]: [Value; 2] = elements
            .try_into()
            .map_err(|elements| RuntimeError::type_mismatch("tuple of 2", &Value::Tuple(elements)))?;
        Ok((A::from_value(a)?, B::from_value(b)?))
    }

    fn tangent_to_engine(tangent: &(A::TangentVector, B::TangentVector)) -> Tangent {
        Tangent::Aggregate(vec![A::tangent_to_engine(&tangent.0), B::tangent_to_engine(&tangent.1)])
    }

    fn tangent_from_engine(
        tangent: Tangent,
        at: &(A, B),
    ) -> Result<(A::TangentVector, B::TangentVector), RuntimeError> {
        match tangent {
            Tangent::Zero => Ok(at.zero_tangent_vector()),
            Tangent::Aggregate(components) if components.len() == 2 => {
                let [a, b]: [Tangent; 2] = components
                    .try_into()
                    .map_err(|c| shape_error("a pair tangent", &Tangent::Aggregate(c)))?;
                Ok((A::tangent_from_engine(a, &at.0)?, B::tangent_from_engine(b, &at.1)?))
            }
            other => Err(shape_error("a pair tangent", &other)),
        }
    }
}

fn trap<V>(result: Result<V, RuntimeError>) -> V {
    result.unwrap_or_else(|err| panic!("{err}"))
}

/// The `index`-th parameter tangent of a pullback result.
fn component<T: EngineValue>(grads: &mut [Tangent], index: usize, at: &T) -> T::TangentVector {
    let tangent = grads.get_mut(index).map(std::mem::take).unwrap_or_default();
    trap(T::tangent_from_engine(tangent, at))
}

/// A checked one-argument engine function, usable with every operator.
pub struct Compiled<T, R> {
    derivative: Derivative,
    _marker: PhantomData<fn(T) -> R>,
}

/// A checked two-argument engine function.
pub struct Compiled2<T, U, R> {
    derivative: Derivative,
    _marker: PhantomData<fn(T, U) -> R>,
}

/// A checked three-argument engine function.
pub struct Compiled3<T, U, V, R> {
    derivative: Derivative,
    _marker: PhantomData<fn(T, U, V) -> R>,
}

macro_rules! compiled_common {
    ($name:ident < $($param:ident),+ >) => {
        impl<$($param),+> $name<$($param),+> {
            pub(crate) fn new(derivative: Derivative) -> Self {
                Self {
                    derivative,
                    _marker: PhantomData,
                }
            }

            /// The untyped derivative behind this handle.
            pub fn derivative(&self) -> &Derivative {
                &self.derivative
            }
        }

        impl<$($param),+> Clone for $name<$($param),+> {
            fn clone(&self) -> Self {
                Self::new(self.derivative.clone())
            }
        }
    };
}

compiled_common!(Compiled<T, R>);
compiled_common!(Compiled2<T, U, R>);
compiled_common!(Compiled3<T, U, V, R>);

impl<T: EngineValue, R: EngineValue> DifferentiableFn<T, R> for Compiled<T, R> {
    fn value_with_pullback(&self, x: &T) -> (R, Pullback<R, T>) {
        let (value, map) = trap(self.derivative.value_with_pullback(&[x.to_value()]));
        let at = x.clone();
        let pullback = move |v: R::TangentVector| {
            let mut grads = trap(map.pullback(R::tangent_to_engine(&v)));
            component(&mut grads, 0, &at)
        };
        (trap(R::from_value(value)), Box::new(pullback))
    }

    fn value_with_differential(&self, x: &T) -> (R, Differential<T, R>) {
        let (value, map) = trap(self.derivative.value_with_differential(&[x.to_value()]));
        let value = trap(R::from_value(value));
        let at = value.clone();
        let differential = move |dx: T::TangentVector| {
            let dy = trap(map.differential(&[T::tangent_to_engine(&dx)]));
            trap(R::tangent_from_engine(dy, &at))
        };
        (value, Box::new(differential))
    }

    fn call(&self, x: &T) -> R {
        trap(self.derivative.call(&[x.to_value()]).and_then(R::from_value))
    }
}

impl<T: EngineValue, U: EngineValue, R: EngineValue> DifferentiableFn<(T, U), R> for Compiled2<T, U, R> {
    fn value_with_pullback(&self, x: &(T, U)) -> (R, Pullback<R, (T, U)>) {
        let (value, map) = trap(self.derivative.value_with_pullback(&[x.0.to_value(), x.1.to_value()]));
        let at = x.clone();
        let pullback = move |v: R::TangentVector| {
            let mut grads = trap(map.pullback(R::tangent_to_engine(&v)));
            (component(&mut grads, 0, &at.0), component(&mut grads, 1, &at.1))
        };
        (trap(R::from_value(value)), Box::new(pullback))
    }

    fn value_with_differential(&self, x: &(T, U)) -> (R, Differential<(T, U), R>) {
        let (value, map) = trap(self.derivative.value_with_differential(&[x.0.to_value(), x.1.to_value()]));
        let value = trap(R::from_value(value));
        let at = value.clone();
        let differential = move |dx: (T::TangentVector, U::TangentVector)| {
            let inputs = [T::tangent_to_engine(&dx.0), U::tangent_to_engine(&dx.1)];
            trap(map.differential(&inputs).and_then(|dy| R::tangent_from_engine(dy, &at)))
        };
        (value, Box::new(differential))
    }

    fn call(&self, x: &(T, U)) -> R {
        trap(
            self.derivative
                .call(&[x.0.to_value(), x.1.to_value()])
                .and_then(R::from_value),
        )
    }
}

impl<T, U, V, R> DifferentiableFn<(T, U, V), R> for Compiled3<T, U, V, R>
where
    T: EngineValue,
    U: EngineValue,
    V: EngineValue,
    R: EngineValue,
{
    fn value_with_pullback(&self, x: &(T, U, V)) -> (R, Pullback<R, (T, U, V)>) {
        let args = [x.0.to_value(), x.1.to_value(), x.2.to_value()];
        let (value, map) = trap(self.derivative.value_with_pullback(&args));
        let at = x.clone();
        let pullback = move |v: R::TangentVector| {
            let mut grads = trap(map.pullback(R::tangent_to_engine(&v)));
            (
                component(&mut grads, 0, &at.0),
                component(&mut grads, 1, &at.1),
                component(&mut grads, 2, &at.2),
            )
        };
        (trap(R::from_value(value)), Box::new(pullback))
    }

    fn value_with_differential(&self, x: &(T, U, V)) -> (R, Differential<(T, U, V), R>) {
        let args = [x.0.to_value(), x.1.to_value(), x.2.to_value()];
        let (value, map) = trap(self.derivative.value_with_differential(&args));
        let value = trap(R::from_value(value));
        let at = value.clone();
        let differential = move |dx: (T::TangentVector, U::TangentVector, V::TangentVector)| {
            let inputs = [
                T::tangent_to_engine(&dx.0),
                U::tangent_to_engine(&dx.1),
                V::tangent_to_engine(&dx.2),
            ];
            trap(map.differential(&inputs).and_then(|dy| R::tangent_from_engine(dy, &at)))
        };
        (value, Box::new(differential))
    }
}
