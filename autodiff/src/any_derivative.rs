//! A type-erased derivative.
//!
//! [`AnyDerivative`] holds either a concrete tangent of some type or an
//! opaque zero that adapts to whatever it is combined with. It lets
//! heterogeneous code (protocol witnesses, erased containers) pass
//! derivatives around without naming their type.

use crate::operators::{differentiable_function, DifferentiableFunction};
use std::any::{type_name, Any};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use tangent_core::{AdditiveArithmetic, Differentiable, EuclideanDifferentiable};

/// Errors from combining erased derivatives of different types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnyDerivativeError {
    /// Two concrete derivatives of different types met.
    #[error("Derivative type mismatch: {lhs} and {rhs}")]
    TypeMismatch {
        /// Type of the left operand.
        lhs: &'static str,
        /// Type of the right operand.
        rhs: &'static str,
    },
}

type Boxed = Box<dyn DerivativeBox>;

trait DerivativeBox {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
    fn clone_box(&self) -> Boxed;
    fn debug_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
    fn eq_box(&self, other: &dyn DerivativeBox) -> Result<bool, AnyDerivativeError>;
    fn plus_box(&self, other: &dyn DerivativeBox) -> Result<Boxed, AnyDerivativeError>;
    fn minus_box(&self, other: &dyn DerivativeBox) -> Result<Boxed, AnyDerivativeError>;
    fn negated_box(&self) -> Boxed;
    fn zero_box(&self) -> Boxed;
    fn move_box(&mut self, direction: &dyn DerivativeBox) -> Result<(), AnyDerivativeError>;
}

struct Concrete<T>(T);

impl<T: 'static> Concrete<T> {
    fn unbox<'a>(&self, other: &'a dyn DerivativeBox) -> Result<&'a T, AnyDerivativeError> {
        other
            .as_any()
            .downcast_ref::<T>()
            .ok_or(AnyDerivativeError::TypeMismatch {
                lhs: type_name::<T>(),
                rhs: other.type_name(),
            })
    }
}

impl<T> DerivativeBox for Concrete<T>
where
    T: Differentiable<TangentVector = T> + AdditiveArithmetic + fmt::Debug + 'static,
{
    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn clone_box(&self) -> Boxed {
        Box::new(Concrete(self.0.clone()))
    }

    fn debug_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }

    fn eq_box(&self, other: &dyn DerivativeBox) -> Result<bool, AnyDerivativeError> {
        Ok(self.0 == *self.unbox(other)?)
    }

    fn plus_box(&self, other: &dyn DerivativeBox) -> Result<Boxed, AnyDerivativeError> {
        Ok(Box::new(Concrete(self.0.plus(self.unbox(other)?))))
    }

    fn minus_box(&self, other: &dyn DerivativeBox) -> Result<Boxed, AnyDerivativeError> {
        Ok(Box::new(Concrete(self.0.minus(self.unbox(other)?))))
    }

    fn negated_box(&self) -> Boxed {
        Box::new(Concrete(self.0.negated()))
    }

    fn zero_box(&self) -> Boxed {
        Box::new(Concrete(self.0.zero_tangent_vector()))
    }

    fn move_box(&mut self, direction: &dyn DerivativeBox) -> Result<(), AnyDerivativeError> {
        let direction = self.unbox(direction)?;
        self.0.move_along(direction);
        Ok(())
    }
}

/// Stands in for the value of an opaque zero in [`AnyDerivative::base`].
struct OpaqueZero;

enum Repr {
    Zero,
    Concrete(Boxed),
}

/// A derivative whose concrete type is erased.
///
/// Arithmetic between two concrete derivatives requires them to have
/// the same type; the panicking operators report a mismatch as
/// `Derivative type mismatch: A and B`, the `try_*` forms return
/// [`AnyDerivativeError`]. The opaque zero is the identity for
/// addition against any concrete derivative.
///
/// # Examples
///
/// ```
/// use autodiff::AnyDerivative;
///
/// let x = AnyDerivative::new(2.0_f64);
/// let sum = x.clone() + AnyDerivative::zero() + x;
/// assert_eq!(sum.downcast_ref::<f64>(), Some(&4.0));
/// assert!((AnyDerivative::zero() - AnyDerivative::zero()).is_zero());
/// ```
pub struct AnyDerivative {
    repr: Repr,
}

impl AnyDerivative {
    /// Erases a concrete derivative.
    pub fn new<T>(value: T) -> Self
    where
        T: Differentiable<TangentVector = T> + AdditiveArithmetic + fmt::Debug + 'static,
    {
        Self {
            repr: Repr::Concrete(Box::new(Concrete(value))),
        }
    }

    /// The opaque zero.
    pub fn zero() -> Self {
        Self { repr: Repr::Zero }
    }

    /// Whether this is the opaque zero. A concrete zero is not.
    pub fn is_zero(&self) -> bool {
        matches!(self.repr, Repr::Zero)
    }

    /// The underlying value. For the opaque zero this is a private marker
    /// that no caller can downcast to.
    pub fn base(&self) -> &dyn Any {
        match &self.repr {
            Repr::Zero => &OpaqueZero,
            Repr::Concrete(boxed) => boxed.as_any(),
        }
    }

    /// The underlying value if it is a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.base().downcast_ref()
    }

    /// Name of the underlying type.
    pub fn type_name(&self) -> &'static str {
        match &self.repr {
            Repr::Zero => type_name::<OpaqueZero>(),
            Repr::Concrete(boxed) => boxed.type_name(),
        }
    }

    /// Recovers a `T`, mapping the opaque zero to `zero`.
    ///
    /// # Panics
    ///
    /// Panics if the underlying derivative is not a `T`.
    pub fn unwrap_or_zero<T: Clone + 'static>(&self, zero: T) -> T {
        match &self.repr {
            Repr::Zero => zero,
            Repr::Concrete(boxed) => match boxed.as_any().downcast_ref::<T>() {
                Some(value) => value.clone(),
                None => panic!(
                    "{}",
                    AnyDerivativeError::TypeMismatch {
                        lhs: boxed.type_name(),
                        rhs: type_name::<T>(),
                    }
                ),
            },
        }
    }

    /// Checked addition.
    pub fn try_plus(&self, other: &Self) -> Result<Self, AnyDerivativeError> {
        let repr = match (&self.repr, &other.repr) {
            (Repr::Zero, _) => return Ok(other.clone()),
            (_, Repr::Zero) => return Ok(self.clone()),
            (Repr::Concrete(lhs), Repr::Concrete(rhs)) => Repr::Concrete(lhs.plus_box(&**rhs)?),
        };
        Ok(Self { repr })
    }

    /// Checked subtraction.
    pub fn try_minus(&self, other: &Self) -> Result<Self, AnyDerivativeError> {
        let repr = match (&self.repr, &other.repr) {
            (_, Repr::Zero) => return Ok(self.clone()),
            (Repr::Zero, Repr::Concrete(rhs)) => Repr::Concrete(rhs.negated_box()),
            (Repr::Concrete(lhs), Repr::Concrete(rhs)) => Repr::Concrete(lhs.minus_box(&**rhs)?),
        };
        Ok(Self { repr })
    }

    /// Checked [`Differentiable::move_along`].
    pub fn try_move_along(&mut self, direction: &Self) -> Result<(), AnyDerivativeError> {
        let Repr::Concrete(step) = &direction.repr else {
            return Ok(());
        };
        match &mut self.repr {
            Repr::Concrete(base) => base.move_box(&**step),
            Repr::Zero => {
                self.repr = Repr::Concrete(step.clone_box());
                Ok(())
            }
        }
    }

    /// Checked equality. Opaque zero equals only opaque zero.
    pub fn try_eq(&self, other: &Self) -> Result<bool, AnyDerivativeError> {
        match (&self.repr, &other.repr) {
            (Repr::Zero, Repr::Zero) => Ok(true),
            (Repr::Zero, _) | (_, Repr::Zero) => Ok(false),
            (Repr::Concrete(lhs), Repr::Concrete(rhs)) => lhs.eq_box(&**rhs),
        }
    }

    /// Erasure as a differentiable function; the pullback recovers the
    /// concrete tangent.
    ///
    /// ```
    /// use autodiff::{value_with_pullback, AnyDerivative};
    ///
    /// let erase = AnyDerivative::differentiable_new::<f32>();
    /// let (erased, pb) = value_with_pullback(&3.0, &erase);
    /// assert_eq!(erased.downcast_ref::<f32>(), Some(&3.0));
    /// assert_eq!(pb(AnyDerivative::new(2.0_f32)), 2.0);
    /// assert_eq!(pb(AnyDerivative::zero()), 0.0);
    /// ```
    pub fn differentiable_new<T>() -> DifferentiableFunction<T, AnyDerivative>
    where
        T: Differentiable<TangentVector = T> + AdditiveArithmetic + fmt::Debug + 'static,
    {
        differentiable_function(|x: &T| {
            let zero = x.zero_tangent_vector();
            (AnyDerivative::new(x.clone()), move |v: AnyDerivative| {
                v.unwrap_or_zero(zero.clone())
            })
        })
        .with_jvp(|x: &T| (AnyDerivative::new(x.clone()), |t: T| AnyDerivative::new(t)))
    }

    /// Addition as a differentiable function of both operands.
    pub fn differentiable_add() -> DifferentiableFunction<(AnyDerivative, AnyDerivative), AnyDerivative> {
        differentiable_function(|(lhs, rhs): &(AnyDerivative, AnyDerivative)| {
            (lhs + rhs, |v: AnyDerivative| (v.clone(), v))
        })
        .with_jvp(|(lhs, rhs): &(AnyDerivative, AnyDerivative)| {
            (lhs + rhs, |(dl, dr): (AnyDerivative, AnyDerivative)| dl + dr)
        })
    }

    /// Subtraction as a differentiable function of both operands.
    pub fn differentiable_sub() -> DifferentiableFunction<(AnyDerivative, AnyDerivative), AnyDerivative> {
        differentiable_function(|(lhs, rhs): &(AnyDerivative, AnyDerivative)| {
            (lhs - rhs, |v: AnyDerivative| (v.clone(), -v))
        })
        .with_jvp(|(lhs, rhs): &(AnyDerivative, AnyDerivative)| {
            (lhs - rhs, |(dl, dr): (AnyDerivative, AnyDerivative)| dl - dr)
        })
    }
}

fn fatal<T>(result: Result<T, AnyDerivativeError>) -> T {
    result.unwrap_or_else(|err| panic!("{err}"))
}

impl Clone for AnyDerivative {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Zero => Repr::Zero,
            Repr::Concrete(boxed) => Repr::Concrete(boxed.clone_box()),
        };
        Self { repr }
    }
}

impl Default for AnyDerivative {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for AnyDerivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Zero => f.write_str("AnyDerivative(zero)"),
            Repr::Concrete(boxed) => {
                f.write_str("AnyDerivative(")?;
                boxed.debug_fmt(f)?;
                f.write_str(")")
            }
        }
    }
}

/// # Panics
///
/// Comparing concrete derivatives of different types panics.
impl PartialEq for AnyDerivative {
    fn eq(&self, other: &Self) -> bool {
        fatal(self.try_eq(other))
    }
}

impl AdditiveArithmetic for AnyDerivative {
    fn zero() -> Self {
        AnyDerivative::zero()
    }

    fn plus(&self, other: &Self) -> Self {
        fatal(self.try_plus(other))
    }

    fn minus(&self, other: &Self) -> Self {
        fatal(self.try_minus(other))
    }

    fn negated(&self) -> Self {
        match &self.repr {
            Repr::Zero => AnyDerivative::zero(),
            Repr::Concrete(boxed) => Self {
                repr: Repr::Concrete(boxed.negated_box()),
            },
        }
    }
}

impl Differentiable for AnyDerivative {
    type TangentVector = AnyDerivative;

    fn move_along(&mut self, direction: &AnyDerivative) {
        fatal(self.try_move_along(direction))
    }

    fn zero_tangent_vector(&self) -> AnyDerivative {
        match &self.repr {
            Repr::Zero => AnyDerivative::zero(),
            Repr::Concrete(boxed) => Self {
                repr: Repr::Concrete(boxed.zero_box()),
            },
        }
    }
}

impl EuclideanDifferentiable for AnyDerivative {
    fn differentiable_vector_view(&self) -> AnyDerivative {
        self.clone()
    }
}

impl Add for AnyDerivative {
    type Output = AnyDerivative;

    fn add(self, rhs: AnyDerivative) -> AnyDerivative {
        self.plus(&rhs)
    }
}

impl<'a> Add<&'a AnyDerivative> for &'a AnyDerivative {
    type Output = AnyDerivative;

    fn add(self, rhs: &'a AnyDerivative) -> AnyDerivative {
        self.plus(rhs)
    }
}

impl Sub for AnyDerivative {
    type Output = AnyDerivative;

    fn sub(self, rhs: AnyDerivative) -> AnyDerivative {
        self.minus(&rhs)
    }
}

impl<'a> Sub<&'a AnyDerivative> for &'a AnyDerivative {
    type Output = AnyDerivative;

    fn sub(self, rhs: &'a AnyDerivative) -> AnyDerivative {
        self.minus(rhs)
    }
}

impl AddAssign for AnyDerivative {
    fn add_assign(&mut self, rhs: AnyDerivative) {
        *self = self.plus(&rhs);
    }
}

impl SubAssign for AnyDerivative {
    fn sub_assign(&mut self, rhs: AnyDerivative) {
        *self = self.minus(&rhs);
    }
}

impl Neg for AnyDerivative {
    type Output = AnyDerivative;

    fn neg(self) -> AnyDerivative {
        self.negated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{gradient, value_with_pullback};

    #[test]
    fn opaque_zero_is_an_identity() {
        let x = AnyDerivative::new(1.5_f64);
        assert_eq!((&x + &AnyDerivative::zero()).downcast_ref::<f64>(), Some(&1.5));
        assert_eq!((&AnyDerivative::zero() + &x).downcast_ref::<f64>(), Some(&1.5));
        assert_eq!((&x - &AnyDerivative::zero()).downcast_ref::<f64>(), Some(&1.5));
        assert_eq!((AnyDerivative::zero() - x).downcast_ref::<f64>(), Some(&-1.5));
    }

    #[test]
    fn opaque_zero_differs_from_concrete_zero() {
        assert_eq!(AnyDerivative::zero(), AnyDerivative::zero());
        assert_ne!(AnyDerivative::zero(), AnyDerivative::new(0.0_f32));
        assert!(AnyDerivative::zero().base().downcast_ref::<f32>().is_none());
    }

    #[test]
    fn mismatches_are_reported() {
        let a = AnyDerivative::new(1.0_f32);
        let b = AnyDerivative::new(1.0_f64);
        assert_eq!(
            a.try_plus(&b).unwrap_err(),
            AnyDerivativeError::TypeMismatch { lhs: "f32", rhs: "f64" }
        );
        assert!(a.try_minus(&b).is_err());
        assert!(a.try_eq(&b).is_err());
        assert_eq!(
            a.try_plus(&b).unwrap_err().to_string(),
            "Derivative type mismatch: f32 and f64"
        );
    }

    #[test]
    #[should_panic(expected = "Derivative type mismatch: f32 and f64")]
    fn mismatched_addition_is_fatal() {
        let _ = AnyDerivative::new(1.0_f32) + AnyDerivative::new(1.0_f64);
    }

    #[test]
    fn moving_adopts_the_direction() {
        let mut x = AnyDerivative::zero();
        x.move_along(&AnyDerivative::new(2.0_f64));
        x.move_along(&AnyDerivative::new(3.0_f64));
        x.move_along(&AnyDerivative::zero());
        assert_eq!(x.downcast_ref::<f64>(), Some(&5.0));
    }

    #[test]
    fn zero_tangent_vector_keeps_the_type() {
        let x = AnyDerivative::new(4.0_f64);
        let zero = x.zero_tangent_vector();
        assert!(!zero.is_zero());
        assert_eq!(zero.downcast_ref::<f64>(), Some(&0.0));
        assert!(AnyDerivative::zero().zero_tangent_vector().is_zero());
    }

    #[test]
    fn erased_arithmetic_is_differentiable() {
        let add = AnyDerivative::differentiable_add();
        let operands = (AnyDerivative::new(1.0_f64), AnyDerivative::new(2.0_f64));
        let (sum, pb) = value_with_pullback(&operands, &add);
        assert_eq!(sum.downcast_ref::<f64>(), Some(&3.0));
        let (dl, dr) = pb(AnyDerivative::new(1.0_f64));
        assert_eq!((dl.downcast_ref::<f64>(), dr.downcast_ref::<f64>()), (Some(&1.0), Some(&1.0)));

        let sub = AnyDerivative::differentiable_sub();
        let (dl, dr) = gradient(&operands, &sub.then(unerase()));
        assert_eq!(dl.downcast_ref::<f64>(), Some(&1.0));
        assert_eq!(dr.downcast_ref::<f64>(), Some(&-1.0));
    }

    // AnyDerivative -> f64 with the matching pullback.
    fn unerase() -> DifferentiableFunction<AnyDerivative, f64> {
        differentiable_function(|x: &AnyDerivative| {
            (x.unwrap_or_zero(0.0_f64), |v: f64| AnyDerivative::new(v))
        })
    }

    #[test]
    fn debug_shows_the_payload() {
        assert_eq!(format!("{:?}", AnyDerivative::new(1.5_f32)), "AnyDerivative(1.5)");
        assert_eq!(format!("{:?}", AnyDerivative::zero()), "AnyDerivative(zero)");
    }
}
