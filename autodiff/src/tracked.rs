use crate::live::LiveToken;
use num_traits::{Float, One, Zero};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};
use tangent_core::{
    AdditiveArithmetic, Differentiable, EuclideanDifferentiable, PointwiseMultiplicative,
    VectorProtocol,
};

/// A leak-counted scalar for testing derivative memory discipline.
///
/// Each `Tracked` value holds a [`LiveToken`], so
/// [`with_leak_checking`](crate::live::with_leak_checking) detects any
/// tracked value that a pullback retains after being dropped (or
/// releases twice).
///
/// # Examples
///
/// ```
/// use autodiff::{differentiable_function, gradient, Tracked};
/// use autodiff::live::with_leak_checking;
///
/// with_leak_checking(|| {
///     // f(x) = x * x
///     let square = differentiable_function(|x: &Tracked<f32>| {
///         let x = x.clone();
///         let y = x.clone() * x.clone();
///         (y, move |v: Tracked<f32>| v * x.clone() * Tracked::new(2.0))
///     });
///     assert_eq!(gradient(&Tracked::new(3.0), &square), Tracked::new(6.0));
/// });
/// ```
pub struct Tracked<T> {
    value: T,
    _token: LiveToken,
}

impl<T: Float> Tracked<T> {
    /// Wraps a scalar.
    pub fn new(value: T) -> Self {
        Self {
            value,
            _token: LiveToken::new(),
        }
    }

    /// The wrapped scalar.
    pub fn value(&self) -> T {
        self.value
    }

    fn map(&self, f: impl FnOnce(T) -> T) -> Self {
        Self::new(f(self.value))
    }

    fn zip(&self, other: &Self, f: impl FnOnce(T, T) -> T) -> Self {
        Self::new(f(self.value, other.value))
    }
}

impl<T: Float> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self::new(self.value)
    }
}

impl<T: Float> From<T> for Tracked<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Float + fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&self.value).finish()
    }
}

impl<T: Float + fmt::Display> fmt::Display for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.value, f)
    }
}

impl<T: Float> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Float> PartialOrd for Tracked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $assign_trait:ident, $assign_method:ident, $op:tt) => {
        impl<T: Float> $trait for Tracked<T> {
            type Output = Tracked<T>;

            fn $method(self, rhs: Tracked<T>) -> Tracked<T> {
                self.zip(&rhs, |a, b| a $op b)
            }
        }

        impl<'a, T: Float> $trait<&'a Tracked<T>> for &'a Tracked<T> {
            type Output = Tracked<T>;

            fn $method(self, rhs: &'a Tracked<T>) -> Tracked<T> {
                self.zip(rhs, |a, b| a $op b)
            }
        }

        impl<T: Float> $assign_trait for Tracked<T> {
            fn $assign_method(&mut self, rhs: Tracked<T>) {
                self.value = self.value $op rhs.value;
            }
        }
    };
}

impl_binary_op!(Add, add, AddAssign, add_assign, +);
impl_binary_op!(Sub, sub, SubAssign, sub_assign, -);
impl_binary_op!(Mul, mul, MulAssign, mul_assign, *);

impl<T: Float> Div for Tracked<T> {
    type Output = Tracked<T>;

    fn div(self, rhs: Tracked<T>) -> Tracked<T> {
        self.zip(&rhs, |a, b| a / b)
    }
}

impl<T: Float> Neg for Tracked<T> {
    type Output = Tracked<T>;

    fn neg(self) -> Tracked<T> {
        self.map(|a| -a)
    }
}

impl<T: Float> Zero for Tracked<T> {
    fn zero() -> Self {
        Self::new(T::zero())
    }

    fn is_zero(&self) -> bool {
        self.value.is_zero()
    }
}

impl<T: Float> One for Tracked<T> {
    fn one() -> Self {
        Self::new(T::one())
    }
}

impl<T: Float> AdditiveArithmetic for Tracked<T> {
    fn zero() -> Self {
        Self::new(T::zero())
    }

    fn plus(&self, other: &Self) -> Self {
        self.zip(other, |a, b| a + b)
    }

    fn minus(&self, other: &Self) -> Self {
        self.zip(other, |a, b| a - b)
    }
}

impl<T: Float> Differentiable for Tracked<T> {
    type TangentVector = Tracked<T>;

    fn move_along(&mut self, direction: &Self) {
        self.value = self.value + direction.value;
    }

    fn zero_tangent_vector(&self) -> Self {
        Self::new(T::zero())
    }
}

impl<T: Float> EuclideanDifferentiable for Tracked<T> {
    fn differentiable_vector_view(&self) -> Self {
        self.clone()
    }
}

impl<T: Float> VectorProtocol for Tracked<T> {
    type VectorSpaceScalar = Tracked<T>;

    fn adding_scalar(&self, x: &Self) -> Self {
        self.plus(x)
    }

    fn subtracting_scalar(&self, x: &Self) -> Self {
        self.minus(x)
    }

    fn scaled(&self, scale: &Self) -> Self {
        self.zip(scale, |a, b| a * b)
    }
}

impl<T: Float> PointwiseMultiplicative for Tracked<T> {
    fn one() -> Self {
        Self::new(T::one())
    }

    fn reciprocal(&self) -> Self {
        self.map(T::recip)
    }

    fn pointwise_mul(&self, other: &Self) -> Self {
        self.zip(other, |a, b| a * b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{live_allocations, with_leak_checking};

    #[test]
    fn tracked_values_are_counted() {
        let before = live_allocations();
        let x = Tracked::new(1.0_f64);
        let y = x.clone() + Tracked::new(2.0);
        assert_eq!(y.value(), 3.0);
        assert_eq!(live_allocations(), before + 2);
        drop((x, y));
        assert_eq!(live_allocations(), before);
    }

    #[test]
    fn arithmetic_does_not_leak() {
        with_leak_checking(|| {
            let x = Tracked::new(2.0_f32);
            let y = (x.clone() * x.clone() - Tracked::new(1.0)) / Tracked::new(3.0);
            assert_eq!(y, Tracked::new(1.0));
            assert_eq!(-y, Tracked::new(-1.0));
            assert_eq!(&x + &x, Tracked::new(4.0));
        });
    }

    #[test]
    fn compound_assignment_works() {
        let mut x = Tracked::new(3.0_f64);
        x *= Tracked::new(2.0);
        x -= Tracked::new(1.0);
        x += Tracked::new(0.5);
        assert_eq!(x.value(), 5.5);
    }

    #[test]
    fn capabilities_follow_the_scalar() {
        let x = Tracked::new(4.0_f64);
        assert_eq!(x.reciprocal(), Tracked::new(0.25));
        assert_eq!(x.scaled(&Tracked::new(0.5)), Tracked::new(2.0));
        assert_eq!(x.moved(&Tracked::new(1.0)), Tracked::new(5.0));
        assert_eq!(<Tracked<f64> as AdditiveArithmetic>::zero(), Tracked::new(0.0));
        assert!(x > Tracked::new(3.0));
    }
}
