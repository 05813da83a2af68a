use crate::{AdditiveArithmetic, Differentiable, EuclideanDifferentiable};

/// The tangent space of [`Option<T>`].
///
/// `None` is the additive identity: it stands for "no tangent was
/// produced", e.g. because the optional was absent when the derivative
/// was taken. `None + Some(t) == Some(t)`.
///
/// # Example
///
/// ```rust
/// use tangent_core::{AdditiveArithmetic, Differentiable, OptionalTangent};
///
/// let some = OptionalTangent::new(Some(2.0_f32));
/// assert_eq!(OptionalTangent::zero().plus(&some), some);
///
/// let mut maybe: Option<f32> = Some(1.0);
/// maybe.move_along(&some);
/// assert_eq!(maybe, Some(3.0));
///
/// let mut absent: Option<f32> = None;
/// absent.move_along(&some);
/// assert_eq!(absent, None);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OptionalTangent<T> {
    /// The wrapped tangent, if any.
    pub value: Option<T>,
}

impl<T> OptionalTangent<T> {
    /// Wraps an optional tangent.
    pub fn new(value: Option<T>) -> Self {
        Self { value }
    }

    /// A tangent for a present value.
    pub fn some(value: T) -> Self {
        Self { value: Some(value) }
    }
}

impl<T> From<Option<T>> for OptionalTangent<T> {
    fn from(value: Option<T>) -> Self {
        Self { value }
    }
}

impl<T: AdditiveArithmetic> AdditiveArithmetic for OptionalTangent<T> {
    fn zero() -> Self {
        Self { value: None }
    }

    fn plus(&self, other: &Self) -> Self {
        match (&self.value, &other.value) {
            (Some(x), Some(y)) => Self::some(x.plus(y)),
            (Some(_), None) => self.clone(),
            (None, _) => other.clone(),
        }
    }

    fn minus(&self, other: &Self) -> Self {
        match (&self.value, &other.value) {
            (Some(x), Some(y)) => Self::some(x.minus(y)),
            (Some(_), None) => self.clone(),
            (None, Some(y)) => Self::some(y.negated()),
            (None, None) => Self::zero(),
        }
    }
}

impl<T> Differentiable for OptionalTangent<T>
where
    T: Differentiable<TangentVector = T> + AdditiveArithmetic,
{
    type TangentVector = Self;

    fn move_along(&mut self, direction: &Self) {
        self.plus_assign(direction);
    }

    fn zero_tangent_vector(&self) -> Self {
        Self {
            value: self.value.as_ref().map(|v| v.zero_tangent_vector()),
        }
    }
}

impl<T: Differentiable> Differentiable for Option<T> {
    type TangentVector = OptionalTangent<T::TangentVector>;

    fn move_along(&mut self, direction: &Self::TangentVector) {
        if let (Some(value), Some(step)) = (self.as_mut(), direction.value.as_ref()) {
            value.move_along(step);
        }
    }

    fn zero_tangent_vector(&self) -> Self::TangentVector {
        OptionalTangent {
            value: self.as_ref().map(|v| v.zero_tangent_vector()),
        }
    }
}

impl<T: EuclideanDifferentiable> EuclideanDifferentiable for Option<T> {
    fn differentiable_vector_view(&self) -> Self::TangentVector {
        OptionalTangent {
            value: self.as_ref().map(|v| v.differentiable_vector_view()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_the_additive_identity() {
        let t = OptionalTangent::some(1.5_f64);
        assert_eq!(OptionalTangent::zero().plus(&t), t);
        assert_eq!(t.plus(&OptionalTangent::zero()), t);
    }

    #[test]
    fn some_tangents_add() {
        let a = OptionalTangent::some(1.0_f32);
        let b = OptionalTangent::some(2.0_f32);
        assert_eq!(a.plus(&b), OptionalTangent::some(3.0));
        assert_eq!(a.minus(&b), OptionalTangent::some(-1.0));
    }

    #[test]
    fn subtracting_from_none_negates() {
        let t = OptionalTangent::some(2.0_f64);
        assert_eq!(OptionalTangent::zero().minus(&t), OptionalTangent::some(-2.0));
    }

    #[test]
    fn zero_tangent_follows_presence() {
        assert_eq!(Some(3.0_f32).zero_tangent_vector(), OptionalTangent::some(0.0));
        assert_eq!(None::<f32>.zero_tangent_vector(), OptionalTangent::zero());
    }

    #[test]
    fn move_along_none_direction_is_noop() {
        let mut x = Some(4.0_f64);
        x.move_along(&OptionalTangent::zero());
        assert_eq!(x, Some(4.0));
    }

    #[test]
    fn optional_tangent_is_self_tangent() {
        let mut t = OptionalTangent::some(1.0_f64);
        t.move_along(&OptionalTangent::some(2.0));
        assert_eq!(t, OptionalTangent::some(3.0));
    }
}
