use crate::{AdditiveArithmetic, Differentiable, EuclideanDifferentiable, VectorProtocol};

/// The tangent space of [`Vec<T>`]: one tangent per element.
///
/// The empty view is the additive identity, so a zero tangent can be
/// created without knowing the length of the value it belongs to.
/// Combining two non-empty views of different lengths is a programming
/// error and panics.
///
/// # Example
///
/// ```rust
/// use tangent_core::{AdditiveArithmetic, Differentiable, DifferentiableView};
///
/// let step = DifferentiableView::new(vec![1.0_f64, 2.0]);
/// assert_eq!(DifferentiableView::zero().plus(&step), step);
///
/// let mut xs = vec![10.0_f64, 20.0];
/// xs.move_along(&step);
/// assert_eq!(xs, vec![11.0, 22.0]);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DifferentiableView<T> {
    /// The per-element tangents.
    pub base: Vec<T>,
}

impl<T> DifferentiableView<T> {
    /// Wraps per-element tangents.
    pub fn new(base: Vec<T>) -> Self {
        Self { base }
    }

    /// Number of element tangents.
    pub fn len(&self) -> usize {
        self.base.len()
    }

    /// Whether this is the empty (zero) view.
    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }
}

impl<T> From<Vec<T>> for DifferentiableView<T> {
    fn from(base: Vec<T>) -> Self {
        Self { base }
    }
}

impl<T> FromIterator<T> for DifferentiableView<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            base: iter.into_iter().collect(),
        }
    }
}

fn check_counts(lhs: usize, rhs: usize) {
    assert_eq!(
        lhs, rhs,
        "Count mismatch: {lhs} and {rhs} ('DifferentiableView' tangents must have equal counts)"
    );
}

impl<T: AdditiveArithmetic> DifferentiableView<T> {
    fn zip_with(&self, other: &Self, op: impl Fn(&T, &T) -> T) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.base.iter().map(|y| op(&T::zero(), y)).collect();
        }
        check_counts(self.len(), other.len());
        self.base
            .iter()
            .zip(&other.base)
            .map(|(x, y)| op(x, y))
            .collect()
    }
}

impl<T: AdditiveArithmetic> AdditiveArithmetic for DifferentiableView<T> {
    fn zero() -> Self {
        Self { base: Vec::new() }
    }

    fn plus(&self, other: &Self) -> Self {
        self.zip_with(other, T::plus)
    }

    fn minus(&self, other: &Self) -> Self {
        self.zip_with(other, T::minus)
    }
}

fn move_elements<T: Differentiable>(elements: &mut [T], direction: &DifferentiableView<T::TangentVector>) {
    if direction.is_empty() {
        return;
    }
    check_counts(elements.len(), direction.len());
    for (x, step) in elements.iter_mut().zip(&direction.base) {
        x.move_along(step);
    }
}

impl<T: Differentiable> Differentiable for DifferentiableView<T> {
    type TangentVector = DifferentiableView<T::TangentVector>;

    fn move_along(&mut self, direction: &Self::TangentVector) {
        move_elements(&mut self.base, direction);
    }

    fn zero_tangent_vector(&self) -> Self::TangentVector {
        self.base.iter().map(|x| x.zero_tangent_vector()).collect()
    }
}

impl<T: EuclideanDifferentiable> EuclideanDifferentiable for DifferentiableView<T> {
    fn differentiable_vector_view(&self) -> Self::TangentVector {
        self.base
            .iter()
            .map(|x| x.differentiable_vector_view())
            .collect()
    }
}

impl<T: VectorProtocol> VectorProtocol for DifferentiableView<T> {
    type VectorSpaceScalar = T::VectorSpaceScalar;

    fn adding_scalar(&self, x: &Self::VectorSpaceScalar) -> Self {
        self.base.iter().map(|e| e.adding_scalar(x)).collect()
    }

    fn subtracting_scalar(&self, x: &Self::VectorSpaceScalar) -> Self {
        self.base.iter().map(|e| e.subtracting_scalar(x)).collect()
    }

    fn scaled(&self, scale: &Self::VectorSpaceScalar) -> Self {
        self.base.iter().map(|e| e.scaled(scale)).collect()
    }
}

impl<T: Differentiable> Differentiable for Vec<T> {
    type TangentVector = DifferentiableView<T::TangentVector>;

    fn move_along(&mut self, direction: &Self::TangentVector) {
        move_elements(self, direction);
    }

    fn zero_tangent_vector(&self) -> Self::TangentVector {
        self.iter().map(|x| x.zero_tangent_vector()).collect()
    }
}

impl<T: EuclideanDifferentiable> EuclideanDifferentiable for Vec<T> {
    fn differentiable_vector_view(&self) -> Self::TangentVector {
        self.iter().map(|x| x.differentiable_vector_view()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_view_is_the_additive_identity() {
        let v = DifferentiableView::new(vec![1.0_f32, 2.0, 3.0]);
        assert_eq!(DifferentiableView::zero().plus(&v), v);
        assert_eq!(v.plus(&DifferentiableView::zero()), v);
        assert_eq!(
            DifferentiableView::zero().minus(&v),
            DifferentiableView::new(vec![-1.0, -2.0, -3.0])
        );
    }

    #[test]
    fn views_add_elementwise() {
        let a = DifferentiableView::new(vec![1.0_f64, 2.0]);
        let b = DifferentiableView::new(vec![0.5_f64, 0.5]);
        assert_eq!(a.plus(&b).base, vec![1.5, 2.5]);
        assert_eq!(a.scaled(&2.0).base, vec![2.0, 4.0]);
    }

    #[test]
    #[should_panic(expected = "Count mismatch: 2 and 3")]
    fn mismatched_counts_panic() {
        let a = DifferentiableView::new(vec![1.0_f64, 2.0]);
        let b = DifferentiableView::new(vec![1.0_f64, 2.0, 3.0]);
        let _ = a.plus(&b);
    }

    #[test]
    fn zero_tangent_vector_is_instance_sized() {
        let xs = vec![vec![1.0_f32], vec![2.0, 3.0]];
        let zero = xs.zero_tangent_vector();
        assert_eq!(zero.len(), 2);
        assert_eq!(zero.base[1].base, vec![0.0, 0.0]);
    }

    #[test]
    fn moving_along_empty_view_is_noop() {
        let mut xs = vec![1.0_f64, 2.0];
        xs.move_along(&DifferentiableView::zero());
        assert_eq!(xs, vec![1.0, 2.0]);
    }

    #[test]
    fn vector_view_of_vec_is_elementwise() {
        let xs = vec![(1.0_f32,), (2.0_f32,)];
        assert_eq!(xs.differentiable_vector_view().base, vec![(1.0,), (2.0,)]);
    }
}
