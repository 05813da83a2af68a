//! Differentiable higher-order operations on sequences.

use crate::operators::{DifferentiableFn, DifferentiableFunction, Differential, Pullback};
use std::rc::Rc;
use tangent_core::{Differentiable, DifferentiableView};

/// Lifts an element function to a function over vectors.
///
/// The pullback of the lifted function applies each element's pullback
/// to the matching component of the incoming tangent view. An empty
/// incoming view is the zero tangent and pulls back to zero.
///
/// # Panics
///
/// The pullback panics on a non-empty tangent whose count differs from
/// the number of elements.
///
/// # Examples
///
/// ```
/// use autodiff::{differentiable_function, differentiable_map, value_with_pullback};
/// use tangent_core::DifferentiableView;
///
/// let square = differentiable_function(|&x: &f64| (x * x, move |v: f64| 2.0 * x * v));
/// let squares = differentiable_map(square);
/// let (ys, pb) = value_with_pullback(&vec![1.0, 2.0, 3.0], &squares);
/// assert_eq!(ys, vec![1.0, 4.0, 9.0]);
/// assert_eq!(pb(DifferentiableView::new(vec![1.0, 1.0, 1.0])).base, vec![2.0, 4.0, 6.0]);
/// ```
pub fn differentiable_map<E, R, F>(body: F) -> DifferentiableFunction<Vec<E>, Vec<R>>
where
    E: Differentiable + 'static,
    R: Differentiable + 'static,
    F: DifferentiableFn<E, R> + 'static,
{
    let body = Rc::new(body);
    let original = {
        let body = body.clone();
        move |xs: &Vec<E>| xs.iter().map(|x| body.call(x)).collect::<Vec<R>>()
    };
    let jvp = {
        let body = body.clone();
        move |xs: &Vec<E>| {
            let (values, differentials): (Vec<R>, Vec<Differential<E, R>>) =
                xs.iter().map(|x| body.value_with_differential(x)).unzip();
            let zeros: Vec<E::TangentVector> = xs.iter().map(|x| x.zero_tangent_vector()).collect();
            let differential = move |t: DifferentiableView<E::TangentVector>| {
                let tangents = if t.is_empty() { zeros.clone() } else { t.base };
                assert_counts(differentials.len(), tangents.len());
                differentials
                    .iter()
                    .zip(tangents)
                    .map(|(df, t)| df(t))
                    .collect::<DifferentiableView<R::TangentVector>>()
            };
            (values, differential)
        }
    };
    DifferentiableFunction::new(original, move |xs: &Vec<E>| {
        let (values, pullbacks): (Vec<R>, Vec<Pullback<R, E>>) =
            xs.iter().map(|x| body.value_with_pullback(x)).unzip();
        let pullback = move |v: DifferentiableView<R::TangentVector>| {
            if v.is_empty() {
                return DifferentiableView::new(Vec::new());
            }
            assert_counts(pullbacks.len(), v.len());
            pullbacks
                .iter()
                .zip(v.base)
                .map(|(pb, v)| pb(v))
                .collect::<DifferentiableView<E::TangentVector>>()
        };
        (values, pullback)
    })
    .with_jvp(jvp)
}

/// Lifts a combining function to a left fold over a vector with an
/// initial accumulator.
///
/// The pullback walks the per-step pullbacks in reverse. It returns the
/// element tangents in element order and the tangent of the initial
/// accumulator.
///
/// ```
/// use autodiff::{differentiable_function, differentiable_reduce, gradient};
///
/// let mul = differentiable_function(|&(a, x): &(f64, f64)| (a * x, move |v: f64| (v * x, v * a)));
/// let product = differentiable_reduce(mul);
/// let (elements, initial) = gradient(&(vec![2.0, 3.0, 4.0], 1.0), &product);
/// assert_eq!(elements.base, vec![12.0, 8.0, 6.0]);
/// assert_eq!(initial, 24.0);
/// ```
pub fn differentiable_reduce<E, R, F>(next: F) -> DifferentiableFunction<(Vec<E>, R), R>
where
    E: Differentiable + Clone + 'static,
    R: Differentiable + Clone + 'static,
    F: DifferentiableFn<(R, E), R> + 'static,
{
    let next = Rc::new(next);
    let original = {
        let next = next.clone();
        move |(xs, initial): &(Vec<E>, R)| {
            xs.iter()
                .fold(initial.clone(), |acc, x| next.call(&(acc, x.clone())))
        }
    };
    let jvp = {
        let next = next.clone();
        move |(xs, initial): &(Vec<E>, R)| {
            let mut acc = initial.clone();
            let mut differentials: Vec<Differential<(R, E), R>> = Vec::with_capacity(xs.len());
            for x in xs {
                let (value, differential) = next.value_with_differential(&(acc, x.clone()));
                acc = value;
                differentials.push(differential);
            }
            let zeros: Vec<E::TangentVector> = xs.iter().map(|x| x.zero_tangent_vector()).collect();
            let differential =
                move |(elements, initial): (DifferentiableView<E::TangentVector>, R::TangentVector)| {
                    let tangents = if elements.is_empty() {
                        zeros.clone()
                    } else {
                        elements.base
                    };
                    assert_counts(differentials.len(), tangents.len());
                    differentials
                        .iter()
                        .zip(tangents)
                        .fold(initial, |acc, (df, t)| df((acc, t)))
                };
            (acc, differential)
        }
    };
    DifferentiableFunction::new(original, move |(xs, initial): &(Vec<E>, R)| {
        let mut acc = initial.clone();
        let mut pullbacks: Vec<Pullback<R, (R, E)>> = Vec::with_capacity(xs.len());
        for x in xs {
            let (value, pullback) = next.value_with_pullback(&(acc, x.clone()));
            acc = value;
            pullbacks.push(pullback);
        }
        let pullback = move |v: R::TangentVector| {
            let mut adjoint = v;
            let mut elements = Vec::with_capacity(pullbacks.len());
            for pb in pullbacks.iter().rev() {
                let (d_acc, d_element) = pb(adjoint);
                adjoint = d_acc;
                elements.push(d_element);
            }
            elements.reverse();
            (DifferentiableView::new(elements), adjoint)
        };
        (acc, pullback)
    })
    .with_jvp(jvp)
}

fn assert_counts(expected: usize, actual: usize) {
    assert_eq!(
        expected, actual,
        "Count mismatch: {expected} and {actual} (tangent count must match element count)"
    );
}

/// Map and reduce over slices with differentiable bodies.
///
/// `differentiable_map` and `differentiable_reduce` evaluate forward
/// only; the `*_with_pullback` forms also return the pullback with
/// respect to the elements (and the initial accumulator).
///
/// ```
/// use autodiff::{differentiable_function, DifferentiableSequence};
///
/// let add = differentiable_function(|&(a, x): &(f32, f32)| (a + x, |v: f32| (v, v)));
/// let xs = [1.0_f32, 2.0, 3.0];
/// assert_eq!(xs.differentiable_reduce(0.0, &add), 6.0);
/// let (sum, pb) = xs.reduce_with_pullback(0.0, add);
/// assert_eq!(sum, 6.0);
/// let (elements, initial) = pb(1.0);
/// assert_eq!((elements.base, initial), (vec![1.0, 1.0, 1.0], 1.0));
/// ```
pub trait DifferentiableSequence<E: Differentiable> {
    /// Applies `body` to every element.
    fn differentiable_map<R, F>(&self, body: &F) -> Vec<R>
    where
        R: Differentiable,
        F: DifferentiableFn<E, R> + ?Sized;

    /// Left fold of `next` starting from `initial`.
    fn differentiable_reduce<R, F>(&self, initial: R, next: &F) -> R
    where
        R: Differentiable,
        F: DifferentiableFn<(R, E), R> + ?Sized;

    /// [`differentiable_map`] evaluated at `self`.
    fn map_with_pullback<R, F>(&self, body: F) -> (Vec<R>, Pullback<Vec<R>, Vec<E>>)
    where
        R: Differentiable + 'static,
        F: DifferentiableFn<E, R> + 'static;

    /// [`differentiable_reduce`] evaluated at `self` and `initial`.
    fn reduce_with_pullback<R, F>(&self, initial: R, next: F) -> (R, Pullback<R, (Vec<E>, R)>)
    where
        R: Differentiable + Clone + 'static,
        F: DifferentiableFn<(R, E), R> + 'static;
}

impl<E: Differentiable + Clone + 'static> DifferentiableSequence<E> for [E] {
    fn differentiable_map<R, F>(&self, body: &F) -> Vec<R>
    where
        R: Differentiable,
        F: DifferentiableFn<E, R> + ?Sized,
    {
        self.iter().map(|x| body.call(x)).collect()
    }

    fn differentiable_reduce<R, F>(&self, initial: R, next: &F) -> R
    where
        R: Differentiable,
        F: DifferentiableFn<(R, E), R> + ?Sized,
    {
        self.iter()
            .fold(initial, |acc, x| next.call(&(acc, x.clone())))
    }

    fn map_with_pullback<R, F>(&self, body: F) -> (Vec<R>, Pullback<Vec<R>, Vec<E>>)
    where
        R: Differentiable + 'static,
        F: DifferentiableFn<E, R> + 'static,
    {
        differentiable_map(body).value_with_pullback(&self.to_vec())
    }

    fn reduce_with_pullback<R, F>(&self, initial: R, next: F) -> (R, Pullback<R, (Vec<E>, R)>)
    where
        R: Differentiable + Clone + 'static,
        F: DifferentiableFn<(R, E), R> + 'static,
    {
        differentiable_reduce(next).value_with_pullback(&(self.to_vec(), initial))
    }
}
