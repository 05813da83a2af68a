//! Differential operators.
//!
//! Every operator here is a composition of the two primitives of
//! [`DifferentiableFn`]: *forward-apply*
//! ([`value_with_differential`](DifferentiableFn::value_with_differential))
//! and *reverse-apply*
//! ([`value_with_pullback`](DifferentiableFn::value_with_pullback)).
//! Functions of two or three arguments are differentiable functions of a
//! tuple; their tangent is the tuple of argument tangents.

use num_traits::One;
use std::rc::Rc;
use tangent_core::{AdditiveArithmetic, Differentiable};

/// Reverse-mode linear map: output tangent to input tangent.
pub type Pullback<R, T> =
    Box<dyn Fn(<R as Differentiable>::TangentVector) -> <T as Differentiable>::TangentVector>;

/// Forward-mode linear map: input tangent to output tangent.
pub type Differential<T, R> =
    Box<dyn Fn(<T as Differentiable>::TangentVector) -> <R as Differentiable>::TangentVector>;

type Vjp<T, R> = dyn Fn(&T) -> (R, Pullback<R, T>);
type Jvp<T, R> = dyn Fn(&T) -> (R, Differential<T, R>);

const MISSING_JVP: &str =
    "JVP does not exist. Differential-first differentiation APIs are experimental and should not be used.";

/// A function from `T` to `R` that can be differentiated.
///
/// Implementors supply the two primitives every operator in this module
/// is built from. Each call produces a fresh linear map owning exactly
/// the intermediates it needs; dropping the map releases them.
pub trait DifferentiableFn<T: Differentiable, R: Differentiable> {
    /// Evaluates at `x`, returning the value and the pullback at `x`.
    fn value_with_pullback(&self, x: &T) -> (R, Pullback<R, T>);

    /// Evaluates at `x`, returning the value and the differential at `x`.
    fn value_with_differential(&self, x: &T) -> (R, Differential<T, R>);

    /// Evaluates at `x` without building a linear map.
    fn call(&self, x: &T) -> R {
        self.value_with_pullback(x).0
    }
}

/// A differentiable function assembled from closures.
///
/// Cloning is cheap: the closures are reference counted.
///
/// # Examples
///
/// ```
/// use autodiff::{differentiable_function, gradient, value_with_pullback};
///
/// // f(x) = x³ with a hand-written vector-Jacobian product
/// let cube = differentiable_function(|&x: &f64| (x * x * x, move |v: f64| v * 3.0 * x * x));
///
/// let (y, pb) = value_with_pullback(&2.0, &cube);
/// assert_eq!(y, 8.0);
/// assert_eq!(pb(1.0), 12.0);
/// assert_eq!(gradient(&2.0, &cube), pb(1.0));
/// ```
pub struct DifferentiableFunction<T, R>
where
    T: Differentiable,
    R: Differentiable,
{
    original: Rc<dyn Fn(&T) -> R>,
    vjp: Rc<Vjp<T, R>>,
    jvp: Option<Rc<Jvp<T, R>>>,
}

impl<T, R> Clone for DifferentiableFunction<T, R>
where
    T: Differentiable,
    R: Differentiable,
{
    fn clone(&self) -> Self {
        Self {
            original: self.original.clone(),
            vjp: self.vjp.clone(),
            jvp: self.jvp.clone(),
        }
    }
}

impl<T, R> DifferentiableFunction<T, R>
where
    T: Differentiable + 'static,
    R: Differentiable + 'static,
{
    /// Builds a function from its original body and its
    /// vector-Jacobian product.
    pub fn new<P>(
        original: impl Fn(&T) -> R + 'static,
        vjp: impl Fn(&T) -> (R, P) + 'static,
    ) -> Self
    where
        P: Fn(R::TangentVector) -> T::TangentVector + 'static,
    {
        Self {
            original: Rc::new(original),
            vjp: Rc::new(move |x: &T| {
                let (value, pullback) = vjp(x);
                (value, Box::new(pullback) as Pullback<R, T>)
            }),
            jvp: None,
        }
    }

    /// Builds a function from a vector-Jacobian product alone; the
    /// original is the value half of the product.
    pub fn from_vjp<P>(vjp: impl Fn(&T) -> (R, P) + 'static) -> Self
    where
        P: Fn(R::TangentVector) -> T::TangentVector + 'static,
    {
        let vjp: Rc<Vjp<T, R>> = Rc::new(move |x: &T| {
            let (value, pullback) = vjp(x);
            (value, Box::new(pullback) as Pullback<R, T>)
        });
        let forward = vjp.clone();
        Self {
            original: Rc::new(move |x: &T| forward(x).0),
            vjp,
            jvp: None,
        }
    }

    /// Attaches a Jacobian-vector product, enabling forward mode.
    pub fn with_jvp<D>(mut self, jvp: impl Fn(&T) -> (R, D) + 'static) -> Self
    where
        D: Fn(T::TangentVector) -> R::TangentVector + 'static,
    {
        self.jvp = Some(Rc::new(move |x: &T| {
            let (value, differential) = jvp(x);
            (value, Box::new(differential) as Differential<T, R>)
        }));
        self
    }

    /// Whether forward mode is available.
    pub fn has_jvp(&self) -> bool {
        self.jvp.is_some()
    }

    /// Composition `next ∘ self`. Differentials chain in application
    /// order; pullbacks chain in reverse.
    ///
    /// ```
    /// use autodiff::{differentiable_function, gradient};
    ///
    /// let double = differentiable_function(|&x: &f32| (2.0 * x, |v: f32| 2.0 * v));
    /// let square = differentiable_function(|&x: &f32| (x * x, move |v: f32| 2.0 * x * v));
    /// // (2x)² has derivative 8x
    /// assert_eq!(gradient(&3.0, &double.then(square)), 24.0);
    /// ```
    pub fn then<S>(self, next: DifferentiableFunction<R, S>) -> DifferentiableFunction<T, S>
    where
        S: Differentiable + 'static,
    {
        let jvp = match (self.jvp.clone(), next.jvp.clone()) {
            (Some(first), Some(second)) => {
                let jvp: Rc<Jvp<T, S>> = Rc::new(move |x: &T| {
                    let (y, df) = first(x);
                    let (z, dg) = second(&y);
                    (z, Box::new(move |t| dg(df(t))) as Differential<T, S>)
                });
                Some(jvp)
            }
            _ => None,
        };
        let (f, g) = (self.clone(), next.clone());
        let vjp: Rc<Vjp<T, S>> = Rc::new(move |x: &T| {
            let (y, pf) = (f.vjp)(x);
            let (z, pg) = (g.vjp)(&y);
            (z, Box::new(move |v| pf(pg(v))) as Pullback<S, T>)
        });
        DifferentiableFunction {
            original: Rc::new(move |x: &T| (next.original)(&(self.original)(x))),
            vjp,
            jvp,
        }
    }
}

impl<T, R> DifferentiableFn<T, R> for DifferentiableFunction<T, R>
where
    T: Differentiable,
    R: Differentiable,
{
    fn value_with_pullback(&self, x: &T) -> (R, Pullback<R, T>) {
        (self.vjp)(x)
    }

    fn value_with_differential(&self, x: &T) -> (R, Differential<T, R>) {
        match &self.jvp {
            Some(jvp) => jvp(x),
            None => panic!("{MISSING_JVP}"),
        }
    }

    fn call(&self, x: &T) -> R {
        (self.original)(x)
    }
}

/// Creates a differentiable function from a vector-Jacobian products
/// function, bypassing automatic derivation.
///
/// The returned function has no forward mode unless one is attached
/// with [`DifferentiableFunction::with_jvp`].
pub fn differentiable_function<T, R, P>(
    vjp: impl Fn(&T) -> (R, P) + 'static,
) -> DifferentiableFunction<T, R>
where
    T: Differentiable + 'static,
    R: Differentiable + 'static,
    P: Fn(R::TangentVector) -> T::TangentVector + 'static,
{
    DifferentiableFunction::from_vjp(vjp)
}

// Value and linear map

/// Forward-apply: the value and the differential of `f` at `x`.
pub fn value_with_differential<T, R, F>(x: &T, f: &F) -> (R, Differential<T, R>)
where
    T: Differentiable,
    R: Differentiable,
    F: DifferentiableFn<T, R> + ?Sized,
{
    f.value_with_differential(x)
}

/// Forward-apply for a function of two arguments.
pub fn value_with_differential2<T, U, R, F>(x: &T, y: &U, f: &F) -> (R, Differential<(T, U), R>)
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    R: Differentiable,
    F: DifferentiableFn<(T, U), R> + ?Sized,
{
    f.value_with_differential(&(x.clone(), y.clone()))
}

/// Forward-apply for a function of three arguments.
pub fn value_with_differential3<T, U, V, R, F>(
    x: &T,
    y: &U,
    z: &V,
    f: &F,
) -> (R, Differential<(T, U, V), R>)
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    V: Differentiable + Clone,
    R: Differentiable,
    F: DifferentiableFn<(T, U, V), R> + ?Sized,
{
    f.value_with_differential(&(x.clone(), y.clone(), z.clone()))
}

/// Reverse-apply: the value and the pullback of `f` at `x`.
pub fn value_with_pullback<T, R, F>(x: &T, f: &F) -> (R, Pullback<R, T>)
where
    T: Differentiable,
    R: Differentiable,
    F: DifferentiableFn<T, R> + ?Sized,
{
    f.value_with_pullback(x)
}

/// Reverse-apply for a function of two arguments.
pub fn value_with_pullback2<T, U, R, F>(x: &T, y: &U, f: &F) -> (R, Pullback<R, (T, U)>)
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    R: Differentiable,
    F: DifferentiableFn<(T, U), R> + ?Sized,
{
    f.value_with_pullback(&(x.clone(), y.clone()))
}

/// Reverse-apply for a function of three arguments.
pub fn value_with_pullback3<T, U, V, R, F>(
    x: &T,
    y: &U,
    z: &V,
    f: &F,
) -> (R, Pullback<R, (T, U, V)>)
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    V: Differentiable + Clone,
    R: Differentiable,
    F: DifferentiableFn<(T, U, V), R> + ?Sized,
{
    f.value_with_pullback(&(x.clone(), y.clone(), z.clone()))
}

// Linear map only

/// The differential of `f` at `x`.
pub fn differential<T, R, F>(x: &T, f: &F) -> Differential<T, R>
where
    T: Differentiable,
    R: Differentiable,
    F: DifferentiableFn<T, R> + ?Sized,
{
    f.value_with_differential(x).1
}

/// The differential of a two-argument `f` at `(x, y)`.
pub fn differential2<T, U, R, F>(x: &T, y: &U, f: &F) -> Differential<(T, U), R>
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    R: Differentiable,
    F: DifferentiableFn<(T, U), R> + ?Sized,
{
    value_with_differential2(x, y, f).1
}

/// The differential of a three-argument `f` at `(x, y, z)`.
pub fn differential3<T, U, V, R, F>(x: &T, y: &U, z: &V, f: &F) -> Differential<(T, U, V), R>
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    V: Differentiable + Clone,
    R: Differentiable,
    F: DifferentiableFn<(T, U, V), R> + ?Sized,
{
    value_with_differential3(x, y, z, f).1
}

/// The pullback of `f` at `x`.
pub fn pullback<T, R, F>(x: &T, f: &F) -> Pullback<R, T>
where
    T: Differentiable,
    R: Differentiable,
    F: DifferentiableFn<T, R> + ?Sized,
{
    f.value_with_pullback(x).1
}

/// The pullback of a two-argument `f` at `(x, y)`.
pub fn pullback2<T, U, R, F>(x: &T, y: &U, f: &F) -> Pullback<R, (T, U)>
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    R: Differentiable,
    F: DifferentiableFn<(T, U), R> + ?Sized,
{
    value_with_pullback2(x, y, f).1
}

/// The pullback of a three-argument `f` at `(x, y, z)`.
pub fn pullback3<T, U, V, R, F>(x: &T, y: &U, z: &V, f: &F) -> Pullback<R, (T, U, V)>
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    V: Differentiable + Clone,
    R: Differentiable,
    F: DifferentiableFn<(T, U, V), R> + ?Sized,
{
    value_with_pullback3(x, y, z, f).1
}

// Derivatives: differentials evaluated at one

/// The value of `f` at `x` and its derivative, the differential applied
/// to `1`.
pub fn value_with_derivative<T, R, F>(x: &T, f: &F) -> (R, R::TangentVector)
where
    T: Differentiable<TangentVector = T> + One,
    R: Differentiable,
    F: DifferentiableFn<T, R> + ?Sized,
{
    let (value, differential) = f.value_with_differential(x);
    (value, differential(T::one()))
}

/// Two-argument [`value_with_derivative`]: the differential applied to
/// `(1, 1)`.
pub fn value_with_derivative2<T, U, R, F>(x: &T, y: &U, f: &F) -> (R, R::TangentVector)
where
    T: Differentiable<TangentVector = T> + Clone + One,
    U: Differentiable<TangentVector = U> + Clone + One,
    R: Differentiable,
    F: DifferentiableFn<(T, U), R> + ?Sized,
{
    let (value, differential) = value_with_differential2(x, y, f);
    (value, differential((T::one(), U::one())))
}

/// Three-argument [`value_with_derivative`].
pub fn value_with_derivative3<T, U, V, R, F>(x: &T, y: &U, z: &V, f: &F) -> (R, R::TangentVector)
where
    T: Differentiable<TangentVector = T> + Clone + One,
    U: Differentiable<TangentVector = U> + Clone + One,
    V: Differentiable<TangentVector = V> + Clone + One,
    R: Differentiable,
    F: DifferentiableFn<(T, U, V), R> + ?Sized,
{
    let (value, differential) = value_with_differential3(x, y, z, f);
    (value, differential((T::one(), U::one(), V::one())))
}

/// The derivative of `f` at `x`.
pub fn derivative<T, R, F>(x: &T, f: &F) -> R::TangentVector
where
    T: Differentiable<TangentVector = T> + One,
    R: Differentiable,
    F: DifferentiableFn<T, R> + ?Sized,
{
    value_with_derivative(x, f).1
}

/// The derivative of a two-argument `f` at `(x, y)`.
pub fn derivative2<T, U, R, F>(x: &T, y: &U, f: &F) -> R::TangentVector
where
    T: Differentiable<TangentVector = T> + Clone + One,
    U: Differentiable<TangentVector = U> + Clone + One,
    R: Differentiable,
    F: DifferentiableFn<(T, U), R> + ?Sized,
{
    value_with_derivative2(x, y, f).1
}

/// The derivative of a three-argument `f` at `(x, y, z)`.
pub fn derivative3<T, U, V, R, F>(x: &T, y: &U, z: &V, f: &F) -> R::TangentVector
where
    T: Differentiable<TangentVector = T> + Clone + One,
    U: Differentiable<TangentVector = U> + Clone + One,
    V: Differentiable<TangentVector = V> + Clone + One,
    R: Differentiable,
    F: DifferentiableFn<(T, U, V), R> + ?Sized,
{
    value_with_derivative3(x, y, z, f).1
}

// Gradients: pullbacks seeded with one

/// The value of a scalar-valued `f` at `x` and its gradient, the
/// pullback applied to `1`.
///
/// ```
/// use autodiff::{differentiable_function, value_with_gradient};
///
/// let f = differentiable_function(|&(x, y): &(f64, f64)| (x * y, move |v: f64| (v * y, v * x)));
/// let (value, (dx, dy)) = value_with_gradient(&(3.0, 4.0), &f);
/// assert_eq!((value, dx, dy), (12.0, 4.0, 3.0));
/// ```
pub fn value_with_gradient<T, R, F>(x: &T, f: &F) -> (R, T::TangentVector)
where
    T: Differentiable,
    R: Differentiable<TangentVector = R> + One,
    F: DifferentiableFn<T, R> + ?Sized,
{
    let (value, pullback) = f.value_with_pullback(x);
    (value, pullback(R::one()))
}

/// Two-argument [`value_with_gradient`].
pub fn value_with_gradient2<T, U, R, F>(
    x: &T,
    y: &U,
    f: &F,
) -> (R, (T::TangentVector, U::TangentVector))
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    R: Differentiable<TangentVector = R> + One,
    F: DifferentiableFn<(T, U), R> + ?Sized,
{
    let (value, pullback) = value_with_pullback2(x, y, f);
    (value, pullback(R::one()))
}

/// Three-argument [`value_with_gradient`].
pub fn value_with_gradient3<T, U, V, R, F>(
    x: &T,
    y: &U,
    z: &V,
    f: &F,
) -> (R, (T::TangentVector, U::TangentVector, V::TangentVector))
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    V: Differentiable + Clone,
    R: Differentiable<TangentVector = R> + One,
    F: DifferentiableFn<(T, U, V), R> + ?Sized,
{
    let (value, pullback) = value_with_pullback3(x, y, z, f);
    (value, pullback(R::one()))
}

/// The gradient of a scalar-valued `f` at `x`.
pub fn gradient<T, R, F>(x: &T, f: &F) -> T::TangentVector
where
    T: Differentiable,
    R: Differentiable<TangentVector = R> + One,
    F: DifferentiableFn<T, R> + ?Sized,
{
    value_with_gradient(x, f).1
}

/// The gradient of a scalar-valued two-argument `f` at `(x, y)`.
pub fn gradient2<T, U, R, F>(x: &T, y: &U, f: &F) -> (T::TangentVector, U::TangentVector)
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    R: Differentiable<TangentVector = R> + One,
    F: DifferentiableFn<(T, U), R> + ?Sized,
{
    value_with_gradient2(x, y, f).1
}

/// The gradient of a scalar-valued three-argument `f` at `(x, y, z)`.
pub fn gradient3<T, U, V, R, F>(
    x: &T,
    y: &U,
    z: &V,
    f: &F,
) -> (T::TangentVector, U::TangentVector, V::TangentVector)
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    V: Differentiable + Clone,
    R: Differentiable<TangentVector = R> + One,
    F: DifferentiableFn<(T, U, V), R> + ?Sized,
{
    value_with_gradient3(x, y, z, f).1
}

// Curried forms: every call re-runs the primitive

/// Curried [`differential`].
pub fn differential_of<T, R, F>(f: F) -> impl Fn(&T) -> Differential<T, R>
where
    T: Differentiable,
    R: Differentiable,
    F: DifferentiableFn<T, R>,
{
    move |x: &T| differential(x, &f)
}

/// Curried [`pullback`].
pub fn pullback_of<T, R, F>(f: F) -> impl Fn(&T) -> Pullback<R, T>
where
    T: Differentiable,
    R: Differentiable,
    F: DifferentiableFn<T, R>,
{
    move |x: &T| pullback(x, &f)
}

/// Curried [`derivative`].
///
/// ```
/// use autodiff::{derivative_of, differentiable_function};
///
/// let square = differentiable_function(|&x: &f64| (x * x, move |v: f64| 2.0 * x * v))
///     .with_jvp(|&x: &f64| (x * x, move |t: f64| 2.0 * x * t));
/// let d = derivative_of(square);
/// assert_eq!(d(&1.5), 3.0);
/// assert_eq!(d(&-2.0), -4.0);
/// ```
pub fn derivative_of<T, R, F>(f: F) -> impl Fn(&T) -> R::TangentVector
where
    T: Differentiable<TangentVector = T> + One,
    R: Differentiable,
    F: DifferentiableFn<T, R>,
{
    move |x: &T| derivative(x, &f)
}

/// Curried [`value_with_derivative`].
pub fn value_with_derivative_of<T, R, F>(f: F) -> impl Fn(&T) -> (R, R::TangentVector)
where
    T: Differentiable<TangentVector = T> + One,
    R: Differentiable,
    F: DifferentiableFn<T, R>,
{
    move |x: &T| value_with_derivative(x, &f)
}

/// Curried [`gradient`].
pub fn gradient_of<T, R, F>(f: F) -> impl Fn(&T) -> T::TangentVector
where
    T: Differentiable,
    R: Differentiable<TangentVector = R> + One,
    F: DifferentiableFn<T, R>,
{
    move |x: &T| gradient(x, &f)
}

/// Curried [`gradient2`].
pub fn gradient_of2<T, U, R, F>(f: F) -> impl Fn(&T, &U) -> (T::TangentVector, U::TangentVector)
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    R: Differentiable<TangentVector = R> + One,
    F: DifferentiableFn<(T, U), R>,
{
    move |x: &T, y: &U| gradient2(x, y, &f)
}

/// Curried [`value_with_gradient`].
pub fn value_with_gradient_of<T, R, F>(f: F) -> impl Fn(&T) -> (R, T::TangentVector)
where
    T: Differentiable,
    R: Differentiable<TangentVector = R> + One,
    F: DifferentiableFn<T, R>,
{
    move |x: &T| value_with_gradient(x, &f)
}

/// Curried [`value_with_gradient2`].
pub fn value_with_gradient_of2<T, U, R, F>(
    f: F,
) -> impl Fn(&T, &U) -> (R, (T::TangentVector, U::TangentVector))
where
    T: Differentiable + Clone,
    U: Differentiable + Clone,
    R: Differentiable<TangentVector = R> + One,
    F: DifferentiableFn<(T, U), R>,
{
    move |x: &T, y: &U| value_with_gradient2(x, y, &f)
}

// Escape hatches

/// Returns `x` unchanged; its value does not contribute to derivatives.
///
/// Outside a derivative program this is the identity. Inside the
/// engine the corresponding instruction cuts derivative flow, see
/// [`Instr::WithoutDerivative`](crate::engine::Instr::WithoutDerivative).
pub fn without_derivative<T>(x: T) -> T {
    x
}

/// Applies `body` to `x` with derivative flow through `x` cut.
pub fn without_derivative_in<T, R>(x: T, body: impl FnOnce(T) -> R) -> R {
    body(x)
}

/// The identity as a differentiable function with zero derivative.
///
/// ```
/// use autodiff::{gradient, without_derivative_function};
///
/// let constant = without_derivative_function::<f64>();
/// assert_eq!(gradient(&5.0, &constant), 0.0);
/// ```
pub fn without_derivative_function<T>() -> DifferentiableFunction<T, T>
where
    T: Differentiable + Clone + 'static,
{
    DifferentiableFunction::new(
        |x: &T| x.clone(),
        |x: &T| {
            let zero = x.zero_tangent_vector();
            (x.clone(), move |_: T::TangentVector| zero.clone())
        },
    )
    .with_jvp(|x: &T| {
        let zero = x.zero_tangent_vector();
        (x.clone(), move |_: T::TangentVector| zero.clone())
    })
}

/// The identity whose pullback hands the incoming gradient to `hook`
/// before passing it on.
///
/// ```
/// use autodiff::{gradient, with_derivative};
///
/// // Clip gradients to [-1, 1]
/// let clip = with_derivative::<f64>(|g: &mut f64| *g = g.clamp(-1.0, 1.0));
/// assert_eq!(gradient(&3.0, &clip.clone().then(clip)), 1.0);
/// ```
pub fn with_derivative<T>(hook: impl Fn(&mut T::TangentVector) + 'static) -> DifferentiableFunction<T, T>
where
    T: Differentiable + Clone + 'static,
{
    let hook = Rc::new(hook);
    DifferentiableFunction::new(|x: &T| x.clone(), move |x: &T| {
        let hook = hook.clone();
        (x.clone(), move |mut v: T::TangentVector| {
            hook(&mut v);
            v
        })
    })
    .with_jvp(|x: &T| (x.clone(), |t: T::TangentVector| t))
}

/// Checkpointing: `body` recomputed inside its own pullback.
///
/// The forward pass computes only the value. The pullback re-runs the
/// forward pass of `body` at the captured input and applies the fresh
/// pullback, so forward intermediates are never retained between the
/// passes. Values and gradients equal those of `body`.
///
/// ```
/// use autodiff::{differentiable_function, value_with_gradient, with_recomputation_in_pullbacks};
///
/// let square = differentiable_function(|&x: &f32| (x * x, move |v: f32| 2.0 * x * v));
/// let checkpointed = with_recomputation_in_pullbacks(square.clone());
/// assert_eq!(value_with_gradient(&3.0, &checkpointed), value_with_gradient(&3.0, &square));
/// ```
pub fn with_recomputation_in_pullbacks<T, U, F>(body: F) -> DifferentiableFunction<T, U>
where
    T: Differentiable + Clone + 'static,
    U: Differentiable + 'static,
    F: DifferentiableFn<T, U> + 'static,
{
    let body = Rc::new(body);
    let original = {
        let body = body.clone();
        move |x: &T| body.call(x)
    };
    let jvp = {
        let body = body.clone();
        move |x: &T| body.value_with_differential(x)
    };
    DifferentiableFunction::new(original, move |x: &T| {
        let value = body.call(x);
        let (x, body) = (x.clone(), body.clone());
        (value, move |v: U::TangentVector| pullback(&x, &*body)(v))
    })
    .with_jvp(jvp)
}

/// Transposition of linear maps.
///
/// # Panics
///
/// Always. Transposition is not available.
#[deprecated(note = "transpose(of:) is unavailable")]
pub fn transpose<T, R>(_body: impl Fn(T) -> R) -> Box<dyn Fn(R) -> T> {
    panic!("transpose(of:) is unavailable: linear maps cannot be transposed")
}

/// Differential operators in method position, on the point of
/// evaluation.
///
/// ```
/// use autodiff::{differentiable_function, DifferentialOperators};
///
/// let square = differentiable_function(|&x: &f64| (x * x, move |v: f64| 2.0 * x * v));
/// assert_eq!(4.0_f64.gradient_in(&square), 8.0);
/// assert_eq!(4.0_f64.value_with_gradient_in(&square), (16.0, 8.0));
/// ```
pub trait DifferentialOperators: Differentiable + Sized {
    /// [`value_with_pullback`] at `self`.
    fn value_with_pullback_in<R, F>(&self, f: &F) -> (R, Pullback<R, Self>)
    where
        R: Differentiable,
        F: DifferentiableFn<Self, R> + ?Sized,
    {
        f.value_with_pullback(self)
    }

    /// [`pullback`] at `self`.
    fn pullback_in<R, F>(&self, f: &F) -> Pullback<R, Self>
    where
        R: Differentiable,
        F: DifferentiableFn<Self, R> + ?Sized,
    {
        f.value_with_pullback(self).1
    }

    /// [`gradient`] at `self`.
    fn gradient_in<R, F>(&self, f: &F) -> Self::TangentVector
    where
        R: Differentiable<TangentVector = R> + One,
        F: DifferentiableFn<Self, R> + ?Sized,
    {
        gradient(self, f)
    }

    /// [`value_with_gradient`] at `self`.
    fn value_with_gradient_in<R, F>(&self, f: &F) -> (R, Self::TangentVector)
    where
        R: Differentiable<TangentVector = R> + One,
        F: DifferentiableFn<Self, R> + ?Sized,
    {
        value_with_gradient(self, f)
    }
}

impl<T: Differentiable> DifferentialOperators for T {}

/// Sums the tangents a value received along several uses.
///
/// Used when a pullback fans a value out to several consumers.
pub fn accumulate<V: AdditiveArithmetic>(tangents: impl IntoIterator<Item = V>) -> V {
    V::sum_all(tangents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn cube() -> DifferentiableFunction<f64, f64> {
        differentiable_function(|&x: &f64| (x * x * x, move |v: f64| v * 3.0 * x * x))
            .with_jvp(|&x: &f64| (x * x * x, move |t: f64| t * 3.0 * x * x))
    }

    fn product() -> DifferentiableFunction<(f64, f64), f64> {
        differentiable_function(|&(x, y): &(f64, f64)| (x * y, move |v: f64| (v * y, v * x)))
            .with_jvp(|&(x, y): &(f64, f64)| (x * y, move |(dx, dy): (f64, f64)| dx * y + x * dy))
    }

    #[test]
    fn gradient_equals_pullback_of_one() {
        let f = cube();
        for x in [-2.0, 0.5, 3.0] {
            assert_eq!(gradient(&x, &f), pullback(&x, &f)(1.0));
        }
    }

    #[test]
    fn derivative_feeds_one_into_the_differential() {
        let f = cube();
        assert_eq!(value_with_derivative(&2.0, &f), (8.0, 12.0));
        assert_eq!(derivative(&2.0, &f), differential(&2.0, &f)(1.0));
    }

    #[test]
    fn two_argument_operators() {
        let f = product();
        assert_eq!(gradient2(&3.0, &4.0, &f), (4.0, 3.0));
        assert_eq!(value_with_gradient2(&3.0, &4.0, &f), (12.0, (4.0, 3.0)));
        // Directional derivative along (1, 1) is x + y.
        assert_eq!(derivative2(&3.0, &4.0, &f), 7.0);
        assert_eq!(differential2(&3.0, &4.0, &f)((1.0, 0.0)), 4.0);
        assert_eq!(pullback2(&3.0, &4.0, &f)(2.0), (8.0, 6.0));
    }

    #[test]
    fn three_argument_operators() {
        let f = differentiable_function(|&(x, y, z): &(f64, f64, f64)| {
            (x * y * z, move |v: f64| (v * y * z, v * x * z, v * x * y))
        })
        .with_jvp(|&(x, y, z): &(f64, f64, f64)| {
            (x * y * z, move |(dx, dy, dz): (f64, f64, f64)| dx * y * z + x * dy * z + x * y * dz)
        });
        assert_eq!(gradient3(&1.0, &2.0, &3.0, &f), (6.0, 3.0, 2.0));
        assert_eq!(value_with_derivative3(&1.0, &2.0, &3.0, &f), (6.0, 11.0));
        assert_eq!(pullback3(&1.0, &2.0, &3.0, &f)(1.0), (6.0, 3.0, 2.0));
        assert_eq!(derivative3(&1.0, &2.0, &3.0, &f), 11.0);
    }

    #[test]
    fn curried_forms_reevaluate_per_call() {
        let calls = Rc::new(Cell::new(0));
        let counted = {
            let calls = calls.clone();
            differentiable_function(move |&x: &f64| {
                calls.set(calls.get() + 1);
                (x * x, move |v: f64| 2.0 * x * v)
            })
        };
        let g = gradient_of(counted);
        assert_eq!(g(&1.0), 2.0);
        assert_eq!(g(&5.0), 10.0);
        assert_eq!(calls.get(), 2);

        let vg = value_with_gradient_of2(product());
        assert_eq!(vg(&2.0, &5.0), (10.0, (5.0, 2.0)));
        assert_eq!(gradient_of2(product())(&2.0, &5.0), (5.0, 2.0));
        assert_eq!(value_with_derivative_of(cube())(&1.0), (1.0, 3.0));
        assert_eq!(pullback_of(cube())(&1.0)(2.0), 6.0);
        assert_eq!(differential_of(cube())(&1.0)(2.0), 6.0);
    }

    #[test]
    fn composition_applies_chain_rule() {
        let sin = differentiable_function(|&x: &f64| (x.sin(), move |v: f64| v * x.cos()))
            .with_jvp(|&x: &f64| (x.sin(), move |t: f64| t * x.cos()));
        let f = cube().then(sin);
        let x: f64 = 0.5;
        let expected = (x * x * x).cos() * 3.0 * x * x;
        assert!((gradient(&x, &f) - expected).abs() < 1e-12);
        assert!((derivative(&x, &f) - expected).abs() < 1e-12);
        assert_eq!(f.call(&x), (x * x * x).sin());
    }

    #[test]
    #[should_panic(expected = "JVP does not exist")]
    fn forward_mode_without_jvp_is_fatal() {
        let f = differentiable_function(|&x: &f32| (x, |v: f32| v));
        let _ = derivative(&1.0, &f);
    }

    #[test]
    fn recomputation_defers_forward_work_to_the_pullback() {
        let forward_runs = Rc::new(Cell::new(0));
        let body = {
            let forward_runs = forward_runs.clone();
            differentiable_function(move |&x: &f64| {
                forward_runs.set(forward_runs.get() + 1);
                (x * x * x, move |v: f64| v * 3.0 * x * x)
            })
        };
        let checkpointed = with_recomputation_in_pullbacks(body.clone());

        let (value, pb) = value_with_pullback(&2.0, &checkpointed);
        assert_eq!(value, 8.0);
        assert_eq!(forward_runs.get(), 1);
        assert_eq!(pb(1.0), 12.0);
        assert_eq!(forward_runs.get(), 2);
        assert_eq!(pb(2.0), 24.0);
        assert_eq!(forward_runs.get(), 3);

        assert_eq!(
            value_with_gradient(&-1.5, &checkpointed),
            value_with_gradient(&-1.5, &body)
        );
    }

    #[test]
    fn with_derivative_hook_sees_the_gradient() {
        let seen = Rc::new(Cell::new(0.0));
        let hook = {
            let seen = seen.clone();
            with_derivative::<f64>(move |g: &mut f64| {
                seen.set(*g);
                *g *= 10.0;
            })
        };
        let f = cube().then(hook);
        assert_eq!(gradient(&1.0, &f), 30.0);
        assert_eq!(seen.get(), 1.0);
    }

    #[test]
    fn without_derivative_keeps_values() {
        assert_eq!(without_derivative(4.0), 4.0);
        assert_eq!(without_derivative_in(2.0, |x: f64| x * 3.0), 6.0);
        let constant = without_derivative_function::<Vec<f64>>();
        let (value, pb) = value_with_pullback(&vec![1.0, 2.0], &constant);
        assert_eq!(value, vec![1.0, 2.0]);
        let zero = pb(tangent_core::DifferentiableView::new(vec![5.0, 5.0]));
        assert_eq!(zero.base, vec![0.0, 0.0]);
    }

    #[test]
    #[allow(deprecated)]
    #[should_panic(expected = "transpose(of:) is unavailable")]
    fn transpose_is_unavailable() {
        let _ = transpose(|x: f64| 2.0 * x);
    }

    #[test]
    fn method_style_operators() {
        let f = cube();
        assert_eq!(2.0_f64.gradient_in(&f), 12.0);
        let (value, pb) = 2.0_f64.value_with_pullback_in(&f);
        assert_eq!((value, pb(1.0)), (8.0, 12.0));
        assert_eq!(2.0_f64.pullback_in(&f)(0.5), 6.0);
    }

    #[test]
    fn accumulate_sums_fan_out() {
        assert_eq!(accumulate(vec![1.0_f64, 2.0, 3.0]), 6.0);
        assert_eq!(accumulate(Vec::<f32>::new()), 0.0);
    }
}
