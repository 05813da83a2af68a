#![deny(missing_docs)]
//! # tangent-core — differentiable capability traits
//!
//! **Part of the [tangent workspace](../index.html)**
//!
//! This crate defines which types can be differentiated and how their
//! derivative spaces are represented:
//!
//! - [`AdditiveArithmetic`]: `zero`, `+`, `-` (an abelian group under
//!   addition)
//! - [`Differentiable`]: a type with an associated tangent space and a
//!   way to move along it
//! - [`EuclideanDifferentiable`]: a differentiable type with a vector
//!   component viewable as a tangent
//! - [`VectorProtocol`]: scalar shifting and scaling of tangents
//! - [`PointwiseMultiplicative`]: pointwise product with `one` and
//!   `reciprocal`
//!
//! ## Quick start
//!
//! ```rust
//! use tangent_core::{AdditiveArithmetic, Differentiable};
//!
//! let mut x = 2.0_f64;
//! x.move_along(&0.5);
//! assert_eq!(x, 2.5);
//!
//! // Tangent spaces are flat: the tangent of a tangent is itself.
//! let t: <f64 as Differentiable>::TangentVector = 1.0;
//! assert_eq!(t.plus(&f64::zero()), 1.0);
//! ```
//!
//! ## Deriving conformances
//!
//! With the `derive` feature (enabled by default), structs with named
//! fields get a memberwise tangent space:
//!
//! ```rust
//! use tangent_core::{AdditiveArithmetic, Differentiable};
//!
//! #[derive(Clone, Debug, PartialEq, Differentiable)]
//! struct Dense {
//!     weight: f32,
//!     bias: f32,
//!     #[no_derivative]
//!     name: &'static str,
//! }
//!
//! let mut layer = Dense { weight: 1.0, bias: 0.0, name: "dense" };
//! layer.move_along(&DenseTangentVector { weight: 0.5, bias: -1.0 });
//! assert_eq!((layer.weight, layer.bias), (1.5, -1.0));
//! assert_eq!(DenseTangentVector::zero(), DenseTangentVector { weight: 0.0, bias: 0.0 });
//! ```
//!
//! ## Standard library implementations
//!
//! - **`f32`, `f64`**: every trait, with `TangentVector = Self`
//! - **integers**: [`AdditiveArithmetic`] only; they are not differentiable
//! - **`()`**: trivially differentiable
//! - **`(A,)` … `(A, B, C, D)`**: componentwise, tangent is the tuple of
//!   component tangents
//! - **[`Option<T>`](Option)**: tangent is [`OptionalTangent`], where
//!   `None` is the additive identity
//! - **[`Vec<T>`](Vec)**: tangent is [`DifferentiableView`], where the
//!   empty view is the additive identity
//!
//! ## Zero tangents
//!
//! [`Differentiable::zero_tangent_vector`] is required rather than
//! defaulted to `TangentVector::zero()`: the zero tangent of a
//! variable-length value has as many components as the value itself.

// Make the current crate visible as `tangent_core` for derived code
extern crate self as tangent_core;

mod array;
mod optional;

pub use array::DifferentiableView;
pub use optional::OptionalTangent;

#[cfg(feature = "derive")]
pub use tangent_core_derive::{AdditiveArithmetic, Differentiable, EuclideanDifferentiable};

/// A type with an additive identity, addition and subtraction.
///
/// Laws (not enforced by type system):
///
/// - **Identity**: `zero().plus(a) == a` and `a.plus(zero()) == a`
/// - **Associative**: `a.plus(b).plus(c) == a.plus(b.plus(c))`
/// - **Commutative**: `a.plus(b) == b.plus(a)`
/// - **Inverse**: `a.minus(a) == zero()`
///
/// # Example
///
/// ```rust
/// use tangent_core::AdditiveArithmetic;
///
/// #[derive(Clone, Copy, Debug, PartialEq)]
/// struct Momentum(f64);
///
/// impl AdditiveArithmetic for Momentum {
///     fn zero() -> Self {
///         Momentum(0.0)
///     }
///     fn plus(&self, other: &Self) -> Self {
///         Momentum(self.0 + other.0)
///     }
///     fn minus(&self, other: &Self) -> Self {
///         Momentum(self.0 - other.0)
///     }
/// }
///
/// let p = Momentum(3.0);
/// assert_eq!(Momentum::zero().plus(&p), p);
/// assert_eq!(p.negated(), Momentum(-3.0));
/// assert_eq!(Momentum::sum_all(vec![p, p, p]), Momentum(9.0));
/// ```
pub trait AdditiveArithmetic: Clone + PartialEq {
    /// The additive identity.
    fn zero() -> Self;

    /// `self + other`.
    fn plus(&self, other: &Self) -> Self;

    /// `self - other`.
    fn minus(&self, other: &Self) -> Self;

    /// In-place addition.
    fn plus_assign(&mut self, other: &Self) {
        *self = self.plus(other);
    }

    /// In-place subtraction.
    fn minus_assign(&mut self, other: &Self) {
        *self = self.minus(other);
    }

    /// `zero() - self`.
    fn negated(&self) -> Self {
        Self::zero().minus(self)
    }

    /// Sum of all elements, `zero()` for an empty iterator.
    fn sum_all<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Self>,
        Self: Sized,
    {
        iter.into_iter()
            .fold(Self::zero(), |acc, x| acc.plus(&x))
    }
}

/// A type with a tangent space: values can be moved along tangent
/// vectors.
///
/// The tangent space is itself differentiable and flat: the tangent of
/// a tangent vector is that same type. This is enforced by the bound on
/// [`TangentVector`](Differentiable::TangentVector).
///
/// Laws (not enforced by type system):
///
/// - **Zero step**: `x.move_along(&x.zero_tangent_vector())` leaves `x`
///   unchanged
/// - **Self tangent**: when `TangentVector == Self`, moving is addition
///
/// # Example
///
/// ```rust
/// use tangent_core::Differentiable;
///
/// let mut point = (1.0_f32, 2.0_f64);
/// point.move_along(&(0.5, -2.0));
/// assert_eq!(point, (1.5, 0.0));
///
/// let samples = vec![1.0_f64, 2.0, 3.0];
/// assert_eq!(samples.zero_tangent_vector().base, vec![0.0, 0.0, 0.0]);
/// ```
pub trait Differentiable {
    /// The derivative space of `Self`.
    type TangentVector: Differentiable<TangentVector = Self::TangentVector> + AdditiveArithmetic;

    /// Moves `self` by the tangent step `direction`.
    fn move_along(&mut self, direction: &Self::TangentVector);

    /// The zero tangent at this particular value.
    ///
    /// For fixed-shape tangents this equals `TangentVector::zero()`;
    /// collection tangents have one zero component per element.
    fn zero_tangent_vector(&self) -> Self::TangentVector;

    /// Returns a copy of `self` moved along `direction`.
    fn moved(&self, direction: &Self::TangentVector) -> Self
    where
        Self: Clone,
    {
        let mut moved = self.clone();
        moved.move_along(direction);
        moved
    }
}

/// A differentiable type whose differentiable component can be viewed
/// as a tangent vector.
///
/// Useful when a value is a pure vector part plus auxiliary
/// non-differentiable data (fields marked `#[no_derivative]`). For
/// self-tangent types the view is the value itself.
///
/// # Example
///
/// ```rust
/// use tangent_core::EuclideanDifferentiable;
///
/// assert_eq!(3.5_f64.differentiable_vector_view(), 3.5);
/// assert_eq!((1.0_f32, 2.0_f32).differentiable_vector_view(), (1.0, 2.0));
/// ```
pub trait EuclideanDifferentiable: Differentiable {
    /// The differentiable vector component of `self`.
    fn differentiable_vector_view(&self) -> Self::TangentVector;
}

/// A vector space over [`VectorSpaceScalar`](VectorProtocol::VectorSpaceScalar):
/// scalar shifting and scaling.
///
/// # Example
///
/// ```rust
/// use tangent_core::VectorProtocol;
///
/// let v = 4.0_f32;
/// assert_eq!(v.scaled(&0.5), 2.0);
/// assert_eq!(v.adding_scalar(&1.0), 5.0);
///
/// let mut w = 3.0_f64;
/// w.subtract_scalar(&1.0);
/// w.scale(&2.0);
/// assert_eq!(w, 4.0);
/// ```
pub trait VectorProtocol: AdditiveArithmetic {
    /// The scalar type of the vector space.
    type VectorSpaceScalar: AdditiveArithmetic;

    /// Adds `x` to every component.
    fn adding_scalar(&self, x: &Self::VectorSpaceScalar) -> Self;

    /// Subtracts `x` from every component.
    fn subtracting_scalar(&self, x: &Self::VectorSpaceScalar) -> Self;

    /// Multiplies every component by `scale`.
    fn scaled(&self, scale: &Self::VectorSpaceScalar) -> Self;

    /// In-place [`adding_scalar`](VectorProtocol::adding_scalar).
    fn add_scalar(&mut self, x: &Self::VectorSpaceScalar) {
        *self = self.adding_scalar(x);
    }

    /// In-place [`subtracting_scalar`](VectorProtocol::subtracting_scalar).
    fn subtract_scalar(&mut self, x: &Self::VectorSpaceScalar) {
        *self = self.subtracting_scalar(x);
    }

    /// In-place [`scaled`](VectorProtocol::scaled).
    fn scale(&mut self, scale: &Self::VectorSpaceScalar) {
        *self = self.scaled(scale);
    }
}

/// A type with a pointwise product, a multiplicative identity and
/// pointwise reciprocals.
///
/// Laws (not enforced by type system):
///
/// - **Identity**: `x.pointwise_mul(&one()) == x`
/// - **Reciprocal**: `x.pointwise_mul(&x.reciprocal()) == one()` for
///   invertible `x`
///
/// # Example
///
/// ```rust
/// use tangent_core::PointwiseMultiplicative;
///
/// let x = 4.0_f64;
/// assert_eq!(x.pointwise_mul(&x.reciprocal()), f64::one());
/// ```
pub trait PointwiseMultiplicative: AdditiveArithmetic {
    /// The multiplicative identity.
    fn one() -> Self;

    /// The pointwise reciprocal.
    fn reciprocal(&self) -> Self;

    /// The pointwise product (`.*`).
    fn pointwise_mul(&self, other: &Self) -> Self;

    /// In-place [`pointwise_mul`](PointwiseMultiplicative::pointwise_mul).
    fn pointwise_mul_assign(&mut self, other: &Self) {
        *self = self.pointwise_mul(other);
    }
}

// Floating point scalars: self-tangent and every capability

macro_rules! impl_float {
    ( $( $t:ty ),+ ) => {
        $(
            impl AdditiveArithmetic for $t {
                fn zero() -> Self {
                    <$t as num_traits::Zero>::zero()
                }

                fn plus(&self, other: &Self) -> Self {
                    self + other
                }

                fn minus(&self, other: &Self) -> Self {
                    self - other
                }
            }

            impl Differentiable for $t {
                type TangentVector = $t;

                fn move_along(&mut self, direction: &Self) {
                    *self += direction;
                }

                fn zero_tangent_vector(&self) -> Self {
                    <$t as num_traits::Zero>::zero()
                }
            }

            impl EuclideanDifferentiable for $t {
                fn differentiable_vector_view(&self) -> Self {
                    *self
                }
            }

            impl VectorProtocol for $t {
                type VectorSpaceScalar = $t;

                fn adding_scalar(&self, x: &Self) -> Self {
                    self + x
                }

                fn subtracting_scalar(&self, x: &Self) -> Self {
                    self - x
                }

                fn scaled(&self, scale: &Self) -> Self {
                    self * scale
                }
            }

            impl PointwiseMultiplicative for $t {
                fn one() -> Self {
                    <$t as num_traits::One>::one()
                }

                fn reciprocal(&self) -> Self {
                    self.recip()
                }

                fn pointwise_mul(&self, other: &Self) -> Self {
                    self * other
                }
            }
        )+
    };
}

impl_float!(f32, f64);

// Integers are additive but have no tangent space

macro_rules! impl_integer {
    ( $( $t:ty ),+ ) => {
        $(
            impl AdditiveArithmetic for $t {
                fn zero() -> Self {
                    0
                }

                fn plus(&self, other: &Self) -> Self {
                    self + other
                }

                fn minus(&self, other: &Self) -> Self {
                    self - other
                }
            }
        )+
    };
}

impl_integer!(i8, i16, i32, i64, i128, isize);

// Unit: the trivial tangent space

impl AdditiveArithmetic for () {
    fn zero() -> Self {}

    fn plus(&self, _other: &Self) -> Self {}

    fn minus(&self, _other: &Self) -> Self {}
}

impl Differentiable for () {
    type TangentVector = ();

    fn move_along(&mut self, _direction: &()) {}

    fn zero_tangent_vector(&self) {}
}

impl EuclideanDifferentiable for () {
    fn differentiable_vector_view(&self) {}
}

// Tuples: product tangent spaces

macro_rules! impl_product_tangent {
    ( $( $T:ident : $idx:tt ),+ ) => {
        impl<$( $T ),+> AdditiveArithmetic for ( $( $T, )+ )
        where
            $( $T: AdditiveArithmetic ),+
        {
            fn zero() -> Self {
                (
                    $( $T::zero(), )+
                )
            }

            fn plus(&self, other: &Self) -> Self {
                (
                    $( self.$idx.plus(&other.$idx), )+
                )
            }

            fn minus(&self, other: &Self) -> Self {
                (
                    $( self.$idx.minus(&other.$idx), )+
                )
            }
        }

        impl<$( $T ),+> Differentiable for ( $( $T, )+ )
        where
            $( $T: Differentiable ),+
        {
            type TangentVector = ( $( $T::TangentVector, )+ );

            fn move_along(&mut self, direction: &Self::TangentVector) {
                $( self.$idx.move_along(&direction.$idx); )+
            }

            fn zero_tangent_vector(&self) -> Self::TangentVector {
                (
                    $( self.$idx.zero_tangent_vector(), )+
                )
            }
        }

        impl<$( $T ),+> EuclideanDifferentiable for ( $( $T, )+ )
        where
            $( $T: EuclideanDifferentiable ),+
        {
            fn differentiable_vector_view(&self) -> Self::TangentVector {
                (
                    $( self.$idx.differentiable_vector_view(), )+
                )
            }
        }
    }
}

impl_product_tangent!(A:0);
impl_product_tangent!(A:0, B:1);
impl_product_tangent!(A:0, B:1, C:2);
impl_product_tangent!(A:0, B:1, C:2, D:3);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Velocity(f64);

    impl AdditiveArithmetic for Velocity {
        fn zero() -> Self {
            Velocity(0.0)
        }

        fn plus(&self, other: &Self) -> Self {
            Velocity(self.0 + other.0)
        }

        fn minus(&self, other: &Self) -> Self {
            Velocity(self.0 - other.0)
        }
    }

    impl Differentiable for Velocity {
        type TangentVector = Velocity;

        fn move_along(&mut self, direction: &Self) {
            self.plus_assign(direction);
        }

        fn zero_tangent_vector(&self) -> Self {
            Velocity::zero()
        }
    }

    #[test]
    fn additive_identity_works() {
        let v = Velocity(2.5);
        assert_eq!(Velocity::zero().plus(&v), v);
        assert_eq!(v.plus(&Velocity::zero()), v);
        assert_eq!(v.minus(&v), Velocity::zero());
    }

    #[test]
    fn in_place_defaults_match_pure_operations() {
        let mut v = Velocity(1.0);
        v.plus_assign(&Velocity(2.0));
        assert_eq!(v, Velocity(3.0));
        v.minus_assign(&Velocity(5.0));
        assert_eq!(v, Velocity(-2.0));
        assert_eq!(v.negated(), Velocity(2.0));
    }

    #[test]
    fn sum_all_of_empty_is_zero() {
        let empty: Vec<Velocity> = vec![];
        assert_eq!(Velocity::sum_all(empty), Velocity::zero());
    }

    #[test]
    fn self_tangent_move_is_addition() {
        let mut v = Velocity(1.0);
        v.move_along(&Velocity(0.25));
        assert_eq!(v, Velocity(1.25));
        assert_eq!(v.moved(&Velocity(1.0)), Velocity(2.25));
    }

    #[test]
    fn float_capabilities() {
        assert_eq!(f32::zero(), 0.0);
        assert_eq!(2.0_f64.scaled(&3.0), 6.0);
        assert_eq!(2.0_f64.subtracting_scalar(&3.0), -1.0);
        assert_eq!(4.0_f32.reciprocal(), 0.25);
        assert_eq!(4.0_f32.pointwise_mul(&4.0_f32.reciprocal()), f32::one());
        assert_eq!(7.0_f64.zero_tangent_vector(), 0.0);
    }

    #[test]
    fn integers_are_additive() {
        assert_eq!(3_i32.plus(&4), 7);
        assert_eq!(i64::zero(), 0);
        assert_eq!(5_i64.negated(), -5);
    }

    #[test]
    fn tuple_tangents_are_componentwise() {
        let mut p = (1.0_f32, 2.0_f64, Velocity(3.0));
        p.move_along(&(1.0, 1.0, Velocity(-3.0)));
        assert_eq!(p, (2.0, 3.0, Velocity(0.0)));

        let t = <(f32, f64) as Differentiable>::TangentVector::zero();
        assert_eq!(t, (0.0, 0.0));
        assert_eq!((1.0_f32, 2.0_f64).plus(&(3.0, 4.0)), (4.0, 6.0));
    }

    #[test]
    fn tuple_of_collections_has_instance_sized_zero() {
        let p = (vec![1.0_f64, 2.0], 3.0_f32);
        let zero = p.zero_tangent_vector();
        assert_eq!(zero.0.base, vec![0.0, 0.0]);
        assert_eq!(zero.1, 0.0);
    }

    #[test]
    fn unit_is_trivially_differentiable() {
        let mut u = ();
        u.move_along(&());
        assert_eq!(<() as AdditiveArithmetic>::zero(), ());
    }
}
