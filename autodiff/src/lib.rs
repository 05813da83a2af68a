//! Automatic differentiation for Rust.
//!
//! This crate computes derivatives of functions over types implementing
//! [`tangent_core::Differentiable`]:
//!
//! - **Differential operators**: [`gradient`], [`pullback`],
//!   [`derivative`] and friends, built from the two primitives of
//!   [`DifferentiableFn`]
//! - **Type-erased derivatives**: [`AnyDerivative`]
//! - **Sequences**: [`differentiable_map`] and [`differentiable_reduce`]
//! - **A derivative engine** (feature `engine`, on by default): checks
//!   and differentiates functions written in a small typed IR, with
//!   diagnostics for constructs it cannot differentiate
//!
//! # Closure-defined functions
//!
//! A [`DifferentiableFunction`] pairs a function with its
//! vector-Jacobian product:
//!
//! ```
//! use autodiff::{differentiable_function, gradient, value_with_gradient};
//!
//! // f(x) = x² + 2x
//! let f = differentiable_function(|&x: &f64| (x * x + 2.0 * x, move |v: f64| v * (2.0 * x + 2.0)));
//!
//! let (y, dy) = value_with_gradient(&3.0, &f);
//! assert_eq!(y, 15.0);   // f(3) = 15
//! assert_eq!(dy, 8.0);   // f'(3) = 8
//! assert_eq!(gradient(&3.0, &f), 8.0);
//! ```
//!
//! # Several arguments
//!
//! Functions of two or three arguments are functions of a tuple:
//!
//! ```
//! use autodiff::{differentiable_function, gradient2};
//!
//! // f(x, y) = x² + x*y
//! let f = differentiable_function(|&(x, y): &(f64, f64)| {
//!     (x * x + x * y, move |v: f64| (v * (2.0 * x + y), v * x))
//! });
//!
//! let (dx, dy) = gradient2(&3.0, &4.0, &f);
//! assert_eq!(dx, 10.0);  // ∂f/∂x = 2x + y = 10
//! assert_eq!(dy, 3.0);   // ∂f/∂y = x = 3
//! ```
//!
//! # Forward mode
//!
//! A function with a Jacobian-vector product also runs forward:
//!
//! ```
//! use autodiff::{derivative, differentiable_function};
//!
//! let square = differentiable_function(|&x: &f64| (x * x, move |v: f64| 2.0 * x * v))
//!     .with_jvp(|&x: &f64| (x * x, move |dx: f64| 2.0 * x * dx));
//!
//! assert_eq!(derivative(&5.0, &square), 10.0);
//! ```

pub mod any_derivative;
pub mod collections;
#[cfg(feature = "engine")]
pub mod engine;
pub mod live;
pub mod operators;
pub mod tracked;

pub use any_derivative::{AnyDerivative, AnyDerivativeError};
pub use collections::{differentiable_map, differentiable_reduce, DifferentiableSequence};
pub use operators::*;
pub use tracked::Tracked;
