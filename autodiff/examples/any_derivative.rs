//! Example demonstrating type-erased derivatives.
//!
//! `AnyDerivative` lets code that does not know a tangent's type add,
//! subtract and move along derivatives. The opaque zero combines with
//! anything.
//!
//! Run with: `cargo run --example any_derivative`

use autodiff::{value_with_pullback, AnyDerivative};

fn main() {
    println!("=== Type-Erased Derivatives ===\n");

    // Example 1: arithmetic on erased values
    println!("Example 1: erased arithmetic");
    let a = AnyDerivative::new(2.0_f64);
    let b = AnyDerivative::new(3.0_f64);
    let sum = &a + &b;
    println!("  2 + 3 = {:?}", sum.downcast_ref::<f64>());
    let with_zero = &sum + &AnyDerivative::zero();
    println!("  (2 + 3) + zero = {:?}", with_zero.downcast_ref::<f64>());
    println!("  zero - zero is the opaque zero: {}", (AnyDerivative::zero() - AnyDerivative::zero()).is_zero());
    println!();

    // Example 2: mismatched types are reported, not silently mixed
    println!("Example 2: mismatched underlying types");
    let single = AnyDerivative::new(1.0_f32);
    match a.try_plus(&single) {
        Ok(value) => println!("  unexpected success: {value:?}"),
        Err(err) => println!("  error: {err}"),
    }
    println!();

    // Example 3: moving along an erased direction
    println!("Example 3: move_along");
    let mut point = AnyDerivative::zero();
    point
        .try_move_along(&AnyDerivative::new(0.5_f64))
        .expect("same types");
    point
        .try_move_along(&AnyDerivative::new(0.25_f64))
        .expect("same types");
    println!("  zero moved by 0.5 then 0.25 = {:?}", point.downcast_ref::<f64>());
    println!();

    // Example 4: erasure and addition are differentiable
    println!("Example 4: differentiating through erasure");
    let erase = AnyDerivative::differentiable_new::<f64>();
    let (erased, pullback) = value_with_pullback(&4.0, &erase);
    println!("  erase(4) = {:?}", erased.downcast_ref::<f64>());
    println!("  pullback(2) = {} (expected: 2)", pullback(AnyDerivative::new(2.0_f64)));
    println!("  pullback(zero) = {} (expected: 0)", pullback(AnyDerivative::zero()));

    let add = AnyDerivative::differentiable_add();
    let (_, pullback) = value_with_pullback(&(a.clone(), b.clone()), &add);
    let (da, db) = pullback(AnyDerivative::new(1.0_f64));
    println!("  ∂(a + b)/∂a = {:?}, ∂(a + b)/∂b = {:?}", da.downcast_ref::<f64>(), db.downcast_ref::<f64>());
}
