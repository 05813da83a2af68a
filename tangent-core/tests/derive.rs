use tangent_core::{
    AdditiveArithmetic, Differentiable, DifferentiableView, EuclideanDifferentiable,
    OptionalTangent, PointwiseMultiplicative, VectorProtocol,
};

#[derive(Clone, Debug, PartialEq, Differentiable, EuclideanDifferentiable)]
#[differentiable(scalar = f32, pointwise)]
struct Dense {
    w1: f32,
    b: f32,
    #[no_derivative]
    w2: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, AdditiveArithmetic, Differentiable, EuclideanDifferentiable)]
#[differentiable(self_tangent, scalar = f32)]
struct Vector {
    x: f32,
    y: f32,
}

#[derive(Clone, Debug, PartialEq, Differentiable)]
struct Wrapper<T> {
    inner: T,
    scale: f64,
}

#[derive(Clone, Debug, PartialEq, Differentiable)]
struct Mixed {
    samples: Vec<f64>,
    maybe: Option<f64>,
    pair: (f32, f64),
}

#[derive(Clone, Debug, PartialEq, Differentiable)]
struct Frozen {
    #[no_derivative]
    label: String,
}

#[test]
fn no_derivative_fields_are_excluded_from_the_tangent() {
    let mut dense = Dense { w1: 4.0, b: 1.0, w2: Some(5.0) };
    dense.move_along(&DenseTangentVector { w1: 1.0, b: -1.0 });
    assert_eq!(dense, Dense { w1: 5.0, b: 0.0, w2: Some(5.0) });
}

#[test]
fn derived_tangent_is_additive() {
    let a = DenseTangentVector { w1: 1.0, b: 2.0 };
    let b = DenseTangentVector { w1: 0.5, b: 0.5 };
    assert_eq!(a.plus(&b), DenseTangentVector { w1: 1.5, b: 2.5 });
    assert_eq!(a.minus(&a), DenseTangentVector::zero());
    assert_eq!(format!("{:?}", DenseTangentVector::zero()), "DenseTangentVector { w1: 0.0, b: 0.0 }");
}

#[test]
fn derived_tangent_is_its_own_tangent() {
    let mut t = DenseTangentVector { w1: 1.0, b: 1.0 };
    t.move_along(&DenseTangentVector { w1: 1.0, b: 2.0 });
    assert_eq!(t, DenseTangentVector { w1: 2.0, b: 3.0 });
}

#[test]
fn scalar_option_derives_vector_protocol() {
    let t = DenseTangentVector { w1: 1.0, b: 2.0 };
    assert_eq!(t.scaled(&2.0), DenseTangentVector { w1: 2.0, b: 4.0 });
    assert_eq!(t.adding_scalar(&1.0), DenseTangentVector { w1: 2.0, b: 3.0 });
    assert_eq!(t.subtracting_scalar(&1.0), DenseTangentVector { w1: 0.0, b: 1.0 });
}

#[test]
fn pointwise_option_derives_pointwise_multiplicative() {
    let t = DenseTangentVector { w1: 2.0, b: 4.0 };
    assert_eq!(t.reciprocal(), DenseTangentVector { w1: 0.5, b: 0.25 });
    assert_eq!(t.pointwise_mul(&t.reciprocal()), DenseTangentVector::one());
}

#[test]
fn euclidean_view_skips_no_derivative_fields() {
    let dense = Dense { w1: 4.0, b: 1.0, w2: None };
    assert_eq!(dense.differentiable_vector_view(), DenseTangentVector { w1: 4.0, b: 1.0 });
}

#[test]
fn self_tangent_struct_moves_by_addition() {
    let mut v = Vector { x: 1.0, y: 1.0 };
    let tan: <Vector as Differentiable>::TangentVector = Vector { x: 1.0, y: 1.0 };
    v.move_along(&tan);
    assert_eq!(v, Vector { x: 2.0, y: 2.0 });
    assert_eq!(v.scaled(&0.5), Vector { x: 1.0, y: 1.0 });
    assert_eq!(v.differentiable_vector_view(), v);
    assert_eq!(v.zero_tangent_vector(), Vector::zero());
}

#[test]
fn generic_structs_project_field_tangents() {
    let mut w = Wrapper { inner: vec![1.0_f32, 2.0], scale: 3.0 };
    let step: WrapperTangentVector<Vec<f32>> = WrapperTangentVector {
        inner: DifferentiableView::new(vec![1.0, 1.0]),
        scale: -1.0,
    };
    w.move_along(&step);
    assert_eq!(w, Wrapper { inner: vec![2.0, 3.0], scale: 2.0 });
}

#[test]
fn zero_tangent_vector_is_per_instance() {
    let mixed = Mixed {
        samples: vec![1.0, 2.0, 3.0],
        maybe: Some(1.0),
        pair: (1.0, 2.0),
    };
    let zero = mixed.zero_tangent_vector();
    assert_eq!(zero.samples.base, vec![0.0, 0.0, 0.0]);
    assert_eq!(zero.maybe, OptionalTangent::some(0.0));
    assert_eq!(zero.pair, (0.0, 0.0));
    // The static zero is shape-agnostic.
    assert!(MixedTangentVector::zero().samples.is_empty());
}

#[test]
fn structs_without_differentiable_fields_have_empty_tangents() {
    let mut frozen = Frozen { label: "constant".to_string() };
    frozen.move_along(&FrozenTangentVector {});
    assert_eq!(frozen.zero_tangent_vector(), FrozenTangentVector::zero());
    assert_eq!(frozen.label, "constant");
}
