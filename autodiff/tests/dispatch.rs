//! Derivatives through dynamic dispatch, custom derivatives and recursion.

use autodiff::engine::{
    BinaryOp, Callee, ClassDecl, CompareOp, CustomDerivative, Engine, FieldDecl, FunctionBuilder, FunctionDecl,
    Module, Param, ProtocolDecl, Projection, RuntimeError, Tangent, Type, Value,
};
use autodiff::gradient2;
use autodiff::live::with_leak_checking;
use std::cell::Cell;
use std::rc::Rc;

// fn <name>(self: Super, x: Float) -> Float { factor * x }
fn scale_method(name: &str, factor: f64) -> FunctionDecl {
    let mut f = FunctionBuilder::new(name, Type::Float);
    let _receiver = f.param("self", Type::Class("Super".into()));
    let x = f.param("x", Type::Float);
    let k = f.float(factor);
    let y = f.binary(BinaryOp::Mul, k, x);
    f.ret(y);
    f.finish()
}

fn scale_derivative(factor: f64) -> CustomDerivative {
    CustomDerivative::from_vjp(move |args: &[Value]| {
        let x = args[1].as_float()?;
        let pullback = move |v: Tangent| -> Result<Vec<Tangent>, RuntimeError> {
            Ok(vec![Tangent::Zero, Tangent::Float(factor * v.as_float()?)])
        };
        Ok((Value::Float(factor * x), pullback))
    })
}

fn class_engine() -> Engine {
    let mut module = Module::new();
    module
        .add_function(scale_method("Super.f", 2.0).with_derivative(scale_derivative(2.0).with_jvp(
            |args: &[Value]| {
                let x = args[1].as_float()?;
                let differential = |dx: &[Tangent]| -> Result<Tangent, RuntimeError> {
                    Ok(Tangent::Float(2.0 * dx[1].as_float()?))
                };
                Ok((Value::Float(2.0 * x), differential))
            },
        )))
        .add_function(scale_method("SubOverride.f", 3.0))
        .add_function(scale_method("SubOverrideCustomDerivatives.f", 3.0).with_derivative(scale_derivative(3.0)));
    module
        .define_class(ClassDecl::new("Super").method("f", "Super.f", true))
        .define_class(ClassDecl::new("SubOverride").inherits("Super").method("f", "SubOverride.f", true))
        .define_class(
            ClassDecl::new("SubOverrideCustomDerivatives")
                .inherits("Super")
                .method("f", "SubOverrideCustomDerivatives.f", true),
        );

    // fn apply(c: Super, x: Float) -> Float { c.f(x) }
    let mut f = FunctionBuilder::new("apply", Type::Float);
    let c = f.param("c", Type::Class("Super".into()));
    let x = f.param("x", Type::Float);
    let y = f.call(
        Callee::Method {
            class: "Super".into(),
            method: "f".into(),
        },
        &[c, x],
        Type::Float,
    );
    f.ret(y);
    module.add_function(f.finish());
    Engine::new(module)
}

fn object(class: &str) -> Value {
    Value::Object { class: class.into() }
}

#[test]
fn class_methods_dispatch_to_the_overriding_derivative() {
    let engine = class_engine();
    let apply = engine.differentiate("apply", &[1]).unwrap();
    with_leak_checking(|| {
        for (class, expected) in [
            ("Super", 2.0),
            ("SubOverride", 3.0),
            ("SubOverrideCustomDerivatives", 3.0),
        ] {
            let (value, grads) = apply.value_with_gradient(&[object(class), Value::Float(1.0)]).unwrap();
            assert_eq!(value, Value::Float(expected), "{class}");
            assert!(grads[0].is_zero());
            assert_eq!(grads[1], Tangent::Float(expected), "{class}");
        }
    });
}

#[test]
fn forward_mode_needs_a_jvp_for_custom_derivatives() {
    let engine = class_engine();
    let apply = engine.differentiate("apply", &[1]).unwrap();

    let (value, differential) = apply
        .value_with_differential(&[object("Super"), Value::Float(1.0)])
        .unwrap();
    assert_eq!(value, Value::Float(2.0));
    assert_eq!(
        differential.differential(&[Tangent::Zero, Tangent::Float(1.0)]).unwrap(),
        Tangent::Float(2.0)
    );

    let (_, derived) = apply
        .value_with_differential(&[object("SubOverride"), Value::Float(1.0)])
        .unwrap();
    assert_eq!(
        derived.differential(&[Tangent::Zero, Tangent::Float(1.0)]).unwrap(),
        Tangent::Float(3.0)
    );

    let err = apply
        .value_with_differential(&[object("SubOverrideCustomDerivatives"), Value::Float(1.0)])
        .unwrap_err();
    assert_eq!(err, RuntimeError::MissingDifferential("SubOverrideCustomDerivatives.f".into()));
}

#[test]
fn protocol_requirements_fall_back_to_the_default() {
    let mut module = Module::new();
    module
        .define_struct("Meters", vec![FieldDecl::new("value", Type::Float)])
        .define_struct("Feet", vec![FieldDecl::new("value", Type::Float)])
        .define_protocol(ProtocolDecl::new("Scalable").requirement("scaled", true, Some("Scalable.scaled")));

    for (name, ty, factor) in [("Scalable.scaled", "Meters", 2.0), ("Feet.scaled", "Feet", 3.0)] {
        let mut f = FunctionBuilder::new(name, Type::Float);
        let receiver = f.param("self", Type::Struct(ty.into()));
        let value = f.extract(receiver, &[Projection::Field(0)], Type::Float);
        let k = f.float(factor);
        let y = f.binary(BinaryOp::Mul, value, k);
        f.ret(y);
        module.add_function(f.finish());
    }
    module
        .add_conformance("Meters", "Scalable", &[])
        .add_conformance("Feet", "Scalable", &[("scaled", "Feet.scaled")]);

    let mut f = FunctionBuilder::new("measure", Type::Float);
    let shape = f.param("shape", Type::Struct("Meters".into()));
    let y = f.call(
        Callee::Witness {
            protocol: "Scalable".into(),
            requirement: "scaled".into(),
        },
        &[shape],
        Type::Float,
    );
    f.ret(y);
    module.add_function(f.finish());

    let engine = Engine::new(module);
    let measure = engine.differentiate("measure", &[0]).unwrap();
    let at = |ty: &str| Value::Struct {
        name: ty.into(),
        fields: vec![Value::Float(5.0)],
    };

    let (value, grads) = measure.value_with_gradient(&[at("Meters")]).unwrap();
    assert_eq!(value, Value::Float(10.0));
    assert_eq!(grads[0].project(&[0]).unwrap(), Tangent::Float(2.0));

    let (value, grads) = measure.value_with_gradient(&[at("Feet")]).unwrap();
    assert_eq!(value, Value::Float(15.0));
    assert_eq!(grads[0].project(&[0]).unwrap(), Tangent::Float(3.0));
}

// fn f(x, y) { g(x) * y } where g counts its vjp invocations
fn subset_engine(invocations: Rc<Cell<usize>>) -> Engine {
    let mut module = Module::new();
    module.add_function(
        FunctionDecl::native("g", vec![Param::new("x", Type::Float)], Type::Float, |args| {
            Ok(Value::Float(args[0].as_float()?.exp()))
        })
        .with_derivative(CustomDerivative::from_vjp(move |args: &[Value]| {
            invocations.set(invocations.get() + 1);
            let y = args[0].as_float()?.exp();
            let pullback = move |v: Tangent| -> Result<Vec<Tangent>, RuntimeError> {
                Ok(vec![Tangent::Float(y * v.as_float()?)])
            };
            Ok((Value::Float(y), pullback))
        })),
    );
    let mut f = FunctionBuilder::new("f", Type::Float);
    let x = f.param("x", Type::Float);
    let y = f.param("y", Type::Float);
    let gx = f.call(Callee::Function("g".into()), &[x], Type::Float);
    let out = f.binary(BinaryOp::Mul, gx, y);
    f.ret(out);
    module.add_function(f.finish());
    Engine::new(module)
}

#[test]
fn subset_differentiation_skips_unneeded_derivatives() {
    let invocations = Rc::new(Cell::new(0));
    let engine = subset_engine(Rc::clone(&invocations));

    let wrt_y = engine.binary_wrt::<f64, f64, f64>("f", &[1]).unwrap();
    let (dx, dy) = gradient2(&0.0, &3.0, &wrt_y);
    assert_eq!((dx, dy), (0.0, 1.0));
    assert_eq!(invocations.get(), 0);

    let both = engine.binary::<f64, f64, f64>("f").unwrap();
    let (dx, dy) = gradient2(&0.0, &3.0, &both);
    assert_eq!((dx, dy), (3.0, 1.0));
    assert_eq!(invocations.get(), 1);
}

#[test]
fn recursive_functions_differentiate() {
    // fn power(x: Float, @nondiff n: Int) -> Float {
    //     if n == 0 { 1 } else { x * power(x, n - 1) }
    // }
    let mut f = FunctionBuilder::new("power", Type::Float);
    let x = f.param("x", Type::Float);
    let n = f.nondiff_param("n", Type::Int);
    let zero = f.int(0);
    let done = f.compare(CompareOp::Eq, n, zero);
    let (base, step) = (f.block(), f.block());
    f.branch(done, base, step);
    f.switch_to(base);
    let one = f.float(1.0);
    f.ret(one);
    f.switch_to(step);
    let decrement = f.int(1);
    let m = f.binary(BinaryOp::Sub, n, decrement);
    let rest = f.call(Callee::Function("power".into()), &[x, m], Type::Float);
    let y = f.binary(BinaryOp::Mul, x, rest);
    f.ret(y);
    let mut module = Module::new();
    module.add_function(f.finish());

    let engine = Engine::new(module);
    let power = engine.differentiate("power", &[0]).unwrap();
    assert!(power.warnings().is_empty());
    with_leak_checking(|| {
        let (value, grads) = power.value_with_gradient(&[Value::Float(2.0), Value::Int(3)]).unwrap();
        assert_eq!(value, Value::Float(8.0));
        assert_eq!(grads[0], Tangent::Float(12.0));
        assert!(grads[1].is_zero());
    });
}
