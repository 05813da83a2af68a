//! Rejected differentiation requests and their notes.

use autodiff::engine::messages::*;
use autodiff::engine::{
    BinaryOp, Callee, ClassDecl, Engine, EngineOptions, FieldDecl, FunctionBuilder, FunctionDecl, Instr, Module,
    Param, ProtocolDecl, Projection, Severity, Type, Value,
};

fn rejected(module: Module, name: &str, wrt: &[usize]) -> autodiff::engine::DifferentiationError {
    Engine::new(module).differentiate(name, wrt).unwrap_err()
}

fn square_native() -> FunctionDecl {
    FunctionDecl::native("opaque_square", vec![Param::new("x", Type::Float)], Type::Float, |args| {
        let x = args[0].as_float()?;
        Ok(Value::Float(x * x))
    })
}

#[test]
fn global_writes_are_rejected_with_a_caret() {
    let source = "fn leak(x) {\n  SCALE = x\n  return x\n}";
    let mut module = Module::new();
    module.define_global("SCALE", Value::Float(0.0));
    let mut f = FunctionBuilder::new("leak", Type::Float);
    let x = f.param("x", Type::Float);
    f.emit_at(
        Instr::StoreGlobal {
            name: "SCALE".into(),
            value: x,
        },
        15..24,
    );
    f.ret(x);
    module.add_function(f.finish());

    let err = rejected(module, "leak", &[0]);
    assert!(err.mentions(GLOBAL_WRITE));
    assert!(err.to_string().starts_with("cannot differentiate 'leak' with respect to parameters [0]"));

    let primary = &err.diagnostics[0];
    assert_eq!(primary.severity, Severity::Error);
    assert_eq!(primary.message, NOT_DIFFERENTIABLE);
    let rendered = primary.render(source);
    assert!(rendered.contains("--> line 2, col 3\n  SCALE = x\n  ^^^^^^^^^"), "{rendered}");
}

#[test]
fn compound_assignment_of_an_active_value_is_inout() {
    // var acc = x; acc += x; return acc
    let mut f = FunctionBuilder::new("accumulate", Type::Float);
    let x = f.param("x", Type::Float);
    let acc = f.local(Type::Float);
    f.copy(acc, x);
    f.emit(Instr::CompoundAssign {
        target: acc,
        path: vec![],
        op: BinaryOp::Add,
        value: x,
    });
    f.ret(acc);
    let mut module = Module::new();
    module.add_function(f.finish());
    assert!(rejected(module, "accumulate", &[0]).mentions(INOUT));
}

#[test]
fn active_enum_payloads_are_unsupported() {
    let mut module = Module::new();
    module.define_enum("Boxed", vec![("value".into(), Some(Type::Float))]);
    let mut f = FunctionBuilder::new("unbox", Type::Float);
    let x = f.param("x", Type::Float);
    let boxed = f.local(Type::Enum("Boxed".into()));
    f.emit(Instr::EnumConstruct {
        dst: boxed,
        name: "Boxed".into(),
        case: 0,
        payload: Some(x),
    });
    let inner = f.local(Type::Float);
    f.emit(Instr::EnumPayload {
        dst: inner,
        value: boxed,
        case: 0,
    });
    f.ret(inner);
    module.add_function(f.finish());

    let err = rejected(module, "unbox", &[0]);
    assert!(err.mentions(ENUM));
    assert!(err.mentions(NON_DIFFERENTIABLE_RESULT));
}

#[test]
fn active_integer_conversions_are_not_differentiable() {
    let mut f = FunctionBuilder::new("truncate", Type::Float);
    let x = f.param("x", Type::Float);
    let n = f.local(Type::Int);
    f.emit(Instr::FloatToInt { dst: n, src: x });
    let y = f.local(Type::Float);
    f.emit(Instr::IntToFloat { dst: y, src: n });
    f.ret(y);
    let mut module = Module::new();
    module.add_function(f.finish());
    assert!(rejected(module, "truncate", &[0]).mentions(NON_DIFFERENTIABLE_RESULT));
}

#[test]
fn writes_through_no_derivative_fields_are_rejected() {
    let mut module = Module::new();
    module.define_struct(
        "Model",
        vec![
            FieldDecl::new("w", Type::Float),
            FieldDecl::no_derivative("scale", Type::Float),
        ],
    );
    let mut f = FunctionBuilder::new("rescale", Type::Float);
    let x = f.param("x", Type::Float);
    let one = f.float(1.0);
    let model = f.structure("Model", &[x, one]);
    f.assign(model, &[Projection::Field(1)], x);
    let w = f.extract(model, &[Projection::Field(0)], Type::Float);
    f.ret(w);
    module.add_function(f.finish());
    assert!(rejected(module, "rescale", &[0]).mentions(NO_DERIVATIVE_FIELD));
}

#[test]
fn nondiff_parameters_cannot_be_differentiated() {
    let mut f = FunctionBuilder::new("scaled", Type::Float);
    let x = f.param("x", Type::Float);
    let k = f.nondiff_param("k", Type::Float);
    let y = f.binary(BinaryOp::Mul, x, k);
    f.ret(y);
    let mut module = Module::new();
    module.add_function(f.finish());

    let mut g = FunctionBuilder::new("caller", Type::Float);
    let x = g.param("x", Type::Float);
    let y = g.call_at(Callee::Function("scaled".into()), &[x, x], Type::Float, 30..40);
    g.ret(y);
    module.add_function(g.finish());

    let engine = Engine::new(module);
    assert!(engine.differentiate("scaled", &[0]).is_ok());
    assert!(engine.differentiate("scaled", &[1]).unwrap_err().mentions(NONDIFF_PARAM));
    let err = engine.differentiate("caller", &[0]).unwrap_err();
    let note = err.diagnostics[0]
        .notes
        .iter()
        .find(|note| note.message == NONDIFF_PARAM)
        .unwrap();
    assert_eq!(note.span, Some(30..40));
}

#[test]
fn missing_returns_are_reported() {
    // The else branch falls off the end.
    let mut f = FunctionBuilder::new("partial", Type::Float);
    let x = f.param("x", Type::Float);
    let zero = f.float(0.0);
    let positive = f.compare(autodiff::engine::CompareOp::Gt, x, zero);
    let (then_block, else_block) = (f.block(), f.block());
    f.branch(positive, then_block, else_block);
    f.switch_to(then_block);
    f.ret(x);
    let mut module = Module::new();
    module.add_function(f.finish());

    let engine = Engine::new(module);
    assert!(engine.differentiate("partial", &[0]).unwrap_err().mentions(MISSING_RETURN));
    assert_eq!(engine.evaluate("partial", &[Value::Float(1.0)]), Ok(Value::Float(1.0)));
    assert!(engine.evaluate("partial", &[Value::Float(-1.0)]).is_err());
}

#[test]
fn opaque_callees_are_noted_through_the_call_chain() {
    let mut module = Module::new();
    module.add_function(square_native());

    let mut inner = FunctionBuilder::new("inner", Type::Float);
    let x = inner.param("x", Type::Float);
    let y = inner.call_at(Callee::Function("opaque_square".into()), &[x], Type::Float, 4..20);
    inner.ret(y);
    module.add_function(inner.finish());

    let mut outer = FunctionBuilder::new("outer", Type::Float);
    let x = outer.param("x", Type::Float);
    let y = outer.call_at(Callee::Function("inner".into()), &[x], Type::Float, 50..60);
    outer.ret(y);
    module.add_function(outer.finish());

    let err = rejected(module, "outer", &[0]);
    let notes = &err.diagnostics[0].notes;
    assert_eq!(notes.len(), 2);
    assert_eq!((notes[0].message.as_str(), notes[0].span.clone()), (OPAQUE, Some(4..20)));
    assert_eq!((notes[1].message.as_str(), notes[1].span.clone()), (CALL_SITE, Some(50..60)));
}

#[test]
fn non_differentiable_class_members_are_rejected() {
    let mut module = Module::new();
    for (name, factor) in [("Base.g", 2.0), ("Derived.g", 3.0)] {
        module.add_function(FunctionDecl::native(
            name,
            vec![Param::new("self", Type::Class("Base".into())), Param::new("x", Type::Float)],
            Type::Float,
            move |args| Ok(Value::Float(factor * args[1].as_float()?)),
        ));
    }
    module
        .define_class(ClassDecl::new("Base").method("g", "Base.g", true))
        .define_class(ClassDecl::new("Derived").inherits("Base").method("g", "Derived.g", false));

    let mut f = FunctionBuilder::new("apply", Type::Float);
    let object = f.param("object", Type::Class("Base".into()));
    let x = f.param("x", Type::Float);
    let y = f.call(
        Callee::Method {
            class: "Base".into(),
            method: "g".into(),
        },
        &[object, x],
        Type::Float,
    );
    f.ret(y);
    module.add_function(f.finish());

    let engine = Engine::new(module);
    assert!(engine.differentiate("apply", &[1]).unwrap_err().mentions(CLASS_MEMBER));
    let derived = Value::Object {
        class: "Derived".into(),
    };
    assert_eq!(engine.evaluate("apply", &[derived, Value::Float(2.0)]), Ok(Value::Float(6.0)));
}

#[test]
fn non_differentiable_protocol_requirements_are_rejected() {
    let mut module = Module::new();
    module
        .define_protocol(ProtocolDecl::new("Shape").requirement("area", false, None))
        .define_struct("Square", vec![FieldDecl::new("side", Type::Float)]);
    let mut area = FunctionBuilder::new("Square.area", Type::Float);
    let square = area.param("self", Type::Struct("Square".into()));
    let side = area.extract(square, &[Projection::Field(0)], Type::Float);
    let a = area.binary(BinaryOp::Mul, side, side);
    area.ret(a);
    module.add_function(area.finish());
    module.add_conformance("Square", "Shape", &[("area", "Square.area")]);

    let mut f = FunctionBuilder::new("measure", Type::Float);
    let shape = f.param("shape", Type::Struct("Square".into()));
    let y = f.call(
        Callee::Witness {
            protocol: "Shape".into(),
            requirement: "area".into(),
        },
        &[shape],
        Type::Float,
    );
    f.ret(y);
    module.add_function(f.finish());

    assert!(rejected(module, "measure", &[0]).mentions(PROTOCOL_REQUIREMENT));
}

fn constant_module() -> Module {
    let mut f = FunctionBuilder::new("constant", Type::Float);
    let _x = f.param("x", Type::Float);
    let one = f.float(1.0);
    f.terminate_at(autodiff::engine::Terminator::Return(one), 20..28);
    let mut module = Module::new();
    module.add_function(f.finish());
    module
}

#[test]
fn nonvaried_results_warn() {
    let engine = Engine::new(constant_module());
    let derivative = engine.differentiate("constant", &[0]).unwrap();
    assert_eq!(derivative.warnings().len(), 1);
    let warning = &derivative.warnings()[0];
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.message, NONVARIED_RESULT);
    assert_eq!(warning.span, Some(20..28));

    let (value, grads) = derivative.value_with_gradient(&[Value::Float(3.0)]).unwrap();
    assert_eq!(value, Value::Float(1.0));
    assert!(grads[0].is_zero());
}

#[test]
fn warnings_follow_the_options() {
    let strict = Engine::with_options(constant_module(), EngineOptions::default().with_warnings_as_errors(true));
    let err = strict.differentiate("constant", &[0]).unwrap_err();
    assert_eq!(err.diagnostics.len(), 1);
    assert!(err.diagnostics[0].is_error());
    assert!(err.mentions(NONVARIED_RESULT));

    let quiet = Engine::with_options(
        constant_module(),
        EngineOptions::default().with_report_nonvaried_results(false),
    );
    assert!(quiet.differentiate("constant", &[0]).unwrap().warnings().is_empty());
}

#[test]
fn unknown_functions_and_bad_indices_are_rejected() {
    let engine = Engine::new(constant_module());
    assert!(engine
        .differentiate("missing", &[0])
        .unwrap_err()
        .mentions("unknown function 'missing'"));
    let err = engine.differentiate("constant", &[3]).unwrap_err();
    assert!(err.to_string().contains("out of range"));
}
