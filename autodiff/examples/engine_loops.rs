//! Example demonstrating the derivative engine on loops.
//!
//! A function is written in the engine's IR, checked for
//! differentiability, and then differentiated in both modes. A second
//! function writes a global and is rejected with a rendered diagnostic.
//!
//! Run with: `cargo run --example engine_loops`

use autodiff::engine::{BinaryOp, CompareOp, Engine, FunctionBuilder, Instr, Module, Type, Value};
use autodiff::{derivative, value_with_gradient};

/// `fn power_loop(x) { var result = 1; var i = 0; while i < 4 { result = result * x; i += 1 }; return result }`
fn power_loop() -> autodiff::engine::FunctionDecl {
    let mut f = FunctionBuilder::new("power_loop", Type::Float);
    let x = f.param("x", Type::Float);
    let result = f.local(Type::Float);
    let one = f.float(1.0);
    f.copy(result, one);
    let i = f.local(Type::Int);
    let zero = f.int(0);
    f.copy(i, zero);
    let (header, body, exit) = (f.block(), f.block(), f.block());
    f.jump(header);

    f.switch_to(header);
    let four = f.int(4);
    let more = f.compare(CompareOp::Lt, i, four);
    f.branch(more, body, exit);

    f.switch_to(body);
    let product = f.binary(BinaryOp::Mul, result, x);
    f.copy(result, product);
    let step = f.int(1);
    let next = f.binary(BinaryOp::Add, i, step);
    f.copy(i, next);
    f.jump(header);

    f.switch_to(exit);
    f.ret(result);
    f.finish()
}

const LEAKY_SOURCE: &str = "fn leaky(x) {\n    LAST = x\n    return x * x\n}";

/// `fn leaky(x) { LAST = x; return x * x }`
fn leaky() -> autodiff::engine::FunctionDecl {
    let mut f = FunctionBuilder::new("leaky", Type::Float);
    let x = f.param("x", Type::Float);
    f.emit_at(
        Instr::StoreGlobal {
            name: "LAST".into(),
            value: x,
        },
        18..26,
    );
    let y = f.binary(BinaryOp::Mul, x, x);
    f.ret(y);
    f.finish()
}

fn main() {
    println!("=== Derivative Engine: Loops ===\n");

    let mut module = Module::new();
    module
        .add_function(power_loop())
        .add_function(leaky())
        .define_global("LAST", Value::Float(0.0));
    let engine = Engine::new(module);

    // Example 1: reverse mode through a loop
    println!("Example 1: power_loop(x) = x⁴, reverse mode");
    let f = engine.unary::<f64, f64>("power_loop").expect("power_loop is differentiable");
    for x in [1.0, 2.0, 3.0] {
        let (value, grad) = value_with_gradient(&x, &f);
        println!("  x = {x}: f = {value}, f' = {grad} (expected: 4x³ = {})", 4.0 * x * x * x);
    }
    println!();

    // Example 2: forward mode through the same loop
    println!("Example 2: power_loop(x) = x⁴, forward mode");
    println!("  f'(2) = {} (expected: 32)", derivative(&2.0, &f));
    println!();

    // Example 3: a rejected request
    println!("Example 3: differentiating a function that writes a global");
    match engine.differentiate("leaky", &[0]) {
        Ok(_) => println!("  unexpectedly accepted"),
        Err(err) => {
            println!("  {}", err.summary);
            for diagnostic in &err.diagnostics {
                for line in diagnostic.render(LEAKY_SOURCE).lines() {
                    println!("  {line}");
                }
            }
        }
    }
    println!();

    // Example 4: plain evaluation still runs it
    println!("Example 4: evaluating leaky(3)");
    let value = engine.evaluate("leaky", &[Value::Float(3.0)]).expect("leaky evaluates");
    println!("  leaky(3) = {value:?}, LAST = {:?}", engine.global("LAST"));
}
