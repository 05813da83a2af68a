//! A derivative engine for functions written in a small typed IR.
//!
//! Functions are built with [`FunctionBuilder`] and collected in a
//! [`Module`]. [`Engine::differentiate`] statically checks that a
//! function is differentiable with respect to a parameter subset and
//! reports localized [`Diagnostic`]s when it is not. An accepted
//! [`Derivative`] evaluates the function while recording a
//! [`Linearization`], which runs as a pullback or as a differential.
//!
//! ```
//! use autodiff::engine::{BinaryOp, Engine, FunctionBuilder, Module, Type};
//! use autodiff::gradient;
//!
//! // fn cube(x: Float) -> Float { x * x * x }
//! let mut f = FunctionBuilder::new("cube", Type::Float);
//! let x = f.param("x", Type::Float);
//! let xx = f.binary(BinaryOp::Mul, x, x);
//! let xxx = f.binary(BinaryOp::Mul, xx, x);
//! f.ret(xxx);
//!
//! let mut module = Module::new();
//! module.add_function(f.finish());
//! let engine = Engine::new(module);
//!
//! let cube = engine.unary::<f64, f64>("cube").unwrap();
//! assert_eq!(gradient(&2.0, &cube), 12.0);
//! ```

mod activity;
mod check;
mod config;
mod diagnostics;
mod interp;
mod ir;
mod linear;
mod module;
mod typed;
mod value;

pub use activity::Activity;
pub use config::EngineOptions;
pub use diagnostics::{Diagnostic, DifferentiationError, Note, Severity};
pub use ir::{
    BinaryOp, Block, BlockId, Body, Callee, CompareOp, FunctionBuilder, Instr, Local, Projection, Span,
    Statement, Terminator, Type, UnaryOp,
};
pub use linear::Linearization;
pub use module::{
    ClassDecl, CustomDerivative, CustomDifferential, CustomPullback, EnumDecl, FieldDecl, FunctionDecl,
    Implementation, JvpFn, MethodEntry, Module, NativeFn, Param, ProtocolDecl, Requirement, StructDecl, VjpFn,
};
pub use typed::{Compiled, Compiled2, Compiled3, EngineValue};
pub use value::{RuntimeError, Tangent, Value};

/// Diagnostic texts, for matching against [`DifferentiationError`]s.
pub mod messages {
    pub use super::diagnostics::{
        CALL_SITE, CLASS_MEMBER, ENUM, GLOBAL_WRITE, INOUT, MISSING_RETURN, NONDIFF_PARAM, NONVARIED_RESULT,
        NON_DIFFERENTIABLE_RESULT, NOT_DIFFERENTIABLE, NO_DERIVATIVE_FIELD, OPAQUE, PROTOCOL_REQUIREMENT,
    };
}

use check::Checker;
use interp::{Mode, Runtime};
use std::rc::Rc;
use tracing::{debug, warn};

/// Checks, evaluates and differentiates the functions of a [`Module`].
///
/// Cloning is cheap; clones share globals and cached check results.
#[derive(Clone)]
pub struct Engine {
    runtime: Rc<Runtime>,
}

impl Engine {
    pub fn new(module: Module) -> Self {
        Self::with_options(module, EngineOptions::default())
    }

    pub fn with_options(module: Module, options: EngineOptions) -> Self {
        Self {
            runtime: Rc::new(Runtime::new(module, options)),
        }
    }

    pub fn module(&self) -> &Module {
        &self.runtime.module
    }

    pub fn options(&self) -> &EngineOptions {
        &self.runtime.options
    }

    /// Current value of a global.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.runtime.global(name)
    }

    /// Evaluates `name` on `args` without differentiating.
    pub fn evaluate(&self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        self.runtime.evaluate(name, args.to_vec(), 0)
    }

    /// Checks that `name` is differentiable with respect to the
    /// parameters at `wrt`.
    ///
    /// # Errors
    ///
    /// Returns every diagnostic of a rejected request: a primary
    /// `function is not differentiable` error with one note per
    /// offending construct. With
    /// [`warnings_as_errors`](EngineOptions::warnings_as_errors), warnings
    /// reject the request too.
    pub fn differentiate(&self, name: &str, wrt: &[usize]) -> Result<Derivative, DifferentiationError> {
        let runtime = &self.runtime;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        {
            let mut cache = runtime.cache.borrow_mut();
            let verdict = Checker::new(&runtime.module, &runtime.options, &mut cache).check(name, wrt);
            match verdict {
                Err(notes) => errors.push(Diagnostic {
                    notes,
                    ..Diagnostic::error(diagnostics::NOT_DIFFERENTIABLE, None)
                }),
                Ok(()) if runtime.options.report_nonvaried_results => {
                    if let Some(Implementation::Ir(body)) =
                        runtime.module.function(name).map(|decl| &decl.implementation)
                    {
                        let activity = cache.activity(&runtime.module, body, name, wrt);
                        warnings.extend(check::nonvaried_result(body, &activity));
                    }
                }
                Ok(()) => {}
            }
        }

        for warning in &warnings {
            warn!(function = name, ?wrt, "{}", warning.message);
        }
        if runtime.options.warnings_as_errors {
            errors.extend(warnings.drain(..).map(|warning| Diagnostic {
                severity: Severity::Error,
                ..warning
            }));
        }
        if !errors.is_empty() {
            debug!(function = name, ?wrt, diagnostics = errors.len(), "rejected");
            return Err(DifferentiationError {
                summary: format!("cannot differentiate '{name}' with respect to parameters {wrt:?}"),
                diagnostics: errors,
            });
        }
        Ok(Derivative {
            runtime: Rc::clone(runtime),
            name: name.to_string(),
            wrt: wrt.to_vec(),
            warnings,
        })
    }

    /// A typed handle for a one-argument function.
    pub fn unary<T: EngineValue, R: EngineValue>(&self, name: &str) -> Result<Compiled<T, R>, DifferentiationError> {
        Ok(Compiled::new(self.differentiate(name, &[0])?))
    }

    /// A typed handle for a two-argument function, differentiable in both.
    pub fn binary<T, U, R>(&self, name: &str) -> Result<Compiled2<T, U, R>, DifferentiationError>
    where
        T: EngineValue,
        U: EngineValue,
        R: EngineValue,
    {
        self.binary_wrt(name, &[0, 1])
    }

    /// A typed handle for a two-argument function, differentiable in the
    /// parameters at `wrt`. The others get zero tangents.
    pub fn binary_wrt<T, U, R>(&self, name: &str, wrt: &[usize]) -> Result<Compiled2<T, U, R>, DifferentiationError>
    where
        T: EngineValue,
        U: EngineValue,
        R: EngineValue,
    {
        Ok(Compiled2::new(self.differentiate(name, wrt)?))
    }

    /// A typed handle for a three-argument function.
    pub fn ternary<T, U, V, R>(&self, name: &str) -> Result<Compiled3<T, U, V, R>, DifferentiationError>
    where
        T: EngineValue,
        U: EngineValue,
        V: EngineValue,
        R: EngineValue,
    {
        Ok(Compiled3::new(self.differentiate(name, &[0, 1, 2])?))
    }
}

/// A function accepted for differentiation with respect to a parameter
/// subset.
#[derive(Clone)]
pub struct Derivative {
    runtime: Rc<Runtime>,
    name: String,
    wrt: Vec<usize>,
    warnings: Vec<Diagnostic>,
}

impl Derivative {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wrt(&self) -> &[usize] {
        &self.wrt
    }

    /// Warnings the check produced for this request.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Evaluates the function without recording a linear map.
    pub fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        self.runtime.evaluate(&self.name, args.to_vec(), 0)
    }

    /// Evaluates the function and returns its value with a linear map
    /// that runs as a pullback.
    pub fn value_with_pullback(&self, args: &[Value]) -> Result<(Value, Linearization), RuntimeError> {
        self.runtime
            .linearize(&self.name, args.to_vec(), &self.wrt, Mode::Reverse, 0)
    }

    /// Evaluates the function and returns its value with a linear map
    /// that runs as a differential.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::MissingDifferential`] when a callee on the
    /// evaluated path has a custom derivative without a JVP.
    pub fn value_with_differential(&self, args: &[Value]) -> Result<(Value, Linearization), RuntimeError> {
        self.runtime
            .linearize(&self.name, args.to_vec(), &self.wrt, Mode::Forward, 0)
    }

    /// The value and the gradient of a scalar result, one tangent per
    /// parameter.
    pub fn value_with_gradient(&self, args: &[Value]) -> Result<(Value, Vec<Tangent>), RuntimeError> {
        let (value, map) = self.value_with_pullback(args)?;
        Ok((value, map.pullback(Tangent::Float(1.0))?))
    }
}

impl std::fmt::Debug for Derivative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derivative")
            .field("name", &self.name)
            .field("wrt", &self.wrt)
            .field("warnings", &self.warnings.len())
            .finish()
    }
}
