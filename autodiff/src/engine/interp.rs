//! Evaluation of module functions, optionally recording linear entries.

use super::activity::{crosses_no_derivative, path_arities, Activity};
use super::check::CheckCache;
use super::config::EngineOptions;
use super::ir::{BinaryOp, Body, BlockId, CompareOp, Instr, Local, Terminator, UnaryOp};
use super::linear::{BlockRecord, Entry, Linearization};
use super::module::{FunctionDecl, Implementation, Module};
use super::value::{RuntimeError, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, trace};

/// Direction a linearization will be run in. Decides which registered
/// derivative of a callee is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Reverse,
    Forward,
}

/// A module with its mutable state.
pub(crate) struct Runtime {
    pub(crate) module: Module,
    pub(crate) options: EngineOptions,
    pub(crate) cache: RefCell<CheckCache>,
    globals: RefCell<BTreeMap<String, Value>>,
}

struct Tape {
    activity: Rc<Activity>,
    mode: Mode,
    records: Vec<BlockRecord>,
}

struct Frame {
    slots: Vec<Option<Value>>,
}

impl Frame {
    fn read(&self, local: Local) -> Result<Value, RuntimeError> {
        self.slots[local.0]
            .clone()
            .ok_or(RuntimeError::Uninitialized(local.0))
    }

    fn slot_mut(&mut self, local: Local) -> Result<&mut Value, RuntimeError> {
        self.slots[local.0]
            .as_mut()
            .ok_or(RuntimeError::Uninitialized(local.0))
    }

    fn write(&mut self, local: Local, value: Value) {
        self.slots[local.0] = Some(value);
    }
}

impl Runtime {
    pub(crate) fn new(module: Module, options: EngineOptions) -> Self {
        let globals = RefCell::new(module.globals().clone());
        Self {
            module,
            options,
            cache: RefCell::new(CheckCache::default()),
            globals,
        }
    }

    pub(crate) fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get(name).cloned()
    }

    fn function(&self, name: &str, args: &[Value], depth: usize) -> Result<&FunctionDecl, RuntimeError> {
        if depth > self.options.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded(self.options.max_call_depth));
        }
        let decl = self
            .module
            .function(name)
            .ok_or_else(|| RuntimeError::UnknownFunction(name.to_string()))?;
        if decl.params.len() != args.len() {
            return Err(RuntimeError::Arity {
                function: name.to_string(),
                expected: decl.params.len(),
                found: args.len(),
            });
        }
        Ok(decl)
    }

    /// Evaluates `name` without recording anything.
    pub(crate) fn evaluate(&self, name: &str, args: Vec<Value>, depth: usize) -> Result<Value, RuntimeError> {
        let decl = self.function(name, &args, depth)?;
        match &decl.implementation {
            Implementation::Native(body) => body(&args),
            Implementation::Ir(body) => Ok(self.run(name, body, args, None, depth)?.0),
        }
    }

    /// Evaluates `name` and builds its linear map with respect to `wrt`.
    pub(crate) fn linearize(
        &self,
        name: &str,
        args: Vec<Value>,
        wrt: &[usize],
        mode: Mode,
        depth: usize,
    ) -> Result<(Value, Linearization), RuntimeError> {
        let decl = self.function(name, &args, depth)?;
        if let Some(derivative) = &decl.derivative {
            return match mode {
                Mode::Reverse => {
                    let (value, pullback) = (derivative.vjp)(&args)?;
                    Ok((value, Linearization::custom_pullback(name, pullback)))
                }
                Mode::Forward => {
                    let jvp = derivative
                        .jvp
                        .as_ref()
                        .ok_or_else(|| RuntimeError::MissingDifferential(name.to_string()))?;
                    let (value, differential) = jvp(&args)?;
                    Ok((value, Linearization::custom_differential(name, differential)))
                }
            };
        }
        let Implementation::Ir(body) = &decl.implementation else {
            return Err(RuntimeError::MissingPullback(name.to_string()));
        };
        let activity = self.cache.borrow_mut().activity(&self.module, body, name, wrt);
        let mut tape = Tape {
            activity,
            mode,
            records: Vec::new(),
        };
        let (value, result) = self.run(name, body, args, Some(&mut tape), depth)?;
        debug!(function = name, ?wrt, records = tape.records.len(), "linearized");
        let map = Linearization::derived(name, decl.params.len(), wrt, body.locals.len(), result, tape.records);
        Ok((value, map))
    }

    fn run(
        &self,
        name: &str,
        body: &Body,
        args: Vec<Value>,
        mut tape: Option<&mut Tape>,
        depth: usize,
    ) -> Result<(Value, Local), RuntimeError> {
        let mut frame = Frame {
            slots: vec![None; body.locals.len()],
        };
        for (i, arg) in args.into_iter().enumerate() {
            frame.slots[i] = Some(arg);
        }

        let mut current = BlockId(0);
        loop {
            let block = body.block(current);
            let mut entries = Vec::new();
            for stmt in &block.statements {
                self.execute(body, &stmt.instr, &mut frame, tape.as_deref(), &mut entries, depth)?;
            }
            if let Some(tape) = tape.as_deref_mut() {
                let record = BlockRecord::new(current, entries);
                trace!(function = name, block = record.block.0, entries = record.entries.len(), "block record");
                tape.records.push(record);
            }

            current = match &block.terminator {
                Terminator::Jump(target) => *target,
                Terminator::Branch {
                    cond,
                    then_block,
                    else_block,
                } => {
                    if frame.read(*cond)?.as_bool()? {
                        *then_block
                    } else {
                        *else_block
                    }
                }
                Terminator::BranchSome {
                    optional,
                    some_block,
                    none_block,
                } => match frame.read(*optional)? {
                    Value::Optional(Some(_)) => *some_block,
                    Value::Optional(None) => *none_block,
                    other => return Err(RuntimeError::type_mismatch("Optional", &other)),
                },
                Terminator::SwitchEnum { value, cases, default } => {
                    let case = match frame.read(*value)? {
                        Value::Enum { case, .. } => case,
                        other => return Err(RuntimeError::type_mismatch("enum", &other)),
                    };
                    cases
                        .iter()
                        .find(|(c, _)| *c == case)
                        .map(|(_, block)| *block)
                        .or(*default)
                        .ok_or_else(|| RuntimeError::Unreachable(name.to_string()))?
                }
                Terminator::Return(local) => return Ok((frame.read(*local)?, *local)),
                Terminator::Unreachable => return Err(RuntimeError::Unreachable(name.to_string())),
            };
        }
    }

    fn execute(
        &self,
        body: &Body,
        instr: &Instr,
        frame: &mut Frame,
        tape: Option<&Tape>,
        entries: &mut Vec<Entry>,
        depth: usize,
    ) -> Result<(), RuntimeError> {
        let varied = |local: Local| tape.map_or(false, |tape| tape.activity.is_varied(local));
        let active = |local: Local| tape.map_or(false, |tape| tape.activity.is_active(local));
        let linear = |dst: Local, terms: &[(Local, f64)]| {
            let terms: Vec<(Local, f64)> = terms.iter().copied().filter(|(src, _)| varied(*src)).collect();
            if terms.is_empty() {
                Entry::Zero { dst }
            } else {
                Entry::Linear { dst, terms }
            }
        };

        match instr {
            Instr::Const { dst, value } => {
                frame.write(*dst, value.clone());
                if active(*dst) {
                    entries.push(Entry::Zero { dst: *dst });
                }
            }
            Instr::Copy { dst, src } => {
                let value = frame.read(*src)?;
                if active(*dst) {
                    entries.push(linear(*dst, &[(*src, 1.0)]));
                }
                frame.write(*dst, value);
            }
            Instr::Binary { dst, op, lhs, rhs } => {
                let (l, r) = (frame.read(*lhs)?, frame.read(*rhs)?);
                let out = binary(*op, &l, &r)?;
                if active(*dst) {
                    let (a, b) = (l.as_float()?, r.as_float()?);
                    let (da, db) = match op {
                        BinaryOp::Add => (1.0, 1.0),
                        BinaryOp::Sub => (1.0, -1.0),
                        BinaryOp::Mul => (b, a),
                        BinaryOp::Div => (1.0 / b, -a / (b * b)),
                    };
                    entries.push(linear(*dst, &[(*lhs, da), (*rhs, db)]));
                }
                frame.write(*dst, out);
            }
            Instr::Unary { dst, op, operand } => {
                let value = frame.read(*operand)?;
                let out = unary(*op, &value)?;
                if active(*dst) {
                    let a = value.as_float()?;
                    let partial = match op {
                        UnaryOp::Neg => -1.0,
                        UnaryOp::Sin => a.cos(),
                        UnaryOp::Cos => -a.sin(),
                        UnaryOp::Exp => a.exp(),
                        UnaryOp::Ln => 1.0 / a,
                        UnaryOp::Sqrt => 0.5 / a.sqrt(),
                    };
                    entries.push(linear(*dst, &[(*operand, partial)]));
                }
                frame.write(*dst, out);
            }
            Instr::Compare { dst, op, lhs, rhs } => {
                let out = compare(*op, &frame.read(*lhs)?, &frame.read(*rhs)?)?;
                frame.write(*dst, Value::Bool(out));
            }
            Instr::FloatToInt { dst, src } => {
                let x = frame.read(*src)?.as_float()?;
                if active(*dst) {
                    entries.push(Entry::Zero { dst: *dst });
                }
                frame.write(*dst, Value::Int(x as i64));
            }
            Instr::IntToFloat { dst, src } => {
                let x = frame.read(*src)?.as_int()?;
                if active(*dst) {
                    entries.push(Entry::Zero { dst: *dst });
                }
                frame.write(*dst, Value::Float(x as f64));
            }
            Instr::Tuple { dst, elements } => {
                let values = elements.iter().map(|e| frame.read(*e)).collect::<Result<_, _>>()?;
                if active(*dst) {
                    let elements = elements.iter().map(|e| varied(*e).then_some(*e)).collect();
                    entries.push(aggregate(*dst, elements));
                }
                frame.write(*dst, Value::Tuple(values));
            }
            Instr::Struct { dst, name, fields } => {
                let values = fields.iter().map(|f| frame.read(*f)).collect::<Result<_, _>>()?;
                if active(*dst) {
                    let decl = self.module.struct_decl(name);
                    let elements = fields
                        .iter()
                        .enumerate()
                        .map(|(i, field)| {
                            let skipped = decl
                                .and_then(|decl| decl.fields.get(i))
                                .map_or(false, |decl| decl.no_derivative);
                            (!skipped && varied(*field)).then_some(*field)
                        })
                        .collect();
                    entries.push(aggregate(*dst, elements));
                }
                frame.write(
                    *dst,
                    Value::Struct {
                        name: name.clone(),
                        fields: values,
                    },
                );
            }
            Instr::Extract { dst, base, path } => {
                let indices: Vec<usize> = path.iter().map(|p| p.index()).collect();
                let value = frame.read(*base)?.project(&indices)?.clone();
                if active(*dst) {
                    let base_ty = body.local_type(*base);
                    if varied(*base) && !crosses_no_derivative(&self.module, base_ty, path) {
                        entries.push(Entry::Extract {
                            dst: *dst,
                            base: *base,
                            path: indices,
                            arities: path_arities(&self.module, base_ty, path),
                        });
                    } else {
                        entries.push(Entry::Zero { dst: *dst });
                    }
                }
                frame.write(*dst, value);
            }
            Instr::Assign { target, path, value } => {
                let indices: Vec<usize> = path.iter().map(|p| p.index()).collect();
                let new = frame.read(*value)?;
                *frame.slot_mut(*target)?.project_mut(&indices)? = new;
                if active(*target) {
                    let target_ty = body.local_type(*target);
                    let source = (varied(*value) && !crosses_no_derivative(&self.module, target_ty, path))
                        .then_some(*value);
                    entries.push(Entry::Assign {
                        target: *target,
                        arities: path_arities(&self.module, target_ty, path),
                        path: indices,
                        value: source,
                    });
                }
            }
            Instr::WrapSome { dst, value } => {
                let inner = frame.read(*value)?;
                if active(*dst) {
                    entries.push(if varied(*value) {
                        Entry::WrapSome {
                            dst: *dst,
                            value: *value,
                        }
                    } else {
                        Entry::Zero { dst: *dst }
                    });
                }
                frame.write(*dst, Value::some(inner));
            }
            Instr::NoneValue { dst } => {
                if active(*dst) {
                    entries.push(Entry::Zero { dst: *dst });
                }
                frame.write(*dst, Value::none());
            }
            Instr::ForceUnwrap { dst, optional } | Instr::UnwrapSome { dst, optional } => {
                let inner = match frame.read(*optional)? {
                    Value::Optional(Some(inner)) => *inner,
                    Value::Optional(None) => return Err(RuntimeError::UnwrapNone),
                    other => return Err(RuntimeError::type_mismatch("Optional", &other)),
                };
                if active(*dst) {
                    let binds = matches!(instr, Instr::UnwrapSome { .. }) && varied(*optional);
                    entries.push(if binds {
                        Entry::UnwrapSome {
                            dst: *dst,
                            optional: *optional,
                        }
                    } else {
                        Entry::Zero { dst: *dst }
                    });
                }
                frame.write(*dst, inner);
            }
            Instr::EnumConstruct {
                dst,
                name,
                case,
                payload,
            } => {
                let payload = payload.map(|p| frame.read(p)).transpose()?.map(Box::new);
                if active(*dst) {
                    entries.push(Entry::Zero { dst: *dst });
                }
                frame.write(
                    *dst,
                    Value::Enum {
                        name: name.clone(),
                        case: *case,
                        payload,
                    },
                );
            }
            Instr::EnumPayload { dst, value, case } => {
                let payload = match frame.read(*value)? {
                    Value::Enum {
                        case: found,
                        payload,
                        ..
                    } if found == *case => payload.map_or(Value::Unit, |p| *p),
                    Value::Enum { case: found, .. } => {
                        return Err(RuntimeError::WrongCase {
                            expected: *case,
                            found,
                        })
                    }
                    other => return Err(RuntimeError::type_mismatch("enum", &other)),
                };
                if active(*dst) {
                    entries.push(Entry::Zero { dst: *dst });
                }
                frame.write(*dst, payload);
            }
            Instr::Call { dst, callee, args: locals } => {
                let args = locals.iter().map(|l| frame.read(*l)).collect::<Result<Vec<_>, _>>()?;
                let resolved = self.module.resolve(callee, args.first())?;
                let wrt: Vec<usize> = (0..locals.len()).filter(|&i| varied(locals[i])).collect();
                let out = match tape {
                    Some(tape) if active(*dst) && !wrt.is_empty() => {
                        let (out, map) = self.linearize(&resolved, args, &wrt, tape.mode, depth + 1)?;
                        entries.push(Entry::Call {
                            dst: *dst,
                            args: wrt.iter().map(|&i| (i, locals[i])).collect(),
                            arity: locals.len(),
                            map,
                        });
                        out
                    }
                    _ => {
                        if active(*dst) {
                            entries.push(Entry::Zero { dst: *dst });
                        }
                        self.evaluate(&resolved, args, depth + 1)?
                    }
                };
                frame.write(*dst, out);
            }
            Instr::LoadGlobal { dst, name } => {
                let value = self
                    .global(name)
                    .ok_or_else(|| RuntimeError::UnknownGlobal(name.clone()))?;
                if active(*dst) {
                    entries.push(Entry::Zero { dst: *dst });
                }
                frame.write(*dst, value);
            }
            Instr::StoreGlobal { name, value } => {
                let value = frame.read(*value)?;
                self.globals.borrow_mut().insert(name.clone(), value);
            }
            Instr::CompoundAssign {
                target,
                path,
                op,
                value,
            } => {
                let indices: Vec<usize> = path.iter().map(|p| p.index()).collect();
                let rhs = frame.read(*value)?;
                let slot = frame.slot_mut(*target)?.project_mut(&indices)?;
                *slot = binary(*op, slot, &rhs)?;
                if active(*target) {
                    entries.push(Entry::Zero { dst: *target });
                }
            }
            Instr::WithoutDerivative { dst, src } => {
                let value = frame.read(*src)?;
                if active(*dst) {
                    entries.push(Entry::Zero { dst: *dst });
                }
                frame.write(*dst, value);
            }
        }
        Ok(())
    }
}

fn aggregate(dst: Local, elements: Vec<Option<Local>>) -> Entry {
    if elements.iter().all(Option::is_none) {
        Entry::Zero { dst }
    } else {
        Entry::Aggregate { dst, elements }
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    match (lhs, rhs) {
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        })),
        (Value::Int(a), Value::Int(b)) => match op {
            BinaryOp::Add => Ok(Value::Int(a.wrapping_add(*b))),
            BinaryOp::Sub => Ok(Value::Int(a.wrapping_sub(*b))),
            BinaryOp::Mul => Ok(Value::Int(a.wrapping_mul(*b))),
            BinaryOp::Div => a.checked_div(*b).map(Value::Int).ok_or(RuntimeError::DivisionByZero),
        },
        (Value::Float(_), other) | (Value::Int(_), other) => Err(RuntimeError::type_mismatch(
            if matches!(lhs, Value::Float(_)) { "Float" } else { "Int" },
            other,
        )),
        (other, _) => Err(RuntimeError::type_mismatch("a number", other)),
    }
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, RuntimeError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Int(a)) => Ok(Value::Int(a.wrapping_neg())),
        (op, Value::Float(a)) => Ok(Value::Float(match op {
            UnaryOp::Neg => -a,
            UnaryOp::Sin => a.sin(),
            UnaryOp::Cos => a.cos(),
            UnaryOp::Exp => a.exp(),
            UnaryOp::Ln => a.ln(),
            UnaryOp::Sqrt => a.sqrt(),
        })),
        (_, other) => Err(RuntimeError::type_mismatch("Float", other)),
    }
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
    let ordering = match (lhs, rhs) {
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        _ => match op {
            CompareOp::Eq => return Ok(lhs == rhs),
            CompareOp::Ne => return Ok(lhs != rhs),
            _ => return Err(RuntimeError::type_mismatch("a number", lhs)),
        },
    };
    // NaN compares false except under `!=`.
    let Some(ordering) = ordering else {
        return Ok(op == CompareOp::Ne);
    };
    Ok(match op {
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Le => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Ge => ordering.is_ge(),
        CompareOp::Eq => ordering.is_eq(),
        CompareOp::Ne => ordering.is_ne(),
    })
}
