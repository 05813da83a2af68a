//! Activity analysis over the locals of a body.
//!
//! A local is *varied* when some definition of it depends on a
//! differentiation parameter, *useful* when some definition of a
//! returned local depends on it, and *active* when it is both. Locals
//! are mutable slots, so the analysis is flow-insensitive: one fixed
//! point over every statement of every reachable block.

use super::ir::{Body, Instr, Local, Projection, Type};
use super::module::Module;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    varied: Vec<bool>,
    useful: Vec<bool>,
}

impl Activity {
    /// Analyzes `body` with respect to the parameters at `wrt`.
    pub fn analyze(module: &Module, body: &Body, wrt: &[usize]) -> Self {
        let statements: Vec<&Instr> = body
            .reachable()
            .into_iter()
            .flat_map(|id| body.block(id).statements.iter().map(|stmt| &stmt.instr))
            .collect();

        let mut varied = vec![false; body.locals.len()];
        for &param in wrt {
            if param < varied.len() {
                varied[param] = true;
            }
        }
        let mut changed = true;
        while changed {
            changed = false;
            for instr in &statements {
                let Some(dst) = instr.defined() else { continue };
                if !varied[dst.0] && varies(module, body, instr, &varied) {
                    varied[dst.0] = true;
                    changed = true;
                }
            }
        }

        let mut useful = vec![false; body.locals.len()];
        for local in body.returned() {
            useful[local.0] = true;
        }
        let mut changed = true;
        while changed {
            changed = false;
            for instr in &statements {
                let Some(dst) = instr.defined() else { continue };
                if !useful[dst.0] {
                    continue;
                }
                for operand in operands(instr) {
                    if !useful[operand.0] {
                        useful[operand.0] = true;
                        changed = true;
                    }
                }
            }
        }

        Self { varied, useful }
    }

    pub fn is_varied(&self, local: Local) -> bool {
        self.varied[local.0]
    }

    pub fn is_useful(&self, local: Local) -> bool {
        self.useful[local.0]
    }

    pub fn is_active(&self, local: Local) -> bool {
        self.is_varied(local) && self.is_useful(local)
    }
}

/// Whether this definition makes its destination varied.
fn varies(module: &Module, body: &Body, instr: &Instr, varied: &[bool]) -> bool {
    let any = |locals: &[Local]| locals.iter().any(|local| varied[local.0]);
    match instr {
        Instr::Const { .. }
        | Instr::Compare { .. }
        | Instr::NoneValue { .. }
        | Instr::LoadGlobal { .. }
        | Instr::WithoutDerivative { .. }
        | Instr::StoreGlobal { .. } => false,
        Instr::Copy { src, .. }
        | Instr::Unary { operand: src, .. }
        | Instr::FloatToInt { src, .. }
        | Instr::IntToFloat { src, .. }
        | Instr::WrapSome { value: src, .. }
        | Instr::ForceUnwrap { optional: src, .. }
        | Instr::UnwrapSome { optional: src, .. }
        | Instr::EnumPayload { value: src, .. } => varied[src.0],
        Instr::Binary { lhs, rhs, .. } => any(&[*lhs, *rhs]),
        Instr::Tuple { elements, .. } => any(elements),
        Instr::Struct { name, fields, .. } => {
            let decl = module.struct_decl(name);
            fields.iter().enumerate().any(|(i, field)| {
                let skipped = decl
                    .and_then(|decl| decl.fields.get(i))
                    .map_or(false, |field| field.no_derivative);
                !skipped && varied[field.0]
            })
        }
        Instr::Extract { base, path, .. } => {
            varied[base.0] && !crosses_no_derivative(module, body.local_type(*base), path)
        }
        Instr::Assign { target, path, value } => {
            varied[value.0] && !crosses_no_derivative(module, body.local_type(*target), path)
        }
        Instr::CompoundAssign { value, .. } => varied[value.0],
        Instr::EnumConstruct { payload, .. } => payload.map_or(false, |p| varied[p.0]),
        Instr::Call { args, .. } => any(args),
    }
}

/// Locals an instruction reads to compute what it defines.
pub(crate) fn operands(instr: &Instr) -> Vec<Local> {
    match instr {
        Instr::Const { .. } | Instr::NoneValue { .. } | Instr::LoadGlobal { .. } => Vec::new(),
        Instr::Copy { src, .. }
        | Instr::Unary { operand: src, .. }
        | Instr::FloatToInt { src, .. }
        | Instr::IntToFloat { src, .. }
        | Instr::WrapSome { value: src, .. }
        | Instr::ForceUnwrap { optional: src, .. }
        | Instr::UnwrapSome { optional: src, .. }
        | Instr::EnumPayload { value: src, .. }
        | Instr::WithoutDerivative { src, .. }
        | Instr::Extract { base: src, .. }
        | Instr::StoreGlobal { value: src, .. } => vec![*src],
        Instr::Binary { lhs, rhs, .. } | Instr::Compare { lhs, rhs, .. } => vec![*lhs, *rhs],
        Instr::Tuple { elements, .. } => elements.clone(),
        Instr::Struct { fields, .. } => fields.clone(),
        Instr::Assign { value, .. } | Instr::CompoundAssign { value, .. } => vec![*value],
        Instr::EnumConstruct { payload, .. } => payload.iter().copied().collect(),
        Instr::Call { args, .. } => args.clone(),
    }
}

/// Whether `path` steps through a `@noDerivative` field of a struct.
pub(crate) fn crosses_no_derivative(module: &Module, ty: &Type, path: &[Projection]) -> bool {
    let mut ty = ty.clone();
    for step in path {
        ty = match (&ty, step) {
            (Type::Tuple(elements), Projection::Element(i)) => match elements.get(*i) {
                Some(element) => element.clone(),
                None => return false,
            },
            (Type::Struct(name), Projection::Field(i)) => {
                let Some(field) = module.struct_decl(name).and_then(|decl| decl.fields.get(*i)) else {
                    return false;
                };
                if field.no_derivative {
                    return true;
                }
                field.ty.clone()
            }
            _ => return false,
        };
    }
    false
}

/// Number of components at each step of `path`, starting at `ty`.
pub(crate) fn path_arities(module: &Module, ty: &Type, path: &[Projection]) -> Vec<usize> {
    let mut arities = Vec::with_capacity(path.len());
    let mut ty = ty.clone();
    for step in path {
        let (arity, next) = match &ty {
            Type::Tuple(elements) => (elements.len(), elements.get(step.index()).cloned()),
            Type::Struct(name) => match module.struct_decl(name) {
                Some(decl) => (
                    decl.fields.len(),
                    decl.fields.get(step.index()).map(|field| field.ty.clone()),
                ),
                None => (0, None),
            },
            _ => (0, None),
        };
        arities.push(arity);
        ty = next.unwrap_or(Type::Unit);
    }
    arities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ir::{BinaryOp, CompareOp, FunctionBuilder};
    use crate::engine::module::{FieldDecl, Implementation};

    fn body_of(f: FunctionBuilder) -> Body {
        match f.finish().implementation {
            Implementation::Ir(body) => body,
            Implementation::Native(_) => unreachable!(),
        }
    }

    #[test]
    fn active_needs_both_varied_and_useful() {
        // fn f(x, y) { let unused = x * x; let c = x > y; return y * 2 }
        let mut f = FunctionBuilder::new("f", Type::Float);
        let x = f.param("x", Type::Float);
        let y = f.param("y", Type::Float);
        let unused = f.binary(BinaryOp::Mul, x, x);
        let cond = f.compare(CompareOp::Gt, x, y);
        let two = f.float(2.0);
        let out = f.binary(BinaryOp::Mul, y, two);
        f.ret(out);
        let body = body_of(f);

        let wrt_x = Activity::analyze(&Module::new(), &body, &[0]);
        assert!(wrt_x.is_varied(unused));
        assert!(!wrt_x.is_useful(unused));
        assert!(!wrt_x.is_varied(cond));
        assert!(!wrt_x.is_active(out));

        let wrt_y = Activity::analyze(&Module::new(), &body, &[1]);
        assert!(wrt_y.is_active(out));
        assert!(!wrt_y.is_varied(two));
    }

    #[test]
    fn no_derivative_fields_are_never_varied() {
        let mut module = Module::new();
        module.define_struct(
            "Dense",
            vec![
                FieldDecl::new("w1", Type::Float),
                FieldDecl::no_derivative("w2", Type::Float),
            ],
        );
        let mut f = FunctionBuilder::new("f", Type::Float);
        let dense = f.param("dense", Type::Struct("Dense".into()));
        let w1 = f.extract(dense, &[Projection::Field(0)], Type::Float);
        let w2 = f.extract(dense, &[Projection::Field(1)], Type::Float);
        let out = f.binary(BinaryOp::Mul, w1, w2);
        f.ret(out);
        let body = body_of(f);

        let activity = Activity::analyze(&module, &body, &[0]);
        assert!(activity.is_active(w1));
        assert!(!activity.is_varied(w2));
        assert!(activity.is_useful(w2));
        assert_eq!(
            path_arities(&module, &Type::Struct("Dense".into()), &[Projection::Field(1)]),
            vec![2]
        );
    }

    #[test]
    fn loops_reach_a_fixed_point() {
        // var r = 1; while r < 10 { r = r * x }; return r
        let mut f = FunctionBuilder::new("f", Type::Float);
        let x = f.param("x", Type::Float);
        let r = f.float(1.0);
        let header = f.block();
        let body_block = f.block();
        let exit = f.block();
        f.jump(header);
        f.switch_to(header);
        let ten = f.float(10.0);
        let cond = f.compare(CompareOp::Lt, r, ten);
        f.branch(cond, body_block, exit);
        f.switch_to(body_block);
        let next = f.binary(BinaryOp::Mul, r, x);
        f.copy(r, next);
        f.jump(header);
        f.switch_to(exit);
        f.ret(r);
        let body = body_of(f);

        let activity = Activity::analyze(&Module::new(), &body, &[0]);
        assert!(activity.is_active(r));
        assert!(activity.is_active(next));
        assert!(activity.is_active(x));
    }
}
