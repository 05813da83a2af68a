//! Function bodies: typed local slots, basic blocks and a builder.

use super::module::{FunctionDecl, Implementation, Param};
use super::value::Value;
use std::fmt;

/// Byte range in the source a construct came from.
pub type Span = std::ops::Range<usize>;

/// A mutable local slot. Parameters occupy the first slots in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Local(pub usize);

/// Index of a basic block; block 0 is the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// Types of locals, parameters and results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Float,
    Int,
    Bool,
    Unit,
    Tuple(Vec<Type>),
    /// A struct declared in the module.
    Struct(String),
    Optional(Box<Type>),
    /// An enum declared in the module.
    Enum(String),
    /// An instance of a class declared in the module.
    Class(String),
}

impl Type {
    /// Shorthand for `Optional(Box::new(inner))`.
    pub fn optional(inner: Type) -> Type {
        Type::Optional(Box::new(inner))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Float => f.write_str("Float"),
            Type::Int => f.write_str("Int"),
            Type::Bool => f.write_str("Bool"),
            Type::Unit => f.write_str("()"),
            Type::Tuple(elements) => {
                f.write_str("(")?;
                for (i, ty) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{ty}")?;
                }
                f.write_str(")")
            }
            Type::Struct(name) | Type::Enum(name) | Type::Class(name) => f.write_str(name),
            Type::Optional(inner) => write!(f, "{inner}?"),
        }
    }
}

/// One step into a tuple or struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Tuple element by position.
    Element(usize),
    /// Struct stored property by declaration index.
    Field(usize),
}

impl Projection {
    pub fn index(self) -> usize {
        match self {
            Projection::Element(i) | Projection::Field(i) => i,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Exp,
    Ln,
    Sqrt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// What a call instruction invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    /// A function by name.
    Function(String),
    /// A protocol requirement, dispatched on the type of the first argument.
    Witness { protocol: String, requirement: String },
    /// A class method, dispatched on the class of the first argument.
    Method { class: String, method: String },
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Function(name) => f.write_str(name),
            Callee::Witness { protocol, requirement } => write!(f, "{protocol}.{requirement}"),
            Callee::Method { class, method } => write!(f, "{class}.{method}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Instr {
    Const { dst: Local, value: Value },
    Copy { dst: Local, src: Local },
    Binary { dst: Local, op: BinaryOp, lhs: Local, rhs: Local },
    Unary { dst: Local, op: UnaryOp, operand: Local },
    Compare { dst: Local, op: CompareOp, lhs: Local, rhs: Local },
    FloatToInt { dst: Local, src: Local },
    IntToFloat { dst: Local, src: Local },
    Tuple { dst: Local, elements: Vec<Local> },
    Struct { dst: Local, name: String, fields: Vec<Local> },
    /// `dst = base.path`
    Extract { dst: Local, base: Local, path: Vec<Projection> },
    /// `target.path = value`, in place.
    Assign { target: Local, path: Vec<Projection>, value: Local },
    WrapSome { dst: Local, value: Local },
    NoneValue { dst: Local },
    /// `dst = optional!`
    ForceUnwrap { dst: Local, optional: Local },
    /// Binds the payload inside the `some` successor of a
    /// [`Terminator::BranchSome`].
    UnwrapSome { dst: Local, optional: Local },
    EnumConstruct { dst: Local, name: String, case: usize, payload: Option<Local> },
    EnumPayload { dst: Local, value: Local, case: usize },
    Call { dst: Local, callee: Callee, args: Vec<Local> },
    LoadGlobal { dst: Local, name: String },
    StoreGlobal { name: String, value: Local },
    /// `target.path op= value` through an `inout` reference.
    CompoundAssign { target: Local, path: Vec<Projection>, op: BinaryOp, value: Local },
    /// `dst = src` with derivative flow cut.
    WithoutDerivative { dst: Local, src: Local },
}

impl Instr {
    /// The local this instruction (re)defines, if any. `Assign` and
    /// `CompoundAssign` partially redefine their target.
    pub fn defined(&self) -> Option<Local> {
        match self {
            Instr::Const { dst, .. }
            | Instr::Copy { dst, .. }
            | Instr::Binary { dst, .. }
            | Instr::Unary { dst, .. }
            | Instr::Compare { dst, .. }
            | Instr::FloatToInt { dst, .. }
            | Instr::IntToFloat { dst, .. }
            | Instr::Tuple { dst, .. }
            | Instr::Struct { dst, .. }
            | Instr::Extract { dst, .. }
            | Instr::WrapSome { dst, .. }
            | Instr::NoneValue { dst }
            | Instr::ForceUnwrap { dst, .. }
            | Instr::UnwrapSome { dst, .. }
            | Instr::EnumConstruct { dst, .. }
            | Instr::EnumPayload { dst, .. }
            | Instr::Call { dst, .. }
            | Instr::LoadGlobal { dst, .. }
            | Instr::WithoutDerivative { dst, .. } => Some(*dst),
            Instr::Assign { target, .. } | Instr::CompoundAssign { target, .. } => Some(*target),
            Instr::StoreGlobal { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub instr: Instr,
    pub span: Option<Span>,
}

#[derive(Debug, Clone)]
pub enum Terminator {
    Jump(BlockId),
    Branch { cond: Local, then_block: BlockId, else_block: BlockId },
    /// `if let`: continue at `some_block` when `optional` holds a value.
    BranchSome { optional: Local, some_block: BlockId, none_block: BlockId },
    SwitchEnum { value: Local, cases: Vec<(usize, BlockId)>, default: Option<BlockId> },
    Return(Local),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(target) => vec![*target],
            Terminator::Branch { then_block, else_block, .. } => vec![*then_block, *else_block],
            Terminator::BranchSome { some_block, none_block, .. } => vec![*some_block, *none_block],
            Terminator::SwitchEnum { cases, default, .. } => cases
                .iter()
                .map(|(_, block)| *block)
                .chain(default.iter().copied())
                .collect(),
            Terminator::Return(_) | Terminator::Unreachable => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub terminator: Terminator,
    pub terminator_span: Option<Span>,
}

/// A function body: typed locals and basic blocks.
#[derive(Debug, Clone)]
pub struct Body {
    pub locals: Vec<Type>,
    pub blocks: Vec<Block>,
}

impl Body {
    pub fn local_type(&self, local: Local) -> &Type {
        &self.locals[local.0]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    /// Blocks reachable from the entry, in discovery order.
    pub fn reachable(&self) -> Vec<BlockId> {
        let mut seen = vec![false; self.blocks.len()];
        let mut order = Vec::new();
        let mut stack = vec![BlockId(0)];
        while let Some(id) = stack.pop() {
            if id.0 >= self.blocks.len() || seen[id.0] {
                continue;
            }
            seen[id.0] = true;
            order.push(id);
            stack.extend(self.blocks[id.0].terminator.successors().into_iter().rev());
        }
        order
    }

    /// Locals returned by some `Return` terminator.
    pub fn returned(&self) -> Vec<Local> {
        self.blocks
            .iter()
            .filter_map(|block| match block.terminator {
                Terminator::Return(local) => Some(local),
                _ => None,
            })
            .collect()
    }
}

/// Builds a [`FunctionDecl`] with an IR body block by block.
///
/// Instructions go to the current block, which starts as the entry.
/// Blocks left without a terminator end in
/// [`Terminator::Unreachable`].
///
/// ```
/// use autodiff::engine::{BinaryOp, FunctionBuilder, Type};
///
/// // fn square(x: Float) -> Float { x * x }
/// let mut f = FunctionBuilder::new("square", Type::Float);
/// let x = f.param("x", Type::Float);
/// let y = f.binary(BinaryOp::Mul, x, x);
/// f.ret(y);
/// let decl = f.finish();
/// assert_eq!(decl.params.len(), 1);
/// ```
pub struct FunctionBuilder {
    name: String,
    result: Type,
    params: Vec<Param>,
    locals: Vec<Type>,
    blocks: Vec<Option<Block>>,
    pending: Vec<Vec<Statement>>,
    current: BlockId,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, result: Type) -> Self {
        Self {
            name: name.into(),
            result,
            params: Vec::new(),
            locals: Vec::new(),
            blocks: vec![None],
            pending: vec![Vec::new()],
            current: BlockId(0),
        }
    }

    /// Declares the next parameter.
    ///
    /// # Panics
    ///
    /// Panics if a non-parameter local was already declared.
    pub fn param(&mut self, name: impl Into<String>, ty: Type) -> Local {
        self.push_param(name.into(), ty, false)
    }

    /// Declares a `@nondiff` parameter.
    pub fn nondiff_param(&mut self, name: impl Into<String>, ty: Type) -> Local {
        self.push_param(name.into(), ty, true)
    }

    fn push_param(&mut self, name: String, ty: Type, nondiff: bool) -> Local {
        assert_eq!(
            self.params.len(),
            self.locals.len(),
            "parameters must be declared before other locals"
        );
        self.params.push(Param { name, ty: ty.clone(), nondiff });
        self.local(ty)
    }

    pub fn local(&mut self, ty: Type) -> Local {
        self.locals.push(ty);
        Local(self.locals.len() - 1)
    }

    pub fn local_type(&self, local: Local) -> &Type {
        &self.locals[local.0]
    }

    /// Creates an empty block without switching to it.
    pub fn block(&mut self) -> BlockId {
        self.blocks.push(None);
        self.pending.push(Vec::new());
        BlockId(self.blocks.len() - 1)
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current(&self) -> BlockId {
        self.current
    }

    pub fn emit(&mut self, instr: Instr) {
        self.emit_at(instr, None::<Span>);
    }

    pub fn emit_at(&mut self, instr: Instr, span: impl Into<Option<Span>>) {
        self.pending[self.current.0].push(Statement {
            instr,
            span: span.into(),
        });
    }

    pub fn terminate(&mut self, terminator: Terminator) {
        self.terminate_at(terminator, None::<Span>);
    }

    pub fn terminate_at(&mut self, terminator: Terminator, span: impl Into<Option<Span>>) {
        let statements = std::mem::take(&mut self.pending[self.current.0]);
        self.blocks[self.current.0] = Some(Block {
            statements,
            terminator,
            terminator_span: span.into(),
        });
    }

    pub fn ret(&mut self, value: Local) {
        self.terminate(Terminator::Return(value));
    }

    pub fn jump(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump(target));
    }

    pub fn branch(&mut self, cond: Local, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::Branch {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn float(&mut self, value: f64) -> Local {
        self.constant(Type::Float, Value::Float(value))
    }

    pub fn int(&mut self, value: i64) -> Local {
        self.constant(Type::Int, Value::Int(value))
    }

    pub fn constant(&mut self, ty: Type, value: Value) -> Local {
        let dst = self.local(ty);
        self.emit(Instr::Const { dst, value });
        dst
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Local, rhs: Local) -> Local {
        let dst = self.local(self.local_type(lhs).clone());
        self.emit(Instr::Binary { dst, op, lhs, rhs });
        dst
    }

    pub fn unary(&mut self, op: UnaryOp, operand: Local) -> Local {
        let dst = self.local(self.local_type(operand).clone());
        self.emit(Instr::Unary { dst, op, operand });
        dst
    }

    pub fn compare(&mut self, op: CompareOp, lhs: Local, rhs: Local) -> Local {
        let dst = self.local(Type::Bool);
        self.emit(Instr::Compare { dst, op, lhs, rhs });
        dst
    }

    pub fn tuple(&mut self, elements: &[Local]) -> Local {
        let ty = Type::Tuple(elements.iter().map(|e| self.local_type(*e).clone()).collect());
        let dst = self.local(ty);
        self.emit(Instr::Tuple {
            dst,
            elements: elements.to_vec(),
        });
        dst
    }

    pub fn structure(&mut self, name: &str, fields: &[Local]) -> Local {
        let dst = self.local(Type::Struct(name.to_string()));
        self.emit(Instr::Struct {
            dst,
            name: name.to_string(),
            fields: fields.to_vec(),
        });
        dst
    }

    pub fn extract(&mut self, base: Local, path: &[Projection], ty: Type) -> Local {
        let dst = self.local(ty);
        self.emit(Instr::Extract {
            dst,
            base,
            path: path.to_vec(),
        });
        dst
    }

    pub fn assign(&mut self, target: Local, path: &[Projection], value: Local) {
        self.emit(Instr::Assign {
            target,
            path: path.to_vec(),
            value,
        });
    }

    pub fn copy(&mut self, dst: Local, src: Local) {
        self.emit(Instr::Copy { dst, src });
    }

    pub fn call(&mut self, callee: Callee, args: &[Local], result: Type) -> Local {
        self.call_at(callee, args, result, None::<Span>)
    }

    pub fn call_at(
        &mut self,
        callee: Callee,
        args: &[Local],
        result: Type,
        span: impl Into<Option<Span>>,
    ) -> Local {
        let dst = self.local(result);
        self.emit_at(
            Instr::Call {
                dst,
                callee,
                args: args.to_vec(),
            },
            span,
        );
        dst
    }

    pub fn finish(mut self) -> FunctionDecl {
        let blocks = self
            .blocks
            .iter_mut()
            .zip(self.pending.iter_mut())
            .map(|(block, pending)| {
                block.take().unwrap_or_else(|| Block {
                    statements: std::mem::take(pending),
                    terminator: Terminator::Unreachable,
                    terminator_span: None,
                })
            })
            .collect();
        FunctionDecl {
            name: self.name,
            params: self.params,
            result: self.result,
            implementation: Implementation::Ir(Body {
                locals: self.locals,
                blocks,
            }),
            derivative: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unterminated_blocks_are_unreachable() {
        let mut f = FunctionBuilder::new("f", Type::Float);
        let x = f.param("x", Type::Float);
        let exit = f.block();
        f.jump(exit);
        f.switch_to(exit);
        f.emit(Instr::Copy { dst: x, src: x });
        let decl = f.finish();
        let Implementation::Ir(body) = decl.implementation else {
            panic!("expected an IR body");
        };
        assert!(matches!(body.block(exit).terminator, Terminator::Unreachable));
        assert_eq!(body.block(exit).statements.len(), 1);
        assert_eq!(body.reachable(), vec![BlockId(0), exit]);
    }

    #[test]
    fn helpers_infer_local_types() {
        let mut f = FunctionBuilder::new("f", Type::Float);
        let x = f.param("x", Type::Float);
        let pair = f.tuple(&[x, x]);
        assert_eq!(f.local_type(pair), &Type::Tuple(vec![Type::Float, Type::Float]));
        let cond = f.compare(CompareOp::Gt, x, x);
        assert_eq!(f.local_type(cond), &Type::Bool);
    }

    #[test]
    #[should_panic(expected = "parameters must be declared before other locals")]
    fn parameters_come_first() {
        let mut f = FunctionBuilder::new("f", Type::Float);
        f.local(Type::Float);
        f.param("x", Type::Float);
    }

    #[test]
    fn types_display_like_source() {
        let ty = Type::Tuple(vec![Type::optional(Type::Float), Type::Struct("Pair".into())]);
        assert_eq!(ty.to_string(), "(Float?, Pair)");
    }
}
