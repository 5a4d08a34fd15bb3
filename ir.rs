//! The typed SSA control-flow-graph representation the engine operates over.
//!
//! Building and validating this representation (parsing, type checking,
//! lowering from a surface syntax) is someone else's problem; this module
//! only fixes the *shape* a [`Program`] must have for the rest of the crate
//! to analyse it.

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt;
use std::rc::Rc;

use hashconsing::{consign, HConsed, HashConsign};

pub mod display;
pub mod parse;

/// A variable, scoped to a function (`None` means a global).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId {
    pub name: Rc<str>,
    pub scope: Option<FuncId>,
    pub typ: Type,
}

impl VarId {
    pub fn typ(&self) -> Type {
        self.typ.clone()
    }

    pub fn is_global(&self) -> bool {
        self.scope.is_none()
    }
}

pub fn var_id(name: &str, scope: Option<FuncId>, typ: Type) -> VarId {
    VarId { name: Rc::from(name), scope, typ }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BbId(pub Rc<str>);

pub fn bb_id(name: &str) -> BbId {
    BbId(Rc::from(name))
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncId(pub Rc<str>);

pub fn func_id(name: &str) -> FuncId {
    FuncId(Rc::from(name))
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructId(pub Rc<str>);

pub fn struct_id(name: &str) -> StructId {
    StructId(Rc::from(name))
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId {
    pub name: Rc<str>,
    pub typ: Type,
}

consign! {
    /// Hash-consing table for [`LirType`], so two structurally identical
    /// types are always the same pointer-comparable `Type`.
    let TYPE_FACTORY = consign(1024) for LirType;
}

/// A hash-consed type. Cloning is a refcount bump, equality a pointer
/// comparison.
pub type Type = HConsed<LirType>;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LirType {
    Int,
    Struct(StructId),
    Pointer(Type),
    Function { ret_ty: Option<Type>, param_ty: Vec<Type> },
}

pub fn int_ty() -> Type {
    TYPE_FACTORY.mk(LirType::Int)
}

pub fn struct_ty(id: StructId) -> Type {
    TYPE_FACTORY.mk(LirType::Struct(id))
}

pub fn pointer_ty(inner: Type) -> Type {
    TYPE_FACTORY.mk(LirType::Pointer(inner))
}

pub fn function_ty(ret_ty: Option<Type>, param_ty: Vec<Type>) -> Type {
    TYPE_FACTORY.mk(LirType::Function { ret_ty, param_ty })
}

impl LirType {
    pub fn is_int(&self) -> bool {
        matches!(self, LirType::Int)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, LirType::Pointer(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, LirType::Function { .. })
    }

    /// Does `self`, possibly through any number of pointer indirections,
    /// resolve to `other`?
    pub fn base_typ_is(&self, other: Type) -> bool {
        match self {
            LirType::Pointer(inner) => **inner == *other || inner.base_typ_is(other),
            _ => *self == *other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operand {
    CInt(i64),
    Var(VarId),
}

impl Operand {
    pub fn typ(&self) -> Type {
        match self {
            Operand::CInt(_) => int_ty(),
            Operand::Var(v) => v.typ(),
        }
    }

    pub fn var(&self) -> Option<&VarId> {
        match self {
            Operand::CInt(_) => None,
            Operand::Var(v) => Some(v),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// An instruction that does not terminate a block.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Instruction {
    AddrOf { lhs: VarId, op: VarId },
    Alloc { lhs: VarId, num: Operand, id: StructId },
    Arith { lhs: VarId, aop: ArithOp, op1: Operand, op2: Operand },
    Cmp { lhs: VarId, rop: RelOp, op1: Operand, op2: Operand },
    CallExt { lhs: Option<VarId>, ext_callee: Rc<str>, args: Vec<Operand> },
    Copy { lhs: VarId, op: Operand },
    Gep { lhs: VarId, src: VarId, idx: Operand },
    Gfp { lhs: VarId, src: VarId, field: FieldId },
    Load { lhs: VarId, src: VarId },
    Store { dst: VarId, op: Operand },
    /// SSA phi node, inserted at loop headers and join points by whatever
    /// upstream tool produced this [`Program`].
    Phi { lhs: VarId, args: Map<BbId, Operand> },
}

impl Instruction {
    pub fn lhs(&self) -> Option<&VarId> {
        use Instruction::*;
        match self {
            AddrOf { lhs, .. } => Some(lhs),
            Alloc { lhs, .. } => Some(lhs),
            Arith { lhs, .. } => Some(lhs),
            Cmp { lhs, .. } => Some(lhs),
            CallExt { lhs, .. } => lhs.as_ref(),
            Copy { lhs, .. } => Some(lhs),
            Gep { lhs, .. } => Some(lhs),
            Gfp { lhs, .. } => Some(lhs),
            Load { lhs, .. } => Some(lhs),
            Store { .. } => None,
            Phi { lhs, .. } => Some(lhs),
        }
    }

    /// Every variable this instruction reads, in no particular order.
    pub fn uses(&self) -> Vec<&VarId> {
        use Instruction::*;
        match self {
            AddrOf { op, .. } => vec![op],
            Alloc { num, .. } => num.var().into_iter().collect(),
            Arith { op1, op2, .. } | Cmp { op1, op2, .. } => {
                op1.var().into_iter().chain(op2.var()).collect()
            }
            CallExt { args, .. } => args.iter().filter_map(Operand::var).collect(),
            Copy { op, .. } => op.var().into_iter().collect(),
            Gep { src, idx, .. } => std::iter::once(src).chain(idx.var()).collect(),
            Gfp { src, .. } => vec![src],
            Load { src, .. } => vec![src],
            Store { dst, op } => std::iter::once(dst).chain(op.var()).collect(),
            Phi { args, .. } => args.values().filter_map(Operand::var).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Terminal {
    Branch { cond: Operand, tt: BbId, ff: BbId },
    CallDirect { lhs: Option<VarId>, callee: FuncId, args: Vec<Operand>, next_bb: BbId },
    CallIndirect { lhs: Option<VarId>, callee: VarId, args: Vec<Operand>, next_bb: BbId },
    Jump(BbId),
    Ret(Option<Operand>),
}

impl Terminal {
    pub fn uses(&self) -> Vec<&VarId> {
        use Terminal::*;
        match self {
            Branch { cond, .. } => cond.var().into_iter().collect(),
            CallDirect { args, .. } => args.iter().filter_map(Operand::var).collect(),
            CallIndirect { callee, args, .. } => {
                std::iter::once(callee).chain(args.iter().filter_map(Operand::var)).collect()
            }
            Jump(_) => vec![],
            Ret(op) => op.as_ref().and_then(Operand::var).into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BasicBlock {
    pub insts: Vec<Instruction>,
    pub term: Terminal,
}

impl Default for Terminal {
    fn default() -> Self {
        Terminal::Ret(None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub id: FuncId,
    pub params: Vec<VarId>,
    pub ret_ty: Option<Type>,
    pub body: Map<BbId, BasicBlock>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Program {
    pub functions: Map<FuncId, Function>,
    pub globals: Set<VarId>,
    pub structs: Map<StructId, Set<FieldId>>,
    /// Functions declared but not defined in this program, reachable only
    /// through the library signature registry.
    pub externs: Set<Rc<str>>,
}

impl Program {
    pub fn function(&self, id: &FuncId) -> Option<&Function> {
        self.functions.get(id)
    }
}
