//! `Display` impls for the IR, used by diagnostics and the demo binaries.

use std::fmt;

use super::*;

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Display for BbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LirType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LirType::Int => write!(f, "int"),
            LirType::Struct(id) => write!(f, "struct {id}"),
            LirType::Pointer(inner) => write!(f, "&{inner}"),
            LirType::Function { ret_ty, param_ty } => {
                write!(f, "fn(")?;
                for (i, p) in param_ty.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")")?;
                if let Some(r) = ret_ty {
                    write!(f, " -> {r}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::CInt(n) => write!(f, "{n}"),
            Operand::Var(v) => write!(f, "{v}"),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::AddrOf { lhs, op } => write!(f, "{lhs} = &{op}"),
            Instruction::Alloc { lhs, num, id } => write!(f, "{lhs} = alloc {id} [{num}]"),
            Instruction::Arith { lhs, aop, op1, op2 } => write!(f, "{lhs} = {op1} {aop:?} {op2}"),
            Instruction::Cmp { lhs, rop, op1, op2 } => write!(f, "{lhs} = {op1} {rop:?} {op2}"),
            Instruction::CallExt { lhs, ext_callee, args } => {
                if let Some(lhs) = lhs {
                    write!(f, "{lhs} = ")?;
                }
                write!(f, "call_ext {ext_callee}({})", fmt_args(args))
            }
            Instruction::Copy { lhs, op } => write!(f, "{lhs} = {op}"),
            Instruction::Gep { lhs, src, idx } => write!(f, "{lhs} = gep {src}[{idx}]"),
            Instruction::Gfp { lhs, src, field } => write!(f, "{lhs} = gfp {src}.{}", field.name),
            Instruction::Load { lhs, src } => write!(f, "{lhs} = load {src}"),
            Instruction::Store { dst, op } => write!(f, "store {dst} {op}"),
            Instruction::Phi { lhs, args } => {
                write!(f, "{lhs} = phi(")?;
                for (i, (bb, op)) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[{bb}: {op}]")?;
                }
                write!(f, ")")
            }
        }
    }
}

fn fmt_args(args: &[Operand]) -> String {
    args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Branch { cond, tt, ff } => write!(f, "branch {cond} {tt} {ff}"),
            Terminal::CallDirect { lhs, callee, args, next_bb } => {
                if let Some(lhs) = lhs {
                    write!(f, "{lhs} = ")?;
                }
                write!(f, "call {callee}({}) then {next_bb}", fmt_args(args))
            }
            Terminal::CallIndirect { lhs, callee, args, next_bb } => {
                if let Some(lhs) = lhs {
                    write!(f, "{lhs} = ")?;
                }
                write!(f, "call *{callee}({}) then {next_bb}", fmt_args(args))
            }
            Terminal::Jump(bb) => write!(f, "jump {bb}"),
            Terminal::Ret(op) => match op {
                Some(op) => write!(f, "ret {op}"),
                None => write!(f, "ret"),
            },
        }
    }
}
