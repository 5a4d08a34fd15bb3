//! The public query surface: what a downstream client asks once the module
//! driver has finished. Reads out of the already-built
//! [`crate::analysis::module::ModuleResult`] — no further analysis runs
//! here, this is purely a view.

use derive_more::Display;

use crate::analysis::module::ModuleResult;
use crate::analysis::InstrRef;
use crate::dep::{DepInfo, ValueRef};
use crate::ir::{BbId, FuncId};

/// A small tag set a downstream
/// writeback client can persist onto the IR so a later process can
/// reconstruct the result without re-running the analysis. The engine
/// itself never produces `Extracted` — that belongs to whatever client
/// clones/extracts IR and wants to mark the copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Tag {
    #[display(fmt = "input-dep-instr")]
    InputDepInstr,
    #[display(fmt = "input-indep-instr")]
    InputIndepInstr,
    #[display(fmt = "control-dep-instr")]
    ControlDepInstr,
    #[display(fmt = "data-dep-instr")]
    DataDepInstr,
    #[display(fmt = "data-indep-instr")]
    DataIndepInstr,
    #[display(fmt = "arg-dep-instr")]
    ArgDepInstr,
    #[display(fmt = "global-dep-instr")]
    GlobalDepInstr,
    #[display(fmt = "input-dep-block")]
    InputDepBlock,
    #[display(fmt = "input-indep-block")]
    InputIndepBlock,
    #[display(fmt = "input-dep-function")]
    InputDepFunction,
    #[display(fmt = "input-indep-function")]
    InputIndepFunction,
    #[display(fmt = "extracted")]
    Extracted,
    #[display(fmt = "unreachable")]
    Unreachable,
    #[display(fmt = "unknown")]
    Unknown,
}

/// Per-category counts for statistics: blocks/instructions in each
/// category.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub input_dep_instr: usize,
    pub input_indep_instr: usize,
    pub control_dep_instr: usize,
    pub data_dep_instr: usize,
    pub data_indep_instr: usize,
    pub arg_dep_instr: usize,
    pub global_dep_instr: usize,
    pub input_dep_block: usize,
    pub input_indep_block: usize,
    pub input_dep_function: usize,
    pub input_indep_function: usize,
    pub unreachable_block: usize,
}

/// A read-only view over a finished [`ModuleResult`]. Cheap to construct —
/// it borrows rather than copies.
pub struct AnalysisResult<'a> {
    module: &'a ModuleResult,
}

impl<'a> AnalysisResult<'a> {
    pub fn new(module: &'a ModuleResult) -> Self {
        AnalysisResult { module }
    }

    pub fn is_input_dep_function(&self, f: &FuncId) -> bool {
        self.module.summary(f).map(|s| s.is_input_dep_function).unwrap_or(false)
    }

    pub fn is_input_dependent_block(&self, f: &FuncId, b: &BbId) -> bool {
        let Some(fr) = self.module.functions.get(f) else { return false };
        if fr.unreachable_blocks.contains(b) {
            return false;
        }
        fr.block_states.get(b).map(|s| s.result.is_input_dependent()).unwrap_or(false)
    }

    pub fn is_argument_dependent_block(&self, f: &FuncId, b: &BbId) -> bool {
        let Some(fr) = self.module.functions.get(f) else { return false };
        if fr.unreachable_blocks.contains(b) {
            return false;
        }
        fr.block_states
            .get(b)
            .and_then(|s| s.result.control_dep())
            .map(DepInfo::is_input_arg_dep)
            .unwrap_or(false)
    }

    /// `None` for an instruction in an unknown function, an unreachable
    /// block, or past the block's instruction/terminator count: an
    /// unreachable-block query, by design, makes every predicate return
    /// `false` rather than panic.
    fn instr_dep(&self, instr: &InstrRef) -> Option<DepInfo> {
        let fr = self.module.functions.get(&instr.function)?;
        if fr.unreachable_blocks.contains(&instr.block) {
            return None;
        }
        let state = fr.block_states.get(&instr.block)?;
        if instr.index < state.instr_deps.len() {
            Some(state.final_instr_dep(instr.index))
        } else if instr.index == state.instr_deps.len() {
            Some(state.final_terminator_dep())
        } else {
            None
        }
    }

    fn raw_instr_dep(&self, instr: &InstrRef) -> Option<DepInfo> {
        let fr = self.module.functions.get(&instr.function)?;
        if fr.unreachable_blocks.contains(&instr.block) {
            return None;
        }
        let state = fr.block_states.get(&instr.block)?;
        if instr.index < state.instr_deps.len() {
            Some(state.instr_deps[instr.index].clone())
        } else if instr.index == state.instr_deps.len() {
            Some(state.terminator_dep.clone())
        } else {
            None
        }
    }

    pub fn is_input_dependent(&self, instr: &InstrRef) -> bool {
        self.instr_dep(instr).map(|d| d.is_input_dep()).unwrap_or(false)
    }

    pub fn is_input_independent(&self, instr: &InstrRef) -> bool {
        self.instr_dep(instr).map(|d| d.is_input_indep()).unwrap_or(false)
    }

    /// Its block is input-dep for reasons other than the instruction's own
    /// operands — i.e. it would itself be input-independent if its block
    /// weren't non-deterministic.
    pub fn is_control_dependent(&self, instr: &InstrRef) -> bool {
        let Some(fr) = self.module.functions.get(&instr.function) else { return false };
        if fr.unreachable_blocks.contains(&instr.block) {
            return false;
        }
        let Some(state) = fr.block_states.get(&instr.block) else { return false };
        let Some(control_dep) = state.result.control_dep() else { return false };
        if !control_dep.is_input_dep() {
            return false;
        }
        self.raw_instr_dep(instr).map(|raw| !raw.is_input_dep()).unwrap_or(false)
    }

    /// At least one operand's dep is `InputDep` or `ArgDep` — i.e. the
    /// instruction's own raw (pre-control-merge) computation is dependent,
    /// as opposed to only picking up dependence from its enclosing block.
    pub fn is_data_dependent(&self, instr: &InstrRef) -> bool {
        self.raw_instr_dep(instr).map(|d| d.is_input_dep() || d.is_input_arg_dep()).unwrap_or(false)
    }

    pub fn is_argument_dependent(&self, instr: &InstrRef) -> bool {
        self.instr_dep(instr).map(|d| d.is_input_arg_dep()).unwrap_or(false)
    }

    pub fn is_global_dependent(&self, instr: &InstrRef) -> bool {
        self.instr_dep(instr)
            .map(|d| d.values().iter().any(|v| matches!(v, ValueRef::Global(_))))
            .unwrap_or(false)
    }

    /// The full set of tags applicable to one instruction: its own, its
    /// enclosing block's, and its enclosing function's.
    pub fn tags_for(&self, instr: &InstrRef) -> Vec<Tag> {
        let mut tags = Vec::new();

        let Some(fr) = self.module.functions.get(&instr.function) else {
            tags.push(Tag::Unknown);
            return tags;
        };
        if fr.unreachable_blocks.contains(&instr.block) {
            tags.push(Tag::Unreachable);
            return tags;
        }

        match self.instr_dep(instr) {
            Some(dep) => {
                if dep.is_input_dep() {
                    tags.push(Tag::InputDepInstr);
                }
                if dep.is_input_indep() {
                    tags.push(Tag::InputIndepInstr);
                }
                if dep.is_input_arg_dep() {
                    tags.push(Tag::ArgDepInstr);
                }
                if self.is_global_dependent(instr) {
                    tags.push(Tag::GlobalDepInstr);
                }
                if self.is_control_dependent(instr) {
                    tags.push(Tag::ControlDepInstr);
                }
                if self.is_data_dependent(instr) {
                    tags.push(Tag::DataDepInstr);
                } else {
                    tags.push(Tag::DataIndepInstr);
                }
            }
            None => tags.push(Tag::Unknown),
        }

        if self.is_input_dependent_block(&instr.function, &instr.block) {
            tags.push(Tag::InputDepBlock);
        } else {
            tags.push(Tag::InputIndepBlock);
        }
        if self.is_input_dep_function(&instr.function) {
            tags.push(Tag::InputDepFunction);
        } else {
            tags.push(Tag::InputIndepFunction);
        }

        tags
    }

    pub fn counters(&self) -> Counters {
        let mut c = Counters::default();
        for (fid, fr) in &self.module.functions {
            if fr.summary.is_input_dep_function {
                c.input_dep_function += 1;
            } else {
                c.input_indep_function += 1;
            }
            c.unreachable_block += fr.unreachable_blocks.len();

            for (bb, state) in &fr.block_states {
                if fr.unreachable_blocks.contains(bb) {
                    continue;
                }
                if state.result.is_input_dependent() {
                    c.input_dep_block += 1;
                } else {
                    c.input_indep_block += 1;
                }

                for i in 0..=state.instr_deps.len() {
                    let instr = InstrRef::new(fid.clone(), bb.clone(), i);
                    let Some(dep) = self.instr_dep(&instr) else { continue };
                    if dep.is_input_dep() {
                        c.input_dep_instr += 1;
                    }
                    if dep.is_input_indep() {
                        c.input_indep_instr += 1;
                    }
                    if dep.is_input_arg_dep() {
                        c.arg_dep_instr += 1;
                    }
                    if self.is_global_dependent(&instr) {
                        c.global_dep_instr += 1;
                    }
                    if self.is_control_dependent(&instr) {
                        c.control_dep_instr += 1;
                    }
                    if self.is_data_dependent(&instr) {
                        c.data_dep_instr += 1;
                    } else {
                        c.data_indep_instr += 1;
                    }
                }
            }
        }
        c
    }
}

/// The callee-replacement contract: moves a
/// call site's recorded dependency info from `old`'s entry to `new`'s,
/// leaving `old`'s other call sites (if any) untouched.
pub fn change_function_call(module: &mut ModuleResult, caller: &FuncId, call_site: &BbId, old: &FuncId, new: &FuncId) {
    let Some(result) = module.functions.get_mut(caller) else { return };
    crate::analysis::callsite::rewrite_callee(&mut result.summary.call_site_info, call_site, old, new);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::module::analyze_program;
    use crate::dep::ArgRef;
    use crate::ir::*;
    use crate::oracles::{DirectCallGraphOracle, LibrarySignatureRegistry};
    use std::collections::{BTreeMap, BTreeMap as Map};

    fn one_function_program() -> Program {
        // f(x) { t = x + 1; return t; }
        let x = var_id("x", Some(func_id("f")), int_ty());
        let t = var_id("t", Some(func_id("f")), int_ty());
        let mut body = BTreeMap::new();
        body.insert(
            bb_id("entry"),
            BasicBlock {
                insts: vec![Instruction::Arith {
                    lhs: t.clone(),
                    aop: ArithOp::Add,
                    op1: Operand::Var(x.clone()),
                    op2: Operand::CInt(1),
                }],
                term: Terminal::Ret(Some(Operand::Var(t))),
            },
        );
        let f = Function { id: func_id("f"), params: vec![x], ret_ty: Some(int_ty()), body };
        let mut functions = BTreeMap::new();
        functions.insert(f.id.clone(), f);
        Program { functions, ..Default::default() }
    }

    #[test]
    fn s1_argument_dependent_return_tags_as_arg_dep() {
        let program = one_function_program();
        let call_graph = DirectCallGraphOracle::new(&program);
        let libs = LibrarySignatureRegistry::empty();
        let module_result = analyze_program(&program, &call_graph, &libs, false);
        let view = AnalysisResult::new(&module_result);

        let f = func_id("f");
        let instr = InstrRef::new(f.clone(), bb_id("entry"), 0);
        assert!(view.is_argument_dependent(&instr));
        assert!(!view.is_input_independent(&instr));

        let tags = view.tags_for(&instr);
        assert!(tags.contains(&Tag::ArgDepInstr));
    }

    #[test]
    fn unreachable_block_queries_return_false_and_tag_unreachable() {
        // entry jumps straight to exit; `dead` has no predecessor.
        let x = var_id("x", Some(func_id("f")), int_ty());
        let mut body = BTreeMap::new();
        body.insert(bb_id("entry"), BasicBlock { insts: vec![], term: Terminal::Jump(bb_id("exit")) });
        body.insert(bb_id("exit"), BasicBlock { insts: vec![], term: Terminal::Ret(None) });
        body.insert(
            bb_id("dead"),
            BasicBlock { insts: vec![Instruction::Copy { lhs: x.clone(), op: Operand::CInt(0) }], term: Terminal::Ret(None) },
        );
        let f = Function { id: func_id("f"), params: vec![], ret_ty: None, body };
        let mut functions = BTreeMap::new();
        functions.insert(f.id.clone(), f);
        let program = Program { functions, ..Default::default() };

        let call_graph = DirectCallGraphOracle::new(&program);
        let libs = LibrarySignatureRegistry::empty();
        let module_result = analyze_program(&program, &call_graph, &libs, false);
        let view = AnalysisResult::new(&module_result);

        let dead_instr = InstrRef::new(func_id("f"), bb_id("dead"), 0);
        assert!(!view.is_input_dependent(&dead_instr));
        assert!(!view.is_input_independent(&dead_instr));
        assert_eq!(view.tags_for(&dead_instr), vec![Tag::Unreachable]);
        assert_eq!(view.counters().unreachable_block, 1);
    }

    #[test]
    fn change_function_call_moves_the_call_sites_entry() {
        let mut module_result = ModuleResult { functions: Map::new(), diagnostics: crate::error::Diagnostics::new() };
        let callee_summary = crate::analysis::FunctionSummary::default();
        let callee = crate::analysis::function::FunctionResult {
            function_id: func_id("callee"),
            block_states: Map::new(),
            unreachable_blocks: std::collections::BTreeSet::new(),
            summary: callee_summary,
            diagnostics: crate::error::Diagnostics::new(),
            call_out_pointers: Vec::new(),
        };
        let mut caller_summary = crate::analysis::FunctionSummary::default();
        let mut deps = crate::analysis::callsite::CallArgDeps::default();
        deps.args.insert(0, DepInfo::arg_dep(ArgRef(0)));
        caller_summary
            .call_site_info
            .entry(func_id("old_callee"))
            .or_default()
            .add_call(bb_id("call_site"), deps);
        let caller = crate::analysis::function::FunctionResult {
            function_id: func_id("caller"),
            block_states: Map::new(),
            unreachable_blocks: std::collections::BTreeSet::new(),
            summary: caller_summary,
            diagnostics: crate::error::Diagnostics::new(),
            call_out_pointers: Vec::new(),
        };
        module_result.functions.insert(func_id("callee"), callee);
        module_result.functions.insert(func_id("caller"), caller);

        change_function_call(&mut module_result, &func_id("caller"), &bb_id("call_site"), &func_id("old_callee"), &func_id("callee"));

        let caller_info = &module_result.summary(&func_id("caller")).unwrap().call_site_info;
        assert!(!caller_info.contains_key(&func_id("old_callee")));
        assert!(caller_info[&func_id("callee")].dependencies_for_call(&bb_id("call_site")).is_some());
    }
}
