//! Per-block analysis: walks one basic block's instructions and produces
//! its [`BlockState`], classified as [`BlockResult::Deterministic`] or
//! [`BlockResult::NonDeterministic`].
//!
//! Generalizes the common `AbstractEnv::analyze_inst`/`analyze_term`
//! per-opcode-match pattern (most directly `constant_prop.rs`'s) from a
//! generic `PointwiseEnv<A>` to the dependency-specific state this engine
//! needs.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use crate::analysis::callsite::CallArgDeps;
use crate::analysis::AnalysisCtx;
use crate::dep::{Dep, DepInfo, ValueDepInfo, ValueRef};
use crate::error::Diagnostic;
use crate::ir::{BasicBlock, BbId, Function, FuncId, Instruction, Operand, Terminal, VarId};
use crate::oracles::ModRefResult;

/// The redesigned block-variant split (flat tagged enum, no virtual
/// hierarchy): every block is exactly one of these after analysis.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum BlockResult {
    #[default]
    Deterministic,
    /// A block whose terminator branches on an input-dependent condition:
    /// every store it or its dominated successors perform is at least as
    /// dependent as `control_dep`.
    NonDeterministic { control_dep: DepInfo },
}

impl BlockResult {
    pub fn control_dep(&self) -> Option<&DepInfo> {
        match self {
            BlockResult::Deterministic => None,
            BlockResult::NonDeterministic { control_dep } => Some(control_dep),
        }
    }

    pub fn is_input_dependent(&self) -> bool {
        self.control_dep().map(DepInfo::is_input_dep).unwrap_or(false)
    }
}

/// Which actual-argument position(s) of which call site a local pointer
/// variable was passed at, so that once the callee's summary is known the
/// corresponding out-argument dependency can be joined back into the right
/// local memory cell. Recorded at analysis time, resolved at finalization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallOutPointer {
    pub callee: FuncId,
    pub call_site: BbId,
    pub position: usize,
}

/// Everything learned from walking one block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockState {
    pub value_deps: Map<VarId, ValueDepInfo>,
    pub referenced_globals: Map<VarId, DepInfo>,
    pub modified_globals: Map<VarId, DepInfo>,
    pub out_arg_deps: Map<usize, DepInfo>,
    pub return_dep: Option<DepInfo>,
    /// Keyed by callee: every call this block makes to that callee (almost
    /// always at most one, since calls other than `CallExt` are
    /// terminators), each with its own recorded argument/global deps.
    pub call_sites: Map<FuncId, Map<BbId, CallArgDeps>>,
    /// Local pointer variables passed as an actual argument to some call in
    /// this block, recorded so finalization can join the callee's
    /// out-argument dependency back into the right memory cell.
    pub call_out_pointers: Vec<(VarId, CallOutPointer)>,
    /// Raw (pre-control-merge) dependency of each ordinary instruction, in
    /// program order, addressed by position rather than by an `InstrRef`
    /// the IR doesn't itself carry.
    pub instr_deps: Vec<DepInfo>,
    /// Raw dependency of the block's terminator (the branch/return rows of
    /// the per-opcode transfer function), tracked the same way.
    pub terminator_dep: DepInfo,
    /// Internal functions passed to a library call at a position its
    /// signature marks as a callback: resolved
    /// by name, since this IR has no function-literal operand. The module
    /// driver promotes each to `is_input_dep_function` unconditionally,
    /// since a library can invoke a callback with arbitrary arguments.
    pub callback_targets: Set<FuncId>,
    pub result: BlockResult,
    /// Recoverable conditions hit while walking this block: a library call
    /// with no signature on file, or an indirect call whose target set the
    /// call-graph oracle couldn't resolve. Both are handled conservatively
    /// in place (the instruction's result is marked `InputDep`) but still
    /// worth surfacing, so the function/module driver collects these into
    /// the public `Diagnostics` the same way it does `RecoveredIrregularCfg`.
    pub diagnostics: Vec<Diagnostic>,
}

impl BlockState {
    pub fn dep_of(&self, var: &VarId) -> DepInfo {
        if var.is_global() {
            self.referenced_globals.get(var).cloned().unwrap_or_else(DepInfo::input_indep)
        } else {
            self.value_deps.get(var).map(|v| v.whole().clone()).unwrap_or_else(DepInfo::input_indep)
        }
    }

    /// Final (control-dep-merged) dependency of instruction `index`: if
    /// this block is a non-deterministic block, the instruction's DepInfo
    /// is joined with `control_dep` before being returned.
    pub fn final_instr_dep(&self, index: usize) -> DepInfo {
        let mut dep = self.instr_deps[index].clone();
        if let Some(control_dep) = self.result.control_dep() {
            dep.join(control_dep);
        }
        dep
    }

    pub fn final_terminator_dep(&self) -> DepInfo {
        let mut dep = self.terminator_dep.clone();
        if let Some(control_dep) = self.result.control_dep() {
            dep.join(control_dep);
        }
        dep
    }
}

/// Runs the per-opcode transfer function over one block.
///
/// `entry_state` is the pre-state inherited from the block's (joined)
/// predecessors; `param_deps` gives each function parameter's current
/// dependency for the call-site / argument-dependent rules; `provenance`
/// says which parameter positions (if any) a local pointer was derived
/// from, so a `Store` through it can be attributed to the right out
/// argument. `inherited_control_dep` is this block's dependency on some
/// enclosing branch it is control-dependent on but does not itself
/// terminate with: every store it or its dominated successors perform is
/// at least as dependent as `control_dep` — the
/// caller (the function/loop analyser) computes this from dominance, since
/// a plain block-to-block data join only carries it one hop.
pub fn analyze_block(
    function: &Function,
    bb_id: &BbId,
    bb: &BasicBlock,
    entry_state: &Map<VarId, ValueDepInfo>,
    param_deps: &Map<VarId, DepInfo>,
    provenance: &Map<VarId, Set<usize>>,
    inherited_control_dep: Option<&DepInfo>,
    ctx: &AnalysisCtx,
) -> BlockState {
    let seeded = inherited_control_dep.filter(|d| d.is_input_dep() || d.is_input_arg_dep() || d.is_value_dep());
    let mut state = BlockState {
        value_deps: entry_state.clone(),
        result: match seeded {
            Some(d) => BlockResult::NonDeterministic { control_dep: d.clone() },
            None => BlockResult::Deterministic,
        },
        ..Default::default()
    };

    for inst in &bb.insts {
        let raw = analyze_instruction(function, bb_id, inst, &mut state, param_deps, provenance, ctx);
        state.instr_deps.push(raw);
    }
    state.terminator_dep = analyze_terminator(function, bb_id, &bb.term, &mut state, param_deps, ctx);

    state
}

fn dep_of_operand(op: &Operand, state: &BlockState, param_deps: &Map<VarId, DepInfo>) -> DepInfo {
    match op {
        Operand::CInt(_) => DepInfo::input_indep(),
        Operand::Var(v) => {
            if let Some(d) = param_deps.get(v) {
                d.clone()
            } else {
                state.dep_of(v)
            }
        }
    }
}

/// Records `var`'s dependency for this instruction. A block's own
/// `control_dep` (seeded or discovered) is widened into every value it
/// newly defines here, not just into the instruction-level classification
/// `final_instr_dep` reconstructs on query — otherwise a value computed
/// inside a non-deterministic block (e.g. a constant assigned in one arm of
/// an `if`) would read back as independent the moment something merges it
/// with a sibling arm's value (a `Phi`, or a later `dep_of`/load).
fn set_var_dep(state: &mut BlockState, var: &VarId, dep: DepInfo) {
    if var.is_global() {
        let mut dep = dep;
        if let Some(control_dep) = state.result.control_dep() {
            dep.join(control_dep);
        }
        state.referenced_globals.entry(var.clone()).or_insert_with(DepInfo::input_indep).join(&dep);
    } else {
        let mut vdep = ValueDepInfo::scalar(dep);
        if let Some(control_dep) = state.result.control_dep() {
            vdep.widen(control_dep);
        }
        state
            .value_deps
            .entry(var.clone())
            .or_insert_with(|| ValueDepInfo::scalar(DepInfo::input_indep()))
            .update(&vdep);
    }
}

/// Returns the raw (pre-control-merge) dependency of `inst`'s computed
/// value, per its opcode's own transfer rule.
fn analyze_instruction(
    function: &Function,
    bb_id: &BbId,
    inst: &Instruction,
    state: &mut BlockState,
    param_deps: &Map<VarId, DepInfo>,
    provenance: &Map<VarId, Set<usize>>,
    ctx: &AnalysisCtx,
) -> DepInfo {
    use Instruction::*;
    match inst {
        AddrOf { lhs, op } => {
            let dep = dep_of_operand(&Operand::Var(op.clone()), state, param_deps);
            set_var_dep(state, lhs, dep.clone());
            dep
        }
        Alloc { lhs, num, id: _ } => {
            // "value's DepInfo = InputDep initially (unknown heap
            // contents); instruction itself InputDep until proven
            // otherwise" — a later constant-index store narrows the field
            // that it touches, same as any other store.
            let _ = dep_of_operand(num, state, param_deps);
            let mut aggregate = ValueDepInfo::aggregate(0);
            aggregate.update(&ValueDepInfo::scalar(DepInfo::input_dep()));
            state.value_deps.insert(lhs.clone(), aggregate);
            DepInfo::input_dep()
        }
        Arith { lhs, op1, op2, .. } | Cmp { lhs, op1, op2, .. } => {
            let mut dep = dep_of_operand(op1, state, param_deps);
            dep.join(&dep_of_operand(op2, state, param_deps));
            set_var_dep(state, lhs, dep.clone());
            dep
        }
        Copy { lhs, op } => {
            let dep = dep_of_operand(op, state, param_deps);
            set_var_dep(state, lhs, dep.clone());
            dep
        }
        Gep { lhs, src, idx } => {
            let mut dep = state.dep_of(src);
            dep.join(&dep_of_operand(idx, state, param_deps));
            set_var_dep(state, lhs, dep.clone());
            dep
        }
        Gfp { lhs, src, .. } => {
            let dep = state.dep_of(src);
            set_var_dep(state, lhs, dep.clone());
            dep
        }
        Load { lhs, src } => {
            // A load of a global never locally stored into reads as
            // value-dependent on that global, resolved at
            // `finalize_globals`.
            let dep = if src.is_global() && !state.referenced_globals.contains_key(src) {
                DepInfo::value_dep(ValueRef::Global(src.clone()))
            } else {
                state.dep_of(src)
            };
            set_var_dep(state, lhs, dep.clone());
            dep
        }
        Store { dst, op } => {
            let written = dep_of_operand(op, state, param_deps);
            let mut written = written;
            if let Some(control_dep) = state.result.control_dep() {
                written.join(control_dep);
            }
            let dst_dep = state.dep_of(dst);
            let raw = written.clone().joined(&dst_dep);

            if dst.is_global() {
                state.modified_globals.entry(dst.clone()).or_insert_with(DepInfo::input_indep).join(&written);
                state.referenced_globals.entry(dst.clone()).or_insert_with(DepInfo::input_indep).join(&written);
            } else {
                if let Some(positions) = provenance.get(dst) {
                    for pos in positions {
                        state.out_arg_deps.entry(*pos).or_insert_with(DepInfo::input_indep).join(&written);
                    }
                }
                // writing through a pointer may alias other tracked
                // values; widen anything the alias oracle can't rule out.
                // `May`/`Partial` merge the dependency in, `Must` (besides
                // `dst` itself) overwrites.
                let store_inst = Instruction::Store { dst: dst.clone(), op: op.clone() };
                for (tracked, tracked_dep) in state.value_deps.iter_mut() {
                    if tracked == dst {
                        continue;
                    }
                    match ctx.alias.modref(&store_inst, tracked) {
                        ModRefResult::Mod => match ctx.alias.alias(dst, tracked) {
                            crate::oracles::AliasResult::Must => {
                                tracked_dep.update(&ValueDepInfo::scalar(written.clone()))
                            }
                            _ => tracked_dep.merge(&ValueDepInfo::scalar(written.clone())),
                        },
                        ModRefResult::ModRef => tracked_dep.merge(&ValueDepInfo::scalar(written.clone())),
                        _ => {}
                    }
                }
                set_var_dep(state, dst, written);
            }
            raw
        }
        CallExt { lhs, ext_callee, args } => {
            let arg_deps: Vec<DepInfo> = args.iter().map(|a| dep_of_operand(a, state, param_deps)).collect();
            let signature = ctx.libs.lookup(ext_callee);
            let mut ret_dep = match signature {
                Some(sig) => sig.return_dep(&arg_deps),
                // no signature on file: conservative per the engine's
                // error handling design, not a hard failure.
                None => {
                    state.diagnostics.push(Diagnostic::MissingLibrarySignature { name: ext_callee.clone() });
                    DepInfo::input_dep()
                }
            };
            if let Some(control_dep) = state.result.control_dep() {
                ret_dep.join(control_dep);
            }
            let mut call_deps = CallArgDeps::default();
            for (i, d) in arg_deps.iter().enumerate() {
                call_deps.args.insert(i, d.clone());
            }
            call_deps.is_callback =
                signature.map(|s| (0..args.len()).any(|i| s.is_callback_arg(i))).unwrap_or(false);
            if let Some(sig) = signature {
                for (i, a) in args.iter().enumerate() {
                    if !sig.is_callback_arg(i) {
                        continue;
                    }
                    if let Some(v) = a.var() {
                        if v.typ().is_function() {
                            let candidate = FuncId(v.name.clone());
                            if ctx.program.function(&candidate).is_some() {
                                state.callback_targets.insert(candidate);
                            }
                        }
                    }
                }
            }
            let callee = FuncId(ext_callee.clone());
            let site = crate::ir::bb_id(&format!("{}#{}:{}@ext:{}", function.id.0, bb_id.0, state.instr_deps.len(), ext_callee));
            state.call_sites.entry(callee.clone()).or_default().insert(site.clone(), call_deps);
            // missing-signature out-pointer arguments become InputDep too,
            // the same conservative default as the return value.
            if signature.is_none() {
                for (i, a) in args.iter().enumerate() {
                    if let Some(v) = a.var() {
                        if v.typ().is_pointer() {
                            set_var_dep(state, v, DepInfo::input_dep());
                            let _ = i;
                        }
                    }
                }
            }
            if let Some(lhs) = lhs {
                set_var_dep(state, lhs, ret_dep.clone());
            }
            ret_dep
        }
        Phi { lhs, args } => {
            let mut dep = DepInfo::input_indep();
            let mut any = false;
            for op in args.values() {
                dep.join(&dep_of_operand(op, state, param_deps));
                any = true;
            }
            if !any {
                dep = DepInfo::input_indep();
            }
            set_var_dep(state, lhs, dep.clone());
            dep
        }
    }
}

fn analyze_terminator(
    function: &Function,
    bb_id: &BbId,
    term: &Terminal,
    state: &mut BlockState,
    param_deps: &Map<VarId, DepInfo>,
    ctx: &AnalysisCtx,
) -> DepInfo {
    match term {
        Terminal::Branch { cond, .. } => {
            let dep = dep_of_operand(cond, state, param_deps);
            let mut merged = dep.clone();
            if let Some(existing) = state.result.control_dep() {
                merged.join(existing);
            }
            if merged.is_input_dep() || merged.is_input_arg_dep() || merged.is_value_dep() {
                state.result = BlockResult::NonDeterministic { control_dep: merged };
            }
            dep
        }
        Terminal::Ret(op) => {
            let dep = match op {
                Some(op) => dep_of_operand(op, state, param_deps),
                None => DepInfo::input_indep(),
            };
            let mut dep = dep;
            if let Some(control_dep) = state.result.control_dep() {
                dep.join(control_dep);
            }
            state.return_dep = Some(dep.clone());
            dep
        }
        Terminal::CallDirect { lhs, callee, args, .. } => {
            record_internal_call(function, bb_id, callee.clone(), args, lhs, state, param_deps)
        }
        Terminal::CallIndirect { lhs, callee, args, .. } => {
            let callee_dep = state.dep_of(callee);
            let targets = ctx.call_graph.resolve_indirect_targets(&function.id, 0);
            match targets {
                None => {
                    // unresolved indirect call: fully opaque input source.
                    state.diagnostics.push(Diagnostic::UnresolvedIndirectCall { caller: bb_id.clone() });
                    if let Some(lhs) = lhs {
                        set_var_dep(state, lhs, DepInfo::input_dep());
                    }
                    for a in args {
                        if let Some(v) = a.var() {
                            if v.typ().is_pointer() {
                                set_var_dep(state, v, DepInfo::input_dep());
                            }
                        }
                    }
                    DepInfo::input_dep()
                }
                Some(targets) => {
                    let mut merged = DepInfo::input_indep();
                    for target in &targets {
                        let dep = record_internal_call(function, bb_id, target.clone(), args, &None, state, param_deps);
                        merged.join(&dep);
                    }
                    merged.join(&callee_dep);
                    if let Some(lhs) = lhs {
                        set_var_dep(state, lhs, merged.clone());
                    }
                    merged
                }
            }
        }
        Terminal::Jump(_) => DepInfo::input_indep(),
    }
}

/// Records a call site to an internal function `callee` (or to one of
/// several possible indirect-call targets): argument dependencies, pointer
/// out-arguments to resolve later, and a deferred `ValueDep{CallResult}`
/// for the call's own result, since the callee's summary isn't known yet
/// during phase-1 analysis.
fn record_internal_call(
    function: &Function,
    bb_id: &BbId,
    callee: FuncId,
    args: &[Operand],
    lhs: &Option<VarId>,
    state: &mut BlockState,
    param_deps: &Map<VarId, DepInfo>,
) -> DepInfo {
    let site = crate::ir::bb_id(&format!("{}#{}->{}", function.id.0, bb_id.0, callee.0));
    let mut call_deps = CallArgDeps::default();
    for (i, a) in args.iter().enumerate() {
        let dep = dep_of_operand(a, state, param_deps);
        call_deps.args.insert(i, dep);
        if let Some(v) = a.var() {
            if v.typ().is_pointer() {
                state.call_out_pointers.push((
                    v.clone(),
                    CallOutPointer { callee: callee.clone(), call_site: site.clone(), position: i },
                ));
            }
        }
    }
    state.call_sites.entry(callee.clone()).or_default().insert(site.clone(), call_deps);

    let result_dep = DepInfo::value_dep(ValueRef::CallResult(site));
    if let Some(lhs) = lhs {
        set_var_dep(state, lhs, result_dep.clone());
    }
    result_dep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dep::Dep;
    use crate::ir::*;
    use crate::oracles::{ConservativeAliasOracle, DirectCallGraphOracle, LibrarySignatureRegistry};

    fn ctx_for<'a>(
        function: &'a Function,
        program: &'a Program,
        alias: &'a ConservativeAliasOracle,
        call_graph: &'a DirectCallGraphOracle,
        libs: &'a LibrarySignatureRegistry,
        results: &'a Map<FuncId, crate::analysis::FunctionSummary>,
    ) -> AnalysisCtx<'a> {
        let _ = function;
        AnalysisCtx { program, alias, call_graph, libs, results, goto_unsafe: false }
    }

    #[test]
    fn arithmetic_on_an_argument_is_argument_dependent() {
        let x = var_id("x", Some(func_id("f")), int_ty());
        let t = var_id("t", Some(func_id("f")), int_ty());
        let mut body = Map::new();
        body.insert(
            bb_id("entry"),
            BasicBlock {
                insts: vec![Instruction::Arith {
                    lhs: t.clone(),
                    aop: ArithOp::Add,
                    op1: Operand::Var(x.clone()),
                    op2: Operand::CInt(1),
                }],
                term: Terminal::Ret(Some(Operand::Var(t.clone()))),
            },
        );
        let function = Function { id: func_id("f"), params: vec![x.clone()], ret_ty: Some(int_ty()), body };
        let program = Program { functions: Map::from([(function.id.clone(), function.clone())]), ..Default::default() };
        let alias = ConservativeAliasOracle::new(&function, &program);
        let call_graph = DirectCallGraphOracle::new(&program);
        let libs = LibrarySignatureRegistry::empty();
        let results = Map::new();
        let ctx = ctx_for(&function, &program, &alias, &call_graph, &libs, &results);

        let param_deps = Map::from([(x.clone(), DepInfo::arg_dep(crate::dep::ArgRef(0)))]);
        let provenance = Map::new();
        let state = analyze_block(
            &function,
            &bb_id("entry"),
            &function.body[&bb_id("entry")],
            &Map::new(),
            &param_deps,
            &provenance,
            None,
            &ctx,
        );
        assert_eq!(state.instr_deps[0].level(), Dep::ArgDep);
        assert_eq!(state.return_dep.as_ref().unwrap().level(), Dep::ArgDep);
    }

    #[test]
    fn store_of_a_constant_is_input_independent_until_control_merged() {
        let y = var_id("y", Some(func_id("f")), pointer_ty(int_ty()));
        let mut body = Map::new();
        body.insert(
            bb_id("entry"),
            BasicBlock {
                insts: vec![Instruction::Store { dst: y.clone(), op: Operand::CInt(1) }],
                term: Terminal::Ret(None),
            },
        );
        let function = Function { id: func_id("f"), params: vec![y.clone()], ret_ty: None, body };
        let program = Program { functions: Map::from([(function.id.clone(), function.clone())]), ..Default::default() };
        let alias = ConservativeAliasOracle::new(&function, &program);
        let call_graph = DirectCallGraphOracle::new(&program);
        let libs = LibrarySignatureRegistry::empty();
        let results = Map::new();
        let ctx = ctx_for(&function, &program, &alias, &call_graph, &libs, &results);

        let provenance = Map::from([(y.clone(), Set::from([0usize]))]);
        let state = analyze_block(
            &function,
            &bb_id("entry"),
            &function.body[&bb_id("entry")],
            &Map::new(),
            &Map::new(),
            &provenance,
            None,
            &ctx,
        );
        assert_eq!(state.out_arg_deps[&0].level(), Dep::InputIndep);
    }
}
