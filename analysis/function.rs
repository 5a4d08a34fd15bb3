//! Function-level analysis: runs the CFG-planner order, block analyser and
//! loop analyser over one function's body, in the two-phase analyse/then
//! finalize workflow the module driver drives.
//!
//! Generalizes a `forward_analysis`-style worklist driver from a flat FIFO
//! block queue to the topological/SCC-aware order `CfgPlanner` produces,
//! since a pure FIFO worklist doesn't respect "a loop's header is its only
//! entry point".

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use crate::analysis::block::{analyze_block, BlockResult, BlockState, CallOutPointer};
use crate::analysis::callsite::{CallArgDeps, FunctionCallDepInfo};
use crate::analysis::loop_analysis::analyze_loop;
use crate::analysis::{AnalysisCtx, FunctionSummary};
use crate::cfg::{Cfg, CfgPlanner, Dominators, NaturalLoops, PlanUnit};
use crate::dep::{ArgRef, DepInfo, ValueDepInfo, ValueRef};
use crate::error::{AnalysisError, Diagnostic, Diagnostics};
use crate::ir::{BbId, Function, FuncId, Instruction, Operand, VarId};

/// Full per-function analysis result: every block's (or loop's) state,
/// plus the summary the module driver and public query surface need.
pub struct FunctionResult {
    pub function_id: FuncId,
    pub block_states: Map<BbId, BlockState>,
    pub unreachable_blocks: std::collections::BTreeSet<BbId>,
    pub summary: FunctionSummary,
    pub diagnostics: Diagnostics,
    /// Pointer-typed actuals passed to some internal/indirect call in this
    /// function, recorded so a later pass can join the callee's
    /// out-argument dependency back into the right local memory cell once
    /// the callee's summary is known.
    pub call_out_pointers: Vec<(VarId, CallOutPointer)>,
}

/// Which formal-argument position(s) (if any) a local pointer variable was
/// derived from — by a direct copy, a `Gep`/`Gfp` off it, or a `Phi` of
/// several such — computed once per function as a flow-insensitive
/// fixpoint over the whole body. Lets a `Store` through a local alias of a
/// pointer-typed parameter still update that parameter's out-argument
/// dependency, without needing the full alias oracle for this common case.
pub fn compute_provenance(function: &Function) -> Map<VarId, Set<usize>> {
    let mut provenance: Map<VarId, Set<usize>> = Map::new();
    for (i, p) in function.params.iter().enumerate() {
        if p.typ().is_pointer() {
            provenance.entry(p.clone()).or_default().insert(i);
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for bb in function.body.values() {
            for inst in &bb.insts {
                let (lhs, sources): (Option<&VarId>, Vec<&VarId>) = match inst {
                    Instruction::Copy { lhs, op } => (Some(lhs), op.var().into_iter().collect()),
                    Instruction::Gep { lhs, src, .. } => (Some(lhs), vec![src]),
                    Instruction::Gfp { lhs, src, .. } => (Some(lhs), vec![src]),
                    Instruction::Phi { lhs, args } => {
                        (Some(lhs), args.values().filter_map(Operand::var).collect())
                    }
                    _ => (None, vec![]),
                };
                let Some(lhs) = lhs else { continue };
                let mut merged = provenance.get(lhs).cloned().unwrap_or_default();
                let before = merged.len();
                for s in sources {
                    if let Some(sp) = provenance.get(s) {
                        merged.extend(sp.iter().cloned());
                    }
                }
                if merged.len() != before {
                    changed = true;
                    provenance.insert(lhs.clone(), merged);
                }
            }
        }
    }
    provenance
}

/// Phase 1: analyse a function assuming each of its own parameters is
/// `ArgDep` on itself. Produces a [`FunctionResult`] whose argument-tagged
/// dependencies are still in terms of this function's own parameters —
/// [`finalize`] later substitutes in what its callers actually pass.
pub fn analyze(function: &Function, ctx: &AnalysisCtx) -> Result<FunctionResult, AnalysisError> {
    let cfg = Cfg::new(function);
    let doms = Dominators::compute(&cfg);
    let loops = NaturalLoops::compute(&cfg, &doms);
    let planner = CfgPlanner::new(&cfg, &loops);
    let (plan, unreachable) = planner.plan();
    let provenance = compute_provenance(function);

    let param_deps: Map<VarId, DepInfo> = function
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| (p.clone(), DepInfo::arg_dep(ArgRef(i))))
        .collect();

    let mut block_states: Map<BbId, BlockState> = Map::new();
    let mut diagnostics = Diagnostics::new();
    let mut value_deps: Map<VarId, ValueDepInfo> = Map::new();
    // Every block analysed so far whose own result was `NonDeterministic`,
    // keyed by the block itself: a later block dominated by one of these
    // but not yet past its merge point inherits that branch's control_dep.
    // See `control_dep_for`.
    let mut branch_regions: Vec<(BbId, DepInfo)> = Vec::new();

    for unit in &plan {
        match unit {
            PlanUnit::Block(bb) => {
                let preds: Vec<&BbId> = cfg.pred(bb).collect();
                let mut planned_preds = true;
                for p in &preds {
                    if !block_states.contains_key(*p) && **p != cfg.entry {
                        planned_preds = false;
                    }
                }
                if !planned_preds {
                    if ctx.goto_unsafe {
                        diagnostics.push(Diagnostic::RecoveredIrregularCfg { block: bb.clone() });
                    } else {
                        return Err(AnalysisError::IrregularCfg {
                            block: bb.clone(),
                            predecessor: preds.first().map(|p| (*p).clone()).unwrap_or_else(|| bb.clone()),
                        });
                    }
                }

                let pre_state = join_predecessor_states(bb, &cfg, &block_states, &value_deps);
                let body = &function.body[bb];
                let inherited = control_dep_for(bb, &doms, &branch_regions);
                let mut state =
                    analyze_block(function, bb, body, &pre_state, &param_deps, &provenance, inherited.as_ref(), ctx);
                if ctx.goto_unsafe && !planned_preds {
                    state.result = BlockResult::NonDeterministic { control_dep: DepInfo::input_dep() };
                    for v in state.value_deps.values_mut() {
                        v.update(&ValueDepInfo::scalar(DepInfo::input_dep()));
                    }
                }
                if let Some(control_dep) = state.result.control_dep() {
                    branch_regions.push((bb.clone(), control_dep.clone()));
                }
                for (var, dep) in &state.value_deps {
                    value_deps.insert(var.clone(), dep.clone());
                }
                block_states.insert(bb.clone(), state);
            }
            PlanUnit::Loop(natural_loop) => {
                let entry_deps = join_predecessor_states(&natural_loop.header, &cfg, &block_states, &value_deps);
                let outer_control_dep = control_dep_for(&natural_loop.header, &doms, &branch_regions);
                let loop_result = analyze_loop(
                    function,
                    natural_loop,
                    &function.body,
                    &cfg,
                    &doms,
                    &entry_deps,
                    &param_deps,
                    &provenance,
                    outer_control_dep.as_ref(),
                    ctx,
                );
                for (var, dep) in &loop_result.exit_value_deps {
                    value_deps.insert(var.clone(), dep.clone());
                }
                for bb in &natural_loop.body {
                    if let Some(state) = loop_result.block_states.get(bb) {
                        if let Some(control_dep) = state.result.control_dep() {
                            branch_regions.push((bb.clone(), control_dep.clone()));
                        }
                    }
                }
                block_states.extend(loop_result.block_states);
            }
        }
    }

    for bb in &unreachable {
        diagnostics.push(Diagnostic::UnreachableBlockQueried { block: bb.clone() });
    }
    for state in block_states.values() {
        for d in &state.diagnostics {
            diagnostics.push(d.clone());
        }
    }

    let (summary, call_out_pointers) = summarize(&block_states, &unreachable);
    Ok(FunctionResult {
        function_id: function.id.clone(),
        block_states,
        unreachable_blocks: unreachable,
        summary,
        diagnostics,
        call_out_pointers,
    })
}

/// A block is control-dependent on a branch region `(branch_bb, dep)` when
/// the branch dominates it but its own merge point — the branch's
/// post-dominator — hasn't been reached yet, i.e. the block doesn't
/// post-dominate the branch. Every matching region is joined in; nested
/// if/else and loop-exit conditions compose correctly since an outer
/// branch's `dep` already absorbed any enclosing branch via the same rule
/// when *it* was analysed.
fn control_dep_for(bb: &BbId, doms: &Dominators, branch_regions: &[(BbId, DepInfo)]) -> Option<DepInfo> {
    let mut merged: Option<DepInfo> = None;
    for (branch_bb, dep) in branch_regions {
        if branch_bb == bb {
            continue;
        }
        if doms.dominates(branch_bb, bb) && !doms.post_dominates(bb, branch_bb) {
            match &mut merged {
                Some(m) => m.join(dep),
                None => merged = Some(dep.clone()),
            }
        }
    }
    merged
}

fn join_predecessor_states(
    bb: &BbId,
    cfg: &Cfg,
    block_states: &Map<BbId, BlockState>,
    value_deps: &Map<VarId, ValueDepInfo>,
) -> Map<VarId, ValueDepInfo> {
    if *bb == cfg.entry {
        return value_deps.clone();
    }
    let mut merged: Map<VarId, ValueDepInfo> = Map::new();
    let mut any_pred = false;
    for pred in cfg.pred(bb) {
        any_pred = true;
        if let Some(state) = block_states.get(pred) {
            for (var, dep) in &state.value_deps {
                let mut dep = dep.clone();
                if let Some(control_dep) = state.result.control_dep() {
                    dep.widen(control_dep);
                }
                merged.entry(var.clone()).or_insert_with(|| dep.clone()).merge(&dep);
            }
        }
    }
    if !any_pred {
        return value_deps.clone();
    }
    merged
}

/// Unreachable-from-entry blocks are excluded entirely: their stores never
/// reach `modified_globals`, their calls never reach `call_site_info`.
fn summarize(
    block_states: &Map<BbId, BlockState>,
    unreachable: &std::collections::BTreeSet<BbId>,
) -> (FunctionSummary, Vec<(VarId, CallOutPointer)>) {
    let mut summary = FunctionSummary::default();
    let mut call_out_pointers = Vec::new();

    for (bb, state) in block_states {
        if unreachable.contains(bb) {
            continue;
        }
        if let Some(r) = &state.return_dep {
            summary.return_dep.join(r);
        }
        for (pos, dep) in &state.out_arg_deps {
            summary.out_arg_deps.entry(*pos).or_insert_with(DepInfo::input_indep).join(dep);
        }
        for (g, dep) in &state.referenced_globals {
            summary.referenced_globals.entry(g.clone()).or_insert_with(DepInfo::input_indep).join(dep);
        }
        for (g, dep) in &state.modified_globals {
            summary.modified_globals.entry(g.clone()).or_insert_with(DepInfo::input_indep).join(dep);
        }
        for (callee, sites) in &state.call_sites {
            let entry = summary.call_site_info.entry(callee.clone()).or_insert_with(FunctionCallDepInfo::new);
            for (site, deps) in sites {
                entry.add_call(site.clone(), deps.clone());
            }
        }
        call_out_pointers.extend(state.call_out_pointers.iter().cloned());
        summary.callback_targets.extend(state.callback_targets.iter().cloned());
        if state.result.is_input_dependent() {
            summary.is_input_dep_function = true;
        }
    }
    (summary, call_out_pointers)
}

/// Phase 2: substitutes the caller-bound argument/global dependencies
/// computed by the module driver into an already-analysed function's
/// summary and call-site info. Mirrors the original's `finalizeResults`:
/// it widens existing `DepInfo`s with the actual dependencies rather than
/// re-running the block analyser.
pub fn finalize_arguments(result: &mut FunctionResult, actual_args: &Map<usize, DepInfo>) {
    substitute_args(&mut result.summary.return_dep, actual_args);
    for dep in result.summary.out_arg_deps.values_mut() {
        substitute_args(dep, actual_args);
    }
    for dep in result.summary.referenced_globals.values_mut() {
        substitute_args(dep, actual_args);
    }
    for dep in result.summary.modified_globals.values_mut() {
        substitute_args(dep, actual_args);
    }
    for info in result.summary.call_site_info.values_mut() {
        info.finalize(actual_args);
    }
    if result.summary.return_dep.is_input_dep() {
        result.summary.is_input_dep_function = true;
    }
}

pub fn finalize_globals(result: &mut FunctionResult, actual_globals: &Map<VarId, DepInfo>) {
    substitute_globals(&mut result.summary.return_dep, actual_globals);
    for dep in result.summary.out_arg_deps.values_mut() {
        substitute_globals(dep, actual_globals);
    }
    for dep in result.summary.referenced_globals.values_mut() {
        substitute_globals(dep, actual_globals);
    }
    for dep in result.summary.modified_globals.values_mut() {
        substitute_globals(dep, actual_globals);
    }
}

/// Joins in the dependency a call's result or pointer out-argument was
/// deferred on, once the callee's summary is available — the general
/// mechanism the engine uses instead of hand-rolled "reflection" of
/// `ValueDep{call-site}` placeholders (this function's own loop-carried
/// values never need it, since `loop_analysis` iterates to a fixpoint
/// directly; this is for calls, whose callee summary genuinely isn't known
/// until later).
pub fn resolve_call_results(result: &mut FunctionResult, resolved: &Map<BbId, DepInfo>) {
    substitute_calls(&mut result.summary.return_dep, resolved);
    for dep in result.summary.out_arg_deps.values_mut() {
        substitute_calls(dep, resolved);
    }
    for dep in result.summary.referenced_globals.values_mut() {
        substitute_calls(dep, resolved);
    }
    for dep in result.summary.modified_globals.values_mut() {
        substitute_calls(dep, resolved);
    }
}

/// Replaces each `ArgRef` the callee's own `DepInfo` carries with the
/// caller's actual dependency for that position. The `ArgRef` is removed,
/// not just joined past: it names a position in the *callee's* parameter
/// list, and leaving it in place would let some later caller of *this*
/// function misread it as one of its own argument positions. An `ArgRef`
/// whose actual is missing or no higher than `ArgDep` leaves no binding
/// behind it; `settle_arg_level` drops the level to `InputIndep` in that
/// case rather than leaving a stale `ArgDep` with an empty `args` set.
fn substitute_args(dep: &mut DepInfo, actual_args: &Map<usize, DepInfo>) {
    let arg_refs: Vec<ArgRef> = dep.args().iter().cloned().collect();
    for a in arg_refs {
        dep.remove_arg(&a);
        if let Some(actual) = actual_args.get(&a.0) {
            dep.join(actual);
        }
    }
    dep.settle_arg_level();
}

fn substitute_globals(dep: &mut DepInfo, actual_globals: &Map<VarId, DepInfo>) {
    let value_refs: Vec<ValueRef> = dep.values().iter().cloned().collect();
    for v in value_refs {
        if let ValueRef::Global(g) = &v {
            if let Some(actual) = actual_globals.get(g) {
                dep.join(actual);
            }
        }
    }
}

fn substitute_calls(dep: &mut DepInfo, resolved: &Map<BbId, DepInfo>) {
    let value_refs: Vec<ValueRef> = dep.values().iter().cloned().collect();
    for v in value_refs {
        if let ValueRef::CallResult(site) = &v {
            if let Some(actual) = resolved.get(site) {
                dep.join(actual);
            }
        }
    }
}

/// What a caller sees at one of its call sites, once the callee's summary
/// is finalized: the callee's return dependency with the caller's actual
/// argument dependencies substituted in for the callee's own `ArgDep`s.
pub fn dependencies_for_call(callee_summary: &FunctionSummary, call_deps: &CallArgDeps) -> DepInfo {
    let mut dep = callee_summary.return_dep.clone();
    substitute_args(&mut dep, &call_deps.args);
    dep
}

/// Same, for a pointer out-argument at position `position` of the callee.
pub fn out_arg_dependency_for_call(
    callee_summary: &FunctionSummary,
    position: usize,
    call_deps: &CallArgDeps,
) -> DepInfo {
    let mut dep = callee_summary.out_arg_deps.get(&position).cloned().unwrap_or_else(DepInfo::input_indep);
    substitute_args(&mut dep, &call_deps.args);
    dep
}
