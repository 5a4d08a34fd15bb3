//! The module driver: runs the per-function analyser over every function
//! in a [`Program`], then resolves the cross-function placeholders phase-1
//! analysis defers — caller-bound argument dependencies, global-variable
//! dependencies, deferred call results, and out-argument pointers — as one
//! whole-program chaotic iteration.
//!
//! Grounded in `original_source/Analysis/src/InputDependencyAnalysis.cpp`'s
//! bottom-up SCC walk with a recursive-SCC reflect step; generalized the same way
//! `loop_analysis` generalizes its per-loop reflect step, since the
//! dependency it resolves (a caller's actual argument/global values feeding
//! a callee, and a callee's summary feeding back into its callers' call
//! results) flows in both directions across the whole call graph, not just
//! within one SCC. A flat chaotic iteration over every function, bounded by
//! the lattice's finite height, reaches the same fixpoint.

use std::collections::BTreeMap as Map;

use crate::analysis::block::CallOutPointer;
use crate::analysis::function::{self, FunctionResult};
use crate::analysis::{AnalysisCtx, FunctionSummary};
use crate::dep::DepInfo;
use crate::error::Diagnostics;
use crate::ir::{FuncId, Program};
use crate::oracles::{CallGraphOracle, ConservativeAliasOracle, LibrarySignatureRegistry};

/// Same safety valve as `loop_analysis::MAX_ROUNDS`: the lattice is finite
/// and every step here is a join, so this bounds a modeling bug, not
/// legitimate convergence time.
const MAX_ROUNDS: usize = 64;

pub struct ModuleResult {
    pub functions: Map<FuncId, FunctionResult>,
    pub diagnostics: Diagnostics,
}

impl ModuleResult {
    pub fn summary(&self, id: &FuncId) -> Option<&FunctionSummary> {
        self.functions.get(id).map(|r| &r.summary)
    }
}

pub fn analyze_program(
    program: &Program,
    call_graph: &dyn CallGraphOracle,
    libs: &LibrarySignatureRegistry,
    goto_unsafe: bool,
) -> ModuleResult {
    let alias_oracles: Map<FuncId, ConservativeAliasOracle> = program
        .functions
        .iter()
        .map(|(id, f)| (id.clone(), ConservativeAliasOracle::new(f, program)))
        .collect();

    let mut results: Map<FuncId, FunctionResult> = Map::new();
    let mut diagnostics = Diagnostics::new();

    // Phase 1: every function analysed in isolation against its own
    // parameters — purely intra-procedural, so processing order here
    // doesn't affect the outcome.
    for (id, f) in &program.functions {
        let empty_summaries = Map::new();
        let ctx = AnalysisCtx {
            program,
            alias: &alias_oracles[id],
            call_graph,
            libs,
            results: &empty_summaries,
            goto_unsafe,
        };
        if let Ok(result) = function::analyze(f, &ctx) {
            results.insert(id.clone(), result);
        }
    }

    // Order within a round doesn't affect the fixpoint, but processing
    // callees before their callers converges in fewer rounds.
    let mut order: Vec<FuncId> = call_graph.sccs_bottom_up().into_iter().flatten().collect();
    for id in program.functions.keys() {
        if !order.contains(id) {
            order.push(id.clone());
        }
    }

    let mut prev_fingerprint: Option<u64> = None;
    for _round in 0..MAX_ROUNDS {
        let actual_globals = aggregate_global_deps(&results);

        for id in &order {
            let Some(result) = results.get_mut(id) else { continue };
            function::finalize_globals(result, &actual_globals);
        }

        // Caller-bound argument dependencies are deliberately NOT merged
        // into a callee's own canonical summary here: an `ArgRef` only
        // means something relative to the function whose `DepInfo` it
        // lives in (dep.rs), so a caller's actual-argument dependency is
        // only ever substituted at the use site — the call result
        // (`resolve_call_results`, via `function::dependencies_for_call`)
        // and out-argument pointer (`resolve_call_out_pointers`) — where
        // it lands inside the *caller's* own summary, never the callee's.
        // `function::finalize_arguments` does get called automatically for
        // one case: a function with no caller at all has no actual-argument
        // dependency to substitute from, so `finalize_root_functions` (after
        // this loop converges) is the one place that calls it directly,
        // binding `InputDep` rather than a caller's real actuals.
        resolve_call_out_pointers(&order, &mut results);
        resolve_call_results(&order, &mut results);

        let fingerprint = aggregate_fingerprint(&results);
        if prev_fingerprint == Some(fingerprint) {
            break;
        }
        prev_fingerprint = Some(fingerprint);
    }

    finalize_root_functions(program, &mut results);
    promote_callbacks(&mut results);

    for result in results.values() {
        for entry in result.diagnostics.entries() {
            diagnostics.push(entry.clone());
        }
    }

    ModuleResult { functions: results, diagnostics }
}

/// A global variable's dependency, module-wide: the join of every
/// function's recorded `modified_globals` entry for it. Functions that
/// only read a global get that global's dependency substituted in at
/// `finalize_globals` via their `ValueRef::Global` placeholders.
fn aggregate_global_deps(results: &Map<FuncId, FunctionResult>) -> Map<crate::ir::VarId, DepInfo> {
    let mut actual: Map<crate::ir::VarId, DepInfo> = Map::new();
    for result in results.values() {
        for (g, dep) in &result.summary.modified_globals {
            actual.entry(g.clone()).or_insert_with(DepInfo::input_indep).join(dep);
        }
    }
    actual
}

/// For every recorded `call_out_pointers` entry, joins the callee's
/// out-argument dependency (with the caller's actual args substituted in)
/// back into the caller's own tracked value for that local pointer.
fn resolve_call_out_pointers(order: &[FuncId], results: &mut Map<FuncId, FunctionResult>) {
    for id in order {
        let Some(pointers) = results.get(id).map(|r| r.call_out_pointers.clone()) else { continue };
        for (var, CallOutPointer { callee, call_site, position }) in pointers {
            let call_deps = results
                .get(id)
                .and_then(|r| r.summary.call_site_info.get(&callee))
                .and_then(|info| info.dependencies_for_call(&call_site))
                .cloned();
            let Some(call_deps) = call_deps else { continue };
            let Some(callee_summary) = results.get(&callee).map(|r| r.summary.clone()) else { continue };
            let dep = function::out_arg_dependency_for_call(&callee_summary, position, &call_deps);
            if let Some(caller) = results.get_mut(id) {
                if let Some(d) = caller.summary.modified_globals.get_mut(&var) {
                    d.join(&dep);
                }
                if let Some(existing) =
                    caller.block_states.values_mut().find_map(|s| s.value_deps.get_mut(&var))
                {
                    existing.widen(&dep);
                }
            }
        }
    }
}

/// Resolves every `ValueRef::CallResult(site)` placeholder left in a
/// function's summary once the targeted callee's summary is available,
/// per the deferred-call-result mechanism `dep::ValueRef` documents.
fn resolve_call_results(order: &[FuncId], results: &mut Map<FuncId, FunctionResult>) {
    for id in order {
        let Some(call_site_info) = results.get(id).map(|r| r.summary.call_site_info.clone()) else { continue };
        let mut resolved: Map<crate::ir::BbId, DepInfo> = Map::new();
        for (callee, info) in &call_site_info {
            let Some(callee_summary) = results.get(callee).map(|r| r.summary.clone()) else { continue };
            for (site, call_deps) in info.call_sites() {
                resolved.insert(site.clone(), function::dependencies_for_call(&callee_summary, call_deps));
            }
        }
        if let Some(result) = results.get_mut(id) {
            function::resolve_call_results(result, &resolved);
        }
    }
}

fn aggregate_fingerprint(results: &Map<FuncId, FunctionResult>) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for (id, result) in results {
        id.hash(&mut hasher);
        result.summary.fingerprint().hash(&mut hasher);
    }
    hasher.finish()
}

/// A function with no caller anywhere in the program — the program entry,
/// or any other function nothing else ever calls — never gets its formal
/// arguments substituted by the caller-bound loop above, since there is no
/// caller to substitute from. Each such function's parameters are instead
/// finalized directly to `InputDep`, and the function itself is marked
/// input-dependent: the entry point's arguments are exactly the program's
/// own external input. A function that only calls itself (direct or mutual
/// recursion with no other caller) still counts as callerless; the
/// self/cycle edge is excluded when collecting which functions are called.
fn finalize_root_functions(program: &Program, results: &mut Map<FuncId, FunctionResult>) {
    let mut called: std::collections::BTreeSet<FuncId> = std::collections::BTreeSet::new();
    for (caller, result) in results.iter() {
        for callee in result.summary.call_site_info.keys() {
            if callee != caller {
                called.insert(callee.clone());
            }
        }
    }

    for (id, f) in &program.functions {
        if called.contains(id) {
            continue;
        }
        let Some(result) = results.get_mut(id) else { continue };
        let actual_args: Map<usize, DepInfo> =
            (0..f.params.len()).map(|i| (i, DepInfo::input_dep())).collect();
        function::finalize_arguments(result, &actual_args);
        result.summary.is_input_dep_function = true;
    }
}

/// Open Question 3's resolution: a function passed as a library callback
/// argument anywhere in the program is unconditionally treated as
/// input-dependent, since the library can invoke it with arbitrary data.
fn promote_callbacks(results: &mut Map<FuncId, FunctionResult>) {
    let targets: std::collections::BTreeSet<FuncId> =
        results.values().flat_map(|r| r.summary.callback_targets.iter().cloned()).collect();
    for target in targets {
        if let Some(result) = results.get_mut(&target) {
            result.summary.is_input_dep_function = true;
            result.summary.return_dep = result.summary.return_dep.clone().joined(&DepInfo::input_dep());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;
    use crate::oracles::DirectCallGraphOracle;
    use std::collections::BTreeMap;

    #[test]
    fn argument_dependency_propagates_through_a_direct_call() {
        // callee(a) { return a; }  caller(p) { t = callee(p); return t; }
        let a = var_id("a", Some(func_id("callee")), int_ty());
        let mut callee_body = BTreeMap::new();
        callee_body.insert(bb_id("entry"), BasicBlock { insts: vec![], term: Terminal::Ret(Some(Operand::Var(a.clone()))) });
        let callee = Function { id: func_id("callee"), params: vec![a.clone()], ret_ty: Some(int_ty()), body: callee_body };

        let p = var_id("p", Some(func_id("caller")), int_ty());
        let t = var_id("t", Some(func_id("caller")), int_ty());
        let mut caller_body = BTreeMap::new();
        caller_body.insert(
            bb_id("entry"),
            BasicBlock {
                insts: vec![],
                term: Terminal::CallDirect {
                    lhs: Some(t.clone()),
                    callee: func_id("callee"),
                    args: vec![Operand::Var(p.clone())],
                    next_bb: bb_id("exit"),
                },
            },
        );
        caller_body.insert(bb_id("exit"), BasicBlock { insts: vec![], term: Terminal::Ret(Some(Operand::Var(t.clone()))) });
        let caller = Function { id: func_id("caller"), params: vec![p.clone()], ret_ty: Some(int_ty()), body: caller_body };

        let mut functions = BTreeMap::new();
        functions.insert(callee.id.clone(), callee);
        functions.insert(caller.id.clone(), caller);
        let program = Program { functions, ..Default::default() };

        let call_graph = DirectCallGraphOracle::new(&program);
        let libs = LibrarySignatureRegistry::empty();
        let module_result = analyze_program(&program, &call_graph, &libs, false);

        let callee_summary = module_result.summary(&func_id("callee")).unwrap();
        assert!(callee_summary.return_dep.is_input_arg_dep());
    }
}
