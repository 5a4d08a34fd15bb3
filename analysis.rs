//! The input-dependency dataflow engine: lattice in [`crate::dep`], CFG
//! facts in [`crate::cfg`], and here the three layers that actually walk a
//! program — per-block, per-function, and whole-module.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use crate::dep::DepInfo;
use crate::ir::{BbId, FuncId, Program};
use crate::oracles::{AliasOracle, CallGraphOracle, LibrarySignatureRegistry};

pub mod block;
pub mod callsite;
pub mod function;
pub mod loop_analysis;
pub mod module;
pub mod result;

#[cfg(test)]
mod tests;

/// Identifies one instruction for query purposes: its enclosing block plus
/// its position in program order. The terminator is addressed by the
/// block's instruction count (one past the last ordinary instruction),
/// since it too has a dependency per its own transfer rule.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrRef {
    pub function: FuncId,
    pub block: BbId,
    pub index: usize,
}

impl InstrRef {
    pub fn new(function: FuncId, block: BbId, index: usize) -> Self {
        InstrRef { function, block, index }
    }
}

/// Everything a function's analysis needs to consult outside its own body.
/// One explicit, passed-around context rather than an abstract
/// get-function-analyser callback: no analyser holds a callback into
/// another analyser, they all just read from this.
pub struct AnalysisCtx<'a> {
    pub program: &'a Program,
    pub alias: &'a dyn AliasOracle,
    pub call_graph: &'a dyn CallGraphOracle,
    pub libs: &'a LibrarySignatureRegistry,
    /// Finalized summaries of functions already processed this module run
    /// (populated bottom-up by the module driver as each SCC finishes).
    pub results: &'a Map<FuncId, FunctionSummary>,
    pub goto_unsafe: bool,
}

/// What the module driver and the public query surface need to know about
/// one function, once its analysis (and finalization) is done.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionSummary {
    pub return_dep: DepInfo,
    pub out_arg_deps: Map<usize, DepInfo>,
    pub referenced_globals: Map<crate::ir::VarId, DepInfo>,
    pub modified_globals: Map<crate::ir::VarId, DepInfo>,
    /// Keyed by callee: a per-function, per-callsite map, mergeable across
    /// callsites — one `FunctionCallDepInfo` per function this function
    /// calls.
    pub call_site_info: Map<FuncId, callsite::FunctionCallDepInfo>,
    /// Internal functions this function passes as a library callback
    /// argument anywhere in its body; the module driver promotes each to
    /// `is_input_dep_function` once this summary is finalized.
    pub callback_targets: Set<FuncId>,
    pub is_input_dep_function: bool,
}

impl FunctionSummary {
    /// A cheap structural fingerprint used to detect when a recursive
    /// SCC's chaotic iteration has stopped changing anything (resolves the
    /// engine's recursive-fixpoint open question: iterate until every
    /// member function's summary hash stabilizes, not a fixed pass count).
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.return_dep.level().hash(&mut hasher);
        self.return_dep.args().len().hash(&mut hasher);
        self.return_dep.values().len().hash(&mut hasher);
        for (pos, dep) in &self.out_arg_deps {
            pos.hash(&mut hasher);
            dep.level().hash(&mut hasher);
        }
        for dep in self.referenced_globals.values().chain(self.modified_globals.values()) {
            dep.level().hash(&mut hasher);
        }
        for (callee, info) in &self.call_site_info {
            callee.hash(&mut hasher);
            info.fingerprint().hash(&mut hasher);
        }
        for target in &self.callback_targets {
            target.hash(&mut hasher);
        }
        self.is_input_dep_function.hash(&mut hasher);
        hasher.finish()
    }
}
