//! Per-call-site dependency recording: what each argument (and each
//! referenced global) at a call instruction depends on, from the callee's
//! point of view, so the module driver can later substitute in the
//! caller's actual argument dependencies.
//!
//! Restates `original_source/Analysis/FunctionCallDepInfo.h` as owned Rust
//! value types: the call site is identified by the block that terminates
//! with the call (this IR only allows one call per block terminator,
//! unlike the LLVM `CallInst` pointers the original keys on), and deps are
//! indexed by argument position instead of `llvm::Argument*`.

use std::collections::BTreeMap as Map;

use crate::dep::DepInfo;
use crate::ir::{BbId, VarId};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionCallDepInfo {
    calls: Map<BbId, CallArgDeps>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallArgDeps {
    pub args: Map<usize, DepInfo>,
    pub globals: Map<VarId, DepInfo>,
    pub is_callback: bool,
}

impl FunctionCallDepInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_call(&mut self, call_site: BbId, deps: CallArgDeps) {
        self.calls.insert(call_site, deps);
    }

    pub fn add_calls(&mut self, other: &FunctionCallDepInfo) {
        for (site, deps) in &other.calls {
            self.calls.insert(site.clone(), deps.clone());
        }
    }

    pub fn dependencies_for_call(&self, call_site: &BbId) -> Option<&CallArgDeps> {
        self.calls.get(call_site)
    }

    pub fn dependencies_for_call_mut(&mut self, call_site: &BbId) -> Option<&mut CallArgDeps> {
        self.calls.get_mut(call_site)
    }

    /// The join of every call site's argument dependencies, position by
    /// position: how dependent is argument `i` across *any* call this
    /// function makes.
    pub fn merged_dependencies(&self) -> Map<usize, DepInfo> {
        let mut merged: Map<usize, DepInfo> = Map::new();
        for deps in self.calls.values() {
            for (pos, dep) in &deps.args {
                merged.entry(*pos).or_insert_with(|| DepInfo::new(crate::dep::Dep::Unknown)).join(dep);
            }
        }
        merged
    }

    /// Substitutes the caller's actual argument dependencies into every
    /// recorded call site: an argument dependency at position `i` that
    /// traced back to one of *this* function's own parameters gets
    /// replaced by what the caller actually passed for that parameter. An
    /// argument ref with no actual binding (or one no higher than `ArgDep`)
    /// settles back to `InputIndep` rather than leaving a stale `ArgDep`
    /// with an empty `args` set.
    pub fn finalize(&mut self, actual_deps: &Map<usize, DepInfo>) {
        for deps in self.calls.values_mut() {
            for dep in deps.args.values_mut() {
                let arg_refs: Vec<_> = dep.args().iter().cloned().collect();
                for arg in arg_refs {
                    dep.remove_arg(&arg);
                    if let Some(actual) = actual_deps.get(&arg.0) {
                        dep.join(actual);
                    }
                }
                dep.settle_arg_level();
            }
        }
    }

    pub fn call_sites(&self) -> impl Iterator<Item = (&BbId, &CallArgDeps)> {
        self.calls.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn remove_call(&mut self, call_site: &BbId) -> Option<CallArgDeps> {
        self.calls.remove(call_site)
    }

    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (site, deps) in &self.calls {
            site.hash(&mut hasher);
            for (pos, dep) in &deps.args {
                pos.hash(&mut hasher);
                dep.level().hash(&mut hasher);
            }
            deps.is_callback.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// The callee-replacement contract: a
/// downstream cloning client rewrites which function a call instruction
/// targets, and the recorded call-site dependency info must follow it
/// without being recomputed. `old`'s entry for `call_site` moves into
/// `new`'s table; `old` keeps any of its other call sites untouched.
pub fn rewrite_callee(
    call_site_info: &mut Map<crate::ir::FuncId, FunctionCallDepInfo>,
    call_site: &BbId,
    old: &crate::ir::FuncId,
    new: &crate::ir::FuncId,
) {
    let moved = call_site_info.get_mut(old).and_then(|info| info.remove_call(call_site));
    let Some(deps) = moved else { return };
    if let Some(old_info) = call_site_info.get(old) {
        if old_info.is_empty() {
            call_site_info.remove(old);
        }
    }
    call_site_info.entry(new.clone()).or_default().add_call(call_site.clone(), deps);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dep::{ArgRef, Dep};
    use crate::ir::bb_id;

    #[test]
    fn finalize_substitutes_caller_argument_deps() {
        let mut info = FunctionCallDepInfo::new();
        let mut deps = CallArgDeps::default();
        deps.args.insert(0, DepInfo::arg_dep(ArgRef(2)));
        info.add_call(bb_id("call_site"), deps);

        let mut actual = Map::new();
        actual.insert(2, DepInfo::input_dep());
        info.finalize(&actual);

        let updated = info.dependencies_for_call(&bb_id("call_site")).unwrap();
        assert_eq!(updated.args[&0].level(), Dep::InputDep);
    }

    #[test]
    fn finalize_settles_to_input_indep_when_the_actual_binding_is_missing() {
        let mut info = FunctionCallDepInfo::new();
        let mut deps = CallArgDeps::default();
        deps.args.insert(0, DepInfo::arg_dep(ArgRef(2)));
        info.add_call(bb_id("call_site"), deps);

        // no actual dependency recorded for position 2
        info.finalize(&Map::new());

        let updated = info.dependencies_for_call(&bb_id("call_site")).unwrap();
        assert_eq!(updated.args[&0].level(), Dep::InputIndep);
        assert!(updated.args[&0].args().is_empty());
    }
}
