//! External collaborators the engine consults but does not implement: an
//! alias oracle, a call-graph oracle, and a library signature registry.
//! Each is specified as a trait (the contract this crate actually needs)
//! plus one conservative default implementation, built on plain
//! address-taken/reachable-type machinery and a direct-call-only graph.

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::path::Path;

use serde::Deserialize;

use crate::dep::DepInfo;
use crate::ir::{FuncId, Function, Instruction, Program, Terminal, Type, VarId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AliasResult {
    No,
    May,
    Partial,
    Must,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModRefResult {
    NoModRef,
    Ref,
    Mod,
    ModRef,
}

pub trait AliasOracle {
    fn alias(&self, p: &VarId, q: &VarId) -> AliasResult;
    fn modref(&self, instr: &Instruction, q: &VarId) -> ModRefResult;
}

/// Conservative alias oracle built from address-taken variables and type
/// reachability: two pointers may alias only if both have had their
/// address taken and their reachable type sets intersect.
pub struct ConservativeAliasOracle {
    addr_taken: Set<VarId>,
    reachable_types: Map<VarId, Set<Type>>,
}

impl ConservativeAliasOracle {
    pub fn new(function: &Function, program: &Program) -> Self {
        let mut addr_taken = Set::new();
        for bb in function.body.values() {
            for inst in &bb.insts {
                if let Instruction::AddrOf { op, .. } = inst {
                    addr_taken.insert(op.clone());
                }
            }
        }
        let mut reachable_types = Map::new();
        for v in function.params.iter().chain(addr_taken.iter()).chain(program.globals.iter()) {
            reachable_types.insert(v.clone(), reachable_types_of(&v.typ(), &program.structs));
        }
        ConservativeAliasOracle { addr_taken, reachable_types }
    }
}

fn reachable_types_of(typ: &Type, structs: &Map<crate::ir::StructId, Set<crate::ir::FieldId>>) -> Set<Type> {
    use crate::ir::LirType;
    let mut reachable = Set::new();
    let mut stack = vec![typ.clone()];
    while let Some(t) = stack.pop() {
        if !reachable.insert(t.clone()) {
            continue;
        }
        match &*t {
            LirType::Struct(id) => {
                if let Some(fields) = structs.get(id) {
                    stack.extend(fields.iter().map(|f| f.typ.clone()));
                }
            }
            LirType::Pointer(inner) => stack.push(inner.clone()),
            LirType::Int | LirType::Function { .. } => {}
        }
    }
    reachable
}

impl AliasOracle for ConservativeAliasOracle {
    fn alias(&self, p: &VarId, q: &VarId) -> AliasResult {
        if p == q {
            return AliasResult::Must;
        }
        let p_types = self.reachable_types.get(p);
        let q_types = self.reachable_types.get(q);
        match (p_types, q_types) {
            (Some(pt), Some(qt)) => {
                if self.addr_taken.contains(p) && self.addr_taken.contains(q) && pt.intersection(qt).next().is_some()
                {
                    AliasResult::May
                } else {
                    AliasResult::No
                }
            }
            _ => AliasResult::No,
        }
    }

    fn modref(&self, instr: &Instruction, q: &VarId) -> ModRefResult {
        match instr {
            Instruction::Store { dst, .. } => match self.alias(dst, q) {
                AliasResult::No => ModRefResult::NoModRef,
                AliasResult::Must => ModRefResult::Mod,
                AliasResult::May | AliasResult::Partial => ModRefResult::ModRef,
            },
            Instruction::Load { src, .. } => match self.alias(src, q) {
                AliasResult::No => ModRefResult::NoModRef,
                _ => ModRefResult::Ref,
            },
            _ => ModRefResult::NoModRef,
        }
    }
}

/// Strongly connected components of the call graph, bottom-up (callees
/// before callers), plus resolution of indirect/virtual call targets.
pub trait CallGraphOracle {
    fn sccs_bottom_up(&self) -> Vec<Vec<FuncId>>;
    /// `None` means the target set could not be resolved (e.g. a function
    /// pointer with no points-to information); callers should treat this
    /// conservatively as an opaque input source, per the engine's error
    /// handling for unresolved virtual/indirect calls.
    fn resolve_indirect_targets(&self, caller: &FuncId, call_site: usize) -> Option<Set<FuncId>>;
}

/// Builds the call graph from direct calls only, using Tarjan's algorithm
/// for SCCs. Indirect-call resolution is left to the oracle's caller to
/// override; a default implementation that treats every indirect call as
/// unresolved is
/// provided here since it's the only answer that's always safe.
pub struct DirectCallGraphOracle {
    edges: Map<FuncId, Set<FuncId>>,
    all: Vec<FuncId>,
}

impl DirectCallGraphOracle {
    pub fn new(program: &Program) -> Self {
        let mut edges: Map<FuncId, Set<FuncId>> = Map::new();
        let mut all = Vec::new();
        for (fid, f) in &program.functions {
            all.push(fid.clone());
            let mut callees = Set::new();
            for bb in f.body.values() {
                if let Terminal::CallDirect { callee, .. } = &bb.term {
                    callees.insert(callee.clone());
                }
            }
            edges.insert(fid.clone(), callees);
        }
        DirectCallGraphOracle { edges, all }
    }
}

impl CallGraphOracle for DirectCallGraphOracle {
    fn sccs_bottom_up(&self) -> Vec<Vec<FuncId>> {
        tarjan_scc(&self.all, &self.edges)
    }

    fn resolve_indirect_targets(&self, _caller: &FuncId, _call_site: usize) -> Option<Set<FuncId>> {
        None
    }
}

/// Tarjan's strongly-connected-components algorithm. Returns SCCs in
/// reverse-topological (bottom-up, callees-before-callers) order.
fn tarjan_scc(nodes: &[FuncId], edges: &Map<FuncId, Set<FuncId>>) -> Vec<Vec<FuncId>> {
    struct State {
        index: Map<FuncId, usize>,
        lowlink: Map<FuncId, usize>,
        on_stack: Set<FuncId>,
        stack: Vec<FuncId>,
        next_index: usize,
        sccs: Vec<Vec<FuncId>>,
    }

    fn strongconnect(v: &FuncId, edges: &Map<FuncId, Set<FuncId>>, st: &mut State) {
        st.index.insert(v.clone(), st.next_index);
        st.lowlink.insert(v.clone(), st.next_index);
        st.next_index += 1;
        st.stack.push(v.clone());
        st.on_stack.insert(v.clone());

        if let Some(successors) = edges.get(v) {
            for w in successors {
                if !st.index.contains_key(w) {
                    strongconnect(w, edges, st);
                    let w_low = st.lowlink[w];
                    let v_low = st.lowlink[v];
                    st.lowlink.insert(v.clone(), v_low.min(w_low));
                } else if st.on_stack.contains(w) {
                    let w_idx = st.index[w];
                    let v_low = st.lowlink[v];
                    st.lowlink.insert(v.clone(), v_low.min(w_idx));
                }
            }
        }

        if st.lowlink[v] == st.index[v] {
            let mut component = Vec::new();
            loop {
                let w = st.stack.pop().expect("scc stack non-empty while closing a component");
                st.on_stack.remove(&w);
                let done = w == *v;
                component.push(w);
                if done {
                    break;
                }
            }
            st.sccs.push(component);
        }
    }

    let mut st = State {
        index: Map::new(),
        lowlink: Map::new(),
        on_stack: Set::new(),
        stack: Vec::new(),
        next_index: 0,
        sccs: Vec::new(),
    };
    for v in nodes {
        if !st.index.contains_key(v) {
            strongconnect(v, edges, &mut st);
        }
    }
    st.sccs
}

/// What an external function implies about its arguments and return value.
#[derive(Clone, Debug, Deserialize)]
pub struct FunctionSignature {
    #[serde(default)]
    pub is_input_source: bool,
    #[serde(default)]
    pub propagates_args_to_return: bool,
    #[serde(default)]
    pub callback_arg_positions: Set<usize>,
}

impl FunctionSignature {
    pub fn return_dep(&self, arg_deps: &[DepInfo]) -> DepInfo {
        if self.is_input_source {
            return DepInfo::input_dep();
        }
        if self.propagates_args_to_return {
            let mut d = DepInfo::input_indep();
            for a in arg_deps {
                d.join(a);
            }
            return d;
        }
        DepInfo::input_indep()
    }

    pub fn is_callback_arg(&self, position: usize) -> bool {
        self.callback_arg_positions.contains(&position)
    }
}

/// Loaded once from a JSON config file at start-up (the `lib-config` knob);
/// after that it is a read-only map, matching the engine's single-threaded,
/// no-mid-run-reconfiguration resource model.
#[derive(Clone, Debug, Default)]
pub struct LibrarySignatureRegistry {
    signatures: Map<String, FunctionSignature>,
}

impl LibrarySignatureRegistry {
    pub fn empty() -> Self {
        LibrarySignatureRegistry { signatures: Map::new() }
    }

    /// Builds a registry holding exactly one signature, for tests that need
    /// a single library call to behave a particular way without a JSON
    /// fixture file.
    pub fn with_signature(name: impl Into<String>, signature: FunctionSignature) -> Self {
        LibrarySignatureRegistry { signatures: Map::from([(name.into(), signature)]) }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let signatures: Map<String, FunctionSignature> = serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(LibrarySignatureRegistry { signatures })
    }

    /// A missing signature is handled per the engine's error-handling
    /// design: the caller should fall back to a conservative `InputDep`
    /// rather than treat this as fatal.
    pub fn lookup(&self, name: &str) -> Option<&FunctionSignature> {
        self.signatures.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scc_of_a_direct_cycle_is_one_component() {
        let a = crate::ir::func_id("a");
        let b = crate::ir::func_id("b");
        let mut edges = Map::new();
        edges.insert(a.clone(), Set::from([b.clone()]));
        edges.insert(b.clone(), Set::from([a.clone()]));
        let sccs = tarjan_scc(&[a.clone(), b.clone()], &edges);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 2);
    }

    #[test]
    fn scc_bottom_up_orders_callee_before_caller() {
        let caller = crate::ir::func_id("caller");
        let callee = crate::ir::func_id("callee");
        let mut edges = Map::new();
        edges.insert(caller.clone(), Set::from([callee.clone()]));
        edges.insert(callee.clone(), Set::new());
        let sccs = tarjan_scc(&[caller.clone(), callee.clone()], &edges);
        let callee_pos = sccs.iter().position(|c| c.contains(&callee)).unwrap();
        let caller_pos = sccs.iter().position(|c| c.contains(&caller)).unwrap();
        assert!(callee_pos < caller_pos);
    }
}
