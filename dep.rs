//! The input-dependency lattice: `Unknown < InputIndep < ValueDep < ArgDep
//! < InputDep`, plus the per-value and per-field wrappers built on top of it.

use std::collections::BTreeSet as Set;

use crate::ir::{BbId, VarId};

/// An argument of some function, identified by position. Which function is
/// implied by context (a `DepInfo` only ever carries `ArgRef`s for the
/// function it describes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArgRef(pub usize);

/// A value this dependency traces back to, not yet resolved to a concrete
/// level: a global with no local store seen yet, or the still-unknown
/// return value of a call to an internal function at a given call site
/// (named by the block whose terminator makes the call). Both are
/// eliminated by substitution: the former at `finalize_globals`, the
/// latter once the callee's summary is known (module driver, §4.6).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueRef {
    Global(VarId),
    CallResult(BbId),
}

/// The dependency lattice. Variant order is the join order: `max` of two
/// levels is always the one later in this list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Dep {
    #[default]
    Unknown,
    InputIndep,
    ValueDep,
    ArgDep,
    InputDep,
}

impl Dep {
    pub fn join(self, other: Dep) -> Dep {
        self.max(other)
    }
}

/// A dependency level plus the argument and value sets that justify it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DepInfo {
    level: Dep,
    args: Set<ArgRef>,
    values: Set<ValueRef>,
}

impl DepInfo {
    pub fn new(level: Dep) -> Self {
        DepInfo { level, args: Set::new(), values: Set::new() }
    }

    pub fn input_indep() -> Self {
        DepInfo::new(Dep::InputIndep)
    }

    pub fn input_dep() -> Self {
        DepInfo::new(Dep::InputDep)
    }

    pub fn arg_dep(arg: ArgRef) -> Self {
        let mut args = Set::new();
        args.insert(arg);
        DepInfo { level: Dep::ArgDep, args, values: Set::new() }
    }

    pub fn value_dep(value: ValueRef) -> Self {
        let mut values = Set::new();
        values.insert(value);
        DepInfo { level: Dep::ValueDep, args: Set::new(), values }
    }

    pub fn level(&self) -> Dep {
        self.level
    }

    pub fn args(&self) -> &Set<ArgRef> {
        &self.args
    }

    pub fn values(&self) -> &Set<ValueRef> {
        &self.values
    }

    pub fn is_input_indep(&self) -> bool {
        self.level == Dep::InputIndep
    }

    pub fn is_input_arg_dep(&self) -> bool {
        self.level == Dep::ArgDep
    }

    pub fn is_input_dep(&self) -> bool {
        self.level == Dep::InputDep
    }

    /// Mirrors the original analyzer's nuance: a `DepInfo` counts as
    /// value-dependent either because its level says so, or because it
    /// carries a non-empty value set even at a lower nominal level.
    pub fn is_value_dep(&self) -> bool {
        self.level == Dep::ValueDep || !self.values.is_empty()
    }

    pub fn is_only_global_value_dep(&self) -> bool {
        self.is_value_dep()
            && self.args.is_empty()
            && self.level != Dep::InputDep
            && self.values.iter().all(|v| matches!(v, ValueRef::Global(_)))
    }

    pub fn set_level(&mut self, level: Dep) {
        self.level = level;
    }

    pub fn merge_level(&mut self, level: Dep) {
        self.level = self.level.join(level);
    }

    pub fn merge_args(&mut self, args: &Set<ArgRef>) {
        self.args.extend(args.iter().cloned());
    }

    /// Drops one `ArgRef` this `DepInfo` carries, without otherwise
    /// touching `level` or `values`. Used when substituting a callee's own
    /// argument reference with a caller's actual dependency at a call
    /// site: the stale `ArgRef` (meaningful only in the callee's own
    /// parameter numbering) must not survive into the caller's frame,
    /// where the same position number means a different parameter.
    pub fn remove_arg(&mut self, arg: &ArgRef) {
        self.args.remove(arg);
    }

    pub fn merge_values(&mut self, values: &Set<ValueRef>) {
        self.values.extend(values.iter().cloned());
    }

    /// Call once every stale `ArgRef` this `DepInfo` carried has been
    /// removed and replaced by its caller's actual dependency (argument
    /// substitution at a call site): `level == ArgDep` only means anything
    /// while `args` is non-empty, so if the last one is gone and nothing
    /// else raised the level past it, it settles back to `InputIndep`.
    pub fn settle_arg_level(&mut self) {
        if self.level == Dep::ArgDep && self.args.is_empty() {
            self.level = Dep::InputIndep;
        }
    }

    /// The join used when two control paths, or a block and its
    /// predecessor's out-state, are combined.
    pub fn join(&mut self, other: &DepInfo) {
        self.merge_level(other.level);
        self.merge_args(&other.args);
        self.merge_values(&other.values);
    }

    pub fn joined(mut self, other: &DepInfo) -> DepInfo {
        self.join(other);
        self
    }
}

/// A `DepInfo` together with, for aggregate types (structs, arrays,
/// pointers), the same information tracked per field/element.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueDepInfo {
    whole: DepInfo,
    fields: Vec<ValueDepInfo>,
}

impl ValueDepInfo {
    pub fn scalar(dep: DepInfo) -> Self {
        ValueDepInfo { whole: dep, fields: Vec::new() }
    }

    /// A freshly allocated aggregate with `num_fields` tracked slots, all
    /// starting input-independent. `num_fields` is `0` for a heap pointer
    /// whose size isn't known until a constant-index GEP touches it.
    pub fn aggregate(num_fields: usize) -> Self {
        ValueDepInfo {
            whole: DepInfo::input_indep(),
            fields: vec![ValueDepInfo::scalar(DepInfo::input_indep()); num_fields],
        }
    }

    pub fn whole(&self) -> &DepInfo {
        &self.whole
    }

    pub fn fields(&self) -> &[ValueDepInfo] {
        &self.fields
    }

    /// Dependency seen through a constant-index access. A non-constant
    /// index is conservative: the aggregate's own level already reflects
    /// every element, since writes with a non-constant index are folded
    /// into all of them (see [`ValueDepInfo::update_at`]).
    pub fn at_const_index(&mut self, idx: usize) -> &ValueDepInfo {
        if self.fields.len() <= idx {
            self.fields.resize(idx + 1, ValueDepInfo::scalar(self.whole.clone()));
        }
        &self.fields[idx]
    }

    pub fn at_non_const_index(&self) -> &ValueDepInfo {
        self
    }

    /// Overwrite this value wholesale with another one's info (e.g. on a
    /// plain assignment/copy).
    pub fn update(&mut self, other: &ValueDepInfo) {
        self.whole = other.whole.clone();
        if other.fields.is_empty() {
            self.update_aggregate_level(other.whole.clone());
        } else {
            self.fields = other.fields.clone();
        }
    }

    fn update_aggregate_level(&mut self, level: DepInfo) {
        self.whole = level.clone();
        for f in &mut self.fields {
            f.update_aggregate_level(level.clone());
        }
    }

    /// A store through a GEP: `idx = None` means the index wasn't a
    /// compile-time constant.
    ///
    /// Resolved open question: on a constant index, grow the field vector
    /// lazily and write only that slot, then widen the aggregate level by
    /// the written dependency. On a non-constant index, join the written
    /// dependency into every currently tracked field *and* into the
    /// aggregate level, without growing the vector (we don't know which
    /// slot to grow).
    pub fn update_at(&mut self, idx: Option<usize>, written: &ValueDepInfo) {
        match idx {
            Some(idx) => {
                if self.fields.len() <= idx {
                    self.fields.resize(idx + 1, ValueDepInfo::scalar(DepInfo::input_indep()));
                }
                self.fields[idx] = written.clone();
                self.whole.merge_level(written.whole.level());
                self.whole.merge_args(written.whole.args());
                self.whole.merge_values(written.whole.values());
            }
            None => {
                for f in &mut self.fields {
                    f.merge(written);
                }
                self.whole.merge_level(written.whole.level());
                self.whole.merge_args(written.whole.args());
                self.whole.merge_values(written.whole.values());
            }
        }
    }

    /// Joins `control_dep` into this value's own level and every field's,
    /// without touching how many fields are tracked — used when a value
    /// crosses an edge out of a non-deterministic block: a control-dependent
    /// block's live-out values are at least as dependent as the branch that
    /// made the block conditional.
    pub fn widen(&mut self, control_dep: &DepInfo) {
        self.whole.join(control_dep);
        for f in &mut self.fields {
            f.widen(control_dep);
        }
    }

    /// Join (as opposed to overwrite) another `ValueDepInfo` into this one,
    /// used when two control-flow paths' values are combined.
    pub fn merge(&mut self, other: &ValueDepInfo) {
        self.whole.join(&other.whole);
        let n = self.fields.len().min(other.fields.len());
        self.fields.truncate(n);
        for (i, f) in self.fields.iter_mut().enumerate() {
            f.merge(&other.fields[i]);
        }
    }

    pub fn merged(mut self, other: &ValueDepInfo) -> ValueDepInfo {
        self.merge(other);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_monotone() {
        let mut a = DepInfo::input_indep();
        let before = a.level();
        a.join(&DepInfo::input_dep());
        assert!(a.level() >= before);
        assert_eq!(a.level(), Dep::InputDep);
    }

    #[test]
    fn join_is_idempotent() {
        let mut a = DepInfo::arg_dep(ArgRef(0));
        let snapshot = a.clone();
        a.join(&snapshot);
        assert_eq!(a, snapshot);
    }

    #[test]
    fn value_dep_counts_via_nonempty_values_even_at_lower_level() {
        let mut info = DepInfo::input_indep();
        info.merge_values(&Set::from([ValueRef::Global(crate::ir::var_id(
            "g",
            None,
            crate::ir::int_ty(),
        ))]));
        assert!(info.is_value_dep());
    }

    #[test]
    fn constant_index_grows_lazily() {
        let mut v = ValueDepInfo::aggregate(0);
        assert!(v.fields().is_empty());
        v.update_at(Some(2), &ValueDepInfo::scalar(DepInfo::input_dep()));
        assert_eq!(v.fields().len(), 3);
        assert_eq!(v.fields()[2].whole().level(), Dep::InputDep);
        assert_eq!(v.fields()[0].whole().level(), Dep::InputIndep);
        assert_eq!(v.whole().level(), Dep::InputDep);
    }

    #[test]
    fn non_constant_index_joins_into_every_tracked_field() {
        let mut v = ValueDepInfo::aggregate(2);
        v.update_at(None, &ValueDepInfo::scalar(DepInfo::input_dep()));
        assert_eq!(v.fields().len(), 2);
        for f in v.fields() {
            assert_eq!(f.whole().level(), Dep::InputDep);
        }
        assert_eq!(v.whole().level(), Dep::InputDep);
    }
}
