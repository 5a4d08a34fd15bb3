//! The engine's error handling design: one fatal error, plus a side channel
//! for the categories the engine is required to recover from silently
//! (missing library signature, unresolved indirect call, unreachable-block
//! query) rather than fail on.

use derive_more::Display;

use crate::ir::BbId;

#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum AnalysisError {
    /// A block's predecessor set could not be reconciled with the planner's
    /// traversal order (a non-loop back edge, or a join point reached from
    /// a predecessor the planner never visited). Fatal unless the engine is
    /// run in `goto-unsafe` mode, in which case it is downgraded to a
    /// [`Diagnostic`] and the block is conservatively marked input-dependent.
    #[display(fmt = "irregular control flow: block {block} reached from unplanned predecessor {predecessor}")]
    IrregularCfg { block: BbId, predecessor: BbId },
}

impl std::error::Error for AnalysisError {}

/// Something the engine approximated conservatively instead of failing on.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum Diagnostic {
    #[display(fmt = "no library signature for `{name}`, assumed input-dependent")]
    MissingLibrarySignature { name: String },
    #[display(fmt = "could not resolve indirect call target at {caller}, assumed input-dependent")]
    UnresolvedIndirectCall { caller: BbId },
    #[display(fmt = "queried reachability of unreachable block {block}")]
    UnreachableBlockQueried { block: BbId },
    #[display(fmt = "recovered from irregular control flow at {block} via goto-unsafe")]
    RecoveredIrregularCfg { block: BbId },
}

/// Accumulates diagnostics produced over the course of one module's
/// analysis, plus the separate counter the engine's error design requires
/// for unreachable-block queries (spec'd as "a separate counter", not just
/// another diagnostic entry that could get lost among the rest).
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    unreachable_block_queries: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, d: Diagnostic) {
        if matches!(d, Diagnostic::UnreachableBlockQueried { .. }) {
            self.unreachable_block_queries += 1;
        }
        self.entries.push(d);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn unreachable_block_query_count(&self) -> usize {
        self.unreachable_block_queries
    }
}
