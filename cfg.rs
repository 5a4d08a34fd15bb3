//! Control-flow graph, dominance, natural loops, and the traversal order the
//! block/function analysers consume.
//!
//! Generalizes a plain `Cfg` (successor/predecessor maps plus a crude
//! DFS-based `loop_headers` search) into something that also has a real
//! dominator tree, since telling deterministic from non-deterministic
//! blocks needs post-dominance, not just "does a path lead back here".

use std::collections::{BTreeMap as Map, BTreeSet as Set, VecDeque};

use ascent::ascent;

use crate::ir::{BasicBlock, BbId, Function, Instruction, Terminal};

#[derive(Clone, Debug)]
pub struct Cfg {
    pub entry: BbId,
    pub exit: BbId,
    succ_edges: Map<BbId, Set<BbId>>,
    pred_edges: Map<BbId, Set<BbId>>,
    all_blocks: Set<BbId>,
}

impl Cfg {
    pub fn new(function: &Function) -> Self {
        fn insert_edge(map: &mut Map<BbId, Set<BbId>>, from: &BbId, to: &BbId) {
            map.entry(from.clone()).or_default().insert(to.clone());
        }

        let mut succ_edges: Map<BbId, Set<BbId>> = Map::new();
        let mut pred_edges: Map<BbId, Set<BbId>> = Map::new();
        let mut all_blocks = Set::new();
        let mut exit = function.body.keys().next().cloned().unwrap_or_else(|| crate::ir::bb_id("exit"));

        for bbid in function.body.keys() {
            all_blocks.insert(bbid.clone());
            succ_edges.entry(bbid.clone()).or_default();
            pred_edges.entry(bbid.clone()).or_default();
        }

        for (bbid, bb) in &function.body {
            match &bb.term {
                Terminal::Branch { tt, ff, .. } => {
                    insert_edge(&mut succ_edges, bbid, tt);
                    insert_edge(&mut pred_edges, tt, bbid);
                    insert_edge(&mut succ_edges, bbid, ff);
                    insert_edge(&mut pred_edges, ff, bbid);
                }
                Terminal::CallDirect { next_bb, .. }
                | Terminal::CallIndirect { next_bb, .. } => {
                    insert_edge(&mut succ_edges, bbid, next_bb);
                    insert_edge(&mut pred_edges, next_bb, bbid);
                }
                Terminal::Jump(next_bb) => {
                    insert_edge(&mut succ_edges, bbid, next_bb);
                    insert_edge(&mut pred_edges, next_bb, bbid);
                }
                Terminal::Ret(_) => {
                    exit = bbid.clone();
                }
            }
        }

        let entry = function
            .body
            .keys()
            .find(|b| b.0.as_ref() == "entry")
            .cloned()
            .or_else(|| function.body.keys().next().cloned())
            .unwrap_or_else(|| crate::ir::bb_id("entry"));

        Cfg { entry, exit, succ_edges, pred_edges, all_blocks }
    }

    pub fn succ(&self, bb: &BbId) -> impl Iterator<Item = &BbId> {
        self.succ_edges.get(bb).into_iter().flatten()
    }

    pub fn pred(&self, bb: &BbId) -> impl Iterator<Item = &BbId> {
        self.pred_edges.get(bb).into_iter().flatten()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BbId> {
        self.all_blocks.iter()
    }

    /// Every block reachable from `entry`, computed as a tiny fixpoint
    /// relation rather than a hand-written worklist.
    pub fn reachable_from_entry(&self) -> Set<BbId> {
        ascent! {
            struct ReachProg;
            relation edge(BbId, BbId);
            relation start(BbId);
            relation reachable(BbId);

            reachable(b.clone()) <-- start(b);
            reachable(b.clone()) <-- reachable(a), edge(a, b);
        }

        let mut prog = ReachProg::default();
        prog.start = vec![(self.entry.clone(),)];
        for (from, tos) in &self.succ_edges {
            for to in tos {
                prog.edge.push((from.clone(), to.clone()));
            }
        }
        prog.run();
        prog.reachable.into_iter().map(|(b,)| b).collect()
    }

    pub fn unreachable_blocks(&self) -> Set<BbId> {
        let reachable = self.reachable_from_entry();
        self.all_blocks.difference(&reachable).cloned().collect()
    }
}

/// Dominator and post-dominator trees, computed with the standard
/// iterative data-flow formulation (Cooper, Harvey, Kennedy).
#[derive(Clone, Debug)]
pub struct Dominators {
    idom: Map<BbId, BbId>,
    post_idom: Map<BbId, BbId>,
}

impl Dominators {
    pub fn compute(cfg: &Cfg) -> Self {
        let idom = compute_idom(cfg.entry.clone(), cfg.blocks().cloned().collect(), |b| {
            cfg.pred(b).cloned().collect()
        });
        let post_idom = compute_idom(cfg.exit.clone(), cfg.blocks().cloned().collect(), |b| {
            cfg.succ(b).cloned().collect()
        });
        Dominators { idom, post_idom }
    }

    pub fn dominates(&self, a: &BbId, b: &BbId) -> bool {
        dominates_via(&self.idom, a, b)
    }

    pub fn post_dominates(&self, a: &BbId, b: &BbId) -> bool {
        dominates_via(&self.post_idom, a, b)
    }

    pub fn idom(&self, b: &BbId) -> Option<&BbId> {
        self.idom.get(b)
    }
}

fn dominates_via(idom: &Map<BbId, BbId>, a: &BbId, b: &BbId) -> bool {
    if a == b {
        return true;
    }
    let mut cur = b.clone();
    while let Some(next) = idom.get(&cur) {
        if next == a {
            return true;
        }
        if *next == cur {
            break;
        }
        cur = next.clone();
    }
    false
}

fn compute_idom(
    root: BbId,
    all: Set<BbId>,
    preds_of: impl Fn(&BbId) -> Vec<BbId>,
) -> Map<BbId, BbId> {
    // A stable total order over all blocks, used in place of a true reverse
    // postorder: `preds_of` is the only relation we're given (predecessors
    // in forward mode, successors in backward/post-dominator mode), so we
    // just iterate this fixed order to a fixpoint instead of computing a
    // DFS order along a relation we don't have.
    let mut rpo: Vec<BbId> = all.iter().cloned().collect();
    rpo.sort();
    let index: Map<BbId, usize> = rpo.iter().enumerate().map(|(i, b)| (b.clone(), i)).collect();

    let mut idom: Map<BbId, BbId> = Map::new();
    idom.insert(root.clone(), root.clone());

    let mut changed = true;
    while changed {
        changed = false;
        for b in &rpo {
            if *b == root {
                continue;
            }
            let preds: Vec<BbId> = preds_of(b).into_iter().filter(|p| idom.contains_key(p)).collect();
            let Some(first) = preds.first().cloned() else { continue };
            let mut new_idom = first;
            for p in preds.iter().skip(1) {
                new_idom = intersect(&idom, &index, &new_idom, p);
            }
            if idom.get(b) != Some(&new_idom) {
                idom.insert(b.clone(), new_idom);
                changed = true;
            }
        }
    }
    idom
}

fn intersect(idom: &Map<BbId, BbId>, index: &Map<BbId, usize>, a: &BbId, b: &BbId) -> BbId {
    let mut a = a.clone();
    let mut b = b.clone();
    while a != b {
        while index[&a] > index[&b] {
            a = idom.get(&a).cloned().unwrap_or_else(|| a.clone());
        }
        while index[&b] > index[&a] {
            b = idom.get(&b).cloned().unwrap_or_else(|| b.clone());
        }
    }
    a
}

#[derive(Clone, Debug)]
pub struct NaturalLoop {
    pub header: BbId,
    pub body: Set<BbId>,
    pub latches: Set<BbId>,
}

#[derive(Clone, Debug, Default)]
pub struct NaturalLoops {
    by_header: Map<BbId, NaturalLoop>,
}

impl NaturalLoops {
    pub fn compute(cfg: &Cfg, doms: &Dominators) -> Self {
        let mut by_header: Map<BbId, NaturalLoop> = Map::new();
        for bb in cfg.blocks() {
            for succ in cfg.succ(bb) {
                if doms.dominates(succ, bb) {
                    // back edge bb -> succ, succ is the loop header
                    let entry = by_header.entry(succ.clone()).or_insert_with(|| NaturalLoop {
                        header: succ.clone(),
                        body: Set::new(),
                        latches: Set::new(),
                    });
                    entry.latches.insert(bb.clone());
                    entry.body.insert(succ.clone());
                    entry.body.insert(bb.clone());
                }
            }
        }

        // grow each loop body backward from its latches to the header
        for natural_loop in by_header.values_mut() {
            let mut worklist: Vec<BbId> = natural_loop.latches.iter().cloned().collect();
            while let Some(b) = worklist.pop() {
                for pred in cfg.pred(&b) {
                    if natural_loop.body.insert(pred.clone()) {
                        worklist.push(pred.clone());
                    }
                }
            }
        }

        NaturalLoops { by_header }
    }

    pub fn header_of(&self, bb: &BbId) -> Option<&BbId> {
        self.by_header.values().find(|l| l.body.contains(bb)).map(|l| &l.header)
    }

    pub fn loop_for(&self, header: &BbId) -> Option<&NaturalLoop> {
        self.by_header.get(header)
    }

    pub fn headers(&self) -> impl Iterator<Item = &BbId> {
        self.by_header.keys()
    }

    pub fn is_header(&self, bb: &BbId) -> bool {
        self.by_header.contains_key(bb)
    }
}

/// A single planned unit of work for the function analyser: either a plain
/// block, or a loop to be analysed as one unit (header plus body) before
/// continuing past it.
#[derive(Clone, Debug)]
pub enum PlanUnit {
    Block(BbId),
    Loop(NaturalLoop),
}

/// Produces the order the function analyser walks blocks/loops in, per the
/// CFG traversal planner contract: no non-loop back edge is ever followed,
/// a loop's header is its only entry point, and blocks unreachable from
/// entry are reported separately rather than silently skipped.
pub struct CfgPlanner<'a> {
    cfg: &'a Cfg,
    loops: &'a NaturalLoops,
}

impl<'a> CfgPlanner<'a> {
    pub fn new(cfg: &'a Cfg, loops: &'a NaturalLoops) -> Self {
        CfgPlanner { cfg, loops }
    }

    /// CFG-mode planning: a topological walk over the blocks/loop-units
    /// reachable from entry.
    pub fn plan(&self) -> (Vec<PlanUnit>, Set<BbId>) {
        let reachable = self.cfg.reachable_from_entry();
        let unreachable = self.cfg.unreachable_blocks();

        let mut visited = Set::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(self.cfg.entry.clone());

        while let Some(bb) = queue.pop_front() {
            if !reachable.contains(&bb) || visited.contains(&bb) {
                continue;
            }
            if let Some(header) = self.loops.headers().find(|h| **h == bb) {
                let natural_loop = self.loops.loop_for(header).expect("header came from loops");
                for b in &natural_loop.body {
                    visited.insert(b.clone());
                }
                order.push(PlanUnit::Loop(natural_loop.clone()));
                for exit_succ in natural_loop
                    .body
                    .iter()
                    .flat_map(|b| self.cfg.succ(b))
                    .filter(|s| !natural_loop.body.contains(*s))
                {
                    queue.push_back(exit_succ.clone());
                }
                continue;
            }
            visited.insert(bb.clone());
            order.push(PlanUnit::Block(bb.clone()));
            for succ in self.cfg.succ(&bb) {
                if !visited.contains(succ) {
                    queue.push_back(succ.clone());
                }
            }
        }

        (order, unreachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;
    use std::collections::BTreeMap as Map;

    fn straight_line_function() -> Function {
        let mut body = Map::new();
        body.insert(bb_id("entry"), BasicBlock { insts: vec![], term: Terminal::Jump(bb_id("exit")) });
        body.insert(bb_id("exit"), BasicBlock { insts: vec![], term: Terminal::Ret(None) });
        Function { id: func_id("f"), params: vec![], ret_ty: None, body }
    }

    #[test]
    fn reachable_from_entry_finds_all_blocks_in_a_straight_line() {
        let f = straight_line_function();
        let cfg = Cfg::new(&f);
        let reachable = cfg.reachable_from_entry();
        assert!(reachable.contains(&bb_id("entry")));
        assert!(reachable.contains(&bb_id("exit")));
    }

    #[test]
    fn unreachable_block_is_flagged() {
        let mut f = straight_line_function();
        f.body.insert(bb_id("dead"), BasicBlock { insts: vec![], term: Terminal::Ret(None) });
        let cfg = Cfg::new(&f);
        assert!(cfg.unreachable_blocks().contains(&bb_id("dead")));
    }

    #[test]
    fn simple_loop_is_detected() {
        let mut body = Map::new();
        body.insert(
            bb_id("entry"),
            BasicBlock { insts: vec![], term: Terminal::Jump(bb_id("header")) },
        );
        body.insert(
            bb_id("header"),
            BasicBlock {
                insts: vec![],
                term: Terminal::Branch {
                    cond: Operand::CInt(1),
                    tt: bb_id("body"),
                    ff: bb_id("exit"),
                },
            },
        );
        body.insert(bb_id("body"), BasicBlock { insts: vec![], term: Terminal::Jump(bb_id("header")) });
        body.insert(bb_id("exit"), BasicBlock { insts: vec![], term: Terminal::Ret(None) });
        let f = Function { id: func_id("f"), params: vec![], ret_ty: None, body };
        let cfg = Cfg::new(&f);
        let doms = Dominators::compute(&cfg);
        let loops = NaturalLoops::compute(&cfg, &doms);
        assert!(loops.is_header(&bb_id("header")));
        let l = loops.loop_for(&bb_id("header")).unwrap();
        assert!(l.body.contains(&bb_id("body")));
    }
}
