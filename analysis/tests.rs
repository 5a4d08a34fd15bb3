//! End-to-end scenarios run through the whole module driver
//! (`module::analyze_program`), one per documented engine behavior: an
//! argument-dependent return, a control-dependent store merged back through
//! a `Phi`, a loop-carried dependency collapsing to the loop condition's
//! argument, an out-argument pointer's dependency crossing a call, a
//! self-recursive function's summary converging under the module's chaotic
//! iteration, and an unreachable block's store never leaking into the
//! function's summary.

use std::collections::BTreeMap as Map;

use crate::analysis::module::analyze_program;
use crate::analysis::result::{AnalysisResult, Tag};
use crate::analysis::InstrRef;
use crate::dep::ArgRef;
use crate::ir::*;
use crate::oracles::{DirectCallGraphOracle, FunctionSignature, LibrarySignatureRegistry};

fn program_of(functions: Vec<Function>) -> Program {
    let mut map = Map::new();
    for f in functions {
        map.insert(f.id.clone(), f);
    }
    Program { functions: map, ..Default::default() }
}

#[test]
fn s1_return_of_a_bare_argument_is_argument_dependent() {
    // f(x) { return x; }
    // `f` has no caller in this single-function program, so it is the
    // program entry: its formal `x` is finalized to `InputDep` and `f`
    // itself is marked an input-dep function.
    let x = var_id("x", Some(func_id("f")), int_ty());
    let mut body = Map::new();
    body.insert(bb_id("entry"), BasicBlock { insts: vec![], term: Terminal::Ret(Some(Operand::Var(x.clone()))) });
    let f = Function { id: func_id("f"), params: vec![x], ret_ty: Some(int_ty()), body };
    let program = program_of(vec![f]);

    let call_graph = DirectCallGraphOracle::new(&program);
    let libs = LibrarySignatureRegistry::empty();
    let module_result = analyze_program(&program, &call_graph, &libs, false);

    assert!(module_result.summary(&func_id("f")).unwrap().return_dep.is_input_dep());
    assert!(module_result.summary(&func_id("f")).unwrap().is_input_dep_function);
}

#[test]
fn s2_branch_on_an_input_value_makes_both_arms_input_dependent() {
    // f() { cond = input(); if (cond) y = 1; else y = 2; return y; }
    // `input` is registered as a library input source, so `cond` is
    // InputDep; both the `then` and `else` stores are dominated by that
    // branch and not yet merged back, so each arm's constant is widened to
    // InputDep before the `Phi` at the merge block joins them.
    let f_id = func_id("f");
    let cond = var_id("cond", Some(f_id.clone()), int_ty());
    let y1 = var_id("y1", Some(f_id.clone()), int_ty());
    let y2 = var_id("y2", Some(f_id.clone()), int_ty());
    let y = var_id("y", Some(f_id.clone()), int_ty());

    let mut body = Map::new();
    body.insert(
        bb_id("entry"),
        BasicBlock {
            insts: vec![Instruction::CallExt { lhs: Some(cond.clone()), ext_callee: "input".into(), args: vec![] }],
            term: Terminal::Branch { cond: Operand::Var(cond.clone()), tt: bb_id("then"), ff: bb_id("els") },
        },
    );
    body.insert(
        bb_id("then"),
        BasicBlock {
            insts: vec![Instruction::Copy { lhs: y1.clone(), op: Operand::CInt(1) }],
            term: Terminal::Jump(bb_id("merge")),
        },
    );
    body.insert(
        bb_id("els"),
        BasicBlock {
            insts: vec![Instruction::Copy { lhs: y2.clone(), op: Operand::CInt(2) }],
            term: Terminal::Jump(bb_id("merge")),
        },
    );
    body.insert(
        bb_id("merge"),
        BasicBlock {
            insts: vec![Instruction::Phi {
                lhs: y.clone(),
                args: Map::from([(bb_id("then"), Operand::Var(y1.clone())), (bb_id("els"), Operand::Var(y2.clone()))]),
            }],
            term: Terminal::Ret(Some(Operand::Var(y.clone()))),
        },
    );
    let f = Function { id: f_id.clone(), params: vec![], ret_ty: Some(int_ty()), body };
    let program = program_of(vec![f]);

    let call_graph = DirectCallGraphOracle::new(&program);
    let libs = LibrarySignatureRegistry::with_signature(
        "input",
        FunctionSignature { is_input_source: true, propagates_args_to_return: false, callback_arg_positions: Default::default() },
    );
    let module_result = analyze_program(&program, &call_graph, &libs, false);
    let view = AnalysisResult::new(&module_result);

    let then_store = InstrRef::new(f_id.clone(), bb_id("then"), 0);
    assert!(view.is_input_dependent(&then_store));
    assert!(view.is_control_dependent(&then_store));
    assert!(view.tags_for(&then_store).contains(&Tag::ControlDepInstr));

    let phi = InstrRef::new(f_id.clone(), bb_id("merge"), 0);
    assert!(view.is_input_dependent(&phi));
    assert!(module_result.summary(&f_id).unwrap().return_dep.is_input_dep());
}

#[test]
fn s3_loop_carried_counter_collapses_to_the_bound_argument() {
    // f(n) { i = 0; while (i < n) { i = i + 1; } return i; }
    let f_id = func_id("f");
    let n = var_id("n", Some(f_id.clone()), int_ty());
    let i = var_id("i", Some(f_id.clone()), int_ty());
    let cond = var_id("cond", Some(f_id.clone()), int_ty());

    let mut body = Map::new();
    body.insert(
        bb_id("entry"),
        BasicBlock {
            insts: vec![Instruction::Copy { lhs: i.clone(), op: Operand::CInt(0) }],
            term: Terminal::Jump(bb_id("header")),
        },
    );
    body.insert(
        bb_id("header"),
        BasicBlock {
            insts: vec![Instruction::Cmp { lhs: cond.clone(), rop: RelOp::Lt, op1: Operand::Var(i.clone()), op2: Operand::Var(n.clone()) }],
            term: Terminal::Branch { cond: Operand::Var(cond.clone()), tt: bb_id("body"), ff: bb_id("exit") },
        },
    );
    body.insert(
        bb_id("body"),
        BasicBlock {
            insts: vec![Instruction::Arith { lhs: i.clone(), aop: ArithOp::Add, op1: Operand::Var(i.clone()), op2: Operand::CInt(1) }],
            term: Terminal::Jump(bb_id("header")),
        },
    );
    body.insert(bb_id("exit"), BasicBlock { insts: vec![], term: Terminal::Ret(Some(Operand::Var(i.clone()))) });

    let f = Function { id: f_id.clone(), params: vec![n], ret_ty: Some(int_ty()), body };
    let program = program_of(vec![f]);

    let call_graph = DirectCallGraphOracle::new(&program);
    let libs = LibrarySignatureRegistry::empty();
    let module_result = analyze_program(&program, &call_graph, &libs, false);

    let return_dep = &module_result.summary(&f_id).unwrap().return_dep;
    assert!(return_dep.is_input_arg_dep() || return_dep.is_input_dep());
    assert!(return_dep.args().contains(&ArgRef(0)) || return_dep.is_input_dep());
}

#[test]
fn s4_out_argument_pointer_carries_the_actual_argument_back_to_the_caller() {
    // callee(ptr, x) { *ptr = x; }
    // caller(a) { yp = &y; callee(yp, a); }
    let callee_id = func_id("callee");
    let ptr = var_id("ptr", Some(callee_id.clone()), pointer_ty(int_ty()));
    let x = var_id("x", Some(callee_id.clone()), int_ty());
    let mut callee_body = Map::new();
    callee_body.insert(
        bb_id("entry"),
        BasicBlock { insts: vec![Instruction::Store { dst: ptr.clone(), op: Operand::Var(x.clone()) }], term: Terminal::Ret(None) },
    );
    let callee = Function { id: callee_id.clone(), params: vec![ptr, x], ret_ty: None, body: callee_body };

    let caller_id = func_id("caller");
    let a = var_id("a", Some(caller_id.clone()), int_ty());
    let y = var_id("y", Some(caller_id.clone()), int_ty());
    let yp = var_id("yp", Some(caller_id.clone()), pointer_ty(int_ty()));
    let mut caller_body = Map::new();
    caller_body.insert(
        bb_id("entry"),
        BasicBlock {
            insts: vec![Instruction::AddrOf { lhs: yp.clone(), op: y.clone() }],
            term: Terminal::CallDirect {
                lhs: None,
                callee: callee_id.clone(),
                args: vec![Operand::Var(yp.clone()), Operand::Var(a.clone())],
                next_bb: bb_id("exit"),
            },
        },
    );
    caller_body.insert(bb_id("exit"), BasicBlock { insts: vec![], term: Terminal::Ret(None) });
    let caller = Function { id: caller_id.clone(), params: vec![a], ret_ty: None, body: caller_body };

    let program = program_of(vec![callee, caller]);
    let call_graph = DirectCallGraphOracle::new(&program);
    let libs = LibrarySignatureRegistry::empty();
    let module_result = analyze_program(&program, &call_graph, &libs, false);

    let caller_result = &module_result.functions[&caller_id];
    let yp_dep = caller_result.block_states[&bb_id("entry")].value_deps.get(&yp).expect("yp tracked").whole().clone();
    assert!(yp_dep.is_input_arg_dep());
    assert!(yp_dep.args().contains(&ArgRef(0)));
}

#[test]
fn s5_self_recursive_return_converges_to_input_dependent() {
    // f(n) { if (n <= 0) return 0; t = f(n - 1); return t + n; }
    // `f` only ever calls itself, so it has no external caller either: it
    // is the program entry, and its own recursive self-call doesn't count
    // as one. Its formal `n` is finalized to `InputDep` after the chaotic
    // iteration converges the recursive-call contribution to `ArgDep{0}`.
    let f_id = func_id("f");
    let n = var_id("n", Some(f_id.clone()), int_ty());
    let cond = var_id("cond", Some(f_id.clone()), int_ty());
    let n1 = var_id("n1", Some(f_id.clone()), int_ty());
    let t = var_id("t", Some(f_id.clone()), int_ty());
    let r = var_id("r", Some(f_id.clone()), int_ty());

    let mut body = Map::new();
    body.insert(
        bb_id("entry"),
        BasicBlock {
            insts: vec![Instruction::Cmp { lhs: cond.clone(), rop: RelOp::Lte, op1: Operand::Var(n.clone()), op2: Operand::CInt(0) }],
            term: Terminal::Branch { cond: Operand::Var(cond.clone()), tt: bb_id("base"), ff: bb_id("rec") },
        },
    );
    body.insert(bb_id("base"), BasicBlock { insts: vec![], term: Terminal::Ret(Some(Operand::CInt(0))) });
    body.insert(
        bb_id("rec"),
        BasicBlock {
            insts: vec![Instruction::Arith { lhs: n1.clone(), aop: ArithOp::Sub, op1: Operand::Var(n.clone()), op2: Operand::CInt(1) }],
            term: Terminal::CallDirect { lhs: Some(t.clone()), callee: f_id.clone(), args: vec![Operand::Var(n1.clone())], next_bb: bb_id("sum") },
        },
    );
    body.insert(
        bb_id("sum"),
        BasicBlock {
            insts: vec![Instruction::Arith { lhs: r.clone(), aop: ArithOp::Add, op1: Operand::Var(t.clone()), op2: Operand::Var(n.clone()) }],
            term: Terminal::Ret(Some(Operand::Var(r.clone()))),
        },
    );
    let f = Function { id: f_id.clone(), params: vec![n], ret_ty: Some(int_ty()), body };
    let program = program_of(vec![f]);

    let call_graph = DirectCallGraphOracle::new(&program);
    let libs = LibrarySignatureRegistry::empty();
    let module_result = analyze_program(&program, &call_graph, &libs, false);

    let return_dep = &module_result.summary(&f_id).unwrap().return_dep;
    assert!(return_dep.is_input_dep());
    assert!(module_result.summary(&f_id).unwrap().is_input_dep_function);
}

#[test]
fn s6_unreachable_blocks_store_never_reaches_the_function_summary() {
    // f() { entry: goto exit; exit: return; dead: *g = 1; return; }
    let f_id = func_id("f");
    let g = var_id("g", None, int_ty());
    let mut body = Map::new();
    body.insert(bb_id("entry"), BasicBlock { insts: vec![], term: Terminal::Jump(bb_id("exit")) });
    body.insert(bb_id("exit"), BasicBlock { insts: vec![], term: Terminal::Ret(None) });
    body.insert(
        bb_id("dead"),
        BasicBlock { insts: vec![Instruction::Store { dst: g.clone(), op: Operand::CInt(1) }], term: Terminal::Ret(None) },
    );
    let f = Function { id: f_id.clone(), params: vec![], ret_ty: None, body };
    let program = program_of(vec![f]);

    let call_graph = DirectCallGraphOracle::new(&program);
    let libs = LibrarySignatureRegistry::empty();
    let module_result = analyze_program(&program, &call_graph, &libs, false);
    let view = AnalysisResult::new(&module_result);

    assert!(!module_result.summary(&f_id).unwrap().modified_globals.contains_key(&g));

    let dead_store = InstrRef::new(f_id.clone(), bb_id("dead"), 0);
    assert!(!view.is_input_dependent(&dead_store));
    assert_eq!(view.tags_for(&dead_store), vec![Tag::Unreachable]);
}
