use std::env;

use optimization::analysis::module::analyze_program;
use optimization::analysis::result::AnalysisResult;
use optimization::config::AnalysisConfig;
use optimization::ir::Program;
use optimization::oracles::{DirectCallGraphOracle, LibrarySignatureRegistry};

fn main() {
    let args: Vec<String> = env::args().collect();
    let positional: Vec<&String> = args.iter().skip(1).filter(|a| !a.starts_with("--")).collect();
    if positional.is_empty() {
        eprintln!("Usage: {} <program.json> [--goto-unsafe] [--lib-config <path>]", args[0]);
        std::process::exit(1);
    }

    let program_path = positional[0];
    let config = AnalysisConfig::from_args();

    let program = read_program(program_path);

    let libs = match &config.lib_config {
        Some(path) => LibrarySignatureRegistry::load(path).unwrap_or_else(|e| {
            eprintln!("warning: could not load library config {}: {e}, falling back to no known signatures", path.display());
            LibrarySignatureRegistry::empty()
        }),
        None => LibrarySignatureRegistry::empty(),
    };

    let call_graph = DirectCallGraphOracle::new(&program);
    let module_result = analyze_program(&program, &call_graph, &libs, config.goto_unsafe);

    for entry in module_result.diagnostics.entries() {
        eprintln!("{entry}");
    }

    let view = AnalysisResult::new(&module_result);
    let counters = view.counters();
    println!("functions: {} input-dependent, {} input-independent", counters.input_dep_function, counters.input_indep_function);
    println!("blocks:    {} input-dependent, {} input-independent, {} unreachable", counters.input_dep_block, counters.input_indep_block, counters.unreachable_block);
    println!(
        "instrs:    {} input-dependent, {} input-independent, {} control-dep, {} data-dep, {} arg-dep, {} global-dep",
        counters.input_dep_instr,
        counters.input_indep_instr,
        counters.control_dep_instr,
        counters.data_dep_instr,
        counters.arg_dep_instr,
        counters.global_dep_instr,
    );

    for (fid, result) in &module_result.functions {
        println!("{}: {}", fid.0, if result.summary.is_input_dep_function { "input-dependent" } else { "input-independent" });
    }
}

fn read_program(path: &str) -> Program {
    let text = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("could not read program file {path}: {e}"));
    text.parse::<Program>().unwrap_or_else(|e| panic!("could not parse {path} as a program: {e}"))
}
