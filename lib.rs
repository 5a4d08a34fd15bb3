//! An inter-procedural, context-insensitive, flow-sensitive dataflow engine
//! that classifies every value, instruction, block and function of a typed
//! SSA program by how much it depends on program input.
//!
//! `ir` fixes the program shape the rest of the crate analyses; `dep` is
//! the dependency lattice and its per-value wrappers; `cfg` supplies
//! dominance, natural-loop and block-order facts; `oracles` are the
//! external contracts (alias, call graph, library signatures) the engine
//! consumes rather than computes; `analysis` is the engine itself, three
//! layers deep (block, function, module) plus the public query surface.

pub mod analysis;
pub mod cfg;
pub mod config;
pub mod dep;
pub mod error;
pub mod ir;
pub mod oracles;
