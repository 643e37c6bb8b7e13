//! Shared test helpers for integration tests

use globopt::ir::{BlockId, Func, Opcode};
use globopt::{scenarios, GlobOptConfig, OptStats};

/// Build a built-in scenario and run the whole pipeline on it
pub fn optimized(name: &str) -> (Func, OptStats) {
    optimized_with(name, &GlobOptConfig::default())
}

pub fn optimized_with(name: &str, config: &GlobOptConfig) -> (Func, OptStats) {
    let scenario = scenarios::find(name).unwrap_or_else(|| panic!("no scenario '{}'", name));
    let mut func = scenario.build().unwrap();
    let stats = globopt::optimize_with_retry(&mut func, config).unwrap();
    (func, stats)
}

/// Instructions with `opcode` in the given blocks
pub fn count_in(func: &Func, blocks: &[BlockId], opcode: Opcode) -> usize {
    blocks
        .iter()
        .filter(|&&b| !func.block(b).is_dead)
        .flat_map(|&b| func.block(b).instrs.iter())
        .filter(|i| i.opcode == opcode)
        .count()
}

/// Instructions with `opcode` anywhere in the function
#[allow(dead_code)]
pub fn count(func: &Func, opcode: Opcode) -> usize {
    let all: Vec<BlockId> = func.live_blocks().collect();
    count_in(func, &all, opcode)
}
