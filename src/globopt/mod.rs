//! Global optimizer
//!
//! A forward pass over the flow graph that numbers values, propagates copies and
//! constants, specializes operations to int32/float64/simd128, removes redundant
//! checks and hoists loop invariants into landing pads. Loops are visited twice: a
//! prepass computes what the loop body may change, then the real pass rewrites it.
//!
//! ```text
//! backward::analyze ─▶ OptContext::optimize_blocks ─▶ backward::dead_store ─▶ tail_dup
//!                       (prepass, opt_block, memop)
//! ```

pub mod config;
pub mod int_bounds;
pub mod range;
pub mod stats;
pub mod value_info;

mod array;
mod bailout;
mod block_data;
mod bound_check;
mod checks;
mod const_fold;
mod context;
mod conversions;
mod cse;
mod driver;
mod fields;
mod induction_variable;
mod instr_opt;
mod loops;
mod memop;
mod merge;
mod path_dependent;
mod tail_dup;
mod type_spec;

pub use config::GlobOptConfig;
pub use merge::merge_value_infos;
pub use stats::OptStats;
pub use tail_dup::tail_dup;

use crate::backward;
use crate::error::{Error, Result};
use crate::ir::Func;
use context::OptContext;
use tracing::{debug, info, warn};

/// Optimizer entry point holding the configuration for a series of functions
#[derive(Debug, Clone, Default)]
pub struct GlobOpt {
    config: GlobOptConfig,
}

impl GlobOpt {
    /// An optimizer running with `config`
    pub fn new(config: GlobOptConfig) -> Self {
        Self { config }
    }

    /// The configuration every function is optimized with
    pub fn config(&self) -> &GlobOptConfig {
        &self.config
    }

    /// Optimize one function in place
    pub fn optimize(&self, func: &mut Func) -> Result<OptStats> {
        optimize(func, &self.config)
    }

    /// Optimize one function, compiling it again with a heuristic switched off each
    /// time the optimizer asks for a rejit
    pub fn optimize_with_retry(&self, func: &mut Func) -> Result<OptStats> {
        optimize_with_retry(func, &self.config)
    }
}

/// Run the whole pipeline on `func`
pub fn optimize(func: &mut Func, config: &GlobOptConfig) -> Result<OptStats> {
    config.validate()?;
    info!(func = %func.name, blocks = func.blocks.len(), "optimizing");
    backward::analyze(func);

    let mut ctx = OptContext::new(func, config.clone());
    ctx.optimize_blocks()?;
    let mut stats = std::mem::take(&mut ctx.stats);
    drop(ctx);

    stats.dead_stores = backward::dead_store(func);
    if config.do_tail_dup {
        stats.tail_duplicated = tail_dup(func);
    }
    debug!(func = %func.name, instrs = func.instr_count(), "optimized");
    Ok(stats)
}

/// Run [`optimize`], restarting from the unoptimized function with the named
/// heuristic disabled whenever it fails with [`Error::Rejit`]
pub fn optimize_with_retry(func: &mut Func, config: &GlobOptConfig) -> Result<OptStats> {
    let original = func.clone();
    retry(config, |config| {
        *func = original.clone();
        optimize(func, config)
    })
}

fn retry<T>(config: &GlobOptConfig, mut attempt: impl FnMut(&GlobOptConfig) -> Result<T>) -> Result<T> {
    let mut config = config.clone();
    loop {
        match attempt(&config) {
            Err(Error::Rejit { reason }) => {
                if !config.disable(reason) {
                    return Err(Error::OperationAborted(format!(
                        "{} requested with the heuristic already disabled",
                        reason
                    )));
                }
                warn!(%reason, "rejit");
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejitReason;
    use crate::ir::{FuncBuilder, Opcode, Opnd, ValueType};

    #[test]
    fn test_retry_disables_heuristic_once() {
        let mut seen = Vec::new();
        let result = retry(&GlobOptConfig::default(), |config| {
            seen.push(config.do_lossy_int_type_spec);
            if config.do_lossy_int_type_spec {
                Err(Error::rejit(RejitReason::LossyIntTypeSpecDisabled))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(seen, vec![true, false]);
    }

    #[test]
    fn test_repeated_rejit_aborts() {
        let result: Result<()> = retry(&GlobOptConfig::default(), |_| {
            Err(Error::rejit(RejitReason::MemOpDisabled))
        });
        assert!(matches!(result, Err(Error::OperationAborted(_))));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut b = FuncBuilder::new("f");
        b.ret(Opnd::IntConst(0));
        let mut func = b.finish().unwrap();
        let config = GlobOptConfig {
            max_prepass_iterations: 0,
            ..GlobOptConfig::default()
        };
        assert!(matches!(optimize(&mut func, &config), Err(Error::Config(_))));
    }

    #[test]
    fn test_pipeline_folds_and_cleans_up() {
        let mut b = FuncBuilder::new("f");
        let x = b.param("x", ValueType::LIKELY_INT);
        let a = b.var("a");
        let c = b.var("c");
        b.binary(Opcode::Mul, a, Opnd::reg(x), Opnd::IntConst(3));
        b.binary(Opcode::Mul, c, Opnd::reg(x), Opnd::IntConst(3));
        b.ret(Opnd::reg(c));
        let mut func = b.finish().unwrap();
        let stats = GlobOpt::default().optimize_with_retry(&mut func).unwrap();
        assert_eq!(stats.cse, 1);
        assert!(stats.int_specialized >= 1);
        assert!(stats.instrs_visited > 0);
    }
}
