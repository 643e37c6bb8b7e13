//! Prelude module for convenient imports
//!
//! ```no_run
//! use globopt::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let mut func = Func::from_json(&std::fs::read_to_string("f.json")?)?;
//!     let stats = optimize(&mut func, &GlobOptConfig::default())?;
//!     println!("{}", stats);
//!     Ok(())
//! }
//! ```

// Optimizer
pub use crate::globopt::{optimize, optimize_with_retry, GlobOpt, GlobOptConfig, OptStats};

// Error handling
pub use crate::error::{Error, RejitReason, Result};

// IR
pub use crate::ir::{
    BailOutKind, BasicBlock, BlockId, Func, FuncBuilder, Instr, Opcode, Opnd, SymId, ValueType,
};

// Version constant
pub use crate::VERSION;
