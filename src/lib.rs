//! Globopt: the global optimizer of a JavaScript JIT
//!
//! Globopt runs between the IR builder and the lowerer. It walks a function's flow
//! graph forward, numbering values and tracking what each sym is known to hold, and
//! uses that to remove redundant work, specialize dynamic operations to int32,
//! float64 or simd128 and hoist loop-invariant checks and loads into landing pads.
//! Every speculation is guarded by a bailout that returns to the interpreter.
//!
//! # Quick Start
//!
//! ```no_run
//! use globopt::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let scenario = globopt::scenarios::find("sum").expect("built-in scenario");
//!     let mut func = scenario.build()?;
//!     let stats = GlobOpt::new(GlobOptConfig::default()).optimize_with_retry(&mut func)?;
//!     println!("{}\n{}", func, stats);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! The pipeline flows: [`ir`] → [`backward`] analysis → [`globopt`] forward pass →
//! dead-store cleanup → tail duplication.
//!
//! | Category | Modules |
//! |----------|---------|
//! | **IR** | [`ir`] |
//! | **Analysis** | [`backward`] |
//! | **Optimizer** | [`globopt`], [`error`](Error) |
//! | **Tooling** | [`scenarios`], [`prelude`] |
#![allow(clippy::too_many_arguments)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_match)]

pub mod backward;
pub mod globopt;
pub mod ir;
pub mod prelude;
pub mod scenarios;

mod error;

pub use error::{Error, RejitReason, Result};
pub use globopt::{optimize, optimize_with_retry, GlobOpt, GlobOptConfig, OptStats};

/// Globopt version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
