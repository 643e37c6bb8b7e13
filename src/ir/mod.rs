//! Intermediate representation consumed and produced by the optimizer
//!
//! A [`Func`] owns a symbol table and a flow graph of [`BasicBlock`]s holding
//! [`Instr`]s. Functions are normally produced by the IR builder ([`FuncBuilder`]) or
//! loaded from JSON; `build_loops` must run before optimization.

pub mod bailout;
pub mod builder;
pub mod dump;
pub mod flow_graph;
pub mod instr;
pub mod opcode;
pub mod opnd;
pub mod sym;
pub mod value_type;

pub use bailout::{BailOutInfo, BailOutKind, CapturedConstant, CapturedSym};
pub use builder::FuncBuilder;
pub use dump::InstrDisplay;
pub use flow_graph::{BasicBlock, BlockId, Func, ImplicitCallFlags, JsArrayKills, Loop, LoopId};
pub use instr::{Instr, InstrFlags, InstrId};
pub use opcode::{HelperMethod, Opcode};
pub use opnd::{is_int32_value, ArrayRegOpnd, IndirOpnd, Opnd, PropOpnd, RegOpnd};
pub use sym::{property_names, IrType, PropertyId, PropertySym, StackSym, Sym, SymId, SymTable};
pub use value_type::{ObjectType, TypeBits, ValueType};
