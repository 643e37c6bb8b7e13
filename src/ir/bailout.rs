//! Bailout annotations
//!
//! A bailout is data attached to an instruction: the conditions under which the
//! generated code abandons the optimized path (`BailOutKind`), and the snapshot of
//! interpreter-visible state needed to resume unoptimized execution (`BailOutInfo`).

use super::sym::{IrType, SymId};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Reasons an optimized instruction may bail out. Multiple kinds combine bitwise.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BailOutKind: u32 {
        const ON_OVERFLOW = 1 << 0;
        const ON_MUL_OVERFLOW = 1 << 1;
        const ON_NEGATIVE_ZERO = 1 << 2;
        const ON_DIV_BY_ZERO = 1 << 3;
        const ON_DIV_RESULT_NOT_INT = 1 << 4;
        const ON_DIV_OF_MIN_INT = 1 << 5;
        const INT_ONLY = 1 << 6;
        const NUMBER_ONLY = 1 << 7;
        const EXPECTING_INTEGER = 1 << 8;
        const ON_NOT_PRIMITIVE = 1 << 9;
        const ON_NOT_ARRAY = 1 << 10;
        const ON_NOT_NATIVE_ARRAY = 1 << 11;
        const CONVENTIONAL_TYPED_ARRAY_ACCESS_ONLY = 1 << 12;
        const CONVENTIONAL_NATIVE_ARRAY_ACCESS_ONLY = 1 << 13;
        const ON_ARRAY_ACCESS_HELPER_CALL = 1 << 14;
        const ON_FAILED_HOISTED_BOUND_CHECK = 1 << 15;
        const ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK = 1 << 16;
        const ON_MEMOP_ERROR = 1 << 17;
        const MARK_TEMP_OBJECT = 1 << 18;
        const ON_IMPLICIT_CALLS = 1 << 19;
        const ON_NOT_OBJECT = 1 << 20;
        const ON_NO_PROFILE = 1 << 21;
        const SIMD128_F4_ONLY = 1 << 22;
        const SIMD128_I4_ONLY = 1 << 23;
        const ON_MISSING_VALUE = 1 << 24;
        const FAILED_TYPE_CHECK = 1 << 25;
        const ON_FAILED_FIXED_FIELD_CHECK = 1 << 26;

        /// Kinds that abort the whole loop rather than one iteration
        const HOISTED = Self::ON_FAILED_HOISTED_BOUND_CHECK.bits()
            | Self::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK.bits();
        /// Kinds checked after the operation has run
        const POST_OP = Self::ON_OVERFLOW.bits()
            | Self::ON_MUL_OVERFLOW.bits()
            | Self::ON_NEGATIVE_ZERO.bits()
            | Self::ON_DIV_RESULT_NOT_INT.bits();
    }
}

impl BailOutKind {
    /// Type-specialization guard kind for a conversion to `ty`
    pub fn for_conversion(ty: IrType) -> BailOutKind {
        match ty {
            IrType::Int32 => BailOutKind::INT_ONLY,
            IrType::Float64 => BailOutKind::NUMBER_ONLY,
            IrType::Simd128F4 => BailOutKind::SIMD128_F4_ONLY,
            IrType::Simd128I4 => BailOutKind::SIMD128_I4_ONLY,
            IrType::Var => BailOutKind::empty(),
        }
    }
}

impl fmt::Display for BailOutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{}", name)?;
            first = false;
        }
        if first {
            write!(f, "NONE")?;
        }
        Ok(())
    }
}

/// Constant value restored directly instead of from a register
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CapturedConstant {
    Int(i32),
    Float(f64),
    Var(u64),
}

/// One interpreter-visible sym and where its current value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedSym {
    /// Bytecode var sym being restored
    pub sym: SymId,
    /// Sym holding the value at the bailout point (the var sym itself or a typed or copy-prop sym)
    pub source: SymId,
    /// Representation the value must be boxed from
    pub repr: IrType,
}

/// State snapshot for one bailout point
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BailOutInfo {
    pub kind: BailOutKind,
    /// Bytecode offset to resume at
    pub byte_code_offset: u32,
    /// Resume after the operation instead of before it
    pub is_post_op: bool,
    /// Bailout shared between a separated check and its access
    pub is_shared: bool,
    pub captured_syms: Vec<CapturedSym>,
    pub captured_constants: Vec<(SymId, CapturedConstant)>,
    /// Outstanding `StartCall`s and their argument syms at the bailout point
    pub start_call_count: u32,
    pub arg_out_syms: Vec<SymId>,
}

impl Default for BailOutKind {
    fn default() -> Self {
        BailOutKind::empty()
    }
}

impl BailOutInfo {
    /// Bailout info resuming at `byte_code_offset`. Post-op kinds resume after the instruction.
    pub fn new(kind: BailOutKind, byte_code_offset: u32) -> Self {
        Self {
            kind,
            byte_code_offset,
            is_post_op: !kind.is_empty() && BailOutKind::POST_OP.contains(kind),
            ..Self::default()
        }
    }

    /// The check guarding this bailout was moved into a landing pad
    pub fn is_hoisted(&self) -> bool {
        self.kind.intersects(BailOutKind::HOISTED)
    }

    /// Whether this bailout restores `sym`
    pub fn captures(&self, sym: SymId) -> bool {
        self.captured_syms.iter().any(|c| c.sym == sym)
            || self.captured_constants.iter().any(|(s, _)| *s == sym)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_combine() {
        let kind = BailOutKind::ON_OVERFLOW | BailOutKind::ON_NEGATIVE_ZERO;
        assert!(kind.contains(BailOutKind::ON_OVERFLOW));
        assert_eq!(kind.to_string(), "ON_OVERFLOW|ON_NEGATIVE_ZERO");
        assert_eq!(BailOutKind::empty().to_string(), "NONE");
    }

    #[test]
    fn test_post_op_detection() {
        assert!(BailOutInfo::new(BailOutKind::ON_OVERFLOW, 3).is_post_op);
        assert!(!BailOutInfo::new(BailOutKind::INT_ONLY, 3).is_post_op);
        assert!(!BailOutInfo::new(BailOutKind::ON_OVERFLOW | BailOutKind::INT_ONLY, 3).is_post_op);
    }

    #[test]
    fn test_hoisted_kinds() {
        let info = BailOutInfo::new(BailOutKind::ON_FAILED_HOISTED_BOUND_CHECK, 0);
        assert!(info.is_hoisted());
        assert!(!BailOutInfo::new(BailOutKind::ON_NOT_ARRAY, 0).is_hoisted());
    }
}
