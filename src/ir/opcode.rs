//! IR opcodes and their static attributes
//!
//! Dynamic (boxed) operations are type-specialized by rewriting them to the matching
//! `*I4` opcode, or by keeping the dynamic opcode and retyping its operands to float64.

use serde::{Deserialize, Serialize};
use std::fmt;

/// IR opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Opcode {
    // ========== Moves ==========
    Nop,
    /// Copy, or load of a constant when the source is an immediate
    Ld,
    /// Load incoming parameter `src1`
    ArgIn,
    Ret,

    // ========== Dynamic arithmetic ==========
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Not,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrU,
    Incr,
    Decr,
    /// Unary plus (ToNumber)
    ConvNum,

    // ========== Int32 arithmetic ==========
    AddI4,
    SubI4,
    MulI4,
    DivI4,
    RemI4,
    NegI4,
    NotI4,
    AndI4,
    OrI4,
    XorI4,
    ShlI4,
    ShrI4,
    ShrUI4,

    // ========== Comparisons ==========
    CmEq,
    CmNeq,
    CmSrEq,
    CmSrNeq,
    CmLt,
    CmLe,
    CmGt,
    CmGe,
    CmEqI4,
    CmNeqI4,
    CmLtI4,
    CmLeI4,
    CmGtI4,
    CmGeI4,

    // ========== Branches ==========
    Br,
    BrTrue,
    BrFalse,
    BrEq,
    BrNeq,
    BrSrEq,
    BrSrNeq,
    BrLt,
    BrLe,
    BrGt,
    BrGe,
    BrEqI4,
    BrNeqI4,
    BrLtI4,
    BrLeI4,
    BrGtI4,
    BrGeI4,

    // ========== Math built-ins ==========
    InlineMathFloor,
    InlineMathCeil,
    InlineMathAbs,
    InlineMathMin,
    InlineMathMax,

    // ========== Properties and elements ==========
    LdFld,
    StFld,
    DeleteFld,
    /// Verifies a fixed (immutable) property; the proof site for its value
    CheckFixedFld,
    LdLen,
    LdElemI,
    StElemI,
    DeleteElemI,
    InlineArrayPush,
    InlineArrayPop,
    NewScArray,
    NewScObject,

    // ========== Calls ==========
    StartCall,
    ArgOut,
    CallI,
    CallDirect,

    // ========== Conversions ==========
    /// Unbox a var to int32/float64/SIMD, with a bailout if the value has the wrong type
    FromVar,
    /// Box an int32/float64/SIMD value
    ToVar,
    /// Primitive conversion between int32 and float64
    ConvPrim,

    // ========== Array internals ==========
    LdArrHeadSegment,
    LdArrHeadSegmentLength,
    /// `src1 <= src2 + offset`, bails out otherwise
    BoundCheck,

    // ========== Checks and bailouts ==========
    BailOnNotArray,
    BailOnNotObject,
    BailOnNoProfile,
    BailOut,
    TrapIfZero,
    TrapIfMinIntOverNegOne,
    Unreachable,
    ByteCodeUses,
    NoImplicitCallUses,

    // ========== Bulk memory ==========
    Memset,
    Memcopy,

    // ========== SIMD ==========
    Simd128AddF4,
    Simd128SubF4,
    Simd128MulF4,
    Simd128AddI4,
    Simd128SubI4,
    Simd128MulI4,
    Simd128SplatF4,
    Simd128SplatI4,

    // ========== Generators ==========
    Yield,
}

/// Runtime helpers reachable through `CallDirect`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HelperMethod {
    ArrayReverse,
    ArrayShift,
    ArrayUnshift,
    ArraySplice,
    RegExpExec,
    StringMatch,
    StringReplace,
    MathSqrt,
}

impl HelperMethod {
    /// Helpers that may rewrite the elements or length of an array argument
    pub fn mutates_array(self) -> bool {
        matches!(
            self,
            HelperMethod::ArrayReverse
                | HelperMethod::ArrayShift
                | HelperMethod::ArrayUnshift
                | HelperMethod::ArraySplice
        )
    }

    /// Helpers that may change an array's `length`
    pub fn changes_array_length(self) -> bool {
        matches!(
            self,
            HelperMethod::ArrayShift | HelperMethod::ArrayUnshift | HelperMethod::ArraySplice
        )
    }

    /// Helpers that may run arbitrary user code touching any field
    pub fn kills_all_fields(self) -> bool {
        matches!(
            self,
            HelperMethod::RegExpExec | HelperMethod::StringMatch | HelperMethod::StringReplace
        )
    }
}

impl Opcode {
    /// Conditional and unconditional branches
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Br
                | Opcode::BrTrue
                | Opcode::BrFalse
                | Opcode::BrEq
                | Opcode::BrNeq
                | Opcode::BrSrEq
                | Opcode::BrSrNeq
                | Opcode::BrLt
                | Opcode::BrLe
                | Opcode::BrGt
                | Opcode::BrGe
                | Opcode::BrEqI4
                | Opcode::BrNeqI4
                | Opcode::BrLtI4
                | Opcode::BrLeI4
                | Opcode::BrGtI4
                | Opcode::BrGeI4
        )
    }

    /// Always transfers control to its target
    pub fn is_unconditional_branch(self) -> bool {
        self == Opcode::Br
    }

    pub fn is_conditional_branch(self) -> bool {
        self.is_branch() && !self.is_unconditional_branch()
    }

    /// Instructions after which control never falls through
    pub fn ends_flow(self) -> bool {
        matches!(
            self,
            Opcode::Ret | Opcode::BailOut | Opcode::Unreachable | Opcode::Br
        )
    }

    /// Int32-specialized arithmetic, bitwise, and shift forms
    pub fn is_int_math(self) -> bool {
        matches!(
            self,
            Opcode::AddI4
                | Opcode::SubI4
                | Opcode::MulI4
                | Opcode::DivI4
                | Opcode::RemI4
                | Opcode::NegI4
                | Opcode::NotI4
                | Opcode::AndI4
                | Opcode::OrI4
                | Opcode::XorI4
                | Opcode::ShlI4
                | Opcode::ShrI4
                | Opcode::ShrUI4
        )
    }

    /// Binary operators on dynamically typed values
    pub fn is_dynamic_binary_math(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Rem
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::ShrU
        )
    }

    /// Unary operators on dynamically typed values
    pub fn is_dynamic_unary_math(self) -> bool {
        matches!(
            self,
            Opcode::Neg | Opcode::Not | Opcode::Incr | Opcode::Decr | Opcode::ConvNum
        )
    }

    /// Compare-and-set opcodes, dynamic and int32
    pub fn is_compare(self) -> bool {
        matches!(
            self,
            Opcode::CmEq
                | Opcode::CmNeq
                | Opcode::CmSrEq
                | Opcode::CmSrNeq
                | Opcode::CmLt
                | Opcode::CmLe
                | Opcode::CmGt
                | Opcode::CmGe
                | Opcode::CmEqI4
                | Opcode::CmNeqI4
                | Opcode::CmLtI4
                | Opcode::CmLeI4
                | Opcode::CmGtI4
                | Opcode::CmGeI4
        )
    }

    /// SIMD128 operations
    pub fn is_simd(self) -> bool {
        matches!(
            self,
            Opcode::Simd128AddF4
                | Opcode::Simd128SubF4
                | Opcode::Simd128MulF4
                | Opcode::Simd128AddI4
                | Opcode::Simd128SubI4
                | Opcode::Simd128MulI4
                | Opcode::Simd128SplatF4
                | Opcode::Simd128SplatI4
        )
    }

    /// Inlined `Math` builtins
    pub fn is_math_builtin(self) -> bool {
        matches!(
            self,
            Opcode::InlineMathFloor
                | Opcode::InlineMathCeil
                | Opcode::InlineMathAbs
                | Opcode::InlineMathMin
                | Opcode::InlineMathMax
        )
    }

    /// Whether identical instances of this opcode on identical values compute the same result
    pub fn can_cse(self) -> bool {
        self.is_dynamic_binary_math()
            || self.is_dynamic_unary_math()
            || self.is_int_math()
            || self.is_compare()
            || self.is_simd()
            || self.is_math_builtin()
            || matches!(
                self,
                Opcode::LdLen | Opcode::LdElemI | Opcode::CheckFixedFld
            )
    }

    /// Whether the opcode can invoke user code (valueOf, getters, proxies) on a dynamic operand
    pub fn has_implicit_calls(self) -> bool {
        self.is_dynamic_binary_math()
            || self.is_dynamic_unary_math()
            || matches!(
                self,
                Opcode::CmEq
                    | Opcode::CmNeq
                    | Opcode::CmLt
                    | Opcode::CmLe
                    | Opcode::CmGt
                    | Opcode::CmGe
                    | Opcode::BrEq
                    | Opcode::BrNeq
                    | Opcode::BrLt
                    | Opcode::BrLe
                    | Opcode::BrGt
                    | Opcode::BrGe
                    | Opcode::LdFld
                    | Opcode::StFld
                    | Opcode::DeleteFld
                    | Opcode::LdLen
                    | Opcode::LdElemI
                    | Opcode::StElemI
                    | Opcode::DeleteElemI
                    | Opcode::InlineArrayPush
                    | Opcode::InlineArrayPop
                    | Opcode::CallI
                    | Opcode::CallDirect
                    | Opcode::NewScObject
            )
    }

    /// Calls of any kind
    pub fn is_call(self) -> bool {
        matches!(self, Opcode::CallI | Opcode::CallDirect | Opcode::NewScObject)
    }

    /// Opcodes that may read or write any property of any object
    pub fn uses_all_fields(self) -> bool {
        matches!(self, Opcode::CallI | Opcode::NewScObject | Opcode::Yield)
    }

    /// Instructions that must stay even when their destination is dead
    pub fn has_side_effects(self) -> bool {
        self.is_branch()
            || self.is_call()
            || matches!(
                self,
                Opcode::Ret
                    | Opcode::StFld
                    | Opcode::DeleteFld
                    | Opcode::CheckFixedFld
                    | Opcode::StElemI
                    | Opcode::DeleteElemI
                    | Opcode::InlineArrayPush
                    | Opcode::InlineArrayPop
                    | Opcode::StartCall
                    | Opcode::ArgOut
                    | Opcode::BoundCheck
                    | Opcode::BailOnNotArray
                    | Opcode::BailOnNotObject
                    | Opcode::BailOnNoProfile
                    | Opcode::BailOut
                    | Opcode::TrapIfZero
                    | Opcode::TrapIfMinIntOverNegOne
                    | Opcode::Unreachable
                    | Opcode::ByteCodeUses
                    | Opcode::NoImplicitCallUses
                    | Opcode::Memset
                    | Opcode::Memcopy
                    | Opcode::Yield
            )
    }

    /// Int32 form of a dynamic opcode
    pub fn to_int_opcode(self) -> Option<Opcode> {
        Some(match self {
            Opcode::Add | Opcode::Incr => Opcode::AddI4,
            Opcode::Sub | Opcode::Decr => Opcode::SubI4,
            Opcode::Mul => Opcode::MulI4,
            Opcode::Div => Opcode::DivI4,
            Opcode::Rem => Opcode::RemI4,
            Opcode::Neg => Opcode::NegI4,
            Opcode::Not => Opcode::NotI4,
            Opcode::And => Opcode::AndI4,
            Opcode::Or => Opcode::OrI4,
            Opcode::Xor => Opcode::XorI4,
            Opcode::Shl => Opcode::ShlI4,
            Opcode::Shr => Opcode::ShrI4,
            Opcode::ShrU => Opcode::ShrUI4,
            Opcode::CmEq | Opcode::CmSrEq => Opcode::CmEqI4,
            Opcode::CmNeq | Opcode::CmSrNeq => Opcode::CmNeqI4,
            Opcode::CmLt => Opcode::CmLtI4,
            Opcode::CmLe => Opcode::CmLeI4,
            Opcode::CmGt => Opcode::CmGtI4,
            Opcode::CmGe => Opcode::CmGeI4,
            Opcode::BrEq | Opcode::BrSrEq => Opcode::BrEqI4,
            Opcode::BrNeq | Opcode::BrSrNeq => Opcode::BrNeqI4,
            Opcode::BrLt => Opcode::BrLtI4,
            Opcode::BrLe => Opcode::BrLeI4,
            Opcode::BrGt => Opcode::BrGtI4,
            Opcode::BrGe => Opcode::BrGeI4,
            _ => return None,
        })
    }

    /// Dynamic form of an int32 opcode; expressions hash under this form
    pub fn to_var_opcode(self) -> Opcode {
        match self {
            Opcode::AddI4 => Opcode::Add,
            Opcode::SubI4 => Opcode::Sub,
            Opcode::MulI4 => Opcode::Mul,
            Opcode::DivI4 => Opcode::Div,
            Opcode::RemI4 => Opcode::Rem,
            Opcode::NegI4 => Opcode::Neg,
            Opcode::NotI4 => Opcode::Not,
            Opcode::AndI4 => Opcode::And,
            Opcode::OrI4 => Opcode::Or,
            Opcode::XorI4 => Opcode::Xor,
            Opcode::ShlI4 => Opcode::Shl,
            Opcode::ShrI4 => Opcode::Shr,
            Opcode::ShrUI4 => Opcode::ShrU,
            Opcode::CmEqI4 => Opcode::CmEq,
            Opcode::CmNeqI4 => Opcode::CmNeq,
            Opcode::CmLtI4 => Opcode::CmLt,
            Opcode::CmLeI4 => Opcode::CmLe,
            Opcode::CmGtI4 => Opcode::CmGt,
            Opcode::CmGeI4 => Opcode::CmGe,
            Opcode::BrEqI4 => Opcode::BrEq,
            Opcode::BrNeqI4 => Opcode::BrNeq,
            Opcode::BrLtI4 => Opcode::BrLt,
            Opcode::BrLeI4 => Opcode::BrLe,
            Opcode::BrGtI4 => Opcode::BrGt,
            Opcode::BrGeI4 => Opcode::BrGe,
            other => other,
        }
    }

    /// The branch taken when this branch's condition is false
    pub fn negated_branch(self) -> Option<Opcode> {
        Some(match self {
            Opcode::BrTrue => Opcode::BrFalse,
            Opcode::BrFalse => Opcode::BrTrue,
            Opcode::BrEq => Opcode::BrNeq,
            Opcode::BrNeq => Opcode::BrEq,
            Opcode::BrSrEq => Opcode::BrSrNeq,
            Opcode::BrSrNeq => Opcode::BrSrEq,
            Opcode::BrEqI4 => Opcode::BrNeqI4,
            Opcode::BrNeqI4 => Opcode::BrEqI4,
            Opcode::BrLtI4 => Opcode::BrGeI4,
            Opcode::BrGeI4 => Opcode::BrLtI4,
            Opcode::BrGtI4 => Opcode::BrLeI4,
            Opcode::BrLeI4 => Opcode::BrGtI4,
            _ => return None,
        })
    }

    /// Element stores and loads addressed through an indir operand
    pub fn is_element_access(self) -> bool {
        matches!(
            self,
            Opcode::LdElemI | Opcode::StElemI | Opcode::DeleteElemI
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_opcode_round_trip() {
        for op in [Opcode::Add, Opcode::Mul, Opcode::ShrU, Opcode::CmLe, Opcode::BrGt] {
            let int_op = op.to_int_opcode().unwrap();
            assert_eq!(int_op.to_var_opcode(), op);
        }
    }

    #[test]
    fn test_branch_attributes() {
        assert!(Opcode::Br.is_unconditional_branch());
        assert!(Opcode::BrLtI4.is_conditional_branch());
        assert!(!Opcode::Add.is_branch());
        assert_eq!(Opcode::BrLtI4.negated_branch(), Some(Opcode::BrGeI4));
    }

    #[test]
    fn test_cse_candidates() {
        assert!(Opcode::Add.can_cse());
        assert!(Opcode::AddI4.can_cse());
        assert!(Opcode::LdElemI.can_cse());
        assert!(!Opcode::CallI.can_cse());
        assert!(!Opcode::StElemI.can_cse());
        assert!(!Opcode::Ld.can_cse());
    }

    #[test]
    fn test_helper_kills() {
        assert!(HelperMethod::ArraySplice.changes_array_length());
        assert!(!HelperMethod::ArrayReverse.changes_array_length());
        assert!(HelperMethod::ArrayReverse.mutates_array());
        assert!(HelperMethod::RegExpExec.kills_all_fields());
    }
}
