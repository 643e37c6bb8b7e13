//! Instruction operands

use super::sym::{IrType, SymId};
use super::value_type::ValueType;
use serde::{Deserialize, Serialize};

/// A register operand
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegOpnd {
    pub sym: SymId,
    pub ty: IrType,
    /// Type hint from the IR builder or from a previous optimization step
    #[serde(default)]
    pub value_type: ValueType,
    /// Created by the optimizer rather than the bytecode
    #[serde(default)]
    pub is_jit_optimized: bool,
}

impl RegOpnd {
    /// A register of machine type `ty` with no profiled value type
    pub fn new(sym: SymId, ty: IrType) -> Self {
        Self {
            sym,
            ty,
            value_type: ValueType::UNINITIALIZED,
            is_jit_optimized: false,
        }
    }

    /// A boxed var register
    pub fn var(sym: SymId) -> Self {
        Self::new(sym, IrType::Var)
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }
}

/// Array internals already loaded into syms, bundled with the base array register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArrayRegOpnd {
    pub head_segment_sym: Option<SymId>,
    pub head_segment_length_sym: Option<SymId>,
    pub length_sym: Option<SymId>,
    pub eliminated_lower_bound_check: bool,
    pub eliminated_upper_bound_check: bool,
}

/// `base[index + offset]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndirOpnd {
    pub base: RegOpnd,
    pub index: Option<RegOpnd>,
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub array: Option<ArrayRegOpnd>,
}

/// A property access `object.name`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropOpnd {
    pub sym: SymId,
    #[serde(default)]
    pub value_type: ValueType,
    /// The access still needs to verify the base is an object (not a tagged value)
    #[serde(default)]
    pub needs_tag_check: bool,
    /// Object type (shape) the inline cache expects, if monomorphic
    #[serde(default)]
    pub expected_type: Option<u32>,
    /// The shape was already checked upstream
    #[serde(default)]
    pub is_type_checked: bool,
}

impl PropOpnd {
    /// A plain property access with no type or tag check attached
    pub fn new(sym: SymId) -> Self {
        Self {
            sym,
            value_type: ValueType::UNINITIALIZED,
            needs_tag_check: false,
            expected_type: None,
            is_type_checked: false,
        }
    }
}

/// Instruction operand
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Opnd {
    Reg(RegOpnd),
    IntConst(i32),
    FloatConst(f64),
    /// Address of a runtime constant (string, function object, ...)
    Addr { addr: u64, is_function: bool },
    Prop(PropOpnd),
    Indir(IndirOpnd),
}

impl Opnd {
    /// A var register operand
    pub fn reg(sym: SymId) -> Self {
        Opnd::Reg(RegOpnd::var(sym))
    }

    /// A register operand holding the `ty` representation of `sym`
    pub fn typed_reg(sym: SymId, ty: IrType) -> Self {
        Opnd::Reg(RegOpnd::new(sym, ty))
    }

    pub fn as_reg(&self) -> Option<&RegOpnd> {
        match self {
            Opnd::Reg(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_reg_mut(&mut self) -> Option<&mut RegOpnd> {
        match self {
            Opnd::Reg(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_prop(&self) -> Option<&PropOpnd> {
        match self {
            Opnd::Prop(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_indir(&self) -> Option<&IndirOpnd> {
        match self {
            Opnd::Indir(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_indir_mut(&mut self) -> Option<&mut IndirOpnd> {
        match self {
            Opnd::Indir(i) => Some(i),
            _ => None,
        }
    }

    /// The sym of a register operand
    pub fn reg_sym(&self) -> Option<SymId> {
        self.as_reg().map(|r| r.sym)
    }

    /// The value of an int constant operand
    pub fn int_const(&self) -> Option<i32> {
        match self {
            Opnd::IntConst(v) => Some(*v),
            _ => None,
        }
    }

    /// Constants encoded in the instruction
    pub fn is_immediate(&self) -> bool {
        matches!(
            self,
            Opnd::IntConst(_) | Opnd::FloatConst(_) | Opnd::Addr { .. }
        )
    }

    /// Machine type of the operand's storage
    pub fn ir_type(&self) -> IrType {
        match self {
            Opnd::Reg(r) => r.ty,
            Opnd::IntConst(_) => IrType::Int32,
            Opnd::FloatConst(_) => IrType::Float64,
            _ => IrType::Var,
        }
    }

    /// Type hint carried by the operand
    pub fn value_type(&self) -> ValueType {
        match self {
            Opnd::Reg(r) => r.value_type,
            Opnd::IntConst(_) => ValueType::INT,
            Opnd::FloatConst(f) => {
                if is_int32_value(*f) {
                    ValueType::INT
                } else {
                    ValueType::FLOAT
                }
            }
            Opnd::Addr { is_function, .. } => {
                if *is_function {
                    ValueType::object(super::value_type::ObjectType::Function)
                } else {
                    ValueType::UNINITIALIZED
                }
            }
            Opnd::Prop(p) => p.value_type,
            Opnd::Indir(_) => ValueType::UNINITIALIZED,
        }
    }

    /// Record the value type the optimizer found for the operand
    pub fn set_value_type(&mut self, value_type: ValueType) {
        match self {
            Opnd::Reg(r) => r.value_type = value_type,
            Opnd::Prop(p) => p.value_type = value_type,
            _ => {}
        }
    }

    /// All stack syms this operand reads (for a destination, the syms its address uses)
    pub fn used_syms(&self) -> Vec<SymId> {
        match self {
            Opnd::Reg(r) => vec![r.sym],
            Opnd::Indir(i) => {
                let mut syms = vec![i.base.sym];
                if let Some(index) = i.index {
                    syms.push(index.sym);
                }
                if let Some(array) = i.array {
                    syms.extend(
                        [
                            array.head_segment_sym,
                            array.head_segment_length_sym,
                            array.length_sym,
                        ]
                        .into_iter()
                        .flatten(),
                    );
                }
                syms
            }
            _ => Vec::new(),
        }
    }
}

/// Whether a double is exactly representable as an int32 (and is not -0)
pub fn is_int32_value(f: f64) -> bool {
    f.fract() == 0.0
        && f >= i32::MIN as f64
        && f <= i32::MAX as f64
        && !(f == 0.0 && f.is_sign_negative())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_const_value_type() {
        assert!(Opnd::FloatConst(3.0).value_type().is_int());
        assert!(Opnd::FloatConst(0.5).value_type().is_float());
        assert!(Opnd::FloatConst(-0.0).value_type().is_float());
        assert!(Opnd::FloatConst(4294967296.0).value_type().is_float());
    }

    #[test]
    fn test_used_syms() {
        let indir = Opnd::Indir(IndirOpnd {
            base: RegOpnd::var(1),
            index: Some(RegOpnd::var(2)),
            offset: 0,
            array: None,
        });
        assert_eq!(indir.used_syms(), vec![1, 2]);
        assert_eq!(Opnd::IntConst(5).used_syms(), Vec::<SymId>::new());
    }
}
