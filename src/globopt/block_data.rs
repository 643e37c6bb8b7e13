//! Per-block dataflow state
//!
//! [`BlockData`] is the optimizer's knowledge at one point of the forward walk: which
//! value each sym holds, what is known about each value, which expressions are
//! available, and in which representations each sym is currently live.

use super::induction_variable::InductionVariableSet;
use super::int_bounds::{IntBoundCheck, IntBoundCheckCompatibilityId};
use super::value_info::{Value, ValueInfo, ValueNumber};
use crate::ir::{IrType, Opcode, SymId, ValueType};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::rc::Rc;

/// Int32 representation liveness of a sym
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Int32Liveness {
    #[default]
    Dead,
    /// Holds the exact value
    Lossless,
    /// Holds the value truncated to int32; only bitwise consumers may use it
    Lossy,
}

/// Representations in which a sym's current value is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymLiveness {
    pub var: bool,
    pub int32: Int32Liveness,
    pub float64: bool,
    pub simd: Option<IrType>,
}

impl Default for SymLiveness {
    fn default() -> Self {
        SymLiveness::VAR
    }
}

impl SymLiveness {
    /// Boxed only; the state of every sym the optimizer has not specialized
    pub const VAR: SymLiveness = SymLiveness {
        var: true,
        int32: Int32Liveness::Dead,
        float64: false,
        simd: None,
    };

    pub const NONE: SymLiveness = SymLiveness {
        var: false,
        int32: Int32Liveness::Dead,
        float64: false,
        simd: None,
    };

    /// Live only in `ty`, as after a specialized definition
    pub fn only(ty: IrType) -> Self {
        let mut l = SymLiveness::NONE;
        l.set(ty, true);
        l
    }

    /// Whether the value can be read from the `ty` representation without conversion
    pub fn is_live_as(&self, ty: IrType) -> bool {
        match ty {
            IrType::Var => self.var,
            IrType::Int32 => self.int32 == Int32Liveness::Lossless,
            IrType::Float64 => self.float64,
            IrType::Simd128F4 | IrType::Simd128I4 => self.simd == Some(ty),
        }
    }

    /// Live as int32, lossless or lossy
    pub fn has_int32(&self) -> bool {
        self.int32 != Int32Liveness::Dead
    }

    /// Mark the `ty` representation live or dead
    pub fn set(&mut self, ty: IrType, live: bool) {
        match ty {
            IrType::Var => self.var = live,
            IrType::Int32 => {
                self.int32 = if live {
                    Int32Liveness::Lossless
                } else {
                    Int32Liveness::Dead
                }
            }
            IrType::Float64 => self.float64 = live,
            IrType::Simd128F4 | IrType::Simd128I4 => {
                if live {
                    self.simd = Some(ty);
                } else if self.simd == Some(ty) {
                    self.simd = None;
                }
            }
        }
    }

    /// Whether no representation holds the value
    pub fn is_dead(&self) -> bool {
        *self == SymLiveness::NONE
    }
}

/// Hash of an expression over value numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprHash {
    pub opcode: Opcode,
    pub src1: ValueNumber,
    pub src2: ValueNumber,
    /// Int math only matches an expression with the same overflow and -0 handling
    pub attrs: u8,
}

impl ExprHash {
    pub const IGNORES_OVERFLOW: u8 = 1 << 0;
    pub const IGNORES_NEGATIVE_ZERO: u8 = 1 << 1;

    /// Hash of `opcode` on two values. Int forms hash as their dynamic opcode.
    pub fn new(opcode: Opcode, src1: ValueNumber, src2: ValueNumber) -> Self {
        Self {
            opcode: opcode.to_var_opcode(),
            src1,
            src2,
            attrs: 0,
        }
    }

    pub fn with_attrs(mut self, attrs: u8) -> Self {
        self.attrs = attrs;
        self
    }
}

/// Dataflow state at one program point
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub sym_to_value: HashMap<SymId, ValueNumber>,
    pub values: HashMap<ValueNumber, Rc<ValueInfo>>,
    pub expr_to_value: HashMap<ExprHash, ValueNumber>,
    /// Non-default liveness; syms not listed are live as var only
    pub liveness: HashMap<SymId, SymLiveness>,
    /// Property syms whose value in `sym_to_value` is current
    pub live_fields: HashSet<SymId>,
    /// Values whose cached array internals or object types a call invalidates
    pub values_to_kill_on_calls: HashSet<ValueNumber>,
    pub available_int_bound_checks: HashMap<IntBoundCheckCompatibilityId, IntBoundCheck>,
    /// Induction variables of the innermost loop (prepass only)
    pub induction_variables: Option<InductionVariableSet>,
    pub start_call_count: u32,
    pub arg_out_syms: Vec<SymId>,
}

impl BlockData {
    /// An empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Value number `sym` holds here
    pub fn value_number(&self, sym: SymId) -> Option<ValueNumber> {
        self.sym_to_value.get(&sym).copied()
    }

    /// Value `sym` holds here
    pub fn value(&self, sym: SymId) -> Option<Value> {
        let vn = self.value_number(sym)?;
        self.value_of(vn)
    }

    /// Info of value number `vn` in this state. Unlike the context's lookup this does not know constants.
    pub fn value_of(&self, vn: ValueNumber) -> Option<Value> {
        self.values
            .get(&vn)
            .map(|info| Value::from_rc(vn, info.clone()))
    }

    /// Bind `sym` to `value`. The value's sym store moves to `sym` when the current
    /// store no longer holds the value, or when `prefer_as_store` is set.
    pub fn set_value(&mut self, sym: SymId, value: &Value, prefer_as_store: bool) {
        let vn = value.number();
        if let Some(old) = self.sym_to_value.insert(sym, vn) {
            if old != vn {
                self.clear_sym_store(old, sym);
            }
        }
        let mut info = value.info_rc().clone();
        let store_holds_value = info
            .sym_store()
            .map_or(false, |s| s == sym || self.sym_to_value.get(&s) == Some(&vn));
        if (!store_holds_value || prefer_as_store) && info.sym_store() != Some(sym) {
            Rc::make_mut(&mut info).set_sym_store(Some(sym));
        }
        self.values.insert(vn, info);
    }

    /// Bind a property sym without touching the value's sym store
    pub fn set_field_value(&mut self, prop: SymId, value: &Value) {
        self.sym_to_value.insert(prop, value.number());
        self.values
            .entry(value.number())
            .or_insert_with(|| value.info_rc().clone());
        self.live_fields.insert(prop);
    }

    fn clear_sym_store(&mut self, vn: ValueNumber, sym: SymId) {
        if let Some(info) = self.values.get_mut(&vn) {
            if info.sym_store() == Some(sym) {
                Rc::make_mut(info).set_sym_store(None);
            }
        }
    }

    /// Replace what is known about a value for every sym holding it
    pub fn update_value_info(&mut self, vn: ValueNumber, info: ValueInfo) {
        self.values.insert(vn, Rc::new(info));
    }

    /// Forget `sym`'s value
    pub fn remove_value(&mut self, sym: SymId) {
        if let Some(old) = self.sym_to_value.remove(&sym) {
            self.clear_sym_store(old, sym);
        }
    }

    /// The field is no longer known; the next load must read memory
    pub fn kill_field(&mut self, prop: SymId) {
        self.live_fields.remove(&prop);
        self.sym_to_value.remove(&prop);
    }

    /// Representations of `sym` that hold its value; var when unrecorded
    pub fn liveness(&self, sym: SymId) -> SymLiveness {
        self.liveness.get(&sym).copied().unwrap_or_default()
    }

    /// Record `sym`'s live representations. Var-only is the default and is not stored.
    pub fn set_liveness(&mut self, sym: SymId, liveness: SymLiveness) {
        if liveness == SymLiveness::VAR {
            self.liveness.remove(&sym);
        } else {
            self.liveness.insert(sym, liveness);
        }
    }

    /// Whether `sym` can be read as `ty` here
    pub fn is_live_as(&self, sym: SymId, ty: IrType) -> bool {
        self.liveness(sym).is_live_as(ty)
    }

    /// Syms currently bound to `vn`, sorted
    pub fn syms_with_value(&self, vn: ValueNumber) -> Vec<SymId> {
        let mut syms: Vec<SymId> = self
            .sym_to_value
            .iter()
            .filter(|(_, &v)| v == vn)
            .map(|(&s, _)| s)
            .collect();
        syms.sort_unstable();
        syms
    }

    /// Type of `sym`'s value here
    pub fn value_type(&self, sym: SymId) -> Option<ValueType> {
        self.value(sym).map(|v| v.ty())
    }

    /// Coarse state summary used to detect a loop prepass fixed point
    pub fn signature(&self, syms: &[SymId]) -> Vec<(SymId, Option<ValueType>, SymLiveness)> {
        syms.iter()
            .map(|&s| (s, self.value_type(s), self.liveness(s)))
            .collect()
    }

    /// Drop every value whose info is no longer referenced
    pub fn collect_garbage(&mut self) {
        let live: HashSet<ValueNumber> = self.sym_to_value.values().copied().collect();
        self.values.retain(|vn, _| live.contains(vn));
        self.values_to_kill_on_calls.retain(|vn| live.contains(vn));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sym_store_follows_redefinition() {
        let mut data = BlockData::new();
        let v = Value::new(5, ValueInfo::new(ValueType::LIKELY_INT));
        data.set_value(1, &v, false);
        data.set_value(2, &data.value(1).unwrap(), false);
        assert_eq!(data.value(2).unwrap().info().sym_store(), Some(1));

        let w = Value::new(6, ValueInfo::int_constant(3));
        data.set_value(1, &w, false);
        assert_eq!(data.value(2).unwrap().info().sym_store(), None);

        data.set_value(3, &data.value(2).unwrap(), false);
        assert_eq!(data.value(3).unwrap().info().sym_store(), Some(3));
    }

    #[test]
    fn test_prefer_as_store() {
        let mut data = BlockData::new();
        let v = Value::new(5, ValueInfo::new(ValueType::ANY));
        data.set_value(1, &v, false);
        data.set_value(2, &data.value(1).unwrap(), true);
        assert_eq!(data.value(1).unwrap().info().sym_store(), Some(2));
    }

    #[test]
    fn test_liveness_defaults_to_var() {
        let mut data = BlockData::new();
        assert!(data.is_live_as(4, IrType::Var));
        assert!(!data.is_live_as(4, IrType::Int32));
        data.set_liveness(4, SymLiveness::only(IrType::Int32));
        assert!(!data.is_live_as(4, IrType::Var));
        assert!(data.liveness(4).has_int32());
        data.set_liveness(4, SymLiveness::VAR);
        assert!(data.liveness.is_empty());
    }

    #[test]
    fn test_expr_hash_uses_var_opcode() {
        assert_eq!(
            ExprHash::new(Opcode::AddI4, 2, 3),
            ExprHash::new(Opcode::Add, 2, 3)
        );
    }
}
