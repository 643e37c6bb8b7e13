//! Values and value infos
//!
//! A [`Value`] pairs a value number with a shared, immutable [`ValueInfo`]. Two syms
//! holding values with the same number hold the same runtime value at that point.
//! Changing what is known about a value replaces its info (copy-on-write); an info
//! that is also visible from another block or sym is never mutated in place.

use super::int_bounds::{IntBounds, IntConstantBounds};
use crate::ir::{ObjectType, SymId, ValueType};
use std::fmt;
use std::rc::Rc;

pub type ValueNumber = u32;

pub const INVALID_VALUE_NUMBER: ValueNumber = 0;
pub const ZERO_VALUE_NUMBER: ValueNumber = 1;
pub const FIRST_NEW_VALUE_NUMBER: ValueNumber = ZERO_VALUE_NUMBER + 1;

/// Array internals already loaded into syms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArrayInfo {
    pub head_segment_sym: Option<SymId>,
    pub head_segment_length_sym: Option<SymId>,
    pub length_sym: Option<SymId>,
}

impl ArrayInfo {
    /// No array internals have been loaded
    pub fn is_empty(&self) -> bool {
        self.head_segment_sym.is_none()
            && self.head_segment_length_sym.is_none()
            && self.length_sym.is_none()
    }
}

/// Result of a shape (object type) check
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsTypeInfo {
    pub type_id: Option<u32>,
    /// Equivalent type set, sorted
    pub type_set: Option<Vec<u32>>,
    pub is_shared: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueInfoKind {
    Generic,
    IntConstant(i32),
    IntRange { min: i32, max: i32 },
    IntBounded(IntBounds),
    FloatConstant(f64),
    VarConstant { addr: u64, is_function: bool },
    JsType(JsTypeInfo),
    Array(ArrayInfo),
}

/// What is known about a value
#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    ty: ValueType,
    kind: ValueInfoKind,
    sym_store: Option<SymId>,
    neg_zero_prevented: bool,
}

impl ValueInfo {
    /// Info carrying only a type
    pub fn new(ty: ValueType) -> Self {
        Self {
            ty,
            kind: ValueInfoKind::Generic,
            sym_store: None,
            neg_zero_prevented: false,
        }
    }

    /// A known int constant
    pub fn int_constant(value: i32) -> Self {
        Self {
            ty: ValueType::INT,
            kind: ValueInfoKind::IntConstant(value),
            sym_store: None,
            neg_zero_prevented: false,
        }
    }

    /// An int known to lie in `[min, max]`
    pub fn int_range(min: i32, max: i32, neg_zero_prevented: bool) -> Self {
        debug_assert!(min <= max);
        Self {
            ty: ValueType::INT,
            kind: ValueInfoKind::IntRange { min, max },
            sym_store: None,
            neg_zero_prevented,
        }
    }

    /// Int info for constant bounds; collapses to a constant when the bounds are equal
    pub fn from_constant_bounds(bounds: IntConstantBounds, neg_zero_prevented: bool) -> Self {
        if bounds.is_constant() {
            ValueInfo::int_constant(bounds.lower())
        } else {
            ValueInfo::int_range(bounds.lower(), bounds.upper(), neg_zero_prevented)
        }
    }

    /// Int info with relative bounds. `ty` must be likely int.
    pub fn int_bounded(ty: ValueType, bounds: IntBounds, neg_zero_prevented: bool) -> Self {
        debug_assert!(ty.is_likely_int());
        if !bounds.requires_int_bounded_value_info(ty) {
            return ValueInfo::from_constant_bounds(bounds.constant_bounds(), neg_zero_prevented);
        }
        Self {
            ty,
            kind: ValueInfoKind::IntBounded(bounds),
            sym_store: None,
            neg_zero_prevented,
        }
    }

    /// A known float constant
    pub fn float_constant(value: f64) -> Self {
        Self {
            ty: ValueType::FLOAT,
            kind: ValueInfoKind::FloatConstant(value),
            sym_store: None,
            neg_zero_prevented: false,
        }
    }

    /// A runtime constant at `addr`
    pub fn var_constant(addr: u64, is_function: bool, ty: ValueType) -> Self {
        Self {
            ty,
            kind: ValueInfoKind::VarConstant { addr, is_function },
            sym_store: None,
            neg_zero_prevented: false,
        }
    }

    /// Info of an object type sym
    pub fn js_type(info: JsTypeInfo) -> Self {
        Self {
            ty: ValueType::UNINITIALIZED,
            kind: ValueInfoKind::JsType(info),
            sym_store: None,
            neg_zero_prevented: false,
        }
    }

    /// An array value with its internals loaded into syms
    pub fn array(ty: ValueType, info: ArrayInfo) -> Self {
        debug_assert!(ty.is_likely_array_or_object_with_array() || ty.is_likely_any_optimized_array());
        Self {
            ty,
            kind: ValueInfoKind::Array(info),
            sym_store: None,
            neg_zero_prevented: false,
        }
    }

    /// The value's type
    pub fn ty(&self) -> ValueType {
        self.ty
    }

    /// Replace the type, keeping everything else
    pub fn set_type(&mut self, ty: ValueType) {
        self.ty = ty;
    }

    pub fn kind(&self) -> &ValueInfoKind {
        &self.kind
    }

    /// A sym known to hold this value, used for copy-prop
    pub fn sym_store(&self) -> Option<SymId> {
        self.sym_store
    }

    pub fn set_sym_store(&mut self, sym: Option<SymId>) {
        self.sym_store = sym;
    }

    /// The same info with a different sym store
    pub fn with_sym_store(mut self, sym: Option<SymId>) -> Self {
        self.sym_store = sym;
        self
    }

    /// The value cannot be -0
    pub fn neg_zero_prevented(&self) -> bool {
        self.neg_zero_prevented
    }

    /// Carries a type and nothing more
    pub fn is_generic(&self) -> bool {
        matches!(self.kind, ValueInfoKind::Generic)
    }

    /// Definitely an int
    pub fn is_int(&self) -> bool {
        self.ty.is_int()
    }

    /// Int, definitely or likely
    pub fn is_likely_int(&self) -> bool {
        self.ty.is_likely_int()
    }

    /// Exactly one int value is possible
    pub fn is_int_constant(&self) -> bool {
        matches!(self.kind, ValueInfoKind::IntConstant(_))
    }

    /// Has relative or explicit int bounds
    pub fn is_int_bounded(&self) -> bool {
        matches!(self.kind, ValueInfoKind::IntBounded(_))
    }

    /// Relative and explicit bounds, when the value has them
    pub fn int_bounds(&self) -> Option<&IntBounds> {
        match &self.kind {
            ValueInfoKind::IntBounded(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_array_value_info(&self) -> bool {
        matches!(self.kind, ValueInfoKind::Array(_))
    }

    /// Array internals loaded into syms, for array values
    pub fn array_info(&self) -> Option<&ArrayInfo> {
        match &self.kind {
            ValueInfoKind::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Expected object type, for object type syms
    pub fn js_type_info(&self) -> Option<&JsTypeInfo> {
        match &self.kind {
            ValueInfoKind::JsType(t) => Some(t),
            _ => None,
        }
    }

    /// The float constant, for float constant values
    pub fn float_constant_value(&self) -> Option<f64> {
        match self.kind {
            ValueInfoKind::FloatConstant(f) => Some(f),
            _ => None,
        }
    }

    /// Address and callee-ness of a runtime constant
    pub fn var_constant_value(&self) -> Option<(u64, bool)> {
        match self.kind {
            ValueInfoKind::VarConstant { addr, is_function } => Some((addr, is_function)),
            _ => None,
        }
    }

    /// Constant int value. With `include_likely`, a likely-int value's constant is
    /// returned too (the value still needs a check before it can be used as an int).
    pub fn int_constant_value(&self, include_likely: bool) -> Option<i32> {
        let ok = if include_likely {
            self.is_likely_int()
        } else {
            self.is_int()
        };
        if !ok {
            return None;
        }
        match &self.kind {
            ValueInfoKind::IntConstant(c) => Some(*c),
            ValueInfoKind::IntRange { min, max } if min == max => Some(*min),
            ValueInfoKind::IntBounded(b) if b.constant_lower_bound() == b.constant_upper_bound() => {
                Some(b.constant_lower_bound())
            }
            _ => None,
        }
    }

    /// Exactly one int value is possible, counting bounded values
    pub fn has_int_constant_value(&self) -> bool {
        self.int_constant_value(false).is_some()
    }

    /// Constant number value, int or float
    pub fn number_constant_value(&self) -> Option<f64> {
        if let Some(i) = self.int_constant_value(false) {
            return Some(i as f64);
        }
        self.float_constant_value()
    }

    /// Concrete `[lower, upper]` bounds of an int value. Values with no range info
    /// (but the right type) get the full int32 range.
    pub fn int_constant_bounds(&self, include_likely: bool) -> Option<IntConstantBounds> {
        if !(self.is_int() || (include_likely && self.is_likely_int())) {
            return None;
        }
        match &self.kind {
            ValueInfoKind::IntConstant(c) => return Some(IntConstantBounds::new(*c, *c)),
            ValueInfoKind::IntRange { min, max } => {
                return Some(IntConstantBounds::new(*min, *max))
            }
            ValueInfoKind::IntBounded(b) => return Some(b.constant_bounds()),
            _ => {}
        }
        Some(IntConstantBounds::FULL)
    }

    /// Constant lower bound of an int value
    pub fn int_constant_lower_bound(&self, include_likely: bool) -> Option<i32> {
        self.int_constant_bounds(include_likely).map(|b| b.lower())
    }

    /// Constant upper bound of an int value
    pub fn int_constant_upper_bound(&self, include_likely: bool) -> Option<i32> {
        self.int_constant_bounds(include_likely).map(|b| b.upper())
    }

    /// Whether the value is provably an int in `[lower, upper]`
    pub fn is_int_and_within(&self, lower: i32, upper: i32) -> bool {
        match self.int_constant_bounds(false) {
            Some(b) => b.lower() >= lower && b.upper() <= upper,
            None => false,
        }
    }

    /// Same type and sym store, without the kind-specific payload
    pub fn copy_with_generic_structure_kind(&self) -> ValueInfo {
        ValueInfo {
            ty: self.ty,
            kind: ValueInfoKind::Generic,
            sym_store: self.sym_store,
            neg_zero_prevented: false,
        }
    }

    /// Info after an int32 check (or conversion) has been proven on the value
    pub fn specialize_to_int32(&self) -> ValueInfo {
        if self.is_int() {
            return self.clone();
        }
        let bounds = match &self.kind {
            ValueInfoKind::IntBounded(b) => b,
            _ => {
                let mut info = self.copy_with_generic_structure_kind();
                info.ty = ValueType::INT;
                return info;
            }
        };
        if bounds.has_explicit_or_relative_bounds() {
            let mut info = self.clone();
            info.ty = ValueType::INT;
            return info;
        }
        ValueInfo::from_constant_bounds(bounds.constant_bounds(), false).with_sym_store(self.sym_store)
    }

    /// Info after a float64 check (or conversion) has been proven on the value
    pub fn specialize_to_float64(&self) -> ValueInfo {
        if self.ty.is_number() {
            return self.clone();
        }
        let mut info = self.copy_with_generic_structure_kind();
        info.ty = ValueType::NUMBER;
        info
    }

    /// Info after a SIMD check has been proven on the value
    pub fn specialize_to_simd128(&self, ty: ValueType) -> ValueInfo {
        debug_assert!(ty.is_simd128_f4() || ty.is_simd128_i4());
        if self.ty == ty {
            return self.clone();
        }
        let mut info = self.copy_with_generic_structure_kind();
        info.ty = ty;
        info
    }

    /// Same info with cached array syms replaced. Infos whose type is no longer an
    /// array drop to the generic kind.
    pub fn with_array_info(&self, ty: ValueType, array: ArrayInfo) -> ValueInfo {
        let is_array_type =
            ty.is_likely_array_or_object_with_array() || ty.is_likely_any_optimized_array();
        if array.is_empty() || !is_array_type {
            let mut info = self.copy_with_generic_structure_kind();
            info.ty = ty;
            return info;
        }
        ValueInfo {
            ty,
            kind: ValueInfoKind::Array(array),
            sym_store: self.sym_store,
            neg_zero_prevented: false,
        }
    }

    /// Whether the value is an array whose elements are stored inline in a head segment
    pub fn is_array_with_head_segment(&self) -> bool {
        self.ty.is_any_optimized_array()
            && !matches!(self.ty.object_type(), ObjectType::ObjectWithArray)
    }
}

impl fmt::Display for ValueInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty)?;
        match &self.kind {
            ValueInfoKind::Generic => {}
            ValueInfoKind::IntConstant(c) => write!(f, " const {}", c)?,
            ValueInfoKind::IntRange { min, max } => write!(f, " [{}, {}]", min, max)?,
            ValueInfoKind::IntBounded(b) => write!(f, " {}", b)?,
            ValueInfoKind::FloatConstant(v) => write!(f, " const {}", v)?,
            ValueInfoKind::VarConstant { addr, is_function } => {
                write!(f, " addr {:#x}{}", addr, if *is_function { " fn" } else { "" })?
            }
            ValueInfoKind::JsType(t) => match t.type_id {
                Some(id) => write!(f, " type {}", id)?,
                None => write!(f, " type set {:?}", t.type_set)?,
            },
            ValueInfoKind::Array(a) => {
                if let Some(s) = a.head_segment_sym {
                    write!(f, " seg s{}", s)?;
                }
                if let Some(s) = a.head_segment_length_sym {
                    write!(f, " segLen s{}", s)?;
                }
                if let Some(s) = a.length_sym {
                    write!(f, " len s{}", s)?;
                }
            }
        }
        if let Some(s) = self.sym_store {
            write!(f, " (s{})", s)?;
        }
        Ok(())
    }
}

/// A value number with its shared info
#[derive(Debug, Clone)]
pub struct Value {
    number: ValueNumber,
    info: Rc<ValueInfo>,
}

impl Value {
    /// Value number `number` with `info`
    pub fn new(number: ValueNumber, info: ValueInfo) -> Self {
        Self {
            number,
            info: Rc::new(info),
        }
    }

    /// A value sharing already allocated info
    pub fn from_rc(number: ValueNumber, info: Rc<ValueInfo>) -> Self {
        Self { number, info }
    }

    /// The value number
    pub fn number(&self) -> ValueNumber {
        self.number
    }

    /// What is known about the value
    pub fn info(&self) -> &ValueInfo {
        &self.info
    }

    pub fn info_rc(&self) -> &Rc<ValueInfo> {
        &self.info
    }

    /// Same value number, different info
    pub fn with_info(&self, info: ValueInfo) -> Value {
        Value::new(self.number, info)
    }

    /// Mutable info, cloned first if it is shared
    pub fn info_mut(&mut self) -> &mut ValueInfo {
        Rc::make_mut(&mut self.info)
    }

    pub fn ty(&self) -> ValueType {
        self.info.ty()
    }

    /// Same number and an identical info
    pub fn is_equal_to(&self, other: &Value) -> bool {
        self.number == other.number
            && (Rc::ptr_eq(&self.info, &other.info) || *self.info == *other.info)
    }

    /// Same number and the very same info allocation
    pub fn is_same(&self, other: &Value) -> bool {
        self.number == other.number && Rc::ptr_eq(&self.info, &other.info)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}: {}", self.number, self.info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_constant_bounds() {
        let c = ValueInfo::int_constant(5);
        assert_eq!(c.int_constant_bounds(false), Some(IntConstantBounds::new(5, 5)));
        assert_eq!(c.int_constant_value(false), Some(5));

        let likely = ValueInfo::new(ValueType::LIKELY_INT);
        assert_eq!(likely.int_constant_bounds(false), None);
        assert_eq!(likely.int_constant_bounds(true), Some(IntConstantBounds::FULL));

        let s = ValueInfo::new(ValueType::STRING);
        assert_eq!(s.int_constant_bounds(true), None);
    }

    #[test]
    fn test_range_constant_collapses() {
        let r = ValueInfo::int_range(3, 3, false);
        assert!(r.has_int_constant_value());
        assert_eq!(
            ValueInfo::from_constant_bounds(IntConstantBounds::new(3, 3), false).kind(),
            &ValueInfoKind::IntConstant(3)
        );
    }

    #[test]
    fn test_specialize_to_int32() {
        let likely = ValueInfo::new(ValueType::LIKELY_INT).with_sym_store(Some(4));
        let spec = likely.specialize_to_int32();
        assert!(spec.is_int());
        assert!(spec.is_generic());
        assert_eq!(spec.sym_store(), Some(4));

        let mut bounds = IntBounds::new(IntConstantBounds::new(0, 10), false);
        bounds.set_upper_bound_constant(10, true);
        let bounded = ValueInfo::int_bounded(ValueType::LIKELY_INT, bounds, false);
        assert!(bounded.is_int_bounded());
        let spec = bounded.specialize_to_int32();
        assert!(spec.is_int());
        assert!(spec.is_int_bounded());
    }

    #[test]
    fn test_specialize_to_float64() {
        let likely = ValueInfo::new(ValueType::LIKELY_FLOAT);
        assert!(likely.specialize_to_float64().ty().is_number());
        let int = ValueInfo::int_constant(2);
        assert_eq!(int.specialize_to_float64(), int);
    }

    #[test]
    fn test_copy_on_write() {
        let a = Value::new(7, ValueInfo::new(ValueType::LIKELY_INT));
        let mut b = a.clone();
        b.info_mut().set_sym_store(Some(3));
        assert_eq!(a.info().sym_store(), None);
        assert_eq!(b.info().sym_store(), Some(3));
        assert!(!a.is_equal_to(&b));
    }

    #[test]
    fn test_array_info_dropped_when_empty() {
        let ty = ValueType::array(ObjectType::NativeIntArray, true);
        let info = ValueInfo::array(
            ty,
            ArrayInfo {
                head_segment_sym: Some(9),
                ..ArrayInfo::default()
            },
        );
        let stripped = info.with_array_info(ty, ArrayInfo::default());
        assert!(stripped.is_generic());
        assert_eq!(stripped.ty(), ty);
    }
}
