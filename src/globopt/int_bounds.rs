//! Int bounds
//!
//! [`IntBounds`] describe an int value by a constant range plus sets of relative
//! bounds of the form `base + offset`, where `base` is another value. Relative bounds
//! survive arithmetic by constants and loop back edges, which is what allows array
//! bound checks to be proven or hoisted without knowing concrete ranges.

use super::value_info::{Value, ValueNumber};
use crate::ir::{BailOutKind, BlockId, Instr, InstrId, Opnd, SymId, ValueType};
use std::collections::BTreeMap;
use std::fmt;

pub const INT_CONST_MIN: i32 = i32::MIN;
pub const INT_CONST_MAX: i32 = i32::MAX;

/// A concrete `[lower, upper]` int range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntConstantBounds {
    lower: i32,
    upper: i32,
}

impl IntConstantBounds {
    pub const FULL: IntConstantBounds = IntConstantBounds {
        lower: INT_CONST_MIN,
        upper: INT_CONST_MAX,
    };

    /// `[lower, upper]`; `lower` must not exceed `upper`
    pub fn new(lower: i32, upper: i32) -> Self {
        debug_assert!(lower <= upper);
        Self { lower, upper }
    }

    /// The single-value range `[value, value]`
    pub fn constant(value: i32) -> Self {
        Self {
            lower: value,
            upper: value,
        }
    }

    pub fn lower(&self) -> i32 {
        self.lower
    }

    pub fn upper(&self) -> i32 {
        self.upper
    }

    /// Whether the range holds exactly one value
    pub fn is_constant(&self) -> bool {
        self.lower == self.upper
    }

    /// Whether `value` is inside the range
    pub fn contains(&self, value: i32) -> bool {
        self.lower <= value && value <= self.upper
    }

    /// Narrower than `other` on at least one side
    pub fn is_tighter_than(&self, other: &IntConstantBounds) -> bool {
        self.lower > other.lower || self.upper < other.upper
    }

    /// Bounds of `x & 0x1f`, the effective shift amount
    pub fn and_0x1f(&self) -> IntConstantBounds {
        if self.lower >= 0 && self.upper <= 0x1f {
            *self
        } else if self.is_constant() {
            IntConstantBounds::constant(self.lower & 0x1f)
        } else {
            IntConstantBounds::new(0, 0x1f)
        }
    }

    /// Smallest range covering both
    pub fn union(&self, other: &IntConstantBounds) -> IntConstantBounds {
        IntConstantBounds::new(self.lower.min(other.lower), self.upper.max(other.upper))
    }

    /// Most specific type of an int in this range
    pub fn value_type(&self) -> ValueType {
        ValueType::INT
    }
}

impl fmt::Display for IntConstantBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// A bound of the form `base + offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRelativeOffset {
    base_value_number: ValueNumber,
    /// Sym holding the base value when the bound was established
    base_sym: Option<SymId>,
    offset: i32,
    was_established_explicitly: bool,
}

impl ValueRelativeOffset {
    /// A bound of `base + offset`
    pub fn new(base: &Value, offset: i32, was_established_explicitly: bool) -> Self {
        Self {
            base_value_number: base.number(),
            base_sym: base.info().sym_store(),
            offset,
            was_established_explicitly,
        }
    }

    pub fn base_value_number(&self) -> ValueNumber {
        self.base_value_number
    }

    /// Sym that held the base when the bound was made, if any
    pub fn base_sym(&self) -> Option<SymId> {
        self.base_sym
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Replace the offset from the base
    pub fn set_offset(&mut self, offset: i32) {
        self.offset = offset;
    }

    /// Whether a compare established this bound rather than arithmetic
    pub fn was_established_explicitly(&self) -> bool {
        self.was_established_explicitly
    }

    /// Mark the bound as established by a compare
    pub fn set_was_established_explicitly(&mut self) {
        self.was_established_explicitly = true;
    }

    /// Adjust the offset; false when it would overflow
    pub fn add(&mut self, n: i32) -> bool {
        match self.offset.checked_add(n) {
            Some(o) => {
                self.offset = o;
                true
            }
            None => false,
        }
    }

    /// Merge a bound on the same base. A conservative merge keeps the looser bound and
    /// an aggressive merge keeps the tighter one.
    pub fn merge(&mut self, other: &ValueRelativeOffset, lower: bool, aggressive: bool) {
        debug_assert_eq!(self.base_value_number, other.base_value_number);
        if self.base_sym.is_none() && other.base_sym.is_some() {
            self.base_sym = other.base_sym;
        }
        self.merge_constant_value(other.offset, lower, aggressive);
        if other.was_established_explicitly == aggressive {
            self.was_established_explicitly = aggressive;
        }
    }

    /// Merge an offset on the same base. See [`ValueRelativeOffset::merge`].
    pub fn merge_constant_value(&mut self, value: i32, lower: bool, aggressive: bool) {
        let take = if lower ^ aggressive {
            value < self.offset
        } else {
            value > self.offset
        };
        if take {
            self.offset = value;
        }
    }
}

impl fmt::Display for ValueRelativeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.base_value_number)?;
        if self.offset != 0 {
            write!(f, "{:+}", self.offset)?;
        }
        Ok(())
    }
}

pub type RelativeIntBoundSet = BTreeMap<ValueNumber, ValueRelativeOffset>;

/// Constant and relative bounds of an int value
#[derive(Debug, Clone, PartialEq)]
pub struct IntBounds {
    constant_lower_bound: i32,
    constant_upper_bound: i32,
    was_constant_upper_bound_established_explicitly: bool,
    relative_lower_bounds: RelativeIntBoundSet,
    relative_upper_bounds: RelativeIntBoundSet,
}

impl IntBounds {
    /// Bounds with only constant limits
    pub fn new(constant_bounds: IntConstantBounds, upper_explicit: bool) -> Self {
        Self {
            constant_lower_bound: constant_bounds.lower(),
            constant_upper_bound: constant_bounds.upper(),
            was_constant_upper_bound_established_explicitly: upper_explicit,
            relative_lower_bounds: RelativeIntBoundSet::new(),
            relative_upper_bounds: RelativeIntBoundSet::new(),
        }
    }

    /// Whether the bounds say anything beyond the full int32 range
    pub fn has_bounds(&self) -> bool {
        self.constant_lower_bound != INT_CONST_MIN
            || self.constant_upper_bound != INT_CONST_MAX
            || self.has_explicit_or_relative_bounds()
    }

    /// Whether an int value of type `ty` with these bounds needs the bounded info kind
    pub fn requires_int_bounded_value_info(&self, ty: ValueType) -> bool {
        debug_assert!(ty.is_likely_int());
        !ty.is_int() || self.has_explicit_or_relative_bounds()
    }

    /// An explicit upper bound or any relative bound
    pub fn has_explicit_or_relative_bounds(&self) -> bool {
        self.was_constant_upper_bound_established_explicitly
            || !self.relative_lower_bounds.is_empty()
            || !self.relative_upper_bounds.is_empty()
    }

    pub fn constant_lower_bound(&self) -> i32 {
        self.constant_lower_bound
    }

    pub fn constant_upper_bound(&self) -> i32 {
        self.constant_upper_bound
    }

    /// Constant limits as a range
    pub fn constant_bounds(&self) -> IntConstantBounds {
        IntConstantBounds::new(self.constant_lower_bound, self.constant_upper_bound)
    }

    pub fn was_constant_upper_bound_established_explicitly(&self) -> bool {
        self.was_constant_upper_bound_established_explicitly
    }

    /// Bounds of the form `value >= base + offset`, keyed by the base's value number
    pub fn relative_lower_bounds(&self) -> &RelativeIntBoundSet {
        &self.relative_lower_bounds
    }

    /// Bounds of the form `value <= base + offset`, keyed by the base's value number
    pub fn relative_upper_bounds(&self) -> &RelativeIntBoundSet {
        &self.relative_upper_bounds
    }

    /// Raise the constant lower bound; a looser or empty-making bound is ignored
    pub fn set_lower_bound_constant(&mut self, bound: i32) {
        if self.constant_lower_bound < bound && bound <= self.constant_upper_bound {
            self.constant_lower_bound = bound;
        }
    }

    /// Lower the constant upper bound; a looser bound is ignored
    pub fn set_upper_bound_constant(&mut self, bound: i32, was_established_explicitly: bool) {
        if self.constant_lower_bound <= bound && bound < self.constant_upper_bound {
            self.constant_upper_bound = bound;
        }
        if was_established_explicitly {
            self.was_constant_upper_bound_established_explicitly = true;
        }
    }

    /// Set a constant bound of `base + offset`, ignored when that overflows
    pub fn set_bound_constant_offset(
        &mut self,
        lower: bool,
        base: i32,
        offset: i32,
        was_established_explicitly: bool,
    ) {
        let bound = match base.checked_add(offset) {
            Some(b) => b,
            None => return,
        };
        if lower {
            self.set_lower_bound_constant(bound);
        } else {
            self.set_upper_bound_constant(bound, was_established_explicitly);
        }
    }

    /// Add `value >= base + offset`, also inheriting the base's own lower bounds
    pub fn set_lower_bound(
        &mut self,
        my_value_number: ValueNumber,
        base: &Value,
        offset: i32,
        was_established_explicitly: bool,
    ) {
        self.set_bound(true, my_value_number, base, offset, was_established_explicitly);
    }

    /// Add `value <= base + offset`, also inheriting the base's own upper bounds
    pub fn set_upper_bound(
        &mut self,
        my_value_number: ValueNumber,
        base: &Value,
        offset: i32,
        was_established_explicitly: bool,
    ) {
        self.set_bound(false, my_value_number, base, offset, was_established_explicitly);
    }

    fn set_bound(
        &mut self,
        lower: bool,
        my_value_number: ValueNumber,
        base: &Value,
        offset: i32,
        was_established_explicitly: bool,
    ) {
        debug_assert_ne!(base.number(), my_value_number);
        let base_info = base.info();
        let base_bounds = match base_info.int_constant_bounds(true) {
            Some(b) => b,
            None => return,
        };

        // Aggressively take the base's constant bound, adjusted by the offset.
        let constant_base = if lower {
            base_bounds.lower()
        } else {
            base_bounds.upper()
        };
        let is_bound_constant = base_info.has_int_constant_value();
        self.set_bound_constant_offset(
            lower,
            constant_base,
            offset,
            was_established_explicitly && is_bound_constant,
        );
        if is_bound_constant {
            return;
        }

        // Pull in the base's own relative bounds of the same direction.
        if let Some(bb) = base_info.int_bounds() {
            let source = if lower {
                &bb.relative_lower_bounds
            } else {
                &bb.relative_upper_bounds
            };
            for bound in source.values() {
                let mut bound = *bound;
                if bound.base_value_number() == my_value_number || !bound.add(offset) {
                    continue;
                }
                self.add_relative_bound(lower, bound);
            }
        }

        self.add_relative_bound(
            lower,
            ValueRelativeOffset::new(base, offset, was_established_explicitly),
        );
    }

    /// Add a relative bound unless it contradicts the opposite bound on the same base
    fn add_relative_bound(&mut self, lower: bool, bound: ValueRelativeOffset) {
        let (set, opposite) = if lower {
            (&mut self.relative_lower_bounds, &self.relative_upper_bounds)
        } else {
            (&mut self.relative_upper_bounds, &self.relative_lower_bounds)
        };
        if let Some(existing) = opposite.get(&bound.base_value_number()) {
            let contradicts = if lower {
                bound.offset() > existing.offset()
            } else {
                bound.offset() < existing.offset()
            };
            if contradicts {
                return;
            }
        }
        match set.get_mut(&bound.base_value_number()) {
            Some(existing) => existing.merge(&bound, lower, true),
            None => {
                set.insert(bound.base_value_number(), bound);
            }
        }
    }

    /// Exclude a constant at either end of the range
    pub fn set_is_not_constant(&mut self, value: i32, is_explicit: bool) -> bool {
        if self.constant_lower_bound == self.constant_upper_bound {
            return false;
        }
        if value == self.constant_lower_bound {
            self.constant_lower_bound += 1;
            return true;
        }
        if value == self.constant_upper_bound {
            self.constant_upper_bound -= 1;
            if is_explicit {
                self.was_constant_upper_bound_established_explicitly = true;
            }
            return true;
        }
        false
    }

    /// Record `self != value`, tightening an inclusive bound on `value` to an exclusive one
    pub fn set_is_not(&mut self, value: &Value, is_explicit: bool) -> bool {
        let info = value.info();
        let mut changed = false;
        if let Some(c) = info.int_constant_value(true) {
            changed = self.set_is_not_constant(c, is_explicit);
            if info.is_int() {
                return changed;
            }
        }

        let vn = value.number();
        let lower_is_zero = self
            .relative_lower_bounds
            .get(&vn)
            .map_or(false, |b| b.offset() == 0);
        let upper_is_zero = self
            .relative_upper_bounds
            .get(&vn)
            .map_or(false, |b| b.offset() == 0);
        if lower_is_zero == upper_is_zero {
            return changed;
        }
        if lower_is_zero {
            if let Some(b) = self.relative_lower_bounds.get_mut(&vn) {
                b.set_offset(1);
            }
        } else if let Some(b) = self.relative_upper_bounds.get_mut(&vn) {
            b.set_offset(-1);
            if is_explicit {
                b.set_was_established_explicitly();
            }
        }
        true
    }

    /// `value >= base + offset`, without overflowing
    pub fn is_constant_greater_than_or_equal_to(value: i32, base: i32, offset: i32) -> bool {
        if offset == 0 {
            return value >= base;
        }
        if offset == 1 {
            return value > base;
        }
        let bound = base.wrapping_add(offset);
        if offset >= 0 {
            bound >= base && value >= bound
        } else {
            bound >= base || value >= bound
        }
    }

    /// `value <= base + offset`, without overflowing
    pub fn is_constant_less_than_or_equal_to(value: i32, base: i32, offset: i32) -> bool {
        if offset == 0 {
            return value <= base;
        }
        if offset == -1 {
            return value < base;
        }
        let bound = base.wrapping_add(offset);
        if offset >= 0 {
            bound < base || value <= bound
        } else {
            bound < base && value <= bound
        }
    }

    /// Whether the constant lower bound is provably `>= base + offset`
    pub fn is_greater_than_or_equal_to_constant(&self, base: i32, offset: i32) -> bool {
        Self::is_constant_greater_than_or_equal_to(self.constant_lower_bound, base, offset)
    }

    /// Whether the constant upper bound is provably `<= base + offset`
    pub fn is_less_than_or_equal_to_constant(&self, base: i32, offset: i32) -> bool {
        Self::is_constant_less_than_or_equal_to(self.constant_upper_bound, base, offset)
    }

    /// Whether the bounded value is provably `>= value + offset`
    pub fn is_greater_than_or_equal_to(&self, value: &Value, offset: i32) -> bool {
        let info = value.info();
        let upper = match info.int_constant_upper_bound(true) {
            Some(u) => u,
            None => return false,
        };
        if self.is_greater_than_or_equal_to_constant(upper, offset) {
            return true;
        }
        if info.has_int_constant_value() {
            return false;
        }
        self.relative_lower_bounds
            .get(&value.number())
            .map_or(false, |b| b.offset() >= offset)
    }

    /// Whether the bounded value is provably `<= value + offset`
    pub fn is_less_than_or_equal_to(&self, value: &Value, offset: i32) -> bool {
        let info = value.info();
        let lower = match info.int_constant_lower_bound(true) {
            Some(l) => l,
            None => return false,
        };
        if self.is_less_than_or_equal_to_constant(lower, offset) {
            return true;
        }
        if info.has_int_constant_value() {
            return false;
        }
        self.relative_upper_bounds
            .get(&value.number())
            .map_or(false, |b| b.offset() <= offset)
    }

    /// Bounds of `base + n`. When the base info is not precise (a loop prepass, or a
    /// value from a previous iteration), relative bounds in the direction of change
    /// are dropped since the number of similar changes is unknown.
    pub fn add(
        base: &Value,
        n: i32,
        base_info_is_precise: bool,
        new_constant_bounds: IntConstantBounds,
    ) -> IntBounds {
        let base_info = base.info();
        debug_assert!(base_info.is_likely_int());
        let base_bounds = base_info.int_bounds();

        let mut upper_explicit = false;
        if let Some(bb) = base_bounds {
            if bb.was_constant_upper_bound_established_explicitly() {
                if let Some(adjusted) = bb.constant_upper_bound().checked_add(n) {
                    upper_explicit = adjusted == new_constant_bounds.upper();
                }
            }
        }

        let mut bounds = IntBounds::new(new_constant_bounds, upper_explicit);
        if let Some(bb) = base_bounds {
            if n >= 0 || base_info_is_precise {
                bounds.relative_lower_bounds = Self::offset_set(&bb.relative_lower_bounds, n);
            }
            if n <= 0 || base_info_is_precise {
                bounds.relative_upper_bounds = Self::offset_set(&bb.relative_upper_bounds, n);
            }
        }

        if base_info.has_int_constant_value() {
            return bounds;
        }
        let bound = ValueRelativeOffset::new(base, n, true);
        if n >= 0 || base_info_is_precise {
            bounds
                .relative_lower_bounds
                .insert(bound.base_value_number(), bound);
        }
        if n <= 0 || base_info_is_precise {
            bounds
                .relative_upper_bounds
                .insert(bound.base_value_number(), bound);
        }
        bounds
    }

    fn offset_set(set: &RelativeIntBoundSet, n: i32) -> RelativeIntBoundSet {
        set.iter()
            .filter_map(|(vn, bound)| {
                let mut bound = *bound;
                bound.add(n).then_some((*vn, bound))
            })
            .collect()
    }

    /// `x + n` cannot overflow because `x` is below some other int by at least `n`
    pub fn add_cannot_overflow_based_on_relative_bounds(&self, n: i32) -> bool {
        debug_assert_ne!(n, 0);
        if n >= 0 {
            let max_bound_offset = -n;
            return self
                .relative_upper_bounds
                .values()
                .any(|b| b.offset() <= max_bound_offset);
        }
        n != INT_CONST_MIN && self.sub_cannot_overflow_based_on_relative_bounds(-n)
    }

    /// `x - n` cannot overflow because `x` is above some other int by at least `n`
    pub fn sub_cannot_overflow_based_on_relative_bounds(&self, n: i32) -> bool {
        debug_assert_ne!(n, 0);
        if n >= 0 {
            return self
                .relative_lower_bounds
                .values()
                .any(|b| b.offset() >= n);
        }
        n != INT_CONST_MIN && self.add_cannot_overflow_based_on_relative_bounds(-n)
    }

    /// Merge bounds with a value that only has constant bounds
    pub fn merge_with_constant_bounds(
        bounds0_value: &Value,
        bounds0: &IntBounds,
        bounds1_value: &Value,
        constant_bounds1: IntConstantBounds,
    ) -> Option<IntBounds> {
        let constant_bounds = IntConstantBounds::new(
            bounds0.constant_lower_bound.min(constant_bounds1.lower()),
            bounds0.constant_upper_bound.max(constant_bounds1.upper()),
        );
        let vn1 = bounds1_value.number();
        let common_lower = bounds0.relative_lower_bounds.get(&vn1);
        let common_upper = bounds0.relative_upper_bounds.get(&vn1);
        if constant_bounds == IntConstantBounds::FULL
            && common_lower.is_none()
            && common_upper.is_none()
        {
            return None;
        }

        let mut merged = IntBounds::new(constant_bounds, false);
        if bounds0_value.number() == vn1 {
            return Some(merged);
        }
        if let Some(common) = common_lower {
            let mut bound = *common;
            if constant_bounds1.is_constant() {
                bound.merge_constant_value(constant_bounds1.lower(), true, false);
            } else {
                bound.merge(&ValueRelativeOffset::new(bounds1_value, 0, true), true, false);
            }
            merged.relative_lower_bounds.insert(vn1, bound);
        }
        if let Some(common) = common_upper {
            let mut bound = *common;
            if constant_bounds1.is_constant() {
                bound.merge_constant_value(constant_bounds1.lower(), false, false);
            } else {
                bound.merge(&ValueRelativeOffset::new(bounds1_value, 0, true), false, false);
            }
            merged.relative_upper_bounds.insert(vn1, bound);
        }
        Some(merged)
    }

    /// Conservative merge of two bounded values
    pub fn merge(
        bounds0_value: &Value,
        bounds0: &IntBounds,
        bounds1_value: &Value,
        bounds1: &IntBounds,
    ) -> Option<IntBounds> {
        if bounds0 == bounds1 {
            return Some(bounds0.clone());
        }
        let mut merged = IntBounds::new(
            IntConstantBounds::new(
                bounds0.constant_lower_bound.min(bounds1.constant_lower_bound),
                bounds0.constant_upper_bound.max(bounds1.constant_upper_bound),
            ),
            bounds0.was_constant_upper_bound_established_explicitly
                && bounds1.was_constant_upper_bound_established_explicitly,
        );
        merged.relative_lower_bounds = Self::merge_bound_sets(
            true,
            bounds0_value,
            &bounds0.relative_lower_bounds,
            bounds1_value,
            &bounds1.relative_lower_bounds,
        );
        merged.relative_upper_bounds = Self::merge_bound_sets(
            false,
            bounds0_value,
            &bounds0.relative_upper_bounds,
            bounds1_value,
            &bounds1.relative_upper_bounds,
        );
        merged.has_bounds().then_some(merged)
    }

    fn merge_bound_sets(
        lower: bool,
        bounds0_value: &Value,
        set0: &RelativeIntBoundSet,
        bounds1_value: &Value,
        set1: &RelativeIntBoundSet,
    ) -> RelativeIntBoundSet {
        let mut merged = RelativeIntBoundSet::new();
        let (iterate_over, look_up_in) = if set0.len() <= set1.len() {
            (set0, set1)
        } else {
            (set1, set0)
        };
        for (vn, bound) in iterate_over {
            if let Some(other) = look_up_in.get(vn) {
                let mut m = *bound;
                m.merge(other, lower, false);
                merged.insert(*vn, m);
            }
        }

        // A value is implicitly bounded by itself.
        let vn0 = bounds0_value.number();
        let vn1 = bounds1_value.number();
        if vn0 == vn1 {
            return merged;
        }
        if let Some(bound) = set0.get(&vn1) {
            let mut m = ValueRelativeOffset::new(bounds1_value, 0, true);
            m.merge(bound, lower, false);
            merged.insert(vn1, m);
        }
        if let Some(bound) = set1.get(&vn0) {
            let mut m = ValueRelativeOffset::new(bounds0_value, 0, true);
            m.merge(bound, lower, false);
            merged.insert(vn0, m);
        }
        merged
    }
}

impl fmt::Display for IntBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.constant_lower_bound, self.constant_upper_bound
        )?;
        for b in self.relative_lower_bounds.values() {
            write!(f, " >={}", b)?;
        }
        for b in self.relative_upper_bounds.values() {
            write!(f, " <={}", b)?;
        }
        Ok(())
    }
}

/// Key of an available bound check: `left <= right + offset` for the two value numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntBoundCheckCompatibilityId {
    pub left_value_number: ValueNumber,
    pub right_value_number: ValueNumber,
}

impl IntBoundCheckCompatibilityId {
    pub fn new(left_value_number: ValueNumber, right_value_number: ValueNumber) -> Self {
        Self {
            left_value_number,
            right_value_number,
        }
    }
}

/// A `BoundCheck` instruction that is still available for reuse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntBoundCheck {
    pub left_value_number: ValueNumber,
    pub right_value_number: ValueNumber,
    pub instr: InstrId,
    pub block: BlockId,
}

impl IntBoundCheck {
    /// A check of `left <= right` emitted as `instr` in `block`
    pub fn new(left: ValueNumber, right: ValueNumber, instr: InstrId, block: BlockId) -> Self {
        Self {
            left_value_number: left,
            right_value_number: right,
            instr,
            block,
        }
    }

    /// Key matching checks of the same pair of values
    pub fn compatibility_id(&self) -> IntBoundCheckCompatibilityId {
        IntBoundCheckCompatibilityId::new(self.left_value_number, self.right_value_number)
    }
}

/// Tighten an existing `src1 <= src2 + offset` check so it also covers `offset`.
/// The offset may only decrease; a larger offset is already implied. Returns false
/// when the check cannot be adjusted without overflow.
pub fn set_bound_offset(instr: &mut Instr, offset: i32, is_loop_count_based_bound: bool) -> bool {
    let mut previous_offset = instr.bound_offset;
    let src1_const = instr.src1.as_ref().and_then(Opnd::int_const);
    if let Some(c) = src1_const {
        previous_offset = match previous_offset.checked_sub(c) {
            Some(o) => o,
            None => return false,
        };
    }
    if let Some(c) = instr.src2.as_ref().and_then(Opnd::int_const) {
        previous_offset = match previous_offset.checked_add(c) {
            Some(o) => o,
            None => return false,
        };
    }

    if offset >= previous_offset {
        return true;
    }
    let decrease = match previous_offset.checked_sub(offset) {
        Some(d) => d,
        None => return false,
    };

    if let Some(c) = src1_const {
        // Prefer raising src1, the index side of an upper bound check.
        match c.checked_add(decrease) {
            Some(v) => instr.src1 = Some(Opnd::IntConst(v)),
            None => return false,
        }
    } else {
        match instr.bound_offset.checked_sub(decrease) {
            Some(v) => instr.bound_offset = v,
            None => return false,
        }
    }

    let kind = instr.bailout_kind();
    let hoisted = if kind.contains(BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK) {
        BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK
    } else if kind.contains(BailOutKind::ON_FAILED_HOISTED_BOUND_CHECK) && !is_loop_count_based_bound {
        BailOutKind::ON_FAILED_HOISTED_BOUND_CHECK
    } else if is_loop_count_based_bound {
        BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK
    } else {
        BailOutKind::ON_FAILED_HOISTED_BOUND_CHECK
    };
    if let Some(info) = instr.bailout.as_mut() {
        info.kind = hoisted;
        info.is_post_op = false;
    } else {
        instr.add_bailout_kind(hoisted);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globopt::value_info::ValueInfo;
    use crate::ir::Opcode;

    fn likely_int(vn: ValueNumber) -> Value {
        Value::new(vn, ValueInfo::new(ValueType::LIKELY_INT).with_sym_store(Some(vn)))
    }

    #[test]
    fn test_constant_comparisons_do_not_overflow() {
        assert!(IntBounds::is_constant_greater_than_or_equal_to(5, 4, 1));
        assert!(!IntBounds::is_constant_greater_than_or_equal_to(
            i32::MAX,
            i32::MAX,
            1
        ));
        assert!(IntBounds::is_constant_greater_than_or_equal_to(
            i32::MIN,
            i32::MIN,
            -1
        ));
        assert!(IntBounds::is_constant_less_than_or_equal_to(
            i32::MAX,
            i32::MAX,
            1
        ));
        assert!(!IntBounds::is_constant_less_than_or_equal_to(
            i32::MIN,
            i32::MIN,
            -1
        ));
    }

    #[test]
    fn test_set_relative_bound() {
        let len = likely_int(10);
        let mut bounds = IntBounds::new(IntConstantBounds::new(0, INT_CONST_MAX), false);
        bounds.set_upper_bound(20, &len, -1, true);
        assert!(bounds.is_less_than_or_equal_to(&len, -1));
        assert!(bounds.is_less_than_or_equal_to(&len, 0));
        assert!(!bounds.is_less_than_or_equal_to(&len, -2));
        assert!(bounds.has_explicit_or_relative_bounds());
    }

    #[test]
    fn test_contradicting_bound_ignored() {
        let base = likely_int(3);
        let mut bounds = IntBounds::new(IntConstantBounds::FULL, false);
        bounds.set_upper_bound(9, &base, 0, false);
        bounds.set_lower_bound(9, &base, 1, false);
        assert!(bounds.relative_lower_bounds().is_empty());
    }

    #[test]
    fn test_set_is_not_makes_bound_exclusive() {
        let base = likely_int(3);
        let mut bounds = IntBounds::new(IntConstantBounds::FULL, false);
        bounds.set_upper_bound(9, &base, 0, false);
        assert!(bounds.set_is_not(&base, true));
        assert_eq!(bounds.relative_upper_bounds()[&3].offset(), -1);
    }

    #[test]
    fn test_add_keeps_relationship() {
        let i = likely_int(4);
        let bounds = IntBounds::add(&i, 1, true, IntConstantBounds::FULL);
        assert_eq!(bounds.relative_lower_bounds()[&4].offset(), 1);
        assert_eq!(bounds.relative_upper_bounds()[&4].offset(), 1);

        // Imprecise base: an increase cannot bound from above.
        let bounds = IntBounds::add(&i, 1, false, IntConstantBounds::FULL);
        assert!(bounds.relative_upper_bounds().is_empty());
        assert!(!bounds.add_cannot_overflow_based_on_relative_bounds(1));
    }

    #[test]
    fn test_add_cannot_overflow() {
        let len = likely_int(2);
        let mut bounds = IntBounds::new(IntConstantBounds::FULL, false);
        bounds.set_upper_bound(5, &len, -1, true);
        assert!(bounds.add_cannot_overflow_based_on_relative_bounds(1));
        assert!(!bounds.add_cannot_overflow_based_on_relative_bounds(2));
    }

    #[test]
    fn test_merge_keeps_common_relative_bounds() {
        let len = likely_int(2);
        let a = likely_int(5);
        let b = likely_int(6);
        let mut b0 = IntBounds::new(IntConstantBounds::new(0, 10), false);
        b0.set_upper_bound(5, &len, -1, true);
        let mut b1 = IntBounds::new(IntConstantBounds::new(3, 20), false);
        b1.set_upper_bound(6, &len, -3, true);
        let merged = IntBounds::merge(&a, &b0, &b, &b1).unwrap();
        assert_eq!(merged.constant_bounds(), IntConstantBounds::new(0, 20));
        assert_eq!(merged.relative_upper_bounds()[&2].offset(), -1);
    }

    #[test]
    fn test_merge_with_unbounded_drops() {
        let a = likely_int(5);
        let b = likely_int(6);
        let b0 = IntBounds::new(IntConstantBounds::new(0, 10), true);
        assert!(
            IntBounds::merge_with_constant_bounds(&a, &b0, &b, IntConstantBounds::FULL).is_none()
        );
    }

    #[test]
    fn test_set_bound_offset_decreases_only() {
        let mut instr = Instr::new(1, Opcode::BoundCheck)
            .with_src1(Opnd::reg(1))
            .with_src2(Opnd::reg(2));
        instr.bound_offset = -1;
        assert!(set_bound_offset(&mut instr, 0, false));
        assert_eq!(instr.bound_offset, -1);
        assert!(set_bound_offset(&mut instr, -3, true));
        assert_eq!(instr.bound_offset, -3);
        assert_eq!(
            instr.bailout_kind(),
            BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK
        );
    }
}
