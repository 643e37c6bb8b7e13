//! Induction variables
//!
//! During a loop prepass every `i = i + c` on a var sym updates the loop's record of
//! how much `i` changes per iteration. Any other definition inside the loop makes the
//! change indeterminate.

use super::int_bounds::{IntConstantBounds, INT_CONST_MAX, INT_CONST_MIN};
use super::value_info::ValueNumber;
use crate::ir::SymId;
use rustc_hash::FxHashMap as HashMap;

/// Per-iteration change magnitude above which loop-count-based hoisting is not attempted
pub const CHANGE_MAGNITUDE_LIMIT_FOR_LOOP_COUNT_BASED_HOISTING: i32 = 64 << 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InductionVariable {
    sym: SymId,
    sym_value_number: ValueNumber,
    change_bounds: IntConstantBounds,
    is_change_determinate: bool,
}

impl InductionVariable {
    /// A sym changing by exactly `change` on each iteration so far
    pub fn new(sym: SymId, sym_value_number: ValueNumber, change: i32) -> Self {
        Self {
            sym,
            sym_value_number,
            change_bounds: IntConstantBounds::constant(change),
            is_change_determinate: true,
        }
    }

    /// The induction variable
    pub fn sym(&self) -> SymId {
        self.sym
    }

    /// Value of the sym at the point the change was last recorded
    pub fn sym_value_number(&self) -> ValueNumber {
        debug_assert!(self.is_change_determinate);
        self.sym_value_number
    }

    pub fn set_sym_value_number(&mut self, vn: ValueNumber) {
        self.sym_value_number = vn;
    }

    /// Whether every change seen was by a known constant
    pub fn is_change_determinate(&self) -> bool {
        self.is_change_determinate
    }

    /// Some change was not a constant; the variable stops being useful for bounds
    pub fn set_change_is_indeterminate(&mut self) {
        self.is_change_determinate = false;
    }

    /// Range of the per-iteration change
    pub fn change_bounds(&self) -> IntConstantBounds {
        debug_assert!(self.is_change_determinate);
        self.change_bounds
    }

    /// The value only ever moves in one direction, and does move
    pub fn is_change_unidirectional(&self) -> bool {
        let b = self.change_bounds;
        (b.lower() >= 0 && b.upper() != 0) || (b.upper() <= 0 && b.lower() != 0)
    }

    /// Accumulate another change of `n` within the same iteration
    pub fn add(&mut self, n: i32) -> bool {
        debug_assert!(self.is_change_determinate);
        if n == 0 {
            return true;
        }
        let lower = match self.add_to_bound(self.change_bounds.lower(), n) {
            Some(l) => l,
            None => return false,
        };
        let upper = match self.add_to_bound(self.change_bounds.upper(), n) {
            Some(u) => u,
            None => return false,
        };
        self.change_bounds = IntConstantBounds::new(lower, upper);
        true
    }

    /// Saturating bound adjustment; a saturated bound moving back makes the change indeterminate
    fn add_to_bound(&mut self, bound: i32, n: i32) -> Option<i32> {
        if bound == INT_CONST_MIN {
            if n >= 0 {
                self.is_change_determinate = false;
                return None;
            }
            return Some(INT_CONST_MIN);
        }
        if bound == INT_CONST_MAX {
            if n < 0 {
                self.is_change_determinate = false;
                return None;
            }
            return Some(INT_CONST_MAX);
        }
        Some(bound.checked_add(n).unwrap_or(if n < 0 {
            INT_CONST_MIN
        } else {
            INT_CONST_MAX
        }))
    }

    /// An inner loop may repeat its change any number of times
    pub fn expand_inner_loop_change(&mut self) {
        if !self.is_change_determinate {
            return;
        }
        let b = self.change_bounds;
        self.change_bounds = IntConstantBounds::new(
            if b.lower() < 0 { INT_CONST_MIN } else { b.lower() },
            if b.upper() > 0 { INT_CONST_MAX } else { b.upper() },
        );
    }

    /// Merge the changes observed along two paths through the loop body
    pub fn merge(&mut self, other: &InductionVariable) {
        debug_assert_eq!(self.sym, other.sym);
        self.is_change_determinate &= other.is_change_determinate;
        if !self.is_change_determinate {
            return;
        }
        self.change_bounds = self.change_bounds.union(&other.change_bounds);
    }
}

/// Induction variables of a loop, keyed by var sym
pub type InductionVariableSet = HashMap<SymId, InductionVariable>;

/// Merge induction variable sets at a join inside a loop. A sym changed on only one
/// path keeps its recorded change merged with zero.
pub fn merge_induction_variable_sets(
    into: &mut InductionVariableSet,
    other: &InductionVariableSet,
) {
    for (sym, iv) in into.iter_mut() {
        match other.get(sym) {
            Some(o) => iv.merge(o),
            None => {
                if iv.is_change_determinate() {
                    let zero = InductionVariable::new(*sym, iv.sym_value_number, 0);
                    iv.merge(&zero);
                }
            }
        }
    }
    for (sym, o) in other {
        if !into.contains_key(sym) {
            let mut iv = o.clone();
            if iv.is_change_determinate() {
                let zero = InductionVariable::new(*sym, iv.sym_value_number, 0);
                iv.merge(&zero);
            }
            into.insert(*sym, iv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_accumulates() {
        let mut iv = InductionVariable::new(1, 5, 1);
        assert!(iv.add(2));
        assert_eq!(iv.change_bounds(), IntConstantBounds::constant(3));
        assert!(iv.is_change_unidirectional());
    }

    #[test]
    fn test_saturated_then_reversed_is_indeterminate() {
        let mut iv = InductionVariable::new(1, 5, 1);
        iv.expand_inner_loop_change();
        assert_eq!(iv.change_bounds(), IntConstantBounds::new(1, INT_CONST_MAX));
        assert!(!iv.add(-1));
        assert!(!iv.is_change_determinate());
    }

    #[test]
    fn test_merge_widens() {
        let mut a = InductionVariable::new(1, 5, 1);
        let b = InductionVariable::new(1, 6, 3);
        a.merge(&b);
        assert_eq!(a.change_bounds(), IntConstantBounds::new(1, 3));
        let mut c = InductionVariable::new(1, 5, -1);
        c.merge(&a);
        assert!(!c.is_change_unidirectional());
    }

    #[test]
    fn test_merge_sets_with_missing_path() {
        let mut a = InductionVariableSet::default();
        a.insert(1, InductionVariable::new(1, 5, 2));
        let b = InductionVariableSet::default();
        merge_induction_variable_sets(&mut a, &b);
        assert_eq!(a[&1].change_bounds(), IntConstantBounds::new(0, 2));
        assert!(a[&1].is_change_unidirectional());
    }
}
