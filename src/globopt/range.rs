//! Int32 result ranges of arithmetic
//!
//! Given the constant bounds of the sources, compute the bounds of an int32 result and
//! whether the exact result may leave the int32 range or be -0. Type specialization
//! uses this to decide which bailouts an int32 form needs.

use super::int_bounds::IntConstantBounds;
use crate::ir::Opcode;

/// Bounds of an int32 operation's result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeResult {
    /// Result bounds, clamped to int32
    pub bounds: IntConstantBounds,
    /// Some inputs produce a result outside int32
    pub may_overflow: bool,
    /// Every input produces a result outside int32
    pub always_overflows: bool,
    pub may_be_negative_zero: bool,
}

impl RangeResult {
    fn exact(lower: i64, upper: i64) -> Self {
        let min = i32::MIN as i64;
        let max = i32::MAX as i64;
        let may_overflow = lower < min || upper > max;
        let always_overflows = lower > max || upper < min;
        let bounds = if always_overflows {
            IntConstantBounds::FULL
        } else {
            IntConstantBounds::new(lower.clamp(min, max) as i32, upper.clamp(min, max) as i32)
        };
        Self {
            bounds,
            may_overflow,
            always_overflows,
            may_be_negative_zero: false,
        }
    }

    fn full() -> Self {
        Self::exact(i32::MIN as i64, i32::MAX as i64)
    }

    fn with_negative_zero(mut self, may_be_negative_zero: bool) -> Self {
        self.may_be_negative_zero = may_be_negative_zero;
        self
    }
}

fn lo(b: &IntConstantBounds) -> i64 {
    b.lower() as i64
}

fn hi(b: &IntConstantBounds) -> i64 {
    b.upper() as i64
}

/// Smallest all-ones mask covering `x` (x >= 0)
fn covering_mask(x: i64) -> i64 {
    let mut mask = 0i64;
    while mask < x {
        mask = (mask << 1) | 1;
    }
    mask
}

/// Result range of a binary op (dynamic or int32 form) on int32 sources
pub fn binary_range(
    opcode: Opcode,
    src1: IntConstantBounds,
    src2: IntConstantBounds,
) -> Option<RangeResult> {
    let (l1, u1, l2, u2) = (lo(&src1), hi(&src1), lo(&src2), hi(&src2));
    let result = match opcode.to_var_opcode() {
        Opcode::Add => RangeResult::exact(l1 + l2, u1 + u2),
        Opcode::Sub => RangeResult::exact(l1 - u2, u1 - l2),
        Opcode::Mul => {
            let corners = [l1 * l2, l1 * u2, u1 * l2, u1 * u2];
            let lower = corners.iter().copied().min().unwrap_or(0);
            let upper = corners.iter().copied().max().unwrap_or(0);
            let negative_zero =
                (src1.contains(0) && l2 < 0) || (src2.contains(0) && l1 < 0);
            RangeResult::exact(lower, upper).with_negative_zero(negative_zero)
        }
        Opcode::Div => {
            let divisors: Vec<i64> = [l2, u2, -1, 1]
                .into_iter()
                .filter(|&d| d != 0 && d >= l2 && d <= u2)
                .collect();
            if divisors.is_empty() {
                return None;
            }
            let quotients: Vec<i64> = divisors
                .iter()
                .flat_map(|&d| [l1 / d, u1 / d])
                .collect();
            let lower = quotients.iter().copied().min().unwrap_or(0);
            let upper = quotients.iter().copied().max().unwrap_or(0);
            let negative_zero = src1.contains(0) && l2 < 0;
            RangeResult::exact(lower, upper).with_negative_zero(negative_zero)
        }
        Opcode::Rem => {
            let max_divisor = l2.abs().max(u2.abs());
            if max_divisor == 0 {
                return None;
            }
            let magnitude = max_divisor - 1;
            let lower = if l1 >= 0 { 0 } else { l1.max(-magnitude) };
            let upper = if u1 <= 0 { 0 } else { u1.min(magnitude) };
            RangeResult::exact(lower, upper).with_negative_zero(l1 < 0)
        }
        Opcode::And => {
            let uppers: Vec<i64> = [(l1, u1), (l2, u2)]
                .into_iter()
                .filter(|(l, _)| *l >= 0)
                .map(|(_, u)| u)
                .collect();
            match uppers.iter().copied().min() {
                Some(upper) => RangeResult::exact(0, upper),
                None => RangeResult::full(),
            }
        }
        Opcode::Or => {
            if l1 >= 0 && l2 >= 0 {
                RangeResult::exact(l1.max(l2), covering_mask(u1.max(u2)))
            } else {
                RangeResult::full()
            }
        }
        Opcode::Xor => {
            if l1 >= 0 && l2 >= 0 {
                RangeResult::exact(0, covering_mask(u1.max(u2)))
            } else {
                RangeResult::full()
            }
        }
        Opcode::Shl => {
            let shift = src2.and_0x1f();
            if shift.is_constant() {
                let s = shift.lower() as u32;
                let (lower, upper) = (l1 << s, u1 << s);
                if lower >= i32::MIN as i64 && upper <= i32::MAX as i64 {
                    return Some(RangeResult::exact(lower, upper));
                }
            }
            RangeResult::full()
        }
        Opcode::Shr => {
            let shift = src2.and_0x1f();
            let (smin, smax) = (shift.lower() as u32, shift.upper() as u32);
            if l1 >= 0 {
                RangeResult::exact(l1 >> smax, u1 >> smin)
            } else if u1 < 0 {
                RangeResult::exact(l1 >> smin, u1 >> smax)
            } else {
                RangeResult::exact(l1 >> smin, u1 >> smin)
            }
        }
        Opcode::ShrU => {
            let shift = src2.and_0x1f();
            let (smin, smax) = (shift.lower() as u32, shift.upper() as u32);
            if l1 >= 0 {
                RangeResult::exact(l1 >> smax, u1 >> smin)
            } else if smin > 0 {
                RangeResult::exact(0, (u32::MAX >> smin) as i64)
            } else {
                // A negative value shifted by zero reinterprets as a uint32 above int32 max.
                let mut r = RangeResult::exact(0, u32::MAX as i64);
                r.always_overflows = u1 < 0 && smax == 0;
                if r.always_overflows {
                    r.bounds = IntConstantBounds::FULL;
                }
                r
            }
        }
        Opcode::InlineMathMin => RangeResult::exact(l1.min(l2), u1.min(u2)),
        Opcode::InlineMathMax => RangeResult::exact(l1.max(l2), u1.max(u2)),
        _ => return None,
    };
    Some(result)
}

/// Result range of a unary op on an int32 source
pub fn unary_range(opcode: Opcode, src: IntConstantBounds) -> Option<RangeResult> {
    let (l, u) = (lo(&src), hi(&src));
    let result = match opcode.to_var_opcode() {
        Opcode::Neg => RangeResult::exact(-u, -l).with_negative_zero(src.contains(0)),
        Opcode::Not => RangeResult::exact(!u, !l),
        Opcode::Incr => RangeResult::exact(l + 1, u + 1),
        Opcode::Decr => RangeResult::exact(l - 1, u - 1),
        Opcode::ConvNum | Opcode::InlineMathFloor | Opcode::InlineMathCeil => {
            RangeResult::exact(l, u)
        }
        Opcode::InlineMathAbs => {
            if l >= 0 {
                RangeResult::exact(l, u)
            } else if u <= 0 {
                RangeResult::exact(-u, -l)
            } else {
                RangeResult::exact(0, (-l).max(u))
            }
        }
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn b(l: i32, u: i32) -> IntConstantBounds {
        IntConstantBounds::new(l, u)
    }

    #[test]
    fn test_add_overflow() {
        let r = binary_range(Opcode::Add, b(0, i32::MAX), b(1, 1)).unwrap();
        assert!(r.may_overflow);
        assert!(!r.always_overflows);
        assert_eq!(r.bounds, b(1, i32::MAX));

        let r = binary_range(Opcode::AddI4, b(0, 10), b(1, 1)).unwrap();
        assert!(!r.may_overflow);
        assert_eq!(r.bounds, b(1, 11));

        let r = binary_range(Opcode::Add, b(i32::MAX, i32::MAX), b(1, 1)).unwrap();
        assert!(r.always_overflows);
    }

    #[test]
    fn test_mul_negative_zero() {
        let r = binary_range(Opcode::Mul, b(0, 5), b(-3, 3)).unwrap();
        assert!(r.may_be_negative_zero);
        assert_eq!(r.bounds, b(-15, 15));
        let r = binary_range(Opcode::Mul, b(1, 5), b(1, 3)).unwrap();
        assert!(!r.may_be_negative_zero);
    }

    #[test]
    fn test_min_int_negation_overflows() {
        let r = unary_range(Opcode::Neg, b(i32::MIN, 0)).unwrap();
        assert!(r.may_overflow);
        assert!(r.may_be_negative_zero);
        let r = unary_range(Opcode::InlineMathAbs, b(-7, 3)).unwrap();
        assert_eq!(r.bounds, b(0, 7));
    }

    #[test]
    fn test_shr_u_of_negative() {
        let r = binary_range(Opcode::ShrU, b(-1, -1), b(0, 0)).unwrap();
        assert!(r.always_overflows);
        let r = binary_range(Opcode::ShrU, b(-8, 8), b(1, 1)).unwrap();
        assert!(!r.may_overflow);
        assert_eq!(r.bounds, b(0, i32::MAX));
    }

    #[test]
    fn test_division_by_zero_only_has_no_range() {
        assert_eq!(binary_range(Opcode::Div, b(1, 2), b(0, 0)), None);
    }

    /// Every concrete result of sampled inputs lies inside the computed range, or the
    /// range reports that it may overflow.
    #[test]
    fn test_sampled_results_within_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let ops = [
            Opcode::Add,
            Opcode::Sub,
            Opcode::Mul,
            Opcode::And,
            Opcode::Or,
            Opcode::Xor,
            Opcode::Shr,
            Opcode::InlineMathMin,
            Opcode::InlineMathMax,
        ];
        for _ in 0..2000 {
            let op = ops[rng.gen_range(0..ops.len())];
            let (a0, a1) = (rng.gen_range(-1000..1000), rng.gen_range(-1000..1000));
            let (c0, c1) = (rng.gen_range(-40..40), rng.gen_range(-40..40));
            let r1 = b(a0.min(a1), a0.max(a1));
            let r2 = b(c0.min(c1), c0.max(c1));
            let range = binary_range(op, r1, r2).unwrap();
            let x = rng.gen_range(r1.lower()..=r1.upper());
            let y = rng.gen_range(r2.lower()..=r2.upper());
            let exact: i64 = match op {
                Opcode::Add => x as i64 + y as i64,
                Opcode::Sub => x as i64 - y as i64,
                Opcode::Mul => x as i64 * y as i64,
                Opcode::And => (x & y) as i64,
                Opcode::Or => (x | y) as i64,
                Opcode::Xor => (x ^ y) as i64,
                Opcode::Shr => (x >> (y & 0x1f)) as i64,
                Opcode::InlineMathMin => x.min(y) as i64,
                _ => x.max(y) as i64,
            };
            assert!(
                range.may_overflow || range.bounds.contains(exact as i32),
                "{:?} {} {} -> {} not in {}",
                op,
                x,
                y,
                exact,
                range.bounds
            );
        }
    }
}
