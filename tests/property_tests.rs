//! Sampled soundness properties of range arithmetic and value merging

use globopt::globopt::int_bounds::IntConstantBounds;
use globopt::globopt::merge_value_infos;
use globopt::globopt::range::{binary_range, unary_range};
use globopt::globopt::value_info::{Value, ValueInfo};
use globopt::ir::{ObjectType, Opcode, ValueType};
use rand::{rngs::StdRng, Rng, SeedableRng};

const SAMPLES: usize = 10_000;

/// A random int32 range whose width varies from a few values to all of int32
fn random_range(rng: &mut StdRng) -> IntConstantBounds {
    let scale: i64 = match rng.gen_range(0..4) {
        0 => 8,
        1 => 1000,
        2 => 1 << 20,
        _ => i32::MAX as i64,
    };
    let a = rng.gen_range(-scale..=scale).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    let b = rng.gen_range(-scale..=scale).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    IntConstantBounds::new(a.min(b), a.max(b))
}

fn sample(rng: &mut StdRng, r: &IntConstantBounds) -> i32 {
    rng.gen_range(r.lower()..=r.upper())
}

/// The exact result of `x op y`, or None when an int32 form would bail out no matter
/// what the range says
fn exact_binary(op: Opcode, x: i32, y: i32) -> Option<i64> {
    let (a, b) = (x as i64, y as i64);
    Some(match op {
        Opcode::Add => a + b,
        Opcode::Sub => a - b,
        Opcode::Mul => a * b,
        Opcode::Div => {
            if b == 0 || a % b != 0 {
                return None;
            }
            a / b
        }
        Opcode::Rem => {
            if b == 0 {
                return None;
            }
            a % b
        }
        Opcode::And => (x & y) as i64,
        Opcode::Or => (x | y) as i64,
        Opcode::Xor => (x ^ y) as i64,
        Opcode::Shl => x.wrapping_shl((y & 0x1f) as u32) as i64,
        Opcode::Shr => (x >> (y & 0x1f)) as i64,
        Opcode::ShrU => ((x as u32) >> (y & 0x1f)) as i64,
        Opcode::InlineMathMin => a.min(b),
        Opcode::InlineMathMax => a.max(b),
        _ => return None,
    })
}

fn is_negative_zero(op: Opcode, x: i32, y: i32) -> bool {
    match op {
        Opcode::Mul => (x == 0 && y < 0) || (y == 0 && x < 0),
        Opcode::Div => x == 0 && y < 0,
        Opcode::Rem => y != 0 && x < 0 && x % y == 0,
        _ => false,
    }
}

mod range_arithmetic {
    use super::*;

    #[test]
    fn test_sampled_binary_results_fall_in_range() {
        let ops = [
            Opcode::Add,
            Opcode::Sub,
            Opcode::Mul,
            Opcode::Div,
            Opcode::Rem,
            Opcode::And,
            Opcode::Or,
            Opcode::Xor,
            Opcode::Shl,
            Opcode::Shr,
            Opcode::ShrU,
            Opcode::InlineMathMin,
            Opcode::InlineMathMax,
        ];
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..SAMPLES {
            let op = ops[rng.gen_range(0..ops.len())];
            let (r1, r2) = (random_range(&mut rng), random_range(&mut rng));
            let Some(range) = binary_range(op, r1, r2) else {
                continue;
            };
            let (x, y) = (sample(&mut rng, &r1), sample(&mut rng, &r2));
            let Some(exact) = exact_binary(op, x, y) else {
                continue;
            };
            let in_range = exact >= range.bounds.lower() as i64 && exact <= range.bounds.upper() as i64;
            assert!(
                in_range || range.may_overflow,
                "{:?} {} {} = {} outside {} for {} and {}",
                op,
                x,
                y,
                exact,
                range.bounds,
                r1,
                r2
            );
            if is_negative_zero(op, x, y) {
                assert!(range.may_be_negative_zero, "{:?} {} {} is -0 for {} and {}", op, x, y, r1, r2);
            }
        }
    }

    #[test]
    fn test_sampled_unary_results_fall_in_range() {
        let ops = [Opcode::Neg, Opcode::Not, Opcode::Incr, Opcode::Decr, Opcode::InlineMathAbs];
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..SAMPLES {
            let op = ops[rng.gen_range(0..ops.len())];
            let r = random_range(&mut rng);
            let range = unary_range(op, r).unwrap();
            let x = sample(&mut rng, &r) as i64;
            let exact = match op {
                Opcode::Neg => -x,
                Opcode::Not => !x,
                Opcode::Incr => x + 1,
                Opcode::Decr => x - 1,
                _ => x.abs(),
            };
            let in_range = exact >= range.bounds.lower() as i64 && exact <= range.bounds.upper() as i64;
            assert!(in_range || range.may_overflow, "{:?} {} = {} outside {}", op, x, exact, range.bounds);
            if op == Opcode::Neg && x == 0 {
                assert!(range.may_be_negative_zero);
            }
        }
    }
}

mod merge_soundness {
    use super::*;

    #[test]
    fn test_merged_int_ranges_cover_both_inputs() {
        let mut rng = StdRng::seed_from_u64(3);
        for n in 0..SAMPLES as u32 {
            let (r0, r1) = (random_range(&mut rng), random_range(&mut rng));
            let v0 = Value::new(2 * n + 1, ValueInfo::from_constant_bounds(r0, false));
            let v1 = Value::new(2 * n + 2, ValueInfo::from_constant_bounds(r1, false));
            let merged = merge_value_infos(&v0, &v1);
            let bounds = merged
                .int_constant_bounds(true)
                .unwrap_or_else(|| panic!("{} and {} merged to {}", r0, r1, merged));
            for r in [r0, r1] {
                assert!(
                    bounds.lower() <= r.lower() && bounds.upper() >= r.upper(),
                    "{} does not cover {}",
                    bounds,
                    r
                );
            }
            assert!(merged.ty().is_int());
        }
    }

    #[test]
    fn test_merged_types_admit_both_inputs() {
        let types = [
            ValueType::INT,
            ValueType::FLOAT,
            ValueType::NUMBER,
            ValueType::BOOLEAN,
            ValueType::STRING,
            ValueType::OBJECT,
            ValueType::UNDEFINED,
            ValueType::array(ObjectType::NativeIntArray, true),
            ValueType::array(ObjectType::NativeFloatArray, false),
            ValueType::array(ObjectType::Array, false),
            ValueType::object(ObjectType::Int32Array),
            ValueType::LIKELY_INT,
            ValueType::likely_array(ObjectType::NativeIntArray, true),
        ];
        let mut rng = StdRng::seed_from_u64(5);
        for n in 0..SAMPLES as u32 {
            let (t0, t1) = (types[rng.gen_range(0..types.len())], types[rng.gen_range(0..types.len())]);
            let v0 = Value::new(2 * n + 1, ValueInfo::new(t0));
            let v1 = Value::new(2 * n + 2, ValueInfo::new(t1));
            let merged = merge_value_infos(&v0, &v1).ty();
            assert!(t0.is_subset_of(&merged), "{} not in {} (merged with {})", t0, merged, t1);
            assert!(t1.is_subset_of(&merged), "{} not in {} (merged with {})", t1, merged, t0);
        }
    }
}
