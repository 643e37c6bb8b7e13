//! Constant folding
//!
//! Folds arithmetic on constant sources using JS semantics. A result is only folded
//! when it is an int32 other than -0, or when both sources are numbers and the float
//! result is exact; everything else is left for the runtime.

use super::context::OptContext;
use super::instr_opt::SrcValues;
use crate::ir::{is_int32_value, Instr, Opcode, Opnd, SymId};
use tracing::trace;

/// Result of `a op b` when it is an int32 (and not -0)
pub fn fold_binary(opcode: Opcode, a: i32, b: i32) -> Option<i32> {
    let (x, y) = (a as i64, b as i64);
    let result: i64 = match opcode.to_var_opcode() {
        Opcode::Add => x + y,
        Opcode::Sub => x - y,
        Opcode::Mul => {
            let r = x * y;
            if r == 0 && (x < 0 || y < 0) {
                return None;
            }
            r
        }
        Opcode::Div => {
            if y == 0 || x % y != 0 {
                return None;
            }
            if x == 0 && y < 0 {
                return None;
            }
            x / y
        }
        Opcode::Rem => {
            if y == 0 {
                return None;
            }
            let r = x % y;
            if r == 0 && x < 0 {
                return None;
            }
            r
        }
        Opcode::And => (a & b) as i64,
        Opcode::Or => (a | b) as i64,
        Opcode::Xor => (a ^ b) as i64,
        Opcode::Shl => a.wrapping_shl(b as u32 & 31) as i64,
        Opcode::Shr => (a >> (b as u32 & 31)) as i64,
        Opcode::ShrU => ((a as u32) >> (b as u32 & 31)) as i64,
        Opcode::InlineMathMin => x.min(y),
        Opcode::InlineMathMax => x.max(y),
        _ => return None,
    };
    i32::try_from(result).ok()
}

/// Result of `op a` when it is an int32 (and not -0)
pub fn fold_unary(opcode: Opcode, a: i32) -> Option<i32> {
    match opcode.to_var_opcode() {
        Opcode::Neg => {
            if a == 0 {
                None
            } else {
                a.checked_neg()
            }
        }
        Opcode::Not => Some(!a),
        Opcode::Incr => a.checked_add(1),
        Opcode::Decr => a.checked_sub(1),
        Opcode::ConvNum | Opcode::InlineMathFloor | Opcode::InlineMathCeil => Some(a),
        Opcode::InlineMathAbs => a.checked_abs(),
        _ => None,
    }
}

/// Float result of `a op b` for the ops that never touch the sources' identity
pub fn fold_float_binary(opcode: Opcode, a: f64, b: f64) -> Option<f64> {
    match opcode {
        Opcode::Add => Some(a + b),
        Opcode::Sub => Some(a - b),
        Opcode::Mul => Some(a * b),
        Opcode::Div => Some(a / b),
        _ => None,
    }
}

/// Outcome of a conditional branch on two int constants
pub fn eval_branch(opcode: Opcode, a: i32, b: i32) -> Option<bool> {
    Some(match opcode.to_var_opcode() {
        Opcode::BrEq | Opcode::BrSrEq => a == b,
        Opcode::BrNeq | Opcode::BrSrNeq => a != b,
        Opcode::BrLt => a < b,
        Opcode::BrLe => a <= b,
        Opcode::BrGt => a > b,
        Opcode::BrGe => a >= b,
        _ => return None,
    })
}

impl<'f> OptContext<'f> {
    /// Replace an instruction on constant sources by a load of its result.
    /// Returns true when the instruction was rewritten.
    pub(crate) fn const_fold(&mut self, instr: &mut Instr, srcs: &SrcValues) -> bool {
        if instr.defined_sym().is_none() {
            return false;
        }
        let op = instr.opcode;
        let int_of = |v: &Option<super::value_info::Value>| {
            v.as_ref().and_then(|v| v.info().int_constant_value(false))
        };
        let folded = if op.is_dynamic_binary_math() || op.is_int_math() && instr.src2.is_some()
            || matches!(op, Opcode::InlineMathMin | Opcode::InlineMathMax)
        {
            match (int_of(&srcs.src1), int_of(&srcs.src2)) {
                (Some(a), Some(b)) => fold_binary(op, a, b).map(Opnd::IntConst),
                _ => {
                    let num_of = |v: &Option<super::value_info::Value>| {
                        v.as_ref().and_then(|v| v.info().number_constant_value())
                    };
                    match (num_of(&srcs.src1), num_of(&srcs.src2)) {
                        (Some(a), Some(b)) if op.is_dynamic_binary_math() => {
                            fold_float_binary(op, a, b).map(float_opnd)
                        }
                        _ => None,
                    }
                }
            }
        } else if op.is_dynamic_unary_math()
            || op.is_int_math()
            || matches!(
                op,
                Opcode::InlineMathFloor | Opcode::InlineMathCeil | Opcode::InlineMathAbs
            )
        {
            int_of(&srcs.src1).and_then(|a| fold_unary(op, a)).map(Opnd::IntConst)
        } else {
            None
        };
        let constant = match folded {
            Some(c) => c,
            None => return false,
        };

        trace!(instr = instr.id, ?op, ?constant, "constant folded");
        self.emit_byte_code_uses(instr);
        instr.opcode = Opcode::Ld;
        instr.src1 = Some(constant);
        instr.src2 = None;
        instr.bailout = None;
        if let Some(Opnd::Reg(r)) = instr.dst.as_mut() {
            // A folded int32 destination keeps its representation; everything else is a var.
            if !(r.ty == crate::ir::IrType::Int32 && matches!(constant, Opnd::IntConst(_))) {
                r.ty = crate::ir::IrType::Var;
                r.sym = self.func.syms.var_equiv(r.sym);
            }
        }
        if !self.is_prepass() {
            self.stats.const_folds += 1;
        }
        true
    }

    /// Keep the bytecode syms an instruction read visible to bailouts after the
    /// instruction itself is removed
    pub(crate) fn emit_byte_code_uses(&mut self, instr: &Instr) {
        if self.is_prepass() {
            return;
        }
        let mut uses: Vec<SymId> = [&instr.src1, &instr.src2]
            .into_iter()
            .flatten()
            .flat_map(|o| o.used_syms())
            .map(|s| self.func.syms.var_equiv(s))
            .filter(|&s| self.func.syms.is_bytecode(s))
            .collect();
        uses.sort_unstable();
        uses.dedup();
        if uses.is_empty() {
            return;
        }
        let mut marker = self.new_instr(Opcode::ByteCodeUses, instr.byte_code_offset);
        marker.uses = uses;
        self.push_instr(marker);
    }
}

fn float_opnd(f: f64) -> Opnd {
    if is_int32_value(f) {
        Opnd::IntConst(f as i32)
    } else {
        Opnd::FloatConst(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_binary_js_semantics() {
        assert_eq!(fold_binary(Opcode::Add, 2, 3), Some(5));
        assert_eq!(fold_binary(Opcode::AddI4, i32::MAX, 1), None);
        assert_eq!(fold_binary(Opcode::Mul, 0, -5), None);
        assert_eq!(fold_binary(Opcode::Mul, -4, 5), Some(-20));
        assert_eq!(fold_binary(Opcode::Div, 7, 2), None);
        assert_eq!(fold_binary(Opcode::Div, 8, 2), Some(4));
        assert_eq!(fold_binary(Opcode::Div, 1, 0), None);
        assert_eq!(fold_binary(Opcode::Div, 0, -3), None);
        assert_eq!(fold_binary(Opcode::Div, i32::MIN, -1), None);
        assert_eq!(fold_binary(Opcode::Rem, -4, 2), None);
        assert_eq!(fold_binary(Opcode::Rem, -5, 2), Some(-1));
        assert_eq!(fold_binary(Opcode::Shl, 1, 33), Some(2));
        assert_eq!(fold_binary(Opcode::ShrU, -1, 0), None);
        assert_eq!(fold_binary(Opcode::ShrU, -1, 1), Some(i32::MAX));
        assert_eq!(fold_binary(Opcode::Shr, -8, 1), Some(-4));
    }

    #[test]
    fn test_fold_unary() {
        assert_eq!(fold_unary(Opcode::Neg, 0), None);
        assert_eq!(fold_unary(Opcode::Neg, i32::MIN), None);
        assert_eq!(fold_unary(Opcode::NegI4, 5), Some(-5));
        assert_eq!(fold_unary(Opcode::Not, 0), Some(-1));
        assert_eq!(fold_unary(Opcode::Incr, i32::MAX), None);
        assert_eq!(fold_unary(Opcode::InlineMathAbs, -7), Some(7));
    }

    #[test]
    fn test_eval_branch() {
        assert_eq!(eval_branch(Opcode::BrLt, 1, 2), Some(true));
        assert_eq!(eval_branch(Opcode::BrGeI4, 1, 2), Some(false));
        assert_eq!(eval_branch(Opcode::BrTrue, 1, 2), None);
    }

    #[test]
    fn test_float_folding_stays_float() {
        assert_eq!(fold_float_binary(Opcode::Div, 1.0, 4.0), Some(0.25));
        assert_eq!(float_opnd(0.25), Opnd::FloatConst(0.25));
        assert_eq!(float_opnd(3.0), Opnd::IntConst(3));
        assert_eq!(float_opnd(-0.0), Opnd::FloatConst(-0.0));
    }
}
