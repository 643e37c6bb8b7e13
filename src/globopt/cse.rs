//! Common subexpression elimination
//!
//! Expressions are hashed over the value numbers of their sources. When a hash is
//! already available and some sym still holds its value, the instruction becomes a
//! copy of that sym.

use super::block_data::ExprHash;
use super::context::OptContext;
use super::instr_opt::SrcValues;
use super::value_info::{Value, INVALID_VALUE_NUMBER};
use crate::ir::{Instr, IrType, Opcode, Opnd};
use tracing::debug;

/// Operations whose sources can be swapped
fn is_commutative(opcode: Opcode) -> bool {
    matches!(
        opcode.to_var_opcode(),
        Opcode::Add
            | Opcode::Mul
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::CmEq
            | Opcode::CmNeq
            | Opcode::CmSrEq
            | Opcode::CmSrNeq
            | Opcode::InlineMathMin
            | Opcode::InlineMathMax
    )
}

impl<'f> OptContext<'f> {
    /// Hash of the expression an instruction computes, if it can be reused
    pub(crate) fn expr_hash(&self, instr: &Instr, srcs: &SrcValues) -> Option<ExprHash> {
        if !instr.opcode.can_cse() || !matches!(instr.dst, Some(Opnd::Reg(_))) {
            return None;
        }
        let vn = |v: &Option<Value>| v.as_ref().map(Value::number);
        let (src1, src2) = match instr.opcode {
            Opcode::LdElemI => (vn(&srcs.base)?, vn(&srcs.index)?),
            _ => (
                vn(&srcs.src1)?,
                match &instr.src2 {
                    Some(_) => vn(&srcs.src2)?,
                    None => INVALID_VALUE_NUMBER,
                },
            ),
        };
        let (src1, src2) = if is_commutative(instr.opcode) && src2 < src1 {
            (src2, src1)
        } else {
            (src1, src2)
        };
        let mut attrs = 0;
        let op = instr.opcode.to_var_opcode();
        if op.is_dynamic_binary_math() || op.is_dynamic_unary_math() {
            if instr.ignore_int_overflow() {
                attrs |= ExprHash::IGNORES_OVERFLOW;
            }
            if !instr.should_check_for_negative_zero() {
                attrs |= ExprHash::IGNORES_NEGATIVE_ZERO;
            }
        }
        Some(ExprHash::new(instr.opcode, src1, src2).with_attrs(attrs))
    }

    /// Replace an instruction by a copy of a sym holding its available result.
    /// Returns true when the instruction was rewritten.
    pub(crate) fn try_cse(&mut self, instr: &mut Instr, srcs: &SrcValues) -> bool {
        if !self.config.do_cse || self.is_prepass() {
            return false;
        }
        let hash = match self.expr_hash(instr, srcs) {
            Some(h) => h,
            None => return false,
        };
        let vn = match self.data.expr_to_value.get(&hash) {
            Some(&vn) => vn,
            None => return false,
        };
        if !self.reuse_avoids_implicit_calls(instr, srcs) {
            return false;
        }
        let value = match self.value_of(vn) {
            Some(v) => v,
            None => return false,
        };
        let store = match value.info().sym_store() {
            Some(s) => s,
            None => return false,
        };
        if self.func.syms.is_property(store) || self.data.value_number(store) != Some(vn) {
            return false;
        }
        let liveness = self.data.liveness(store);
        let ty = if liveness.var {
            IrType::Var
        } else if liveness.is_live_as(IrType::Int32) {
            IrType::Int32
        } else if liveness.float64 {
            IrType::Float64
        } else {
            return false;
        };

        debug!(instr = instr.id, opcode = ?instr.opcode, store, "cse");
        self.emit_byte_code_uses(instr);
        let src_sym = self.func.syms.typed_equiv(store, ty);
        let mut src = Opnd::typed_reg(src_sym, ty);
        src.set_value_type(value.ty());
        instr.opcode = Opcode::Ld;
        instr.src1 = Some(src);
        instr.src2 = None;
        instr.bailout = None;
        if let Some(Opnd::Reg(r)) = instr.dst.as_mut() {
            let var = self.func.syms.var_equiv(r.sym);
            r.sym = self.func.syms.typed_equiv(var, ty);
            r.ty = ty;
        }
        self.stats.cse += 1;
        true
    }

    /// Reusing the result of an operation that may call user code is only sound when
    /// the sources rule those calls out
    fn reuse_avoids_implicit_calls(&self, instr: &Instr, srcs: &SrcValues) -> bool {
        if !instr.opcode.has_implicit_calls() {
            return true;
        }
        match instr.opcode {
            Opcode::LdElemI | Opcode::LdLen => {
                let base = match instr.opcode {
                    Opcode::LdElemI => &srcs.base,
                    _ => &srcs.src1,
                };
                base.as_ref().map_or(false, |v| {
                    let ty = v.ty();
                    ty.is_array_or_object_with_array() || ty.is_any_optimized_array()
                })
            }
            _ => [&srcs.src1, &srcs.src2]
                .into_iter()
                .flatten()
                .all(|v| v.ty().is_primitive()),
        }
    }

    /// Make the result of an instruction available for reuse
    pub(crate) fn record_expr(&mut self, instr: &Instr, srcs: &SrcValues, value: &Value) {
        if !self.config.do_cse || self.is_prepass() {
            return;
        }
        if let Some(hash) = self.expr_hash(instr, srcs) {
            self.data.expr_to_value.insert(hash, value.number());
        }
    }

    /// An element store makes the stored value available to a load of the same element
    pub(crate) fn record_element_store(&mut self, instr: &Instr, srcs: &SrcValues) {
        if !self.config.do_cse || self.is_prepass() || instr.opcode != Opcode::StElemI {
            return;
        }
        let (base, index, stored) = match (&srcs.base, &srcs.index, &srcs.src1) {
            (Some(b), Some(i), Some(s)) => (b.number(), i.number(), s.number()),
            _ => return,
        };
        self.data
            .expr_to_value
            .insert(ExprHash::new(Opcode::LdElemI, base, index), stored);
    }
}

#[cfg(test)]
mod tests {
    use crate::globopt::config::GlobOptConfig;
    use crate::globopt::context::OptContext;
    use crate::ir::{Func, FuncBuilder, Opcode, Opnd, ValueType};

    fn run(func: &mut Func, config: GlobOptConfig) -> usize {
        crate::backward::analyze(func);
        let mut ctx = OptContext::new(func, config);
        ctx.optimize_blocks().unwrap();
        ctx.stats.cse
    }

    #[test]
    fn test_repeated_int_expression_becomes_copy() {
        let mut b = FuncBuilder::new("cse");
        let x = b.param("x", ValueType::LIKELY_INT);
        let a = b.var("a");
        let c = b.var("c");
        b.binary(Opcode::Mul, a, Opnd::reg(x), Opnd::IntConst(3));
        b.binary(Opcode::Mul, c, Opnd::IntConst(3), Opnd::reg(x));
        b.binary(Opcode::Add, a, Opnd::reg(a), Opnd::reg(c));
        b.ret(Opnd::reg(a));
        let mut func = b.finish().unwrap();
        assert_eq!(run(&mut func, GlobOptConfig::default()), 1);
        let muls = func
            .block(func.entry)
            .instrs
            .iter()
            .filter(|i| i.opcode.to_var_opcode() == Opcode::Mul)
            .count();
        assert_eq!(muls, 1);
    }

    #[test]
    fn test_dynamic_add_on_unknown_values_is_not_reused() {
        let mut b = FuncBuilder::new("cse");
        let x = b.param("x", ValueType::UNINITIALIZED);
        let y = b.param("y", ValueType::UNINITIALIZED);
        let a = b.var("a");
        let c = b.var("c");
        b.binary(Opcode::Add, a, Opnd::reg(x), Opnd::reg(y));
        b.binary(Opcode::Add, c, Opnd::reg(x), Opnd::reg(y));
        b.ret(Opnd::reg(c));
        let mut func = b.finish().unwrap();
        assert_eq!(run(&mut func, GlobOptConfig::default()), 0);
    }

    #[test]
    fn test_cse_disabled() {
        let mut b = FuncBuilder::new("cse");
        let x = b.param("x", ValueType::LIKELY_INT);
        let a = b.var("a");
        let c = b.var("c");
        b.binary(Opcode::Mul, a, Opnd::reg(x), Opnd::IntConst(3));
        b.binary(Opcode::Mul, c, Opnd::reg(x), Opnd::IntConst(3));
        b.ret(Opnd::reg(c));
        let mut func = b.finish().unwrap();
        let config = GlobOptConfig {
            do_cse: false,
            ..GlobOptConfig::default()
        };
        assert_eq!(run(&mut func, config), 0);
    }
}
