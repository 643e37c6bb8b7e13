//! Type specialization
//!
//! Rewrites dynamic operations into int32, float64 or SIMD forms when the values of
//! their sources allow it. Int32 forms are checked against the result range of the
//! operation: an overflow or -0 that the range cannot rule out is guarded by a bailout
//! when aggressive specialization is on, and prevents int specialization otherwise.
//! Operations that fail int specialization fall back to float64 when the sources are
//! numbers.

use super::context::OptContext;
use super::instr_opt::SrcValues;
use super::int_bounds::{IntBounds, IntConstantBounds};
use super::range::{binary_range, unary_range, RangeResult};
use super::value_info::{Value, ValueInfo};
use crate::ir::{BailOutKind, Instr, InstrFlags, IrType, Opcode, Opnd, ValueType};
use tracing::trace;

impl<'f> OptContext<'f> {
    /// Specialize an instruction. Returns what is known about the specialized result,
    /// or None if the instruction keeps its dynamic form (or copies its source).
    pub(crate) fn type_specialize(&mut self, instr: &mut Instr, srcs: &SrcValues) -> Option<ValueInfo> {
        if !self.config.do_type_spec || !matches!(instr.dst, Some(Opnd::Reg(_))) {
            return None;
        }
        match instr.opcode {
            Opcode::Ld => {
                self.specialize_copy(instr);
                None
            }
            Opcode::Incr | Opcode::Decr => self.specialize_incr_decr(instr, srcs),
            op if op.is_dynamic_binary_math() => self
                .specialize_int_binary(instr, srcs)
                .or_else(|| self.specialize_float_binary(instr)),
            Opcode::Neg | Opcode::Not | Opcode::ConvNum => self.specialize_unary(instr, srcs),
            Opcode::CmEq
            | Opcode::CmNeq
            | Opcode::CmSrEq
            | Opcode::CmSrNeq
            | Opcode::CmLt
            | Opcode::CmLe
            | Opcode::CmGt
            | Opcode::CmGe => self.specialize_compare(instr, srcs),
            op if op.is_math_builtin() => self.specialize_math_builtin(instr, srcs),
            op if op.is_simd() => self.specialize_simd(instr),
            _ => None,
        }
    }

    /// Specialize the sources of a conditional branch
    pub(crate) fn type_specialize_branch(&mut self, instr: &mut Instr, srcs: &SrcValues) {
        if !self.config.do_type_spec {
            return;
        }
        let offset = instr.byte_code_offset;
        match instr.opcode {
            Opcode::BrTrue | Opcode::BrFalse => {
                let likely_int = srcs.src1.as_ref().map_or(false, |v| v.ty().is_likely_int());
                if let Some(mut src) = instr.src1 {
                    if likely_int && self.convert_use(&mut src, IrType::Int32, offset, false) {
                        instr.src1 = Some(src);
                    }
                }
            }
            op => {
                let int_op = match op.to_int_opcode() {
                    Some(int_op) if op.is_conditional_branch() => int_op,
                    _ => return,
                };
                let (mut s1, mut s2) = match (instr.src1, instr.src2) {
                    (Some(s1), Some(s2)) => (s1, s2),
                    _ => return,
                };
                let both = |p: fn(&ValueType) -> bool| {
                    srcs.src1.as_ref().map_or(false, |v| p(&v.ty()))
                        && srcs.src2.as_ref().map_or(false, |v| p(&v.ty()))
                };
                if both(ValueType::is_likely_int)
                    && self.can_convert(&s1, IrType::Int32, false)
                    && self.can_convert(&s2, IrType::Int32, false)
                {
                    self.convert_use(&mut s1, IrType::Int32, offset, false);
                    self.convert_use(&mut s2, IrType::Int32, offset, false);
                    instr.opcode = int_op;
                    trace!(instr = instr.id, ?int_op, "int branch");
                } else if self.config.do_float_type_spec
                    && both(ValueType::is_likely_number)
                    && self.can_convert(&s1, IrType::Float64, false)
                    && self.can_convert(&s2, IrType::Float64, false)
                {
                    self.convert_use(&mut s1, IrType::Float64, offset, false);
                    self.convert_use(&mut s2, IrType::Float64, offset, false);
                    trace!(instr = instr.id, ?op, "float branch");
                } else {
                    return;
                }
                instr.src1 = Some(s1);
                instr.src2 = Some(s2);
            }
        }
    }

    // ========== Copies ==========

    /// A copy of a sym that is only live specialized copies the specialized form
    fn specialize_copy(&mut self, instr: &mut Instr) {
        let src = match instr.src1 {
            Some(Opnd::Reg(r)) if r.ty == IrType::Var => r,
            _ => return,
        };
        let liveness = self.liveness(src.sym);
        if liveness.var {
            return;
        }
        let ty = if liveness.is_live_as(IrType::Int32) {
            IrType::Int32
        } else if liveness.float64 {
            IrType::Float64
        } else if let Some(simd) = liveness.simd {
            simd
        } else {
            return;
        };
        let var = self.func.syms.var_equiv(src.sym);
        let typed_src = self.func.syms.typed_equiv(var, ty);
        let mut new_src = Opnd::typed_reg(typed_src, ty);
        new_src.set_value_type(src.value_type);
        instr.src1 = Some(new_src);
        self.set_typed_dst(instr, ty);
    }

    // ========== Int32 ==========

    fn specialize_incr_decr(&mut self, instr: &mut Instr, srcs: &SrcValues) -> Option<ValueInfo> {
        let original = instr.opcode;
        instr.opcode = if original == Opcode::Incr {
            Opcode::Add
        } else {
            Opcode::Sub
        };
        instr.src2 = Some(Opnd::IntConst(1));
        let mut with_one = srcs.clone();
        with_one.src2 = Some(self.int_constant_value(1));
        let result = self
            .specialize_int_binary(instr, &with_one)
            .or_else(|| self.specialize_float_binary(instr));
        if result.is_none() {
            instr.opcode = original;
            instr.src2 = None;
        }
        result
    }

    /// Specializing pays off when a source is already int32 or constant, or when the
    /// conversions can be hoisted out of a loop
    fn is_worth_specializing_to_int32(&self, instr: &Instr) -> bool {
        if self.current_loop().is_some() {
            return true;
        }
        [&instr.src1, &instr.src2]
            .into_iter()
            .flatten()
            .any(|o| match o {
                Opnd::IntConst(_) | Opnd::FloatConst(_) => true,
                Opnd::Reg(r) => {
                    r.ty == IrType::Int32
                        || self.liveness(r.sym).has_int32()
                        || self
                            .sym_value(r.sym)
                            .map_or(false, |v| v.info().has_int_constant_value())
                }
                _ => false,
            })
    }

    fn specialize_int_binary(&mut self, instr: &mut Instr, srcs: &SrcValues) -> Option<ValueInfo> {
        let op = instr.opcode;
        let (v1, v2) = (srcs.src1.clone()?, srcs.src2.clone()?);
        let (mut s1, mut s2) = (instr.src1?, instr.src2?);
        let bitwise = matches!(
            op,
            Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Shl | Opcode::Shr | Opcode::ShrU
        );
        let lossy1 = bitwise && !v1.ty().is_likely_int();
        let lossy2 = bitwise && !v2.ty().is_likely_int();
        if (lossy1 || lossy2) && !self.config.do_lossy_int_type_spec {
            return None;
        }
        if !self.can_convert(&s1, IrType::Int32, lossy1) || !self.can_convert(&s2, IrType::Int32, lossy2) {
            return None;
        }
        if op == Opcode::Div
            && !(self.config.do_div_int_type_spec && instr.flags.contains(InstrFlags::DIV_LIKELY_INT))
        {
            return None;
        }
        if !bitwise && !self.is_worth_specializing_to_int32(instr) {
            return None;
        }

        let b1 = v1.info().int_constant_bounds(true).unwrap_or(IntConstantBounds::FULL);
        let b2 = v2.info().int_constant_bounds(true).unwrap_or(IntConstantBounds::FULL);
        let range = binary_range(op, b1, b2)?;
        if range.always_overflows {
            trace!(instr = instr.id, ?op, "int result always overflows");
            return None;
        }

        let overflow_ruled_out = !range.may_overflow || overflow_ruled_out_by_relative_bounds(op, &v1, &v2);
        let mut kinds = self.overflow_and_negative_zero_guards(instr, &range, overflow_ruled_out)?;
        match op {
            Opcode::Div => {
                if b2.contains(0) {
                    kinds |= BailOutKind::ON_DIV_BY_ZERO;
                }
                kinds |= BailOutKind::ON_DIV_RESULT_NOT_INT;
                if b1.contains(i32::MIN) && b2.contains(-1) {
                    kinds |= BailOutKind::ON_DIV_OF_MIN_INT;
                }
            }
            Opcode::Rem => {
                if b2.contains(0) {
                    kinds |= BailOutKind::ON_DIV_BY_ZERO;
                }
            }
            _ => {}
        }

        let offset = instr.byte_code_offset;
        self.convert_use(&mut s1, IrType::Int32, offset, lossy1);
        self.convert_use(&mut s2, IrType::Int32, offset, lossy2);
        instr.src1 = Some(s1);
        instr.src2 = Some(s2);
        instr.opcode = op.to_int_opcode()?;
        self.set_typed_dst(instr, IrType::Int32);
        if !kinds.is_empty() {
            instr.add_bailout_kind(kinds);
        }
        if !self.is_prepass() {
            self.stats.int_specialized += 1;
        }
        trace!(instr = instr.id, opcode = ?instr.opcode, %kinds, "int specialized");

        let neg_zero_prevented =
            !range.may_be_negative_zero || kinds.contains(BailOutKind::ON_NEGATIVE_ZERO);
        let bounds = if overflow_ruled_out || kinds.intersects(BailOutKind::ON_OVERFLOW | BailOutKind::ON_MUL_OVERFLOW) {
            range.bounds
        } else {
            IntConstantBounds::FULL
        };
        Some(self.int_result_info(op, &v1, &v2, bounds, neg_zero_prevented))
    }

    /// Guards an int32 form needs for its result range. None if the form is not allowed.
    fn overflow_and_negative_zero_guards(
        &self,
        instr: &Instr,
        range: &RangeResult,
        overflow_ruled_out: bool,
    ) -> Option<BailOutKind> {
        let mut kinds = BailOutKind::empty();
        if !overflow_ruled_out && !instr.ignore_int_overflow() {
            if instr.opcode.to_var_opcode() == Opcode::Mul {
                if !self.config.do_aggressive_mul_int_type_spec {
                    return None;
                }
                kinds |= BailOutKind::ON_MUL_OVERFLOW;
            } else {
                if !self.config.do_aggressive_int_type_spec {
                    return None;
                }
                kinds |= BailOutKind::ON_OVERFLOW;
            }
        }
        if range.may_be_negative_zero && instr.should_check_for_negative_zero() {
            if !self.config.do_aggressive_int_type_spec {
                return None;
            }
            kinds |= BailOutKind::ON_NEGATIVE_ZERO;
        }
        Some(kinds)
    }

    /// Result info of an int32 operation. Adding a constant keeps the result bounded
    /// relative to the other source.
    fn int_result_info(
        &self,
        op: Opcode,
        v1: &Value,
        v2: &Value,
        bounds: IntConstantBounds,
        neg_zero_prevented: bool,
    ) -> ValueInfo {
        if self.config.do_track_relative_int_bounds() && matches!(op, Opcode::Add | Opcode::Sub) {
            let (base, c) = match (v1.info().int_constant_value(false), v2.info().int_constant_value(false)) {
                (None, Some(c)) => (Some(v1), Some(c)),
                (Some(c), None) if op == Opcode::Add => (Some(v2), Some(c)),
                _ => (None, None),
            };
            let n = match (op, c) {
                (Opcode::Sub, Some(c)) => c.checked_neg(),
                (_, c) => c,
            };
            if let (Some(base), Some(n)) = (base, n) {
                if n != 0 && base.info().is_likely_int() {
                    let precise = !self.is_prepass();
                    let relative = IntBounds::add(base, n, precise, bounds);
                    return ValueInfo::int_bounded(ValueType::INT, relative, neg_zero_prevented);
                }
            }
        }
        ValueInfo::from_constant_bounds(bounds, neg_zero_prevented)
    }

    fn specialize_unary(&mut self, instr: &mut Instr, srcs: &SrcValues) -> Option<ValueInfo> {
        let op = instr.opcode;
        let v1 = srcs.src1.clone()?;
        let mut s1 = instr.src1?;
        let offset = instr.byte_code_offset;

        if op == Opcode::ConvNum {
            let ty = if v1.ty().is_likely_int() && self.can_convert(&s1, IrType::Int32, false) {
                IrType::Int32
            } else if self.config.do_float_type_spec && self.can_convert(&s1, IrType::Float64, false) {
                IrType::Float64
            } else {
                return None;
            };
            self.convert_use(&mut s1, ty, offset, false);
            instr.src1 = Some(s1);
            instr.opcode = Opcode::Ld;
            self.set_typed_dst(instr, ty);
            return None;
        }

        let lossy = op == Opcode::Not && !v1.ty().is_likely_int();
        if lossy && !self.config.do_lossy_int_type_spec {
            return None;
        }
        if self.can_convert(&s1, IrType::Int32, lossy) && (op == Opcode::Not || self.is_worth_specializing_to_int32(instr)) {
            let bounds = v1.info().int_constant_bounds(true).unwrap_or(IntConstantBounds::FULL);
            let range = unary_range(op, bounds)?;
            if !range.always_overflows {
                if let Some(kinds) = self.overflow_and_negative_zero_guards(instr, &range, !range.may_overflow) {
                    self.convert_use(&mut s1, IrType::Int32, offset, lossy);
                    instr.src1 = Some(s1);
                    instr.opcode = op.to_int_opcode()?;
                    self.set_typed_dst(instr, IrType::Int32);
                    if !kinds.is_empty() {
                        instr.add_bailout_kind(kinds);
                    }
                    if !self.is_prepass() {
                        self.stats.int_specialized += 1;
                    }
                    let neg_zero_prevented =
                        !range.may_be_negative_zero || kinds.contains(BailOutKind::ON_NEGATIVE_ZERO);
                    return Some(ValueInfo::from_constant_bounds(range.bounds, neg_zero_prevented));
                }
            }
        }
        if op == Opcode::Neg && self.config.do_float_type_spec && self.can_convert(&s1, IrType::Float64, false) {
            self.convert_use(&mut s1, IrType::Float64, offset, false);
            instr.src1 = Some(s1);
            self.set_typed_dst(instr, IrType::Float64);
            if !self.is_prepass() {
                self.stats.float_specialized += 1;
            }
            return Some(ValueInfo::new(ValueType::NUMBER));
        }
        None
    }

    // ========== Float64 ==========

    fn specialize_float_binary(&mut self, instr: &mut Instr) -> Option<ValueInfo> {
        if !self.config.do_float_type_spec
            || !matches!(instr.opcode, Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div)
        {
            return None;
        }
        let (mut s1, mut s2) = (instr.src1?, instr.src2?);
        if !self.can_convert(&s1, IrType::Float64, false) || !self.can_convert(&s2, IrType::Float64, false) {
            return None;
        }
        let likely_ints = [&s1, &s2].into_iter().all(|o| o.value_type().is_likely_int());
        if likely_ints && !self.is_worth_specializing_to_int32(instr) {
            return None;
        }
        let offset = instr.byte_code_offset;
        self.convert_use(&mut s1, IrType::Float64, offset, false);
        self.convert_use(&mut s2, IrType::Float64, offset, false);
        instr.src1 = Some(s1);
        instr.src2 = Some(s2);
        self.set_typed_dst(instr, IrType::Float64);
        if !self.is_prepass() {
            self.stats.float_specialized += 1;
        }
        trace!(instr = instr.id, opcode = ?instr.opcode, "float specialized");
        Some(ValueInfo::new(ValueType::NUMBER))
    }

    // ========== Compares and builtins ==========

    fn specialize_compare(&mut self, instr: &mut Instr, srcs: &SrcValues) -> Option<ValueInfo> {
        let (v1, v2) = (srcs.src1.as_ref()?, srcs.src2.as_ref()?);
        let (mut s1, mut s2) = (instr.src1?, instr.src2?);
        let offset = instr.byte_code_offset;
        if v1.ty().is_likely_int()
            && v2.ty().is_likely_int()
            && self.can_convert(&s1, IrType::Int32, false)
            && self.can_convert(&s2, IrType::Int32, false)
        {
            self.convert_use(&mut s1, IrType::Int32, offset, false);
            self.convert_use(&mut s2, IrType::Int32, offset, false);
            instr.opcode = instr.opcode.to_int_opcode()?;
            if !self.is_prepass() {
                self.stats.int_specialized += 1;
            }
        } else if self.config.do_float_type_spec
            && self.can_convert(&s1, IrType::Float64, false)
            && self.can_convert(&s2, IrType::Float64, false)
        {
            self.convert_use(&mut s1, IrType::Float64, offset, false);
            self.convert_use(&mut s2, IrType::Float64, offset, false);
            if !self.is_prepass() {
                self.stats.float_specialized += 1;
            }
        } else {
            return None;
        }
        instr.src1 = Some(s1);
        instr.src2 = Some(s2);
        Some(ValueInfo::new(ValueType::BOOLEAN))
    }

    fn specialize_math_builtin(&mut self, instr: &mut Instr, srcs: &SrcValues) -> Option<ValueInfo> {
        let op = instr.opcode;
        let offset = instr.byte_code_offset;
        let binary = matches!(op, Opcode::InlineMathMin | Opcode::InlineMathMax);
        let likely_int = srcs.src1.as_ref().map_or(false, |v| v.ty().is_likely_int())
            && (!binary || srcs.src2.as_ref().map_or(false, |v| v.ty().is_likely_int()));
        let opnds: Vec<Opnd> = [instr.src1, instr.src2].into_iter().flatten().collect();
        if opnds.len() != 1 + binary as usize {
            return None;
        }

        if likely_int && opnds.iter().all(|o| self.can_convert(o, IrType::Int32, false)) {
            let b1 = srcs.src1.as_ref()?.info().int_constant_bounds(true).unwrap_or(IntConstantBounds::FULL);
            let range = if binary {
                let b2 = srcs.src2.as_ref()?.info().int_constant_bounds(true).unwrap_or(IntConstantBounds::FULL);
                binary_range(op, b1, b2)?
            } else {
                unary_range(op, b1)?
            };
            if !range.always_overflows {
                if let Some(kinds) = self.overflow_and_negative_zero_guards(instr, &range, !range.may_overflow) {
                    self.convert_srcs(instr, IrType::Int32, offset);
                    self.set_typed_dst(instr, IrType::Int32);
                    if !kinds.is_empty() {
                        instr.add_bailout_kind(kinds);
                    }
                    if !self.is_prepass() {
                        self.stats.int_specialized += 1;
                    }
                    return Some(ValueInfo::from_constant_bounds(range.bounds, true));
                }
            }
        }
        if self.config.do_float_type_spec && opnds.iter().all(|o| self.can_convert(o, IrType::Float64, false)) {
            self.convert_srcs(instr, IrType::Float64, offset);
            self.set_typed_dst(instr, IrType::Float64);
            if !self.is_prepass() {
                self.stats.float_specialized += 1;
            }
            return Some(ValueInfo::new(ValueType::NUMBER));
        }
        None
    }

    // ========== SIMD ==========

    fn specialize_simd(&mut self, instr: &mut Instr) -> Option<ValueInfo> {
        if !self.config.do_simd_type_spec {
            return None;
        }
        let (src_ty, dst_ty, value_type) = match instr.opcode {
            Opcode::Simd128AddF4 | Opcode::Simd128SubF4 | Opcode::Simd128MulF4 => {
                (IrType::Simd128F4, IrType::Simd128F4, ValueType::SIMD128_F4)
            }
            Opcode::Simd128SplatF4 => (IrType::Float64, IrType::Simd128F4, ValueType::SIMD128_F4),
            Opcode::Simd128AddI4 | Opcode::Simd128SubI4 | Opcode::Simd128MulI4 => {
                (IrType::Simd128I4, IrType::Simd128I4, ValueType::SIMD128_I4)
            }
            Opcode::Simd128SplatI4 => (IrType::Int32, IrType::Simd128I4, ValueType::SIMD128_I4),
            _ => return None,
        };
        let opnds: Vec<Opnd> = [instr.src1, instr.src2].into_iter().flatten().collect();
        if opnds.is_empty() || !opnds.iter().all(|o| self.can_convert(o, src_ty, false)) {
            return None;
        }
        let offset = instr.byte_code_offset;
        self.convert_srcs(instr, src_ty, offset);
        self.set_typed_dst(instr, dst_ty);
        if !self.is_prepass() {
            self.stats.simd_specialized += 1;
        }
        trace!(instr = instr.id, opcode = ?instr.opcode, "simd specialized");
        Some(ValueInfo::new(value_type))
    }

    // ========== Helpers ==========

    fn convert_srcs(&mut self, instr: &mut Instr, ty: IrType, offset: u32) {
        if let Some(mut s) = instr.src1 {
            self.convert_use(&mut s, ty, offset, false);
            instr.src1 = Some(s);
        }
        if let Some(mut s) = instr.src2 {
            self.convert_use(&mut s, ty, offset, false);
            instr.src2 = Some(s);
        }
    }

    /// Make the destination the `ty` copy of its sym
    pub(crate) fn set_typed_dst(&mut self, instr: &mut Instr, ty: IrType) {
        if let Some(Opnd::Reg(r)) = instr.dst.as_mut() {
            let var = self.func.syms.var_equiv(r.sym);
            r.sym = self.func.syms.typed_equiv(var, ty);
            r.ty = ty;
        }
    }
}

/// `x ± c` cannot overflow because `x` is bounded away from the int32 limits by
/// another value
fn overflow_ruled_out_by_relative_bounds(op: Opcode, v1: &Value, v2: &Value) -> bool {
    let (base, c) = match (v1.info().int_bounds(), v2.info().int_constant_value(false)) {
        (Some(b), Some(c)) => (b, c),
        _ => return false,
    };
    if c == 0 {
        return true;
    }
    match op.to_var_opcode() {
        Opcode::Add => base.add_cannot_overflow_based_on_relative_bounds(c),
        Opcode::Sub => base.sub_cannot_overflow_based_on_relative_bounds(c),
        _ => false,
    }
}
