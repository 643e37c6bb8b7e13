//! Representation conversions
//!
//! A specialized instruction reads its sources as int32, float64 or SIMD values.
//! Converting a source emits `FromVar` (unbox, guarded by a bailout unless the value
//! is already known to have the type) or `ConvPrim` (between int32 and float64).
//! A conversion of a loop-invariant sym is hoisted into the outermost landing pad
//! where the sym is invariant, so the loop body only sees the specialized copy.

use super::block_data::{BlockData, Int32Liveness, SymLiveness};
use super::context::OptContext;
use super::value_info::ValueInfo;
use crate::ir::{BailOutInfo, BailOutKind, Instr, IrType, Opcode, Opnd, SymId, ValueType};
use tracing::trace;

/// How a sym gets into a representation it is not live in
struct Conversion {
    opcode: Opcode,
    src: Opnd,
    bailout: BailOutKind,
}

impl<'f> OptContext<'f> {
    /// Rewrite a source operand to read `ty`. Returns false, leaving the operand alone,
    /// when the value cannot be converted.
    pub(crate) fn convert_use(&mut self, opnd: &mut Opnd, ty: IrType, offset: u32, lossy: bool) -> bool {
        match *opnd {
            Opnd::IntConst(c) => match ty {
                IrType::Int32 => true,
                IrType::Float64 => {
                    *opnd = Opnd::FloatConst(c as f64);
                    true
                }
                _ => false,
            },
            Opnd::FloatConst(f) => match ty {
                IrType::Float64 => true,
                IrType::Int32 if crate::ir::is_int32_value(f) => {
                    *opnd = Opnd::IntConst(f as i32);
                    true
                }
                _ => false,
            },
            Opnd::Reg(r) => {
                if r.ty == ty {
                    return true;
                }
                if let Some(value) = self.sym_value(r.sym) {
                    if ty == IrType::Int32 {
                        if let Some(c) = value.info().int_constant_value(false) {
                            *opnd = Opnd::IntConst(c);
                            return true;
                        }
                    }
                    if ty == IrType::Float64 {
                        if let Some(f) = value.info().number_constant_value() {
                            *opnd = Opnd::FloatConst(f);
                            return true;
                        }
                    }
                }
                match self.convert_sym(r.sym, ty, offset, lossy) {
                    Some(typed) => {
                        let value_type = opnd.value_type();
                        *opnd = Opnd::typed_reg(typed, ty);
                        opnd.set_value_type(value_type);
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// Whether [`convert_use`](Self::convert_use) would succeed, without emitting anything
    pub(crate) fn can_convert(&self, opnd: &Opnd, ty: IrType, lossy: bool) -> bool {
        match opnd {
            Opnd::IntConst(_) => matches!(ty, IrType::Int32 | IrType::Float64),
            Opnd::FloatConst(f) => {
                ty == IrType::Float64 || ty == IrType::Int32 && crate::ir::is_int32_value(*f)
            }
            Opnd::Reg(r) => {
                if r.ty == ty {
                    return true;
                }
                let var = self.func.syms.var_equiv(r.sym);
                let liveness = self.data.liveness(var);
                if is_available(&liveness, ty, lossy) {
                    return true;
                }
                let vt = self.sym_value(var).map_or(ValueType::ANY, |v| v.ty());
                is_convertible(vt, ty, lossy) && conversion_for(&liveness, ty, vt, lossy, var).is_some()
            }
            _ => false,
        }
    }

    /// A sym holding `sym`'s value in `ty`, converting it if needed
    fn convert_sym(&mut self, sym: SymId, ty: IrType, offset: u32, lossy: bool) -> Option<SymId> {
        let var = self.func.syms.var_equiv(sym);
        if ty == IrType::Var {
            return Some(var);
        }
        let liveness = self.data.liveness(var);
        if is_available(&liveness, ty, lossy) {
            return Some(self.func.syms.typed_equiv(var, ty));
        }
        let value = self.ensure_sym_value(var, ValueType::UNINITIALIZED);
        if !is_convertible(value.ty(), ty, lossy) {
            return None;
        }

        let hoist_to = self.outermost_loop_where(|ctx, l| {
            ctx.is_invariant(var, l) && ctx.func.loop_(l).implicit_calls_allow_opts()
        });
        if let Some(l) = hoist_to {
            let lp = self.func.loop_(l).landing_pad;
            let lp_liveness = self.block_data.get(&lp).map(|d| d.liveness(var));
            if let Some(lp_liveness) = lp_liveness {
                if let Some(conv) = conversion_for(&lp_liveness, ty, value.ty(), lossy, var) {
                    let top = self.loop_top_offset(l);
                    let instr = self.conversion_instr(var, ty, conv, top);
                    trace!(sym = var, ?ty, loop_id = l, "hoisted conversion");
                    self.insert_in_landing_pad(l, instr);
                    self.propagate_hoisted(l, |d| mark_converted(d, var, ty, lossy));
                    self.stats.conversions += 1;
                    return Some(self.func.syms.typed_equiv(var, ty));
                }
            }
        }

        let conv = conversion_for(&liveness, ty, value.ty(), lossy, var)?;
        let instr = self.conversion_instr(var, ty, conv, offset);
        trace!(sym = var, ?ty, "conversion");
        self.emit(instr);
        mark_converted(&mut self.data, var, ty, lossy);
        if !self.is_prepass() {
            self.stats.conversions += 1;
        }
        Some(self.func.syms.typed_equiv(var, ty))
    }

    fn conversion_instr(&mut self, var: SymId, ty: IrType, conv: Conversion, offset: u32) -> Instr {
        let dst = self.func.syms.typed_equiv(var, ty);
        let src = match conv.src {
            Opnd::Reg(r) if r.ty != IrType::Var => {
                Opnd::typed_reg(self.func.syms.typed_equiv(var, r.ty), r.ty)
            }
            other => other,
        };
        let mut instr = self
            .new_instr(conv.opcode, offset)
            .with_dst(Opnd::typed_reg(dst, ty))
            .with_src1(src);
        if !conv.bailout.is_empty() {
            instr.bailout = Some(BailOutInfo::new(conv.bailout, offset));
        }
        instr
    }
}

/// Whether the representation is already live
fn is_available(liveness: &SymLiveness, ty: IrType, lossy: bool) -> bool {
    liveness.is_live_as(ty) || lossy && ty == IrType::Int32 && liveness.has_int32()
}

/// Whether a value of type `vt` may be converted to `ty` at all
fn is_convertible(vt: ValueType, ty: IrType, lossy: bool) -> bool {
    match ty {
        IrType::Var => true,
        IrType::Int32 => vt.is_likely_int() || lossy && (vt.is_likely_number() || vt.is_primitive()),
        IrType::Float64 => vt.is_likely_number(),
        IrType::Simd128F4 => vt.is_likely_simd128_f4(),
        IrType::Simd128I4 => vt.is_likely_simd128_i4(),
    }
}

/// Pick the source representation and guard for converting to `ty`
fn conversion_for(
    liveness: &SymLiveness,
    ty: IrType,
    vt: ValueType,
    lossy: bool,
    var: SymId,
) -> Option<Conversion> {
    if ty == IrType::Float64 && liveness.is_live_as(IrType::Int32) {
        return Some(Conversion {
            opcode: Opcode::ConvPrim,
            src: Opnd::typed_reg(var, IrType::Int32),
            bailout: BailOutKind::empty(),
        });
    }
    if ty == IrType::Int32 && liveness.float64 {
        let bailout = if lossy || vt.is_int() {
            BailOutKind::empty()
        } else {
            BailOutKind::INT_ONLY
        };
        return Some(Conversion {
            opcode: Opcode::ConvPrim,
            src: Opnd::typed_reg(var, IrType::Float64),
            bailout,
        });
    }
    if !liveness.var {
        return None;
    }
    let definite = match ty {
        IrType::Int32 if lossy => vt.is_primitive(),
        IrType::Int32 => vt.is_int(),
        IrType::Float64 => vt.is_number(),
        IrType::Simd128F4 => vt.is_simd128_f4(),
        IrType::Simd128I4 => vt.is_simd128_i4(),
        IrType::Var => true,
    };
    let bailout = if definite {
        BailOutKind::empty()
    } else if lossy {
        BailOutKind::ON_NOT_PRIMITIVE
    } else {
        BailOutKind::for_conversion(ty)
    };
    Some(Conversion {
        opcode: Opcode::FromVar,
        src: Opnd::reg(var),
        bailout,
    })
}

/// Record that `var` is now live as `ty`. A lossless conversion also proves the type.
fn mark_converted(data: &mut BlockData, var: SymId, ty: IrType, lossy: bool) {
    let mut liveness = data.liveness(var);
    if lossy && ty == IrType::Int32 {
        if liveness.int32 == Int32Liveness::Dead {
            liveness.int32 = Int32Liveness::Lossy;
        }
    } else {
        liveness.set(ty, true);
    }
    data.set_liveness(var, liveness);
    if lossy {
        return;
    }
    let vn = match data.value_number(var) {
        Some(vn) => vn,
        None => return,
    };
    let info = match data.values.get(&vn) {
        Some(info) => info.clone(),
        None => return,
    };
    let specialized: ValueInfo = match ty {
        IrType::Int32 => info.specialize_to_int32(),
        IrType::Float64 => info.specialize_to_float64(),
        IrType::Simd128F4 => info.specialize_to_simd128(ValueType::SIMD128_F4),
        IrType::Simd128I4 => info.specialize_to_simd128(ValueType::SIMD128_I4),
        IrType::Var => return,
    };
    data.update_value_info(vn, specialized.with_sym_store(info.sym_store()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globopt::config::GlobOptConfig;
    use crate::ir::{Func, FuncBuilder};

    fn func() -> (Func, SymId, SymId) {
        let mut b = FuncBuilder::new("conv");
        let x = b.param("x", ValueType::LIKELY_INT);
        let s = b.param("s", ValueType::LIKELY_STRING);
        b.ret(Opnd::reg(x));
        (b.finish().unwrap(), x, s)
    }

    #[test]
    fn test_from_var_is_guarded_and_proves_int() {
        let (mut f, x, _) = func();
        let mut ctx = OptContext::new(&mut f, GlobOptConfig::default());
        ctx.ensure_sym_value(x, ValueType::LIKELY_INT);
        let mut opnd = Opnd::reg(x);
        assert!(ctx.convert_use(&mut opnd, IrType::Int32, 4, false));
        assert_eq!(opnd.ir_type(), IrType::Int32);
        assert_eq!(ctx.out.len(), 1);
        let conv = &ctx.out[0];
        assert_eq!(conv.opcode, Opcode::FromVar);
        assert_eq!(conv.bailout_kind(), BailOutKind::INT_ONLY);
        assert!(ctx.data.is_live_as(x, IrType::Int32));
        assert!(ctx.data.is_live_as(x, IrType::Var));
        assert_eq!(ctx.sym_value(x).map(|v| v.ty()), Some(ValueType::INT));

        // A second use reuses the live copy
        let mut again = Opnd::reg(x);
        assert!(ctx.convert_use(&mut again, IrType::Int32, 5, false));
        assert_eq!(ctx.out.len(), 1);
    }

    #[test]
    fn test_string_is_not_converted() {
        let (mut f, _, s) = func();
        let mut ctx = OptContext::new(&mut f, GlobOptConfig::default());
        ctx.ensure_sym_value(s, ValueType::LIKELY_STRING);
        let mut opnd = Opnd::reg(s);
        assert!(!ctx.can_convert(&opnd, IrType::Float64, false));
        assert!(!ctx.convert_use(&mut opnd, IrType::Float64, 0, false));
        assert_eq!(opnd, Opnd::reg(s));
        assert!(ctx.out.is_empty());
    }

    #[test]
    fn test_lossy_conversion_of_string_bails_on_objects_only() {
        let (mut f, _, s) = func();
        let mut ctx = OptContext::new(&mut f, GlobOptConfig::default());
        let v = ctx.new_value(ValueInfo::new(ValueType::STRING));
        ctx.set_sym_value(s, &v);
        let mut opnd = Opnd::reg(s);
        assert!(ctx.convert_use(&mut opnd, IrType::Int32, 0, true));
        assert!(!ctx.out[0].has_bailout());
        assert_eq!(ctx.data.liveness(s).int32, Int32Liveness::Lossy);
        assert!(!ctx.data.is_live_as(s, IrType::Int32));
    }

    #[test]
    fn test_int_to_float_uses_conv_prim() {
        let (mut f, x, _) = func();
        let mut ctx = OptContext::new(&mut f, GlobOptConfig::default());
        let v = ctx.new_value(ValueInfo::new(ValueType::INT));
        ctx.set_sym_value(x, &v);
        ctx.data.set_liveness(x, SymLiveness::only(IrType::Int32));
        let mut opnd = Opnd::reg(x);
        assert!(ctx.convert_use(&mut opnd, IrType::Float64, 0, false));
        assert_eq!(ctx.out[0].opcode, Opcode::ConvPrim);
        assert!(!ctx.out[0].has_bailout());
        assert!(ctx.data.liveness(x).float64);
    }

    #[test]
    fn test_constants_convert_in_place() {
        let (mut f, _, _) = func();
        let mut ctx = OptContext::new(&mut f, GlobOptConfig::default());
        let mut c = Opnd::IntConst(3);
        assert!(ctx.convert_use(&mut c, IrType::Float64, 0, false));
        assert_eq!(c, Opnd::FloatConst(3.0));
        let mut h = Opnd::FloatConst(0.5);
        assert!(!ctx.convert_use(&mut h, IrType::Int32, 0, false));
    }
}
