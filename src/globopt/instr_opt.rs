//! Per-instruction forward optimization
//!
//! Every instruction goes through the same pipeline: sources are value numbered and
//! copy-propagated, then the instruction is folded, CSE'd, checked, type-specialized
//! and finally its destination gets a value. Each step may rewrite the instruction;
//! a step that changes the sources re-runs source optimization.

use super::block_data::SymLiveness;
use super::context::OptContext;
use super::value_info::{Value, ValueInfo};
use crate::error::{Error, Result};
use crate::ir::{
    BailOutInfo, BailOutKind, IndirOpnd, Instr, InstrFlags, IrType, ObjectType, Opcode, Opnd,
    SymId, ValueType,
};
use tracing::trace;

/// Values of an instruction's sources, looked up once per pipeline step
#[derive(Debug, Clone, Default)]
pub(crate) struct SrcValues {
    pub src1: Option<Value>,
    pub src2: Option<Value>,
    /// Base of an element access, or object of a property access
    pub base: Option<Value>,
    /// Index of an element access
    pub index: Option<Value>,
}

impl<'f> OptContext<'f> {
    /// Optimize one instruction and append the result to the current block's output
    pub(crate) fn opt_instr(&mut self, mut instr: Instr) -> Result<()> {
        self.stats.instrs_visited += 1;
        if self.pre_opt_peep(&mut instr) {
            return Ok(());
        }
        self.track_calls(&instr)?;
        let iv_change = self.induction_change(&instr);

        let mut srcs = self.opt_srcs(&mut instr);
        if self.opt_field_load(&mut instr, &srcs) {
            srcs = self.opt_srcs(&mut instr);
        }
        if self.config.do_const_fold && self.const_fold(&mut instr, &srcs) {
            srcs = self.opt_srcs(&mut instr);
        }

        if instr.opcode.is_conditional_branch() {
            self.opt_branch(&mut instr, &srcs);
            if instr.opcode == Opcode::Nop {
                return Ok(());
            }
            self.ensure_var_srcs(&mut instr);
            self.fill_bailout(&mut instr);
            self.push_instr(instr);
            return Ok(());
        }

        if self.try_cse(&mut instr, &srcs) {
            srcs = self.opt_srcs(&mut instr);
        }
        self.opt_checks(&mut instr, &srcs);

        let opcode = instr.opcode;
        let mut spec = self.opt_array_access(&mut instr, &srcs);
        if instr.opcode != opcode {
            srcs = self.opt_srcs(&mut instr);
        }
        if spec.is_none() {
            spec = self.type_specialize(&mut instr, &srcs);
        }
        self.process_kills(&instr, &srcs);
        self.ensure_var_srcs(&mut instr);
        self.fill_bailout(&mut instr);
        self.opt_dst(&mut instr, &srcs, spec, iv_change);
        self.push_instr(instr);
        Ok(())
    }

    /// Handle instructions that need no optimization. Returns true when the instruction
    /// was consumed.
    fn pre_opt_peep(&mut self, instr: &mut Instr) -> bool {
        match instr.opcode {
            Opcode::Nop => true,
            Opcode::BailOnNoProfile => {
                trace!(instr = instr.id, "no profile data, block bails out");
                instr.opcode = Opcode::BailOut;
                instr.add_bailout_kind(BailOutKind::ON_NO_PROFILE);
                self.end_block_with_bailout(instr.clone());
                true
            }
            Opcode::BailOut | Opcode::Unreachable => {
                if instr.opcode == Opcode::BailOut && instr.bailout.is_none() {
                    instr.bailout = Some(BailOutInfo::new(BailOutKind::empty(), instr.byte_code_offset));
                }
                self.end_block_with_bailout(instr.clone());
                true
            }
            _ => false,
        }
    }

    fn end_block_with_bailout(&mut self, mut instr: Instr) {
        self.fill_bailout(&mut instr);
        self.push_instr(instr);
        self.block_bailed_out = true;
    }

    /// Track outstanding `StartCall`s and the argument syms of calls being built
    fn track_calls(&mut self, instr: &Instr) -> Result<()> {
        match instr.opcode {
            Opcode::StartCall => self.data.start_call_count += 1,
            Opcode::ArgOut => {
                if let Some(sym) = instr.src1.as_ref().and_then(Opnd::reg_sym) {
                    let var = self.func.syms.var_equiv(sym);
                    self.data.arg_out_syms.push(var);
                }
            }
            Opcode::CallI => {
                if self.data.start_call_count == 0 {
                    return Err(Error::internal(format!(
                        "call {} without a matching StartCall",
                        instr.id
                    )));
                }
                let argc = instr
                    .src2
                    .as_ref()
                    .and_then(Opnd::int_const)
                    .unwrap_or(0)
                    .max(0) as usize;
                let keep = self.data.arg_out_syms.len().saturating_sub(argc);
                self.data.arg_out_syms.truncate(keep);
                self.data.start_call_count -= 1;
            }
            _ => {}
        }
        Ok(())
    }

    // ========== Sources ==========

    /// Value number and copy-propagate every source, including the syms addressing the
    /// destination
    pub(crate) fn opt_srcs(&mut self, instr: &mut Instr) -> SrcValues {
        let mut srcs = SrcValues::default();
        let opcode = instr.opcode;
        if let Some(mut src) = instr.src1.take() {
            let value = self.opt_src(&mut src, opcode, &mut srcs);
            srcs.src1 = value;
            instr.src1 = Some(src);
        }
        if let Some(mut src) = instr.src2.take() {
            let value = self.opt_src(&mut src, opcode, &mut srcs);
            srcs.src2 = value;
            instr.src2 = Some(src);
        }
        match instr.dst.as_mut() {
            Some(Opnd::Indir(indir)) => self.opt_indir(indir, &mut srcs),
            Some(Opnd::Prop(prop)) => {
                if let Some(object) = self.func.syms.property(prop.sym).map(|p| p.object) {
                    srcs.base = Some(self.ensure_sym_value(object, ValueType::UNINITIALIZED));
                }
            }
            _ => {}
        }
        srcs
    }

    fn opt_src(&mut self, opnd: &mut Opnd, opcode: Opcode, srcs: &mut SrcValues) -> Option<Value> {
        match opnd {
            Opnd::Reg(r) => {
                let value = self.ensure_sym_value(r.sym, r.value_type);
                if r.ty == IrType::Var && opcode != Opcode::CheckFixedFld {
                    if let Some(store) = self.copy_prop_candidate(r.sym, &value) {
                        trace!(from = r.sym, to = store, "copy prop");
                        r.sym = store;
                        if !self.is_prepass() {
                            self.stats.copy_props += 1;
                        }
                    }
                }
                r.value_type = value.ty();
                Some(value)
            }
            Opnd::Prop(p) => {
                if let Some(object) = self.func.syms.property(p.sym).map(|ps| ps.object) {
                    srcs.base = Some(self.ensure_sym_value(object, ValueType::UNINITIALIZED));
                }
                let copy = Opnd::Prop(*p);
                let value = self.opnd_value(&copy);
                if let Some(v) = &value {
                    p.value_type = v.ty();
                }
                value
            }
            Opnd::Indir(indir) => {
                self.opt_indir(indir, srcs);
                None
            }
            _ => self.opnd_value(opnd),
        }
    }

    fn opt_indir(&mut self, indir: &mut IndirOpnd, srcs: &mut SrcValues) {
        let base = self.ensure_sym_value(indir.base.sym, indir.base.value_type);
        if let Some(store) = self.copy_prop_candidate(indir.base.sym, &base) {
            indir.base.sym = store;
            if !self.is_prepass() {
                self.stats.copy_props += 1;
            }
        }
        indir.base.value_type = base.ty();
        srcs.base = Some(base);

        let index = match indir.index.as_mut() {
            Some(index) => index,
            None => {
                srcs.index = Some(self.int_constant_value(indir.offset));
                return;
            }
        };
        let value = self.ensure_sym_value(index.sym, index.value_type);
        if let Some(c) = value.info().int_constant_value(false) {
            if let Some(offset) = indir.offset.checked_add(c) {
                indir.offset = offset;
                indir.index = None;
                srcs.index = Some(self.int_constant_value(offset));
                return;
            }
        }
        if index.ty == IrType::Var {
            if let Some(store) = self.copy_prop_candidate(index.sym, &value) {
                index.sym = store;
                if !self.is_prepass() {
                    self.stats.copy_props += 1;
                }
            }
        }
        index.value_type = value.ty();
        srcs.index = Some(value);
    }

    /// Another var sym holding the same value that can replace a use of `sym`
    fn copy_prop_candidate(&self, sym: SymId, value: &Value) -> Option<SymId> {
        if !self.config.do_copy_prop || self.func.is_generator {
            return None;
        }
        let store = value.info().sym_store()?;
        let var = self.func.syms.var_equiv(sym);
        let syms = &self.func.syms;
        if store == var
            || syms.is_property(store)
            || syms.sym_type(store) != IrType::Var
            || syms.is_object_type_sym(store)
        {
            return None;
        }
        if self.data.value_number(store) != Some(value.number())
            || !self.data.is_live_as(store, IrType::Var)
        {
            return None;
        }
        let from = self.data.liveness(var);
        if from != SymLiveness::VAR && from != self.data.liveness(store) {
            return None;
        }
        Some(store)
    }

    /// Box every var source that is currently only live in a specialized representation
    pub(crate) fn ensure_var_srcs(&mut self, instr: &mut Instr) {
        let offset = instr.byte_code_offset;
        let mut syms = Vec::new();
        for opnd in [&instr.src1, &instr.src2].into_iter().flatten() {
            match opnd {
                Opnd::Reg(r) if r.ty == IrType::Var => syms.push(r.sym),
                Opnd::Indir(i) => collect_var_indir_syms(i, &mut syms),
                _ => {}
            }
        }
        if let Some(Opnd::Indir(i)) = &instr.dst {
            collect_var_indir_syms(i, &mut syms);
        }
        for sym in syms {
            self.ensure_var_live(sym, offset);
        }
    }

    /// Make `sym` live as a var, boxing it from a specialized copy if needed
    pub(crate) fn ensure_var_live(&mut self, sym: SymId, byte_code_offset: u32) {
        let var = self.func.syms.var_equiv(sym);
        let mut liveness = self.data.liveness(var);
        if liveness.var || liveness.is_dead() {
            return;
        }
        let from = if liveness.is_live_as(IrType::Int32) {
            IrType::Int32
        } else if liveness.float64 {
            IrType::Float64
        } else if let Some(simd) = liveness.simd {
            simd
        } else {
            return;
        };
        let src = self.func.syms.typed_equiv(var, from);
        let to_var = self
            .new_instr(Opcode::ToVar, byte_code_offset)
            .with_dst(Opnd::reg(var))
            .with_src1(Opnd::typed_reg(src, from));
        self.emit(to_var);
        liveness.var = true;
        self.data.set_liveness(var, liveness);
        if !self.is_prepass() {
            self.stats.conversions += 1;
        }
    }

    // ========== Destination ==========

    fn opt_dst(
        &mut self,
        instr: &mut Instr,
        srcs: &SrcValues,
        spec: Option<ValueInfo>,
        iv_change: Option<(i32, u32)>,
    ) {
        let dst = match instr.dst {
            Some(dst) => dst,
            None => return,
        };
        match dst {
            Opnd::Reg(r) => {
                let var = self.func.syms.var_equiv(r.sym);
                let copied = self.copied_value(instr, srcs);
                let is_copy = copied.is_some();
                let value = match copied {
                    Some(v) => v,
                    None => {
                        let info = match spec {
                            Some(info) => info,
                            None => self.dst_info(instr, srcs),
                        };
                        let info = self.widen_in_prepass(instr, info);
                        self.new_value(info)
                    }
                };
                self.set_sym_value(var, &value);
                let liveness = if r.ty == IrType::Var {
                    SymLiveness::VAR
                } else {
                    SymLiveness::only(r.ty)
                };
                self.data.set_liveness(var, liveness);
                let value = self.data.value(var).unwrap_or(value);

                if !is_copy {
                    self.record_expr(instr, srcs, &value);
                }
                self.track_induction_variable(iv_change, var, &value);
                if let Some(Opnd::Reg(r)) = instr.dst.as_mut() {
                    r.value_type = value.ty();
                }
                if value.ty().is_likely_array_or_object_with_array()
                    || value.ty().is_likely_any_optimized_array()
                {
                    self.data.values_to_kill_on_calls.insert(value.number());
                }
                if instr.opcode == Opcode::LdFld && !instr.flags.contains(InstrFlags::CALLS_ACCESSOR) {
                    if let Some(prop) = instr.src1.as_ref().and_then(Opnd::as_prop).map(|p| p.sym) {
                        self.data.set_field_value(prop, &value);
                    }
                }
            }
            Opnd::Prop(p) => {
                if instr.opcode == Opcode::StFld && !instr.flags.contains(InstrFlags::CALLS_ACCESSOR) {
                    let stored = srcs
                        .src1
                        .as_ref()
                        .and_then(|v| self.value_of(v.number()));
                    if let Some(v) = stored {
                        self.data.set_field_value(p.sym, &v);
                    }
                }
            }
            Opnd::Indir(_) => self.record_element_store(instr, srcs),
            _ => {}
        }
    }

    /// A copy's destination shares the value of its source
    fn copied_value(&mut self, instr: &Instr, srcs: &SrcValues) -> Option<Value> {
        if instr.opcode != Opcode::Ld {
            return None;
        }
        match instr.src1.as_ref()? {
            Opnd::Reg(_) => {
                let vn = srcs.src1.as_ref()?.number();
                self.value_of(vn)
            }
            Opnd::IntConst(c) => Some(self.int_constant_value(*c)),
            Opnd::FloatConst(f) => Some(self.float_constant_value(*f)),
            Opnd::Addr { addr, is_function } => Some(self.var_constant_value(*addr, *is_function)),
            _ => None,
        }
    }

    /// What is known about the result of an instruction that was not specialized
    pub(crate) fn dst_info(&self, instr: &Instr, srcs: &SrcValues) -> ValueInfo {
        let profiled = instr.profiled_type;
        let profiled_or = |fallback: ValueType| {
            if profiled.is_uninitialized() {
                fallback
            } else {
                profiled.to_likely()
            }
        };
        let both = |pred: fn(&ValueType) -> bool| {
            let s1 = srcs.src1.as_ref().map_or(false, |v| pred(&v.ty()));
            let s2 = srcs.src2.as_ref().map_or(true, |v| pred(&v.ty()));
            s1 && s2
        };
        let ty = match instr.opcode {
            Opcode::ArgIn => profiled_or(ValueType::ANY),
            Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Not
            | Opcode::AndI4
            | Opcode::OrI4
            | Opcode::XorI4
            | Opcode::ShlI4
            | Opcode::ShrI4
            | Opcode::NotI4 => ValueType::INT,
            Opcode::ShrU => ValueType::NUMBER,
            Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem
            | Opcode::Neg
            | Opcode::Incr
            | Opcode::Decr
            | Opcode::ConvNum => {
                if both(ValueType::is_likely_int) {
                    ValueType::LIKELY_INT
                } else {
                    ValueType::NUMBER
                }
            }
            Opcode::Add => {
                if both(ValueType::is_likely_int) {
                    ValueType::LIKELY_INT
                } else if both(ValueType::is_number) {
                    ValueType::NUMBER
                } else {
                    profiled_or(ValueType::ANY)
                }
            }
            op if op.is_compare() => ValueType::BOOLEAN,
            op if op.is_int_math() => ValueType::INT,
            op if op.is_math_builtin() => ValueType::NUMBER,
            Opcode::LdLen => profiled_or(ValueType::LIKELY_INT),
            Opcode::NewScArray => {
                if profiled.is_likely_array() {
                    profiled.to_definite()
                } else {
                    ValueType::array(ObjectType::Array, false)
                }
            }
            Opcode::NewScObject => ValueType::OBJECT,
            Opcode::Simd128AddF4
            | Opcode::Simd128SubF4
            | Opcode::Simd128MulF4
            | Opcode::Simd128SplatF4 => ValueType::SIMD128_F4,
            Opcode::Simd128AddI4
            | Opcode::Simd128SubI4
            | Opcode::Simd128MulI4
            | Opcode::Simd128SplatI4 => ValueType::SIMD128_I4,
            _ => profiled_or(ValueType::ANY),
        };
        ValueInfo::new(ty)
    }

    /// In a loop prepass a result computed from values that change across iterations
    /// only keeps its type, made likely unless the opcode always produces it
    fn widen_in_prepass(&self, instr: &Instr, info: ValueInfo) -> ValueInfo {
        let root = match self.prepass_root() {
            Some(root) => root,
            None => return info,
        };
        let invariant = [&instr.src1, &instr.src2]
            .into_iter()
            .flatten()
            .all(|o| self.is_opnd_invariant(o, root));
        if invariant || info.is_generic() && info.ty().is_likely() {
            return info;
        }
        let op = instr.opcode;
        let always_definite = op.is_compare()
            || matches!(
                op.to_var_opcode(),
                Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Shl | Opcode::Shr | Opcode::Not
            )
            || matches!(op, Opcode::NewScArray | Opcode::NewScObject | Opcode::ArgIn);
        let mut widened = info.copy_with_generic_structure_kind();
        if !always_definite {
            widened.set_type(info.ty().to_likely());
        }
        widened
    }
}

fn collect_var_indir_syms(indir: &IndirOpnd, syms: &mut Vec<SymId>) {
    if indir.base.ty == IrType::Var {
        syms.push(indir.base.sym);
    }
    if let Some(index) = indir.index {
        if index.ty == IrType::Var {
            syms.push(index.sym);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globopt::config::GlobOptConfig;
    use crate::ir::{FuncBuilder, Func};

    fn optimize(func: &mut Func, config: GlobOptConfig) -> crate::globopt::stats::OptStats {
        crate::backward::analyze(func);
        let mut ctx = OptContext::new(func, config);
        ctx.optimize_blocks().unwrap();
        ctx.stats
    }

    #[test]
    fn test_copy_prop_uses_original_sym() {
        let mut b = FuncBuilder::new("copy");
        let x = b.param("x", ValueType::UNINITIALIZED);
        let y = b.var("y");
        let z = b.var("z");
        b.ld(y, x);
        b.binary(Opcode::Add, z, Opnd::reg(y), Opnd::reg(y));
        b.ret(Opnd::reg(z));
        let mut func = b.finish().unwrap();
        let stats = optimize(&mut func, GlobOptConfig::default());

        let add = func.block(func.entry).instrs.iter().find(|i| i.opcode == Opcode::Add).cloned().unwrap();
        assert_eq!(add.src1.and_then(|o| o.reg_sym()), Some(x));
        assert_eq!(add.src2.and_then(|o| o.reg_sym()), Some(x));
        assert_eq!(stats.copy_props, 2);
    }

    #[test]
    fn test_copy_prop_disabled_in_generators() {
        let mut b = FuncBuilder::new("gen");
        let x = b.param("x", ValueType::UNINITIALIZED);
        let y = b.var("y");
        b.ld(y, x);
        b.ret(Opnd::reg(y));
        let mut func = b.finish().unwrap();
        func.is_generator = true;
        let stats = optimize(&mut func, GlobOptConfig::default());
        assert_eq!(stats.copy_props, 0);
    }

    #[test]
    fn test_unbalanced_call_is_an_error() {
        let mut b = FuncBuilder::new("call");
        let f = b.param("f", ValueType::UNINITIALIZED);
        let call = b
            .instr(Opcode::CallI)
            .with_src1(Opnd::reg(f))
            .with_src2(Opnd::IntConst(0));
        b.emit(call);
        b.ret(Opnd::reg(f));
        let mut func = b.finish().unwrap();
        crate::backward::analyze(&mut func);
        let mut ctx = OptContext::new(&mut func, GlobOptConfig::default());
        assert!(matches!(ctx.optimize_blocks(), Err(Error::Internal(_))));
    }

    #[test]
    fn test_balanced_call_is_accepted() {
        let mut b = FuncBuilder::new("call");
        let f = b.param("f", ValueType::UNINITIALIZED);
        let a = b.param("a", ValueType::UNINITIALIZED);
        let r = b.var("r");
        b.call(Some(r), f, &[a, a]);
        b.ret(Opnd::reg(r));
        let mut func = b.finish().unwrap();
        optimize(&mut func, GlobOptConfig::default());
        let ops: Vec<Opcode> = func.block(func.entry).instrs.iter().map(|i| i.opcode).collect();
        assert!(ops.contains(&Opcode::StartCall));
        assert!(ops.contains(&Opcode::CallI));
    }

    #[test]
    fn test_bitwise_result_is_int() {
        let mut b = FuncBuilder::new("or");
        let x = b.param("x", ValueType::UNINITIALIZED);
        let y = b.var("y");
        b.binary(Opcode::Or, y, Opnd::reg(x), Opnd::IntConst(0));
        b.ret(Opnd::reg(y));
        let mut func = b.finish().unwrap();
        optimize(&mut func, GlobOptConfig::disabled());
        let or = func.block(func.entry).instrs.iter().find(|i| i.opcode == Opcode::Or).cloned().unwrap();
        assert_eq!(or.dst.map(|d| d.value_type()), Some(ValueType::INT));
    }
}
