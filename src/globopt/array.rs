//! Array checks, array internals and array value kills
//!
//! An access to a value that is likely an array first proves the array's kind with a
//! `BailOnNotArray`, hoisted to the outermost landing pad the base is invariant in
//! when no loop in between may change arrays. The head segment, its length and the
//! array length are then loaded into syms, as far out as the loops' kills allow, and
//! cached on the base's value so later accesses reuse them until something kills them.

use super::block_data::{BlockData, SymLiveness};
use super::context::OptContext;
use super::instr_opt::SrcValues;
use super::value_info::{ArrayInfo, Value, ValueInfo, ValueNumber};
use crate::ir::{
    ArrayRegOpnd, BailOutInfo, BailOutKind, IndirOpnd, Instr, InstrFlags, IrType, JsArrayKills,
    LoopId, ObjectType, Opcode, Opnd, SymId, ValueType,
};
use tracing::{debug, trace};

/// An array internal cached in a sym
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayInternal {
    HeadSegment,
    HeadSegmentLength,
    Length,
}

impl ArrayInternal {
    fn opcode(self) -> Opcode {
        match self {
            ArrayInternal::HeadSegment => Opcode::LdArrHeadSegment,
            ArrayInternal::HeadSegmentLength => Opcode::LdArrHeadSegmentLength,
            ArrayInternal::Length => Opcode::LdLen,
        }
    }

    fn ir_type(self) -> IrType {
        match self {
            ArrayInternal::HeadSegment => IrType::Var,
            _ => IrType::Int32,
        }
    }

    /// Kills that invalidate the cached sym
    fn killed_by(self) -> JsArrayKills {
        match self {
            ArrayInternal::HeadSegment => JsArrayKills::HEAD_SEGMENTS,
            ArrayInternal::HeadSegmentLength => JsArrayKills::HEAD_SEGMENT_LENGTHS,
            ArrayInternal::Length => JsArrayKills::LENGTHS,
        }
    }

    fn get(self, info: &ArrayInfo) -> Option<SymId> {
        match self {
            ArrayInternal::HeadSegment => info.head_segment_sym,
            ArrayInternal::HeadSegmentLength => info.head_segment_length_sym,
            ArrayInternal::Length => info.length_sym,
        }
    }

    fn set(self, info: &mut ArrayInfo, sym: Option<SymId>) {
        match self {
            ArrayInternal::HeadSegment => info.head_segment_sym = sym,
            ArrayInternal::HeadSegmentLength => info.head_segment_length_sym = sym,
            ArrayInternal::Length => info.length_sym = sym,
        }
    }
}

/// Arrays whose elements live in a head segment the optimizer can address
fn is_array_base(ty: ValueType) -> bool {
    ty.is_likely_array() || ty.is_likely_typed_array()
}

/// What an in-range element load from an array of type `ty` produces
fn element_info(ty: ValueType, in_bounds: bool) -> Option<ValueInfo> {
    let object = ty.object_type();
    let element = if object.has_int_elements() {
        ValueType::INT
    } else if object.has_float_elements() {
        ValueType::NUMBER
    } else {
        return None;
    };
    let definite = in_bounds && (object.is_typed_array() || ty.has_no_missing_values());
    if !definite {
        return Some(ValueInfo::new(element.to_likely()));
    }
    let range = match object {
        ObjectType::Int8Array => Some((i8::MIN as i32, i8::MAX as i32)),
        ObjectType::Uint8Array | ObjectType::Uint8ClampedArray => Some((0, u8::MAX as i32)),
        ObjectType::Int16Array => Some((i16::MIN as i32, i16::MAX as i32)),
        ObjectType::Uint16Array => Some((0, u16::MAX as i32)),
        _ => None,
    };
    Some(match range {
        Some((min, max)) => ValueInfo::int_range(min, max, true),
        None => ValueInfo::new(element),
    })
}

/// Whether storing a value of type `stored` keeps a native array native
fn fits_native_elements(object: ObjectType, stored: ValueType) -> bool {
    match object {
        ObjectType::NativeIntArray => stored.is_int(),
        ObjectType::NativeFloatArray => stored.is_number(),
        _ => true,
    }
}

fn element_indir(instr: &Instr) -> Option<IndirOpnd> {
    match instr.opcode {
        Opcode::LdElemI => instr.src1.as_ref().and_then(Opnd::as_indir).copied(),
        Opcode::StElemI => instr.dst.as_ref().and_then(Opnd::as_indir).copied(),
        _ => None,
    }
}

fn set_element_indir(instr: &mut Instr, indir: IndirOpnd) {
    let slot = match instr.opcode {
        Opcode::LdElemI => &mut instr.src1,
        _ => &mut instr.dst,
    };
    *slot = Some(Opnd::Indir(indir));
}

impl<'f> OptContext<'f> {
    /// Check, load array internals for, and bound check an array access. Returns what
    /// is known about a loaded element.
    pub(crate) fn opt_array_access(&mut self, instr: &mut Instr, srcs: &SrcValues) -> Option<ValueInfo> {
        if !self.config.do_array_opts() {
            return None;
        }
        match instr.opcode {
            Opcode::LdElemI | Opcode::StElemI => self.opt_element_access(instr, srcs),
            Opcode::LdLen => self.opt_ld_len(instr, srcs),
            _ => None,
        }
    }

    fn opt_element_access(&mut self, instr: &mut Instr, srcs: &SrcValues) -> Option<ValueInfo> {
        let mut indir = element_indir(instr)?;
        let base = srcs.base.clone()?;
        if !is_array_base(base.ty()) {
            return None;
        }
        let is_load = instr.opcode == Opcode::LdElemI;
        let base_sym = indir.base.sym;
        let base = self.ensure_array(base_sym, &base, instr.byte_code_offset);
        let ty = base.ty();
        indir.base.value_type = ty;
        if self.is_prepass() {
            set_element_indir(instr, indir);
            return if is_load { element_info(ty, false) } else { None };
        }

        let array = self.load_array_internals(
            base_sym,
            &base,
            &[ArrayInternal::HeadSegment, ArrayInternal::HeadSegmentLength],
            instr.byte_code_offset,
        );
        let mut array_opnd = ArrayRegOpnd {
            head_segment_sym: array.head_segment_sym,
            head_segment_length_sym: array.head_segment_length_sym,
            length_sym: array.length_sym,
            ..ArrayRegOpnd::default()
        };
        let may_grow = !is_load
            && instr.flags.intersects(
                InstrFlags::STORES_OUTSIDE_HEAD_SEGMENT | InstrFlags::STORES_OUTSIDE_ARRAY_BOUNDS,
            );
        let in_bounds = match (array.head_segment_length_sym, srcs.index.clone()) {
            (Some(seg_len), Some(index)) if self.config.do_bound_check_elimination => {
                self.opt_bound_checks(instr, &mut indir, &index, seg_len, may_grow, &mut array_opnd)
            }
            _ => false,
        };
        indir.array = Some(array_opnd);
        set_element_indir(instr, indir);
        if is_load {
            element_info(ty, in_bounds)
        } else {
            None
        }
    }

    /// `a.length` of a checked array becomes a copy of its length sym
    fn opt_ld_len(&mut self, instr: &mut Instr, srcs: &SrcValues) -> Option<ValueInfo> {
        let base_sym = instr.src1.as_ref().and_then(Opnd::reg_sym)?;
        let base = srcs.src1.clone()?;
        if !is_array_base(base.ty()) || !matches!(instr.dst, Some(Opnd::Reg(_))) {
            return None;
        }
        let base = self.ensure_array(base_sym, &base, instr.byte_code_offset);
        if self.is_prepass() {
            return Some(ValueInfo::int_range(0, i32::MAX, true));
        }
        let what = if base.ty().is_typed_array() {
            ArrayInternal::HeadSegmentLength
        } else {
            ArrayInternal::Length
        };
        let array = self.load_array_internals(base_sym, &base, &[what], instr.byte_code_offset);
        let len = what.get(&array)?;
        trace!(instr = instr.id, len, "length from loaded sym");
        instr.opcode = Opcode::Ld;
        instr.src1 = Some(Opnd::typed_reg(len, IrType::Int32));
        self.set_typed_dst(instr, IrType::Int32);
        None
    }

    // ========== Array checks ==========

    /// Prove that `base` is an array of its likely kind, returning its narrowed value
    fn ensure_array(&mut self, base_sym: SymId, base: &Value, offset: u32) -> Value {
        let vn = base.number();
        self.data.values_to_kill_on_calls.insert(vn);
        let ty = base.ty();
        if ty.is_object() {
            return base.clone();
        }
        let native = ty.is_likely_native_array();
        let kind = if native {
            BailOutKind::ON_NOT_NATIVE_ARRAY
        } else {
            BailOutKind::ON_NOT_ARRAY
        };
        let hoist_to = if self.config.do_array_check_hoist {
            self.outermost_loop_where(|ctx, l| {
                ctx.is_invariant(base_sym, l) && ctx.array_check_hoistable(l, native)
            })
        } else {
            None
        };

        match hoist_to {
            Some(l) => {
                let top = self.loop_top_offset(l);
                let check = self.bail_on_not_array(base_sym, kind, top);
                debug!(loop_id = l, array = base_sym, "hoisted BailOnNotArray");
                self.insert_in_landing_pad(l, check);
                self.propagate_hoisted(l, move |d| {
                    if let Some(v) = d.value_of(vn) {
                        let mut info = v.info().clone();
                        info.set_type(v.ty().to_definite());
                        d.update_value_info(vn, info);
                        d.values_to_kill_on_calls.insert(vn);
                    }
                });
                self.stats.array_checks_hoisted += 1;
            }
            None => {
                let check = self.bail_on_not_array(base_sym, kind, offset);
                trace!(array = base_sym, ?kind, "BailOnNotArray");
                self.emit(check);
                let mut info = base.info().clone();
                info.set_type(ty.to_definite());
                self.update_value_info(base, info);
            }
        }
        self.value_of(vn).unwrap_or_else(|| base.clone())
    }

    fn bail_on_not_array(&mut self, base: SymId, kind: BailOutKind, offset: u32) -> Instr {
        let mut check = self
            .new_instr(Opcode::BailOnNotArray, offset)
            .with_src1(Opnd::reg(base));
        check.bailout = Some(BailOutInfo::new(kind, offset));
        check
    }

    fn array_check_hoistable(&self, l: LoopId, native: bool) -> bool {
        let lp = self.func.loop_(l);
        lp.implicit_calls_allow_opts()
            && !lp.has_call
            && !(native && lp.array_kills.contains(JsArrayKills::NATIVE_ARRAYS))
    }

    // ========== Array internals ==========

    /// The cached syms of `base`, loading the `wanted` ones that are missing
    fn load_array_internals(
        &mut self,
        base_sym: SymId,
        base: &Value,
        wanted: &[ArrayInternal],
        offset: u32,
    ) -> ArrayInfo {
        let mut array = base.info().array_info().copied().unwrap_or_default();
        for &what in wanted {
            if what.get(&array).is_some() {
                continue;
            }
            let sym = self.load_array_internal(base_sym, base.number(), what, offset);
            what.set(&mut array, Some(sym));
        }
        array
    }

    fn load_array_internal(
        &mut self,
        base_sym: SymId,
        vn: ValueNumber,
        what: ArrayInternal,
        offset: u32,
    ) -> SymId {
        let ty = what.ir_type();
        let sym = self.func.syms.new_temp(ty);
        let info = match what {
            ArrayInternal::HeadSegment => ValueInfo::new(ValueType::ANY),
            _ => ValueInfo::int_range(0, i32::MAX, true),
        };
        let value = self.new_value(info.with_sym_store(Some(sym)));
        let liveness = SymLiveness::only(ty);
        let update = move |d: &mut BlockData| {
            d.set_value(sym, &value, true);
            d.set_liveness(sym, liveness);
            if let Some(v) = d.value_of(vn) {
                let mut array = v.info().array_info().copied().unwrap_or_default();
                what.set(&mut array, Some(sym));
                let info = v.info().with_array_info(v.ty(), array);
                d.update_value_info(vn, info);
            }
        };

        let may_hoist = match what {
            ArrayInternal::Length => self.config.do_array_length_hoist,
            _ => self.config.do_array_segment_hoist,
        };
        let hoist_to = if may_hoist {
            self.outermost_loop_where(|ctx, l| {
                ctx.is_invariant(base_sym, l) && ctx.array_load_hoistable(l, base_sym, what.killed_by())
            })
        } else {
            None
        };
        let at = match hoist_to {
            Some(l) => self.loop_top_offset(l),
            None => offset,
        };
        let mut load = self
            .new_instr(what.opcode(), at)
            .with_dst(Opnd::typed_reg(sym, ty))
            .with_src1(Opnd::reg(base_sym));
        if what == ArrayInternal::Length {
            load.bailout = Some(BailOutInfo::new(BailOutKind::INT_ONLY, at));
        }

        match hoist_to {
            Some(l) => {
                debug!(loop_id = l, array = base_sym, sym, load = ?what, "hoisted array load");
                self.insert_in_landing_pad(l, load);
                self.propagate_hoisted(l, update);
                self.stats.array_loads_hoisted += 1;
            }
            None => {
                self.emit(load);
                update(&mut self.data);
            }
        }
        sym
    }

    fn array_load_hoistable(&self, l: LoopId, base_sym: SymId, kill: JsArrayKills) -> bool {
        let lp = self.func.loop_(l);
        if !lp.implicit_calls_allow_opts() || lp.has_call || lp.array_kills.intersects(kill) {
            return false;
        }
        self.block_data
            .get(&lp.landing_pad)
            .and_then(|d| d.value_type(base_sym))
            .map_or(false, |t| t.is_any_optimized_array())
    }

    // ========== Kills ==========

    /// Invalidate what an instruction may change: fields, array types and cached
    /// array syms, and the expressions reading them
    pub(crate) fn process_kills(&mut self, instr: &Instr, srcs: &SrcValues) {
        self.process_field_kills(instr, srcs);

        let mut kills = instr.js_array_kills(&self.func.syms);
        let stored = match instr.opcode {
            Opcode::StElemI => srcs.base.as_ref().zip(srcs.src1.as_ref()),
            Opcode::InlineArrayPush => srcs.src1.as_ref().zip(srcs.src2.as_ref()),
            _ => None,
        };
        if let Some((base, value)) = stored {
            let ty = base.ty();
            if ty.is_likely_native_array() && !fits_native_elements(ty.object_type(), value.ty()) {
                kills |= JsArrayKills::NATIVE_ARRAYS;
            }
        }

        let kills_elements = matches!(
            instr.opcode,
            Opcode::StElemI
                | Opcode::DeleteElemI
                | Opcode::StFld
                | Opcode::DeleteFld
                | Opcode::InlineArrayPush
                | Opcode::InlineArrayPop
        ) || instr.opcode.is_call()
            || instr.flags.contains(InstrFlags::CALLS_ACCESSOR);
        if kills_elements {
            self.data.expr_to_value.retain(|e, _| e.opcode != Opcode::LdElemI);
        }
        if kills.contains(JsArrayKills::LENGTHS) {
            self.data.expr_to_value.retain(|e, _| e.opcode != Opcode::LdLen);
        }
        if kills.is_empty() {
            return;
        }
        trace!(instr = instr.id, ?kills, "array kills");
        self.kill_array_values(kills);
        self.record_loop_array_kills(kills);
    }

    fn kill_array_values(&mut self, kills: JsArrayKills) {
        let mut vns: Vec<ValueNumber> = self.data.values_to_kill_on_calls.iter().copied().collect();
        vns.sort_unstable();
        for vn in vns {
            let v = match self.data.value_of(vn) {
                Some(v) => v,
                None => continue,
            };
            let ty = v.ty();
            let everything = kills.contains(JsArrayKills::ALL);
            if !everything && ty.is_likely_typed_array() {
                continue;
            }
            let mut new_ty = ty;
            if everything || (kills.contains(JsArrayKills::NATIVE_ARRAYS) && ty.is_likely_native_array()) {
                new_ty = new_ty.to_likely();
            }
            if kills.contains(JsArrayKills::NO_MISSING_VALUES) {
                new_ty = new_ty.with_no_missing_values(false);
            }
            let mut array = v.info().array_info().copied().unwrap_or_default();
            if new_ty.is_likely() && !new_ty.is_definite() {
                array = ArrayInfo::default();
            } else {
                for what in [
                    ArrayInternal::HeadSegment,
                    ArrayInternal::HeadSegmentLength,
                    ArrayInternal::Length,
                ] {
                    if kills.intersects(what.killed_by()) {
                        what.set(&mut array, None);
                    }
                }
            }
            let info = v.info().with_array_info(new_ty, array);
            if info != *v.info() {
                trace!(vn, from = %v.info(), to = %info, "array value killed");
                self.data.update_value_info(vn, info);
            }
        }
        if kills.contains(JsArrayKills::HEAD_SEGMENT_LENGTHS) {
            self.data.available_int_bound_checks.clear();
        }
    }

    /// In the prepass, remember on every enclosing loop what the instruction kills
    fn record_loop_array_kills(&mut self, kills: JsArrayKills) {
        if !self.is_prepass() {
            return;
        }
        for l in self.func.enclosing_loops(self.current_block) {
            self.func.loop_mut(l).array_kills |= kills;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::globopt::config::GlobOptConfig;
    use crate::globopt::context::OptContext;
    use crate::globopt::stats::OptStats;
    use crate::ir::{
        BlockId, Func, FuncBuilder, ImplicitCallFlags, ObjectType, Opcode, Opnd, SymId, ValueType,
    };

    fn optimize(func: &mut Func) -> OptStats {
        crate::backward::analyze(func);
        let mut ctx = OptContext::new(func, GlobOptConfig::default());
        ctx.optimize_blocks().unwrap();
        ctx.stats
    }

    fn count_in(func: &Func, blocks: &[BlockId], opcode: Opcode) -> usize {
        blocks
            .iter()
            .flat_map(|&b| func.block(b).instrs.iter())
            .filter(|i| i.opcode == opcode)
            .count()
    }

    fn count(func: &Func, opcode: Opcode) -> usize {
        let all: Vec<BlockId> = func.blocks.iter().map(|b| b.id).collect();
        count_in(func, &all, opcode)
    }

    /// `for (i = 0; i < n; i++) { x = a[i]; <extra> }`
    fn element_loop(extra: impl FnOnce(&mut FuncBuilder, SymId)) -> Func {
        let mut b = FuncBuilder::new("loop");
        let a = b.param("a", ValueType::likely_array(ObjectType::NativeIntArray, true));
        let n = b.param("n", ValueType::LIKELY_INT);
        let i = b.var("i");
        let x = b.var("x");
        b.ld_int(x, 0);
        b.ld_int(i, 0);
        let header = b.block();
        let body = b.block();
        let exit = b.block();
        b.goto(header);
        b.switch_to(header);
        b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(n)), exit, body);
        b.switch_to(body);
        b.ld_elem(x, a, i);
        extra(&mut b, header);
        b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::IntConst(1));
        b.br(header);
        b.switch_to(exit);
        b.ret(Opnd::reg(x));
        b.finish().unwrap()
    }

    #[test]
    fn test_array_check_hoisted_to_landing_pad() {
        let mut func = element_loop(|_, _| {});
        let stats = optimize(&mut func);
        let lp = func.loops[0].landing_pad;
        let body = func.loops[0].blocks.clone();

        assert_eq!(stats.array_checks_hoisted, 1);
        assert_eq!(count_in(&func, &[lp], Opcode::BailOnNotArray), 1);
        assert_eq!(count_in(&func, &body, Opcode::BailOnNotArray), 0);
        assert_eq!(count_in(&func, &[lp], Opcode::LdArrHeadSegment), 1);
        assert_eq!(count_in(&func, &[lp], Opcode::LdArrHeadSegmentLength), 1);
        assert!(stats.array_loads_hoisted >= 2);
    }

    #[test]
    fn test_call_in_loop_keeps_checks_in_body() {
        let mut func = element_loop(|b, header| {
            let f = b.param("f", ValueType::UNINITIALIZED);
            b.call(None, f, &[]);
            b.set_loop_implicit_calls(header, ImplicitCallFlags::UNKNOWN);
        });
        let stats = optimize(&mut func);
        let lp = func.loops[0].landing_pad;
        let body = func.loops[0].blocks.clone();

        assert_eq!(stats.array_checks_hoisted, 0);
        assert_eq!(count_in(&func, &[lp], Opcode::BailOnNotArray), 0);
        assert_eq!(count_in(&func, &body, Opcode::BailOnNotArray), 1);
    }

    #[test]
    fn test_second_length_load_reuses_sym() {
        let mut b = FuncBuilder::new("len");
        let a = b.param("a", ValueType::likely_array(ObjectType::Array, false));
        let l1 = b.var("l1");
        let l2 = b.var("l2");
        let r = b.var("r");
        b.ld_len(l1, a);
        b.ld_len(l2, a);
        b.binary(Opcode::Add, r, Opnd::reg(l1), Opnd::reg(l2));
        b.ret(Opnd::reg(r));
        let mut func = b.finish().unwrap();
        optimize(&mut func);

        assert_eq!(count(&func, Opcode::BailOnNotArray), 1);
        assert_eq!(count(&func, Opcode::LdLen), 1);
    }

    #[test]
    fn test_push_drops_cached_length() {
        let mut b = FuncBuilder::new("push");
        let a = b.param("a", ValueType::likely_array(ObjectType::Array, false));
        let l1 = b.var("l1");
        let l2 = b.var("l2");
        let r = b.var("r");
        b.ld_len(l1, a);
        let push = b
            .instr(Opcode::InlineArrayPush)
            .with_src1(Opnd::reg(a))
            .with_src2(Opnd::IntConst(1));
        b.emit(push);
        b.ld_len(l2, a);
        b.binary(Opcode::Add, r, Opnd::reg(l1), Opnd::reg(l2));
        b.ret(Opnd::reg(r));
        let mut func = b.finish().unwrap();
        optimize(&mut func);

        assert_eq!(count(&func, Opcode::LdLen), 2);
        assert_eq!(count(&func, Opcode::BailOnNotArray), 1);
    }

    #[test]
    fn test_call_makes_array_likely_again() {
        let mut b = FuncBuilder::new("call");
        let a = b.param("a", ValueType::likely_array(ObjectType::Array, false));
        let f = b.param("f", ValueType::UNINITIALIZED);
        let l1 = b.var("l1");
        let l2 = b.var("l2");
        let r = b.var("r");
        b.ld_len(l1, a);
        b.call(None, f, &[]);
        b.ld_len(l2, a);
        b.binary(Opcode::Add, r, Opnd::reg(l1), Opnd::reg(l2));
        b.ret(Opnd::reg(r));
        let mut func = b.finish().unwrap();
        optimize(&mut func);

        assert_eq!(count(&func, Opcode::BailOnNotArray), 2);
    }

    #[test]
    fn test_typed_array_element_is_int() {
        let mut b = FuncBuilder::new("typed");
        let a = b.param("a", ValueType::likely_array(ObjectType::Int8Array, false));
        let i = b.param("i", ValueType::LIKELY_INT);
        let x = b.var("x");
        b.ld_elem(x, a, i);
        b.ret(Opnd::reg(x));
        let mut func = b.finish().unwrap();
        optimize(&mut func);

        let load = func
            .block(func.entry)
            .instrs
            .iter()
            .find(|i| i.opcode == Opcode::LdElemI)
            .cloned()
            .unwrap();
        let indir = load.src1.unwrap();
        let array = indir.as_indir().and_then(|i| i.array).unwrap();
        assert!(array.head_segment_length_sym.is_some());
        assert!(load.dst.unwrap().value_type().is_likely_int());
    }
}
