//! Bound check elimination and hoisting
//!
//! An element access `a[i]` through a loaded head segment needs `0 <= i` and
//! `i <= headSegmentLength - 1`. Each side is removed when the index's bounds prove
//! it, folded into an available `BoundCheck` that an earlier access made, hoisted into
//! a landing pad, or split off into a separate `BoundCheck` that later accesses reuse.
//!
//! An index that is an increasing induction variable is hoisted through the loop
//! count: the largest value it takes is `entry + loopCountMinusOne * maxChange`.

use super::context::OptContext;
use super::int_bounds::{IntBoundCheck, IntBoundCheckCompatibilityId, IntBounds, IntConstantBounds};
use super::loops::LoopCountOperand;
use super::value_info::{Value, ValueInfo, ValueNumber};
use crate::ir::{
    ArrayRegOpnd, BailOutInfo, BailOutKind, IndirOpnd, Instr, IrType, LoopId, Opcode, Opnd, SymId,
    ValueType,
};
use tracing::{debug, trace};

impl<'f> OptContext<'f> {
    /// Remove or relocate the bound checks of an access. Sets the eliminated flags on
    /// `array` and returns true when both sides are covered.
    pub(crate) fn opt_bound_checks(
        &mut self,
        instr: &mut Instr,
        indir: &mut IndirOpnd,
        index: &Value,
        seg_len: SymId,
        may_grow: bool,
        array: &mut ArrayRegOpnd,
    ) -> bool {
        if !self.config.do_type_spec {
            return false;
        }
        let offset = instr.byte_code_offset;
        let index_opnd = match self.int32_index(indir, index, offset) {
            Some(o) => o,
            None => return false,
        };
        // Converting the index may have proven it an int.
        let index = &self.value_of(index.number()).unwrap_or_else(|| index.clone());
        let seg_len_value = match self.sym_value(seg_len) {
            Some(v) => v,
            None => return false,
        };

        let lower = self.opt_lower_bound_check(&index_opnd, index, offset);
        let upper = !may_grow
            && self.opt_upper_bound_check(&index_opnd, index, seg_len, &seg_len_value, offset);
        array.eliminated_lower_bound_check = lower;
        array.eliminated_upper_bound_check = upper;

        if matches!(index_opnd, Opnd::Reg(_)) && (lower || upper) {
            self.narrow_index(index, lower, upper.then_some(&seg_len_value));
        }
        trace!(instr = instr.id, lower, upper, "bound checks");
        lower && upper
    }

    /// The index of an access as an int32 operand, specializing the indir's index
    fn int32_index(&mut self, indir: &mut IndirOpnd, index: &Value, offset: u32) -> Option<Opnd> {
        let reg = match indir.index {
            None => return Some(Opnd::IntConst(indir.offset)),
            Some(r) if indir.offset == 0 => r,
            Some(_) => return None,
        };
        if !index.ty().is_likely_int() {
            return None;
        }
        let mut opnd = Opnd::Reg(reg);
        if !self.convert_use(&mut opnd, IrType::Int32, offset, false) {
            return None;
        }
        match opnd {
            Opnd::Reg(r) => indir.index = Some(r),
            Opnd::IntConst(c) => {
                indir.index = None;
                indir.offset = c;
            }
            _ => return None,
        }
        Some(opnd)
    }

    // ========== Lower bound ==========

    fn opt_lower_bound_check(&mut self, index_opnd: &Opnd, index: &Value, offset: u32) -> bool {
        if index.info().int_constant_lower_bound(false).map_or(false, |b| b >= 0) {
            self.stats.bound_checks_eliminated += 1;
            return true;
        }
        if let Opnd::IntConst(_) = index_opnd {
            return false;
        }
        if self.config.do_bound_check_hoist && self.hoist_lower_bound_check(index) {
            return true;
        }
        let check = self.new_bound_check(
            Opnd::IntConst(0),
            *index_opnd,
            0,
            BailOutKind::ON_ARRAY_ACCESS_HELPER_CALL,
            offset,
        );
        trace!(index = %index, "separate lower bound check");
        self.emit(check);
        true
    }

    fn hoist_lower_bound_check(&mut self, index: &Value) -> bool {
        let vn = index.number();
        let invariant = self.outermost_loop_where(|ctx, l| ctx.invariant_int32_sym_for_value(vn, l).is_some());
        if let Some(l) = invariant {
            let sym = match self.invariant_int32_sym_for_value(vn, l) {
                Some(s) => s,
                None => return false,
            };
            self.hoist_bound_check(
                l,
                Opnd::IntConst(0),
                Opnd::typed_reg(sym, IrType::Int32),
                0,
                BailOutKind::ON_FAILED_HOISTED_BOUND_CHECK,
            );
            self.propagate_hoisted(l, move |d| {
                if let Some(v) = d.value_of(vn) {
                    d.update_value_info(vn, with_lower_bound_zero(&v));
                }
            });
            return true;
        }

        // An increasing induction variable is never below its entry value.
        let l = match self.current_loop() {
            Some(l) => l,
            None => return false,
        };
        let (entry, _) = match self.increasing_induction_variable(l, index) {
            Some(iv) => iv,
            None => return false,
        };
        match entry {
            LoopCountOperand::Constant(c) if c >= 0 => {
                self.stats.bound_checks_eliminated += 1;
                true
            }
            LoopCountOperand::Constant(_) => false,
            LoopCountOperand::Sym(s) => {
                self.hoist_bound_check(
                    l,
                    Opnd::IntConst(0),
                    Opnd::typed_reg(s, IrType::Int32),
                    0,
                    BailOutKind::ON_FAILED_HOISTED_BOUND_CHECK,
                );
                true
            }
        }
    }

    // ========== Upper bound ==========

    fn opt_upper_bound_check(
        &mut self,
        index_opnd: &Opnd,
        index: &Value,
        seg_len: SymId,
        seg_len_value: &Value,
        offset: u32,
    ) -> bool {
        let proven_relative = index
            .info()
            .int_bounds()
            .map_or(false, |b| b.is_less_than_or_equal_to(seg_len_value, -1));
        let proven_constant = match (
            index.info().int_constant_upper_bound(false),
            seg_len_value.info().int_constant_lower_bound(false),
        ) {
            (Some(i), Some(len)) => i < len,
            _ => false,
        };
        if proven_relative || proven_constant {
            trace!(index = %index, "upper bound proven");
            self.stats.bound_checks_eliminated += 1;
            return true;
        }
        if self.reuse_upper_bound_check(index, seg_len_value) {
            self.stats.bound_checks_eliminated += 1;
            return true;
        }
        if self.config.do_bound_check_hoist && self.hoist_upper_bound_check(index_opnd, index, seg_len, seg_len_value) {
            return true;
        }

        let check = self.new_bound_check(
            *index_opnd,
            Opnd::typed_reg(seg_len, IrType::Int32),
            -1,
            BailOutKind::ON_ARRAY_ACCESS_HELPER_CALL,
            offset,
        );
        if let Opnd::Reg(_) = index_opnd {
            let available = IntBoundCheck::new(index.number(), seg_len_value.number(), check.id, self.current_block);
            self.data
                .available_int_bound_checks
                .insert(available.compatibility_id(), available);
        }
        trace!(index = %index, "separate upper bound check");
        self.emit(check);
        true
    }

    /// Tighten an available `base <= segLen + c` check so it covers `index = base + k`
    fn reuse_upper_bound_check(&mut self, index: &Value, seg_len_value: &Value) -> bool {
        let mut candidates: Vec<(ValueNumber, i32)> = vec![(index.number(), 0)];
        if let Some(b) = index.info().int_bounds() {
            for lower in b.relative_lower_bounds().values() {
                let base = lower.base_value_number();
                if b
                    .relative_upper_bounds()
                    .get(&base)
                    .map_or(false, |upper| upper.offset() == lower.offset())
                {
                    candidates.push((base, lower.offset()));
                }
            }
        }
        for (base, k) in candidates {
            let id = IntBoundCheckCompatibilityId::new(base, seg_len_value.number());
            let check = match self.data.available_int_bound_checks.get(&id) {
                Some(c) => *c,
                None => continue,
            };
            let needed = match (-1i32).checked_sub(k) {
                Some(o) => o,
                None => continue,
            };
            let adjusted = self
                .find_instr_mut(check.block, check.instr)
                .map_or(false, |instr| super::int_bounds::set_bound_offset(instr, needed, false));
            if adjusted {
                debug!(instr = check.instr, base, k, "reused bound check");
                return true;
            }
        }
        false
    }

    fn hoist_upper_bound_check(
        &mut self,
        index_opnd: &Opnd,
        index: &Value,
        seg_len: SymId,
        seg_len_value: &Value,
    ) -> bool {
        let vn = index.number();
        let seg_len_vn = seg_len_value.number();
        let seg_len_opnd = Opnd::typed_reg(seg_len, IrType::Int32);

        let constant = index_opnd.int_const();
        let invariant = self.outermost_loop_where(|ctx, l| {
            ctx.is_invariant(seg_len, l)
                && (constant.is_some() || ctx.invariant_int32_sym_for_value(vn, l).is_some())
        });
        if let Some(l) = invariant {
            let src1 = match constant {
                Some(c) => Some(Opnd::IntConst(c)),
                None => self
                    .invariant_int32_sym_for_value(vn, l)
                    .map(|s| Opnd::typed_reg(s, IrType::Int32)),
            };
            if let Some(src1) = src1 {
                let id = self.hoist_bound_check(l, src1, seg_len_opnd, -1, BailOutKind::ON_FAILED_HOISTED_BOUND_CHECK);
                if constant.is_none() {
                    let lp = self.func.loop_(l).landing_pad;
                    let available = IntBoundCheck::new(vn, seg_len_vn, id, lp);
                    self.propagate_hoisted(l, move |d| {
                        d.available_int_bound_checks
                            .insert(available.compatibility_id(), available);
                    });
                }
                return true;
            }
        }

        if !self.config.do_loop_count_based_bound_check_hoist {
            return false;
        }
        let l = match self.current_loop() {
            Some(l) if self.is_invariant(seg_len, l) => l,
            _ => return false,
        };
        let (entry, max_change) = match self.increasing_induction_variable(l, index) {
            Some(iv) => iv,
            None => return false,
        };
        let bound = match self.generate_secondary_induction_variable_bound(l, entry, max_change) {
            Some(b) => b,
            None => return false,
        };
        debug!(loop_id = l, ?bound, "loop count based bound check");
        self.hoist_bound_check(
            l,
            bound.opnd(),
            seg_len_opnd,
            -1,
            BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK,
        );
        true
    }

    // ========== Helpers ==========

    /// Entry value and largest per-iteration change of `index` when it is the value an
    /// increasing induction variable of `l` has at the top of the loop
    fn increasing_induction_variable(&mut self, l: LoopId, index: &Value) -> Option<(LoopCountOperand, i32)> {
        let state = &self.loop_states[l as usize];
        let (sym, iv) = state
            .header_values
            .iter()
            .find(|(_, v)| v.number() == index.number())
            .and_then(|(sym, _)| state.induction_variables.get(sym).map(|iv| (*sym, iv)))?;
        if !iv.is_change_determinate() {
            return None;
        }
        let change: IntConstantBounds = iv.change_bounds();
        if change.lower() < 0 || change.upper() <= 0 || change.upper() > self.config.induction_variable_change_limit {
            return None;
        }
        if self.data.value_number(sym) != Some(index.number()) {
            return None;
        }
        let max_change = change.upper();
        let entry = self.loop_entry_operand(l, sym)?;
        Some((entry, max_change))
    }

    fn new_bound_check(&mut self, src1: Opnd, src2: Opnd, bound_offset: i32, kind: BailOutKind, offset: u32) -> Instr {
        let mut check = self
            .new_instr(Opcode::BoundCheck, offset)
            .with_src1(src1)
            .with_src2(src2);
        check.bound_offset = bound_offset;
        check.bailout = Some(BailOutInfo::new(kind, offset));
        check
    }

    /// Put `src1 <= src2 + bound_offset` in `l`'s landing pad, returning its id
    fn hoist_bound_check(&mut self, l: LoopId, src1: Opnd, src2: Opnd, bound_offset: i32, kind: BailOutKind) -> u32 {
        let top = self.loop_top_offset(l);
        let check = self.new_bound_check(src1, src2, bound_offset, kind, top);
        let id = check.id;
        debug!(loop_id = l, instr = id, ?kind, "hoisted bound check");
        self.insert_in_landing_pad(l, check);
        self.stats.bound_checks_hoisted += 1;
        id
    }

    /// After its checks pass, an index is an int in `[0, segLen - 1]`
    fn narrow_index(&mut self, index: &Value, lower: bool, seg_len: Option<&Value>) {
        let info = index.info();
        let mut bounds = match info.int_bounds() {
            Some(b) => b.clone(),
            None => IntBounds::new(info.int_constant_bounds(true).unwrap_or(IntConstantBounds::FULL), false),
        };
        if lower {
            bounds.set_lower_bound_constant(0);
        }
        if let Some(len) = seg_len {
            bounds.set_upper_bound(index.number(), len, -1, true);
        }
        let narrowed = ValueInfo::int_bounded(ValueType::INT, bounds, info.neg_zero_prevented());
        self.update_value_info(index, narrowed);
    }
}

fn with_lower_bound_zero(v: &Value) -> ValueInfo {
    let info = v.info();
    let mut bounds = match info.int_bounds() {
        Some(b) => b.clone(),
        None => IntBounds::new(info.int_constant_bounds(true).unwrap_or(IntConstantBounds::FULL), false),
    };
    bounds.set_lower_bound_constant(0);
    ValueInfo::int_bounded(ValueType::INT, bounds, info.neg_zero_prevented())
        .with_sym_store(info.sym_store())
}

#[cfg(test)]
mod tests {
    use crate::globopt::config::GlobOptConfig;
    use crate::globopt::context::OptContext;
    use crate::globopt::stats::OptStats;
    use crate::ir::{BailOutKind, BlockId, Func, FuncBuilder, ObjectType, Opcode, Opnd, ValueType};

    fn optimize(func: &mut Func) -> OptStats {
        crate::backward::analyze(func);
        let mut ctx = OptContext::new(func, GlobOptConfig::default());
        ctx.optimize_blocks().unwrap();
        ctx.stats
    }

    fn checks_in(func: &Func, block: BlockId) -> Vec<crate::ir::Instr> {
        func.block(block)
            .instrs
            .iter()
            .filter(|i| i.opcode == Opcode::BoundCheck)
            .cloned()
            .collect()
    }

    #[test]
    fn test_checked_index_needs_no_second_check() {
        // x = a[i]; a[i] = x + 1: the store is covered by the load's checks
        let mut b = FuncBuilder::new("reuse");
        let a = b.param("a", ValueType::likely_array(ObjectType::Int32Array, false));
        let i = b.param("i", ValueType::LIKELY_INT);
        let x = b.var("x");
        let y = b.var("y");
        b.ld_elem(x, a, i);
        b.binary(Opcode::Add, y, Opnd::reg(x), Opnd::IntConst(1));
        b.st_elem(a, i, Opnd::reg(y));
        b.ret(Opnd::reg(y));
        let mut func = b.finish().unwrap();
        let stats = optimize(&mut func);

        let checks = checks_in(&func, func.entry);
        assert_eq!(checks.len(), 2, "one lower and one upper check");
        assert!(stats.bound_checks_eliminated >= 2);
        let store = func
            .block(func.entry)
            .instrs
            .iter()
            .find(|i| i.opcode == Opcode::StElemI)
            .cloned()
            .unwrap();
        let array = store.dst.unwrap().as_indir().and_then(|i| i.array).unwrap();
        assert!(array.eliminated_lower_bound_check);
        assert!(array.eliminated_upper_bound_check);
    }

    #[test]
    fn test_next_element_tightens_available_check() {
        // a[i]; a[i + 1]: the second access adjusts the first check's offset
        let mut b = FuncBuilder::new("tighten");
        let a = b.param("a", ValueType::likely_array(ObjectType::Int32Array, false));
        let i = b.param("i", ValueType::LIKELY_INT);
        let j = b.var("j");
        let x = b.var("x");
        let y = b.var("y");
        let r = b.var("r");
        b.ld_elem(x, a, i);
        b.binary(Opcode::Add, j, Opnd::reg(i), Opnd::IntConst(1));
        b.ld_elem(y, a, j);
        b.binary(Opcode::Add, r, Opnd::reg(x), Opnd::reg(y));
        b.ret(Opnd::reg(r));
        let mut func = b.finish().unwrap();
        optimize(&mut func);

        let uppers: Vec<_> = checks_in(&func, func.entry)
            .into_iter()
            .filter(|c| c.src1.as_ref().and_then(Opnd::int_const).is_none())
            .collect();
        assert_eq!(uppers.len(), 1);
        assert_eq!(uppers[0].bound_offset, -2);
    }

    /// `for (i = 0; i < n; i++) { s = s + a[i] }`
    fn summing_loop(kind: ObjectType) -> Func {
        let mut b = FuncBuilder::new("sum");
        let a = b.param("a", ValueType::likely_array(kind, false));
        let n = b.param("n", ValueType::LIKELY_INT);
        let i = b.var("i");
        let s = b.var("s");
        let x = b.var("x");
        b.ld_int(s, 0);
        b.ld_int(i, 0);
        let header = b.block();
        let body = b.block();
        let exit = b.block();
        b.goto(header);
        b.switch_to(header);
        b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(n)), exit, body);
        b.switch_to(body);
        b.ld_elem(x, a, i);
        b.binary(Opcode::Add, s, Opnd::reg(s), Opnd::reg(x));
        b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::IntConst(1));
        b.br(header);
        b.switch_to(exit);
        b.ret(Opnd::reg(s));
        b.finish().unwrap()
    }

    #[test]
    fn test_induction_variable_index_hoists_through_loop_count() {
        let mut func = summing_loop(ObjectType::Int32Array);
        let stats = optimize(&mut func);
        let lp = func.loops[0].landing_pad;
        let body: Vec<BlockId> = func.loops[0].blocks.clone();

        assert!(stats.bound_checks_hoisted >= 1);
        assert!(checks_in(&func, lp)
            .iter()
            .any(|c| c.bailout_kind().contains(BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK)));
        assert!(body.iter().all(|&bl| checks_in(&func, bl).is_empty()));
    }

    #[test]
    fn test_disabled_elimination_leaves_access_alone() {
        let mut func = summing_loop(ObjectType::Int32Array);
        crate::backward::analyze(&mut func);
        let config = GlobOptConfig {
            do_bound_check_elimination: false,
            ..GlobOptConfig::default()
        };
        let mut ctx = OptContext::new(&mut func, config);
        ctx.optimize_blocks().unwrap();
        let stats = ctx.stats;

        assert_eq!(stats.bound_checks_hoisted, 0);
        assert_eq!(stats.bound_checks_eliminated, 0);
        let total: usize = func.blocks.iter().map(|bl| checks_in(&func, bl.id).len()).sum();
        assert_eq!(total, 0);
    }
}
