//! Loop handling
//!
//! Before a loop is optimized its body is walked in a prepass that only computes
//! values. The prepass is repeated until the state at the loop's tails stops changing
//! (or an iteration cap is hit, in which case everything the loop defines is assumed
//! unknown). The resulting tail states are merged into the header as back edges
//! during the real pass, so values assumed on entry hold on every iteration.

use super::bailout::capture_state;
use super::block_data::{BlockData, Int32Liveness, SymLiveness};
use super::context::{OptContext, PassMode};
use super::induction_variable::{
    merge_induction_variable_sets, InductionVariable, InductionVariableSet,
};
use super::int_bounds::{IntBounds, IntConstantBounds};
use super::value_info::{Value, ValueInfo};
use crate::error::{Error, RejitReason, Result};
use crate::ir::{
    BailOutInfo, BailOutKind, BlockId, Instr, IrType, LoopId, Opcode, Opnd, SymId, ValueType,
};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use tracing::{debug, trace};

/// Per-loop results carried from the prepass into the real pass
#[derive(Debug, Clone, Default)]
pub(crate) struct LoopState {
    /// Final prepass state at each tail
    pub back_edge_data: HashMap<BlockId, BlockData>,
    pub induction_variables: InductionVariableSet,
    /// Values of induction variables on entry to the header in the real pass
    pub header_values: HashMap<SymId, Value>,
    /// Liveness on entry to the header; every tail must reproduce it
    pub header_liveness: HashMap<SymId, SymLiveness>,
    pub loop_count: Option<LoopCount>,
    pub loop_count_determined: bool,
}

/// An int32 operand of loop count arithmetic in the landing pad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopCountOperand {
    Constant(i32),
    Sym(SymId),
}

impl LoopCountOperand {
    pub(crate) fn opnd(self) -> Opnd {
        match self {
            LoopCountOperand::Constant(c) => Opnd::IntConst(c),
            LoopCountOperand::Sym(s) => Opnd::typed_reg(s, IrType::Int32),
        }
    }
}

/// Number of iterations minus one: `(left + offset - right) / min_change`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoopCount {
    pub left: LoopCountOperand,
    pub right: LoopCountOperand,
    pub offset: i32,
    pub min_change: i32,
    /// Known at compile time
    pub constant: Option<i32>,
    /// Int32 sym holding the count once generated in the landing pad
    pub loop_count_minus_one_sym: Option<SymId>,
}

impl<'f> OptContext<'f> {
    // ========== Prepass ==========

    /// Compute the back edge states of `loop_id` by iterating its body to a fixed point
    pub(crate) fn prepass_loop(&mut self, loop_id: LoopId) -> Result<()> {
        let saved_mode = self.mode;
        self.mode = PassMode::Prepass { root: loop_id };

        let blocks: Vec<BlockId> = self
            .func
            .order
            .iter()
            .copied()
            .filter(|&b| !self.func.block(b).is_dead && self.func.is_block_in_loop(b, loop_id))
            .collect();
        let all_tails: HashSet<BlockId> = self
            .func
            .loops
            .iter()
            .filter(|l| self.func.loop_is_within(l.id, loop_id))
            .flat_map(|l| l.tails.iter().copied())
            .collect();
        let root_tails = self.func.loop_(loop_id).tails.clone();
        let mut defs: Vec<SymId> = self
            .func
            .loop_(loop_id)
            .syms_def_in_loop
            .iter()
            .copied()
            .collect();
        defs.sort_unstable();

        self.prepass_tails.clear();
        self.prepass_field_loads.clear();
        let mut previous = None;
        let mut converged = false;
        let cap = self.config.max_prepass_iterations.max(1);
        for iteration in 0..cap {
            self.stats.prepass_iterations += 1;
            let mut tails = HashMap::default();
            for &b in &blocks {
                self.opt_block(b)?;
                if all_tails.contains(&b) {
                    if let Some(d) = self.block_data.get(&b) {
                        tails.insert(b, d.clone());
                    }
                }
            }
            let signature: Vec<_> = root_tails
                .iter()
                .map(|t| tails.get(t).map(|d: &BlockData| d.signature(&defs)))
                .collect();
            self.prepass_tails = tails;
            trace!(loop_id, iteration, "prepass iteration");
            if previous.as_ref() == Some(&signature) {
                converged = true;
                break;
            }
            previous = Some(signature);
        }

        if !converged {
            debug!(loop_id, cap, "prepass did not converge, assuming nothing about loop defs");
            self.stats.pessimistic_loops += 1;
            let mut tails = std::mem::take(&mut self.prepass_tails);
            for data in tails.values_mut() {
                for &sym in &defs {
                    if self.func.syms.is_property(sym) {
                        continue;
                    }
                    let value = self.new_value(ValueInfo::new(ValueType::ANY));
                    data.set_value(sym, &value, false);
                    data.set_liveness(sym, SymLiveness::VAR);
                }
                if let Some(ivs) = data.induction_variables.as_mut() {
                    ivs.values_mut().for_each(|iv| iv.set_change_is_indeterminate());
                }
            }
            self.prepass_tails = tails;
        }

        let mut ivs: Option<InductionVariableSet> = None;
        let mut back_edge_data = HashMap::default();
        for &t in &root_tails {
            if let Some(d) = self.prepass_tails.get(&t) {
                let tail_ivs = d.induction_variables.clone().unwrap_or_default();
                match ivs.as_mut() {
                    None => ivs = Some(tail_ivs),
                    Some(set) => merge_induction_variable_sets(set, &tail_ivs),
                }
                back_edge_data.insert(t, d.clone());
            }
        }
        let state = &mut self.loop_states[loop_id as usize];
        state.back_edge_data = back_edge_data;
        state.induction_variables = ivs.unwrap_or_default();

        let in_loop: HashSet<BlockId> = blocks.iter().copied().collect();
        for b in &blocks {
            self.block_data.remove(b);
        }
        self.edge_data.retain(|(from, _), _| !in_loop.contains(from));
        self.prepass_tails.clear();
        self.mode = saved_mode;
        if converged {
            self.preload_fields(loop_id);
        } else {
            self.prepass_field_loads.clear();
        }
        Ok(())
    }

    // ========== Real pass ==========

    /// Entering a loop header in the real pass: establish induction variable bounds
    /// and remember the entry liveness
    pub(crate) fn enter_loop_header(&mut self, loop_id: LoopId) {
        let lp = self.func.loop_(loop_id).landing_pad;
        let mut ivs: Vec<InductionVariable> = self.loop_states[loop_id as usize]
            .induction_variables
            .values()
            .cloned()
            .collect();
        ivs.sort_by_key(|iv| iv.sym());

        let mut header_values = HashMap::default();
        for iv in ivs {
            let sym = iv.sym();
            let header_value = match self.data.value(sym) {
                Some(v) => v,
                None => continue,
            };
            header_values.insert(sym, header_value.clone());
            if !iv.is_change_determinate() || !iv.is_change_unidirectional() {
                continue;
            }
            let lp_value = match self.block_data.get(&lp).and_then(|d| d.value(sym)) {
                Some(v) => v,
                None => continue,
            };
            if !header_value.info().is_likely_int()
                || !lp_value.info().is_likely_int()
                || lp_value.number() == header_value.number()
            {
                continue;
            }
            let mut bounds = match header_value.info().int_bounds() {
                Some(b) => b.clone(),
                None => IntBounds::new(
                    header_value
                        .info()
                        .int_constant_bounds(true)
                        .unwrap_or(IntConstantBounds::FULL),
                    false,
                ),
            };
            if iv.change_bounds().lower() >= 0 {
                bounds.set_lower_bound(header_value.number(), &lp_value, 0, false);
            } else {
                bounds.set_upper_bound(header_value.number(), &lp_value, 0, false);
            }
            let info = ValueInfo::int_bounded(header_value.ty(), bounds, false);
            let updated = self.update_value_info(&header_value, info);
            trace!(sym, value = %updated, "induction variable bounded by its entry value");
            header_values.insert(sym, updated);
        }

        let liveness: HashMap<SymId, SymLiveness> = self
            .data
            .sym_to_value
            .keys()
            .filter(|s| !self.func.syms.is_property(**s))
            .map(|&s| (s, self.data.liveness(s)))
            .collect();
        let state = &mut self.loop_states[loop_id as usize];
        state.header_values = header_values;
        state.header_liveness = liveness;
        state.loop_count = None;
        state.loop_count_determined = false;
    }

    /// At the end of a tail in the real pass, make every representation live on entry
    /// to the header live again
    pub(crate) fn reconcile_loop_tail(&mut self, tail: BlockId, loop_id: LoopId) -> Result<()> {
        let header_liveness = self.loop_states[loop_id as usize].header_liveness.clone();
        let mut syms: Vec<SymId> = header_liveness.keys().copied().collect();
        syms.sort_unstable();

        let mut instrs = Vec::new();
        for sym in syms {
            let want = header_liveness[&sym];
            let have = self.data.liveness(sym);
            if want.int32 == Int32Liveness::Lossless && !have.is_live_as(IrType::Int32) {
                if have.float64 && !have.var {
                    return Err(Error::rejit(RejitReason::AggressiveIntTypeSpecDisabled));
                }
                if have.int32 == Int32Liveness::Lossy {
                    return Err(Error::rejit(RejitReason::LossyIntTypeSpecDisabled));
                }
                instrs.push(self.tail_conversion(loop_id, sym, IrType::Int32, have));
            }
            if want.float64 && !have.float64 {
                instrs.push(self.tail_conversion(loop_id, sym, IrType::Float64, have));
            }
            if want.var && !have.var {
                instrs.push(self.tail_conversion(loop_id, sym, IrType::Var, have));
            }
        }
        if instrs.is_empty() {
            return Ok(());
        }
        let header = self.func.loop_(loop_id).header;
        let target = if self.func.block(tail).succs.len() > 1 {
            self.func.split_edge(tail, header)
        } else {
            tail
        };
        for mut instr in instrs {
            if let Some(b) = instr.bailout.as_mut() {
                capture_state(&self.func.syms, &self.data, b);
                self.stats.bailouts_added += 1;
            }
            self.func.block_mut(target).insert_at_end(instr);
            self.stats.compensations += 1;
        }
        Ok(())
    }

    fn tail_conversion(&mut self, loop_id: LoopId, sym: SymId, ty: IrType, have: SymLiveness) -> Instr {
        let offset = self.loop_top_offset(loop_id);
        let value = self.data.value(sym);
        let dst_sym = self.func.syms.typed_equiv(sym, ty);
        let (opcode, src) = match ty {
            IrType::Var => {
                let from = if have.int32 == Int32Liveness::Lossless {
                    IrType::Int32
                } else if have.float64 {
                    IrType::Float64
                } else {
                    have.simd.unwrap_or(IrType::Var)
                };
                let src_sym = self.func.syms.typed_equiv(sym, from);
                (Opcode::ToVar, Opnd::typed_reg(src_sym, from))
            }
            _ if have.int32 == Int32Liveness::Lossless && ty == IrType::Float64 => {
                let src_sym = self.func.syms.typed_equiv(sym, IrType::Int32);
                (Opcode::ConvPrim, Opnd::typed_reg(src_sym, IrType::Int32))
            }
            _ if have.float64 && ty == IrType::Int32 => {
                let src_sym = self.func.syms.typed_equiv(sym, IrType::Float64);
                (Opcode::ConvPrim, Opnd::typed_reg(src_sym, IrType::Float64))
            }
            _ => (Opcode::FromVar, Opnd::reg(sym)),
        };
        let mut instr = self
            .new_instr(opcode, offset)
            .with_dst(Opnd::typed_reg(dst_sym, ty))
            .with_src1(src);
        let definite = value.as_ref().map_or(false, |v| match ty {
            IrType::Int32 => v.info().is_int(),
            IrType::Float64 => v.ty().is_number(),
            _ => true,
        });
        if opcode == Opcode::FromVar && !definite {
            instr.bailout = Some(BailOutInfo::new(BailOutKind::for_conversion(ty), offset));
        }
        instr
    }

    // ========== Induction variables ==========

    /// Record a definition of `dst` inside the innermost loop during a prepass.
    /// `change` is the instruction's [`induction_change`](Self::induction_change),
    /// taken before the instruction was folded.
    pub(crate) fn track_induction_variable(
        &mut self,
        change: Option<(i32, u32)>,
        dst: SymId,
        dst_value: &Value,
    ) {
        if self.data.induction_variables.is_none() {
            return;
        }
        let sym = self.func.syms.var_equiv(dst);
        if self.func.syms.is_property(sym) || self.func.syms.sym_type(sym) != IrType::Var {
            return;
        }
        let ivs = match self.data.induction_variables.as_mut() {
            Some(ivs) => ivs,
            None => return,
        };
        match (change, ivs.get_mut(&sym)) {
            (Some((n, src_vn)), Some(iv)) => {
                if iv.is_change_determinate() && (iv.sym_value_number() != src_vn || !iv.add(n)) {
                    iv.set_change_is_indeterminate();
                }
                iv.set_sym_value_number(dst_value.number());
            }
            (Some((n, _)), None) => {
                ivs.insert(sym, InductionVariable::new(sym, dst_value.number(), n));
            }
            (None, Some(iv)) => iv.set_change_is_indeterminate(),
            (None, None) => {
                let mut iv = InductionVariable::new(sym, dst_value.number(), 0);
                iv.set_change_is_indeterminate();
                ivs.insert(sym, iv);
            }
        }
    }

    /// `(change, value number of the incremented source)` if `instr` is `sym = sym ± c`
    /// for its destination `sym`
    pub(crate) fn induction_change(&mut self, instr: &Instr) -> Option<(i32, u32)> {
        if self.data.induction_variables.is_none() {
            return None;
        }
        let sym = self.func.syms.var_equiv(instr.defined_sym()?);
        let src1 = instr.src1.as_ref()?;
        let src_sym = src1.reg_sym()?;
        if self.func.syms.var_equiv(src_sym) != sym {
            return None;
        }
        let src_vn = self.data.value_number(sym)?;
        let n = match instr.opcode {
            Opcode::Incr => 1,
            Opcode::Decr => -1,
            Opcode::Add | Opcode::AddI4 | Opcode::Sub | Opcode::SubI4 => {
                let src2 = instr.src2.as_ref()?;
                let c = match src2.int_const() {
                    Some(c) => c,
                    None => self.opnd_value(src2)?.info().int_constant_value(false)?,
                };
                if matches!(instr.opcode, Opcode::Sub | Opcode::SubI4) {
                    c.checked_neg()?
                } else {
                    c
                }
            }
            _ => return None,
        };
        Some((n, src_vn))
    }

    // ========== Loop count ==========

    /// Derive the trip count of `loop_id` at its countable block from an increasing
    /// induction variable bounded above by an invariant or a constant
    pub(crate) fn determine_loop_count(&mut self, loop_id: LoopId) {
        let state = &self.loop_states[loop_id as usize];
        if state.loop_count_determined {
            return;
        }
        let mut ivs: Vec<InductionVariable> = state.induction_variables.values().cloned().collect();
        ivs.sort_by_key(|iv| iv.sym());
        self.loop_states[loop_id as usize].loop_count_determined = true;

        for iv in ivs {
            if !iv.is_change_determinate() || iv.change_bounds().lower() <= 0 {
                continue;
            }
            let min_change = iv.change_bounds().lower();
            let value = match self.data.value(iv.sym()) {
                Some(v) => v,
                None => continue,
            };
            let right = match self.loop_entry_operand(loop_id, iv.sym()) {
                Some(r) => r,
                None => continue,
            };
            let bounds = value.info().int_bounds().cloned();
            let mut upper: Option<(LoopCountOperand, i32)> = None;
            if let Some(b) = &bounds {
                for bound in b.relative_upper_bounds().values() {
                    if let Some(s) = self.invariant_int32_sym_for_value(bound.base_value_number(), loop_id) {
                        upper = Some((LoopCountOperand::Sym(s), bound.offset()));
                        break;
                    }
                }
            }
            if upper.is_none() {
                if let Some(u) = value.info().int_constant_upper_bound(true) {
                    if u != i32::MAX {
                        upper = Some((LoopCountOperand::Constant(u), 0));
                    }
                }
            }
            let (left, offset) = match upper {
                Some(u) => u,
                None => continue,
            };
            let constant = match (left, right) {
                (LoopCountOperand::Constant(l), LoopCountOperand::Constant(r)) => l
                    .checked_add(offset)
                    .and_then(|x| x.checked_sub(r))
                    .map(|d| d / min_change)
                    .filter(|c| *c >= 0),
                _ => None,
            };
            let count = LoopCount {
                left,
                right,
                offset,
                min_change,
                constant,
                loop_count_minus_one_sym: None,
            };
            debug!(loop_id, sym = iv.sym(), ?count, "determined loop count");
            self.loop_states[loop_id as usize].loop_count = Some(count);
            return;
        }
    }

    /// An int32 operand holding the value `sym` has on entry to the loop
    pub(crate) fn loop_entry_operand(&mut self, loop_id: LoopId, sym: SymId) -> Option<LoopCountOperand> {
        let lp = self.func.loop_(loop_id).landing_pad;
        let data = self.block_data.get(&lp)?;
        let value = data.value(sym)?;
        if let Some(c) = value.info().int_constant_value(false) {
            return Some(LoopCountOperand::Constant(c));
        }
        if data.is_live_as(sym, IrType::Int32) {
            return self
                .func
                .syms
                .find_typed_equiv(sym, IrType::Int32)
                .map(LoopCountOperand::Sym);
        }
        None
    }

    /// An int32 sym holding `vn` throughout the loop and available in its landing pad
    pub(crate) fn invariant_int32_sym_for_value(&self, vn: u32, loop_id: LoopId) -> Option<SymId> {
        let sym = self.invariant_sym_for_value(vn, loop_id)?;
        if self.func.syms.sym_type(sym) == IrType::Int32 {
            return Some(sym);
        }
        let lp = self.func.loop_(loop_id).landing_pad;
        let lp_data = self.block_data.get(&lp)?;
        if lp_data.is_live_as(sym, IrType::Int32) {
            return self.func.syms.find_typed_equiv(sym, IrType::Int32);
        }
        None
    }

    /// Materialize the loop count in the landing pad
    pub(crate) fn generate_loop_count(&mut self, loop_id: LoopId) -> Option<LoopCountOperand> {
        let count = self.loop_states[loop_id as usize].loop_count.clone()?;
        if let Some(c) = count.constant {
            return Some(LoopCountOperand::Constant(c));
        }
        if let Some(s) = count.loop_count_minus_one_sym {
            return Some(LoopCountOperand::Sym(s));
        }
        let offset = self.loop_top_offset(loop_id);
        let kind = BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK;

        let diff = self.func.syms.new_temp(IrType::Int32);
        let mut sub = self
            .new_instr(Opcode::SubI4, offset)
            .with_dst(Opnd::typed_reg(diff, IrType::Int32))
            .with_src1(count.left.opnd())
            .with_src2(count.right.opnd());
        sub.add_bailout_kind(kind);
        self.insert_in_landing_pad(loop_id, sub);
        let mut current = diff;

        if count.offset != 0 {
            let adjusted = self.func.syms.new_temp(IrType::Int32);
            let mut add = self
                .new_instr(Opcode::AddI4, offset)
                .with_dst(Opnd::typed_reg(adjusted, IrType::Int32))
                .with_src1(Opnd::typed_reg(current, IrType::Int32))
                .with_src2(Opnd::IntConst(count.offset));
            add.add_bailout_kind(kind);
            self.insert_in_landing_pad(loop_id, add);
            current = adjusted;
        }
        if count.min_change != 1 {
            let divided = self.func.syms.new_temp(IrType::Int32);
            let div = self
                .new_instr(Opcode::DivI4, offset)
                .with_dst(Opnd::typed_reg(divided, IrType::Int32))
                .with_src1(Opnd::typed_reg(current, IrType::Int32))
                .with_src2(Opnd::IntConst(count.min_change));
            self.insert_in_landing_pad(loop_id, div);
            current = divided;
        }
        debug!(loop_id, sym = current, "generated loop count");
        if let Some(c) = self.loop_states[loop_id as usize].loop_count.as_mut() {
            c.loop_count_minus_one_sym = Some(current);
        }
        Some(LoopCountOperand::Sym(current))
    }

    /// `iv_entry + loopCountMinusOne * max_change` in the landing pad: the largest
    /// value an increasing induction variable takes inside the loop
    pub(crate) fn generate_secondary_induction_variable_bound(
        &mut self,
        loop_id: LoopId,
        iv_entry: LoopCountOperand,
        max_change: i32,
    ) -> Option<LoopCountOperand> {
        let count = self.generate_loop_count(loop_id)?;
        if let (LoopCountOperand::Constant(c), LoopCountOperand::Constant(e)) = (count, iv_entry) {
            return c
                .checked_mul(max_change)
                .and_then(|m| m.checked_add(e))
                .map(LoopCountOperand::Constant);
        }
        let offset = self.loop_top_offset(loop_id);
        let kind = BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK;
        let mut scaled = count.opnd();
        if max_change != 1 {
            let product = self.func.syms.new_temp(IrType::Int32);
            let mut mul = self
                .new_instr(Opcode::MulI4, offset)
                .with_dst(Opnd::typed_reg(product, IrType::Int32))
                .with_src1(count.opnd())
                .with_src2(Opnd::IntConst(max_change));
            mul.add_bailout_kind(kind);
            self.insert_in_landing_pad(loop_id, mul);
            scaled = Opnd::typed_reg(product, IrType::Int32);
        }
        let bound = self.func.syms.new_temp(IrType::Int32);
        let mut add = self
            .new_instr(Opcode::AddI4, offset)
            .with_dst(Opnd::typed_reg(bound, IrType::Int32))
            .with_src1(iv_entry.opnd())
            .with_src2(scaled);
        add.add_bailout_kind(kind);
        self.insert_in_landing_pad(loop_id, add);
        Some(LoopCountOperand::Sym(bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globopt::config::GlobOptConfig;
    use crate::ir::{Func, FuncBuilder};

    /// `for (i = 0; i < n; i++) {}`
    fn counting_loop() -> (Func, SymId, SymId) {
        let mut b = FuncBuilder::new("count");
        let n = b.param("n", ValueType::LIKELY_INT);
        let i = b.var("i");
        b.ld_int(i, 0);
        let header = b.block();
        let body = b.block();
        let exit = b.block();
        b.goto(header);
        b.switch_to(header);
        b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(n)), exit, body);
        b.switch_to(body);
        b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::IntConst(1));
        b.br(header);
        b.switch_to(exit);
        b.ret(Opnd::reg(i));
        (b.finish().unwrap(), i, n)
    }

    #[test]
    fn test_prepass_finds_induction_variable() {
        let (mut func, i, _) = counting_loop();
        crate::backward::analyze(&mut func);
        let mut ctx = OptContext::new(&mut func, GlobOptConfig::default());
        let entry = ctx.func.entry;
        ctx.opt_block(entry).unwrap();
        let lp = ctx.func.loops[0].landing_pad;
        ctx.opt_block(lp).unwrap();
        ctx.prepass_loop(0).unwrap();

        let iv = ctx.loop_states[0].induction_variables.get(&i).cloned().unwrap();
        assert!(iv.is_change_determinate());
        assert_eq!(iv.change_bounds(), IntConstantBounds::constant(1));
        assert!(!ctx.loop_states[0].back_edge_data.is_empty());
        assert_eq!(ctx.mode, PassMode::Real);
        assert!(ctx.func.loops[0].blocks.iter().all(|b| !ctx.block_data.contains_key(b)));
    }

    #[test]
    fn test_non_constant_change_is_indeterminate() {
        let mut b = FuncBuilder::new("f");
        let n = b.param("n", ValueType::LIKELY_INT);
        let i = b.var("i");
        b.ld_int(i, 0);
        let header = b.block();
        let exit = b.block();
        b.goto(header);
        b.switch_to(header);
        b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::reg(n));
        b.br_cond(Opcode::BrLt, Opnd::reg(i), Some(Opnd::IntConst(100)), header, exit);
        b.switch_to(exit);
        b.ret(Opnd::reg(i));
        let mut func = b.finish().unwrap();
        crate::backward::analyze(&mut func);

        let mut ctx = OptContext::new(&mut func, GlobOptConfig::default());
        let entry = ctx.func.entry;
        ctx.opt_block(entry).unwrap();
        let lp = ctx.func.loops[0].landing_pad;
        ctx.opt_block(lp).unwrap();
        ctx.prepass_loop(0).unwrap();
        let iv = &ctx.loop_states[0].induction_variables[&i];
        assert!(!iv.is_change_determinate());
    }

    #[test]
    fn test_constant_loop_count() {
        let (mut func, _, _) = counting_loop();
        let mut ctx = OptContext::new(&mut func, GlobOptConfig::default());
        ctx.loop_states[0].loop_count = Some(LoopCount {
            left: LoopCountOperand::Constant(9),
            right: LoopCountOperand::Constant(0),
            offset: 0,
            min_change: 1,
            constant: Some(9),
            loop_count_minus_one_sym: None,
        });
        let bound = ctx.generate_secondary_induction_variable_bound(0, LoopCountOperand::Constant(2), 2);
        assert_eq!(bound, Some(LoopCountOperand::Constant(20)));
    }
}
