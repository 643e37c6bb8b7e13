//! Block merge engine
//!
//! At a join the states of all incoming edges are folded into one state that holds on
//! every edge. Values that differ get a fresh value number with the meet of their
//! infos; representations a sym is live in on some edges but not others are made
//! consistent by compensation code on the edges that lack them.

use super::block_data::{BlockData, Int32Liveness, SymLiveness};
use super::context::{OptContext, PassMode};
use super::induction_variable::{merge_induction_variable_sets, InductionVariable, InductionVariableSet};
use super::int_bounds::{IntBounds, IntConstantBounds};
use super::value_info::{ArrayInfo, JsTypeInfo, Value, ValueInfo, ValueInfoKind, ValueNumber};
use crate::error::{Error, Result};
use crate::ir::{BlockId, Instr, IrType, LoopId, Opcode, Opnd, SymId, ValueType};
use rustc_hash::FxHashMap as HashMap;
use tracing::trace;

/// Largest polymorphic type set kept when two object types merge
const MAX_MERGED_TYPE_SET: usize = 8;

/// State flowing into a block along one edge
#[derive(Debug, Clone)]
pub(crate) struct Incoming {
    pub pred: BlockId,
    pub data: BlockData,
    pub back_edge: bool,
}

/// Meet of two value infos on forward edges
pub fn merge_value_infos(v0: &Value, v1: &Value) -> ValueInfo {
    let (i0, i1) = (v0.info(), v1.info());
    let ty = i0.ty().merge(i1.ty());
    if ty.is_likely_int() && i0.is_likely_int() && i1.is_likely_int() {
        return merge_likely_int_value_infos(v0, v1, ty);
    }
    match (i0.kind(), i1.kind()) {
        (ValueInfoKind::FloatConstant(a), ValueInfoKind::FloatConstant(b))
            if a.to_bits() == b.to_bits() =>
        {
            ValueInfo::float_constant(*a)
        }
        (
            ValueInfoKind::VarConstant { addr: a, is_function },
            ValueInfoKind::VarConstant { addr: b, .. },
        ) if a == b => ValueInfo::var_constant(*a, *is_function, ty),
        (ValueInfoKind::JsType(a), ValueInfoKind::JsType(b)) => match merge_js_types(a, b) {
            Some(t) => ValueInfo::js_type(t),
            None => ValueInfo::new(ty),
        },
        (ValueInfoKind::Array(a), ValueInfoKind::Array(b)) => {
            let merged = ArrayInfo {
                head_segment_sym: a.head_segment_sym.filter(|s| b.head_segment_sym == Some(*s)),
                head_segment_length_sym: a
                    .head_segment_length_sym
                    .filter(|s| b.head_segment_length_sym == Some(*s)),
                length_sym: a.length_sym.filter(|s| b.length_sym == Some(*s)),
            };
            ValueInfo::new(ty).with_array_info(ty, merged)
        }
        _ => ValueInfo::new(ty),
    }
}

fn merge_likely_int_value_infos(v0: &Value, v1: &Value, ty: ValueType) -> ValueInfo {
    let (i0, i1) = (v0.info(), v1.info());
    if ty.is_int() {
        if let (Some(a), Some(b)) = (i0.int_constant_value(false), i1.int_constant_value(false)) {
            if a == b {
                return ValueInfo::int_constant(a);
            }
        }
    }

    let merged_bounds = match (i0.int_bounds(), i1.int_bounds()) {
        (Some(b0), Some(b1)) => IntBounds::merge(v0, b0, v1, b1),
        (Some(b0), None) => i1
            .int_constant_bounds(true)
            .and_then(|cb| IntBounds::merge_with_constant_bounds(v0, b0, v1, cb)),
        (None, Some(b1)) => i0
            .int_constant_bounds(true)
            .and_then(|cb| IntBounds::merge_with_constant_bounds(v1, b1, v0, cb)),
        (None, None) => None,
    };
    if let Some(bounds) = merged_bounds {
        return ValueInfo::int_bounded(ty, bounds, false);
    }

    match (i0.int_constant_bounds(true), i1.int_constant_bounds(true)) {
        (Some(a), Some(b)) => {
            let union = a.union(&b);
            if ty.is_int() {
                ValueInfo::from_constant_bounds(union, false)
            } else if union != IntConstantBounds::FULL {
                ValueInfo::int_bounded(ty, IntBounds::new(union, false), false)
            } else {
                ValueInfo::new(ty)
            }
        }
        _ => ValueInfo::new(ty),
    }
}

fn merge_js_types(a: &JsTypeInfo, b: &JsTypeInfo) -> Option<JsTypeInfo> {
    if a.type_id.is_some() && a.type_id == b.type_id {
        return Some(a.clone());
    }
    let mut set: Vec<u32> = Vec::new();
    for t in [a, b] {
        match (&t.type_set, t.type_id) {
            (Some(s), _) => set.extend(s.iter().copied()),
            (None, Some(id)) => set.push(id),
            (None, None) => return None,
        }
    }
    set.sort_unstable();
    set.dedup();
    if set.len() > MAX_MERGED_TYPE_SET {
        return None;
    }
    Some(JsTypeInfo {
        type_id: None,
        type_set: Some(set),
        is_shared: false,
    })
}

/// Liveness on entry to a join: a representation stays live only if every edge can
/// supply it, directly or through a lossless compensation
pub(crate) fn merge_liveness(sources: &[(SymLiveness, Option<&Value>)]) -> SymLiveness {
    let definite_int = |v: Option<&Value>| v.map_or(false, |v| v.info().is_int());
    let definite_number = |v: Option<&Value>| v.map_or(false, |v| v.ty().is_number());

    let mut merged = SymLiveness::NONE;
    let any_int32 = sources.iter().any(|(l, _)| l.has_int32());
    let all_int32 = sources
        .iter()
        .all(|(l, v)| l.has_int32() || ((l.var || l.float64) && definite_int(*v)));
    if any_int32 && all_int32 {
        merged.int32 = if sources.iter().any(|(l, _)| l.int32 == Int32Liveness::Lossy) {
            Int32Liveness::Lossy
        } else {
            Int32Liveness::Lossless
        };
    }

    let any_float = sources.iter().any(|(l, _)| l.float64);
    let all_float = sources.iter().all(|(l, v)| {
        l.float64 || l.int32 == Int32Liveness::Lossless || (l.var && definite_number(*v))
    });
    merged.float64 = any_float && all_float;

    if let Some((first, _)) = sources.first() {
        if first.simd.is_some() && sources.iter().all(|(l, _)| l.simd == first.simd) {
            merged.simd = first.simd;
        }
    }

    let has_exact_repr =
        merged.int32 == Int32Liveness::Lossless || merged.float64 || merged.simd.is_some();
    merged.var = sources.iter().all(|(l, _)| l.var) || !has_exact_repr;
    merged
}

impl<'f> OptContext<'f> {
    /// Collect the states flowing into `block`, skipping edges with no state yet
    pub(crate) fn incoming_states(&mut self, block: BlockId) -> Vec<Incoming> {
        let preds = self.func.block(block).preds.clone();
        let mut incoming = Vec::with_capacity(preds.len());
        for pred in preds {
            let back_edge = self.func.is_back_edge(pred, block);
            let data = if back_edge {
                match self.mode {
                    PassMode::Real => self
                        .func
                        .loop_of(block)
                        .and_then(|l| self.loop_states[l as usize].back_edge_data.get(&pred))
                        .cloned(),
                    PassMode::Prepass { .. } => self.prepass_tails.get(&pred).cloned(),
                }
            } else {
                match self.edge_data.remove(&(pred, block)) {
                    Some(narrowed) => {
                        self.release_block_data(pred);
                        Some(narrowed)
                    }
                    None => self.consume_block_data(pred),
                }
            };
            if let Some(data) = data {
                incoming.push(Incoming {
                    pred,
                    data,
                    back_edge,
                });
            }
        }
        incoming
    }

    /// State on entry to `block`
    pub(crate) fn merge_predecessors(&mut self, block: BlockId) -> Result<BlockData> {
        let mut incoming = self.incoming_states(block);
        let ivs = self.merge_induction_variables(block, &incoming);

        let mut data = match incoming.len() {
            0 => BlockData::new(),
            1 => incoming.pop().map(|i| i.data).unwrap_or_default(),
            _ => self.merge_states(block, incoming)?,
        };
        data.induction_variables = ivs;
        Ok(data)
    }

    fn merge_states(&mut self, block: BlockId, mut incoming: Vec<Incoming>) -> Result<BlockData> {
        if !self.is_prepass() {
            self.compensate_array_syms(block, &mut incoming);
        }

        let start_call_count = incoming[0].data.start_call_count;
        if incoming.iter().any(|i| i.data.start_call_count != start_call_count) {
            return Err(Error::internal(format!(
                "unbalanced StartCall count at the join into block {}",
                block
            )));
        }
        let any_back_edge = incoming.iter().any(|i| i.back_edge);
        let upward_exposed = &self.func.block(block).upward_exposed_uses;

        // Syms bound in every incoming state
        let mut syms: Vec<SymId> = incoming[0]
            .data
            .sym_to_value
            .keys()
            .copied()
            .filter(|s| incoming[1..].iter().all(|i| i.data.sym_to_value.contains_key(s)))
            .filter(|&s| {
                if self.func.syms.is_property(s) {
                    incoming.iter().all(|i| i.data.live_fields.contains(&s))
                } else {
                    (s as usize) >= self.original_sym_count || upward_exposed.contains(&s)
                }
            })
            .collect();
        syms.sort_unstable();

        let mut merged = BlockData::new();
        merged.start_call_count = start_call_count;
        merged.arg_out_syms = incoming[0].data.arg_out_syms.clone();

        let mut cache: HashMap<(ValueNumber, ValueNumber), Value> = HashMap::default();
        for &sym in &syms {
            let values: Vec<Value> = incoming
                .iter()
                .filter_map(|i| i.data.value(sym))
                .collect();
            let mut value = values[0].clone();
            for v in &values[1..] {
                value = self.merge_values(&value, v, any_back_edge, &mut cache);
            }
            if self.func.syms.is_property(sym) {
                merged.set_field_value(sym, &value);
            } else {
                merged.set_value(sym, &value, false);
            }
            if incoming
                .iter()
                .any(|i| i.data.value_number(sym).map_or(false, |vn| i.data.values_to_kill_on_calls.contains(&vn)))
            {
                merged.values_to_kill_on_calls.insert(value.number());
            }
        }

        self.merge_sym_liveness(block, &syms, &mut incoming, &mut merged);

        // Expressions and bound checks survive only if identical everywhere.
        let first = &incoming[0].data;
        for (expr, vn) in &first.expr_to_value {
            if merged.values.contains_key(vn)
                && incoming[1..].iter().all(|i| i.data.expr_to_value.get(expr) == Some(vn))
            {
                merged.expr_to_value.insert(*expr, *vn);
            }
        }
        for (id, check) in &first.available_int_bound_checks {
            if incoming[1..]
                .iter()
                .all(|i| i.data.available_int_bound_checks.get(id) == Some(check))
            {
                merged.available_int_bound_checks.insert(*id, *check);
            }
        }

        self.fix_sym_stores(&incoming[0].data, &mut merged);
        Ok(merged)
    }

    /// Merge two values of one sym. Merges of the same pair of values share one result.
    pub(crate) fn merge_values(
        &mut self,
        v0: &Value,
        v1: &Value,
        back_edge: bool,
        cache: &mut HashMap<(ValueNumber, ValueNumber), Value>,
    ) -> Value {
        if v0.is_equal_to(v1) {
            return v0.clone();
        }
        let key = (v0.number(), v1.number());
        if let Some(v) = cache.get(&key) {
            return v.clone();
        }
        let merged = if v0.number() == v1.number() {
            Value::new(v0.number(), merge_value_infos(v0, v1))
        } else if back_edge {
            let info = ValueInfo::new(v0.ty().merge(v1.ty()));
            self.new_value(info)
        } else {
            let info = merge_value_infos(v0, v1);
            self.new_value(info)
        };
        trace!(from = %v0, with = %v1, into = %merged, "merged values");
        cache.insert(key, merged.clone());
        merged
    }

    /// Merge liveness per sym and compensate edges missing a representation
    fn merge_sym_liveness(
        &mut self,
        block: BlockId,
        syms: &[SymId],
        incoming: &mut [Incoming],
        merged: &mut BlockData,
    ) {
        let mut airlocks: HashMap<BlockId, BlockId> = HashMap::default();
        for &sym in syms {
            if self.func.syms.is_property(sym) {
                continue;
            }
            let sources: Vec<(SymLiveness, Option<Value>)> = incoming
                .iter()
                .map(|i| (i.data.liveness(sym), i.data.value(sym)))
                .collect();
            let refs: Vec<(SymLiveness, Option<&Value>)> =
                sources.iter().map(|(l, v)| (*l, v.as_ref())).collect();
            let liveness = merge_liveness(&refs);
            merged.set_liveness(sym, liveness);

            if !self.is_prepass() {
                for (idx, (source, value)) in sources.iter().enumerate() {
                    if incoming[idx].back_edge {
                        continue;
                    }
                    let conversions = self.compensations_for(sym, *source, &liveness, value.as_ref());
                    if conversions.is_empty() {
                        continue;
                    }
                    let pred = incoming[idx].pred;
                    let target = self.compensation_block(pred, block, &mut airlocks);
                    for instr in conversions {
                        self.func.block_mut(target).insert_at_end(instr);
                        self.stats.compensations += 1;
                    }
                    let mut updated = *source;
                    updated.var |= liveness.var;
                    if liveness.int32 != Int32Liveness::Dead && !updated.has_int32() {
                        updated.int32 = liveness.int32;
                    }
                    updated.float64 |= liveness.float64;
                    incoming[idx].data.set_liveness(sym, updated);
                    if target == pred {
                        if let Some(d) = self.block_data.get_mut(&pred) {
                            d.set_liveness(sym, updated);
                        }
                    }
                }
            }

            if let Some(value) = merged.value(sym) {
                let info = if liveness.int32 == Int32Liveness::Lossless && !value.info().is_int() {
                    Some(value.info().specialize_to_int32())
                } else if liveness.float64 && !value.ty().is_number() {
                    Some(value.info().specialize_to_float64())
                } else {
                    None
                };
                if let Some(info) = info {
                    merged.update_value_info(value.number(), info.with_sym_store(value.info().sym_store()));
                }
            }
        }
    }

    /// Conversions an edge needs so `sym` is live as `required`
    fn compensations_for(
        &mut self,
        sym: SymId,
        source: SymLiveness,
        required: &SymLiveness,
        value: Option<&Value>,
    ) -> Vec<Instr> {
        let mut out = Vec::new();
        let constant = value.and_then(|v| v.info().number_constant_value());
        let need_int32 = required.int32 != Int32Liveness::Dead && !source.has_int32();
        if need_int32 {
            let dst = self.func.syms.typed_equiv(sym, IrType::Int32);
            let instr = match constant {
                Some(c) => self
                    .new_instr(Opcode::Ld, 0)
                    .with_src1(Opnd::IntConst(c as i32)),
                None if source.float64 => self
                    .new_instr(Opcode::ConvPrim, 0)
                    .with_src1(self.typed_src(sym, IrType::Float64)),
                None => self.new_instr(Opcode::FromVar, 0).with_src1(Opnd::reg(sym)),
            };
            out.push(instr.with_dst(Opnd::typed_reg(dst, IrType::Int32)));
        }
        if required.float64 && !source.float64 {
            let dst = self.func.syms.typed_equiv(sym, IrType::Float64);
            let instr = match constant {
                Some(c) => self.new_instr(Opcode::Ld, 0).with_src1(Opnd::FloatConst(c)),
                None if source.int32 == Int32Liveness::Lossless => self
                    .new_instr(Opcode::ConvPrim, 0)
                    .with_src1(self.typed_src(sym, IrType::Int32)),
                None => self.new_instr(Opcode::FromVar, 0).with_src1(Opnd::reg(sym)),
            };
            out.push(instr.with_dst(Opnd::typed_reg(dst, IrType::Float64)));
        }
        if required.var && !source.var {
            let from = if source.int32 == Int32Liveness::Lossless {
                Some(IrType::Int32)
            } else if source.float64 {
                Some(IrType::Float64)
            } else {
                source.simd
            };
            if let Some(from) = from {
                let src = self.typed_src(sym, from);
                out.push(
                    self.new_instr(Opcode::ToVar, 0)
                        .with_dst(Opnd::reg(sym))
                        .with_src1(src),
                );
            }
        }
        out
    }

    fn typed_src(&mut self, sym: SymId, ty: IrType) -> Opnd {
        let typed = self.func.syms.typed_equiv(sym, ty);
        Opnd::typed_reg(typed, ty)
    }

    /// Block receiving compensation code for the edge `pred -> block`
    fn compensation_block(
        &mut self,
        pred: BlockId,
        block: BlockId,
        airlocks: &mut HashMap<BlockId, BlockId>,
    ) -> BlockId {
        if self.func.block(pred).succs.len() <= 1 {
            return pred;
        }
        if let Some(&a) = airlocks.get(&pred) {
            return a;
        }
        let airlock = self.func.split_edge(pred, block);
        trace!(pred, block, airlock, "inserted airlock");
        airlocks.insert(pred, airlock);
        airlock
    }

    /// Make cached array syms agree on all forward edges by copying the first edge's
    /// syms from the others
    fn compensate_array_syms(&mut self, block: BlockId, incoming: &mut [Incoming]) {
        if incoming.iter().any(|i| i.back_edge) {
            return;
        }
        let syms: Vec<SymId> = incoming[0]
            .data
            .sym_to_value
            .keys()
            .copied()
            .filter(|s| !self.func.syms.is_property(*s))
            .collect();
        let mut airlocks: HashMap<BlockId, BlockId> = HashMap::default();
        for sym in syms {
            let infos: Vec<Option<ArrayInfo>> = incoming
                .iter()
                .map(|i| i.data.value(sym).and_then(|v| v.info().array_info().copied()))
                .collect();
            if infos.iter().any(|i| i.is_none()) {
                continue;
            }
            let infos: Vec<ArrayInfo> = infos.into_iter().flatten().collect();
            for field in 0..3 {
                let syms_per_edge: Vec<Option<SymId>> =
                    infos.iter().map(|a| *array_field(&mut a.clone(), field)).collect();
                let winner = match syms_per_edge[0] {
                    Some(w) if syms_per_edge.iter().all(|s| s.is_some()) => w,
                    _ => continue,
                };
                if syms_per_edge.iter().all(|s| *s == Some(winner)) {
                    continue;
                }
                for idx in 1..incoming.len() {
                    let source = match syms_per_edge[idx] {
                        Some(s) if s != winner => s,
                        _ => continue,
                    };
                    let ty = self.func.syms.sym_type(winner);
                    let instr = self
                        .new_instr(Opcode::Ld, 0)
                        .with_dst(Opnd::typed_reg(winner, ty))
                        .with_src1(Opnd::typed_reg(source, ty));
                    let pred = incoming[idx].pred;
                    let target = self.compensation_block(pred, block, &mut airlocks);
                    self.func.block_mut(target).insert_at_end(instr);
                    self.stats.compensations += 1;
                    trace!(array = sym, from = source, to = winner, "compensated array sym");

                    let data = &mut incoming[idx].data;
                    if let Some(v) = data.value(source) {
                        data.set_value(winner, &v, false);
                    }
                    if let Some(v) = data.value(sym) {
                        let mut info = *v.info().array_info().unwrap_or(&ArrayInfo::default());
                        *array_field(&mut info, field) = Some(winner);
                        let updated = v.info().with_array_info(v.ty(), info);
                        data.update_value_info(v.number(), updated);
                    }
                    if target == pred {
                        if let Some(d) = self.block_data.get_mut(&pred) {
                            if let Some(v) = d.value(source) {
                                d.set_value(winner, &v, false);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Pick a sym store for every merged value: the first edge's store if it still
    /// holds the value, else the lowest bytecode sym holding it
    fn fix_sym_stores(&self, first: &BlockData, merged: &mut BlockData) {
        let mut holders: HashMap<ValueNumber, Vec<SymId>> = HashMap::default();
        for (&sym, &vn) in &merged.sym_to_value {
            if !self.func.syms.is_property(sym) {
                holders.entry(vn).or_default().push(sym);
            }
        }
        for (vn, mut syms) in holders {
            syms.sort_unstable();
            let preferred = first
                .value_of(vn)
                .and_then(|v| v.info().sym_store())
                .filter(|s| syms.contains(s));
            let store = preferred
                .or_else(|| syms.iter().copied().find(|&s| self.func.syms.is_bytecode(s)))
                .or_else(|| syms.first().copied());
            if let Some(info) = merged.values.get_mut(&vn) {
                if info.sym_store() != store {
                    std::rc::Rc::make_mut(info).set_sym_store(store);
                }
            }
        }
    }

    /// Induction variables on entry to `block` during a prepass
    fn merge_induction_variables(
        &self,
        block: BlockId,
        incoming: &[Incoming],
    ) -> Option<InductionVariableSet> {
        if !self.is_prepass() {
            return None;
        }
        let block_loop = self.func.loop_of(block)?;
        if self.func.block(block).is_loop_header && self.func.loop_(block_loop).header == block {
            return Some(InductionVariableSet::default());
        }

        let mut result: Option<InductionVariableSet> = None;
        for inc in incoming {
            let set = match self.func.loop_of(inc.pred) {
                Some(l) if l == block_loop => inc.data.induction_variables.clone().unwrap_or_default(),
                Some(l) if l != block_loop && self.func.loop_is_within(l, block_loop) => {
                    self.exit_inner_loop_ivs(l, block_loop, inc)
                }
                _ => InductionVariableSet::default(),
            };
            match result.as_mut() {
                None => result = Some(set),
                Some(r) => merge_induction_variable_sets(r, &set),
            }
        }
        Some(result.unwrap_or_default())
    }

    /// Induction variables after leaving the inner loop containing `inc.pred`
    fn exit_inner_loop_ivs(
        &self,
        pred_loop: LoopId,
        block_loop: LoopId,
        inc: &Incoming,
    ) -> InductionVariableSet {
        // The child of block_loop the edge leaves.
        let mut child = pred_loop;
        while let Some(p) = self.func.loop_(child).parent {
            if p == block_loop {
                break;
            }
            child = p;
        }
        let inner = self.func.loop_(child);
        let mut set = self
            .block_data
            .get(&inner.landing_pad)
            .and_then(|d| d.induction_variables.clone())
            .unwrap_or_default();
        let mut defs: Vec<SymId> = inner.syms_def_in_loop.iter().copied().collect();
        defs.sort_unstable();
        let direct = pred_loop == child;
        for sym in defs {
            if let Some(iv) = set.get_mut(&sym) {
                iv.set_change_is_indeterminate();
                continue;
            }
            let vn = inc.data.value_number(sym).unwrap_or_default();
            let mut iv = InductionVariable::new(sym, vn, 0);
            let inner_iv = inc
                .data
                .induction_variables
                .as_ref()
                .and_then(|s| s.get(&sym))
                .filter(|_| direct);
            match inner_iv {
                Some(inner_iv) if inner_iv.is_change_determinate() => {
                    let mut expanded = inner_iv.clone();
                    expanded.expand_inner_loop_change();
                    iv.merge(&expanded);
                }
                _ => iv.set_change_is_indeterminate(),
            }
            set.insert(sym, iv);
        }
        set
    }
}

/// One of the cached syms of an array info
fn array_field(info: &mut ArrayInfo, field: usize) -> &mut Option<SymId> {
    match field {
        0 => &mut info.head_segment_sym,
        1 => &mut info.head_segment_length_sym,
        _ => &mut info.length_sym,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globopt::config::GlobOptConfig;
    use crate::ir::FuncBuilder;
    use pretty_assertions::assert_eq;

    fn v(n: ValueNumber, info: ValueInfo) -> Value {
        Value::new(n, info)
    }

    #[test]
    fn test_equal_int_constants_stay_constant() {
        let merged = merge_value_infos(
            &v(5, ValueInfo::int_constant(3)),
            &v(6, ValueInfo::int_constant(3)),
        );
        assert_eq!(merged.int_constant_value(false), Some(3));
    }

    #[test]
    fn test_int_constants_merge_to_range() {
        let merged = merge_value_infos(
            &v(5, ValueInfo::int_constant(1)),
            &v(6, ValueInfo::int_constant(9)),
        );
        assert_eq!(merged.int_constant_bounds(false), Some(IntConstantBounds::new(1, 9)));
        assert!(merged.is_int());
    }

    #[test]
    fn test_int_and_string_meet_generic() {
        let merged = merge_value_infos(
            &v(5, ValueInfo::int_constant(1)),
            &v(6, ValueInfo::new(ValueType::STRING)),
        );
        assert!(merged.is_generic());
        assert!(!merged.ty().is_int());
    }

    #[test]
    fn test_polymorphic_types_form_a_set() {
        let a = JsTypeInfo {
            type_id: Some(1),
            type_set: None,
            is_shared: false,
        };
        let b = JsTypeInfo {
            type_id: Some(2),
            ..a.clone()
        };
        let merged = merge_js_types(&a, &b).unwrap();
        assert_eq!(merged.type_set, Some(vec![1, 2]));
        assert_eq!(merged.type_id, None);
    }

    #[test]
    fn test_liveness_needs_every_edge() {
        let int_value = v(5, ValueInfo::int_constant(1));
        let any_value = v(6, ValueInfo::new(ValueType::ANY));
        let int32 = SymLiveness::only(IrType::Int32);

        let l = merge_liveness(&[(int32, Some(&int_value)), (SymLiveness::VAR, Some(&int_value))]);
        assert_eq!(l.int32, Int32Liveness::Lossless);
        assert!(!l.var);

        let l = merge_liveness(&[(int32, Some(&int_value)), (SymLiveness::VAR, Some(&any_value))]);
        assert_eq!(l.int32, Int32Liveness::Dead);
        assert!(l.var);
    }

    #[test]
    fn test_merge_values_share_results() {
        let mut b = FuncBuilder::new("m");
        let x = b.param("x", ValueType::ANY);
        b.ret(Opnd::reg(x));
        let mut func = b.finish().unwrap();
        let mut ctx = OptContext::new(&mut func, GlobOptConfig::default());
        let mut cache = HashMap::default();
        let a = v(10, ValueInfo::int_constant(1));
        let b = v(11, ValueInfo::int_constant(2));
        let m1 = ctx.merge_values(&a, &b, false, &mut cache);
        let m2 = ctx.merge_values(&a, &b, false, &mut cache);
        assert_eq!(m1.number(), m2.number());
        assert_ne!(m1.number(), a.number());
        let back = ctx.merge_values(&b, &a, true, &mut cache);
        assert!(back.info().is_generic());
    }
}
