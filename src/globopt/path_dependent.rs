//! Conditional branches: folding and path-dependent values
//!
//! A branch whose outcome follows from what is known about its sources is replaced
//! by an unconditional branch (or removed). Otherwise, after type specialization, an
//! int32 comparison narrows the bounds of its sources separately on each outgoing
//! edge.

use super::block_data::BlockData;
use super::const_fold::eval_branch;
use super::context::OptContext;
use super::instr_opt::SrcValues;
use super::int_bounds::{IntBounds, IntConstantBounds};
use super::value_info::{Value, ValueInfo};
use crate::ir::{Instr, Opcode};
use tracing::{debug, trace};

impl<'f> OptContext<'f> {
    /// Fold, specialize and record path-dependent facts for a conditional branch
    pub(crate) fn opt_branch(&mut self, instr: &mut Instr, srcs: &SrcValues) {
        if let Some(taken) = self.evaluate_branch(instr, srcs) {
            if self.fold_branch(instr, taken) {
                return;
            }
        }
        self.type_specialize_branch(instr, srcs);
        if self.config.do_path_dependent_values {
            self.record_path_dependent_values(instr, srcs);
        }
    }

    /// Outcome of the branch condition, when it is known
    pub(crate) fn evaluate_branch(&self, instr: &Instr, srcs: &SrcValues) -> Option<bool> {
        let op = instr.opcode.to_var_opcode();
        let x = srcs.src1.as_ref()?;
        if matches!(op, Opcode::BrTrue | Opcode::BrFalse) {
            let truthy = truthiness(x)?;
            return Some(truthy == (op == Opcode::BrTrue));
        }
        let y = srcs.src2.as_ref()?;
        if let (Some(a), Some(b)) = (
            x.info().int_constant_value(false),
            y.info().int_constant_value(false),
        ) {
            return eval_branch(op, a, b);
        }
        if !x.info().is_int() || !y.info().is_int() {
            return None;
        }
        let same = x.number() == y.number();
        let lt = |a: &Value, b: &Value| proves_le(a, b, -1);
        let le = |a: &Value, b: &Value| same || proves_le(a, b, 0);
        match op {
            Opcode::BrEq | Opcode::BrSrEq | Opcode::BrNeq | Opcode::BrSrNeq => {
                let eq = if same {
                    Some(true)
                } else if lt(x, y) || lt(y, x) {
                    Some(false)
                } else {
                    None
                };
                eq.map(|e| e == matches!(op, Opcode::BrEq | Opcode::BrSrEq))
            }
            Opcode::BrLt => decide(lt(x, y), le(y, x)),
            Opcode::BrLe => decide(le(x, y), lt(y, x)),
            Opcode::BrGt => decide(lt(y, x), le(x, y)),
            Opcode::BrGe => decide(le(y, x), lt(x, y)),
            _ => None,
        }
    }

    /// Replace a branch with a known outcome. Back edges are never removed.
    fn fold_branch(&mut self, instr: &mut Instr, taken: bool) -> bool {
        if self.is_prepass() {
            return false;
        }
        let block = self.current_block;
        let target = match instr.target {
            Some(t) => t,
            None => return false,
        };
        let succs = self.func.block(block).succs.clone();
        let fallthrough = match succs.iter().copied().find(|&s| s != target) {
            Some(f) if succs.len() == 2 => f,
            _ => return false,
        };
        let removed = if taken { fallthrough } else { target };
        if self.func.is_back_edge(block, removed) {
            return false;
        }

        debug!(block, instr = instr.id, taken, "folded branch");
        self.emit_byte_code_uses(instr);
        if taken {
            instr.opcode = Opcode::Br;
            instr.src1 = None;
            instr.src2 = None;
            instr.bailout = None;
        } else {
            instr.make_nop();
        }
        self.func.remove_edge(block, removed);
        self.stats.branches_folded += 1;
        true
    }

    /// Narrow the sources of an int32 compare-and-branch on each outgoing edge
    fn record_path_dependent_values(&mut self, instr: &Instr, srcs: &SrcValues) {
        let op = instr.opcode;
        if !matches!(
            op,
            Opcode::BrEqI4
                | Opcode::BrNeqI4
                | Opcode::BrLtI4
                | Opcode::BrLeI4
                | Opcode::BrGtI4
                | Opcode::BrGeI4
        ) {
            return;
        }
        let (x, y) = match (&srcs.src1, &srcs.src2) {
            (Some(x), Some(y)) => (x.number(), y.number()),
            _ => return,
        };
        let (x, y) = match (self.value_of(x), self.value_of(y)) {
            (Some(x), Some(y)) => (x, y),
            _ => return,
        };
        let target = match instr.target {
            Some(t) => t,
            None => return,
        };
        let negated = match op.negated_branch() {
            Some(n) => n,
            None => return,
        };
        let block = self.current_block;
        let succs = self.func.block(block).succs.clone();
        if succs.len() != 2 || !succs.contains(&target) {
            return;
        }
        let relative = self.config.do_track_relative_int_bounds();
        for succ in succs {
            if self.func.is_back_edge(block, succ) {
                continue;
            }
            let edge_op = if succ == target { op } else { negated };
            let mut data = self.data.clone();
            narrow_for_compare(&mut data, edge_op.to_var_opcode(), &x, &y, relative);
            trace!(block, succ, ?edge_op, "path-dependent values");
            self.edge_data.insert((block, succ), data);
        }
    }
}

fn decide(is_true: bool, is_false: bool) -> Option<bool> {
    if is_true {
        Some(true)
    } else if is_false {
        Some(false)
    } else {
        None
    }
}

fn truthiness(value: &Value) -> Option<bool> {
    let info = value.info();
    if let Some(c) = info.int_constant_value(false) {
        return Some(c != 0);
    }
    if let Some(f) = info.float_constant_value() {
        return Some(f != 0.0 && !f.is_nan());
    }
    if let Some(b) = info.int_constant_bounds(false) {
        if b.lower() > 0 || b.upper() < 0 {
            return Some(true);
        }
    }
    None
}

/// Whether `a <= b + offset` holds for two int values
fn proves_le(a: &Value, b: &Value, offset: i32) -> bool {
    let (ab, bb) = match (
        a.info().int_constant_bounds(false),
        b.info().int_constant_bounds(false),
    ) {
        (Some(ab), Some(bb)) => (ab, bb),
        _ => return false,
    };
    if (ab.upper() as i64) <= bb.lower() as i64 + offset as i64 {
        return true;
    }
    if a.number() == b.number() {
        return offset >= 0;
    }
    if let Some(bounds) = a.info().int_bounds() {
        if bounds.is_less_than_or_equal_to(b, offset) {
            return true;
        }
    }
    match (b.info().int_bounds(), offset.checked_neg()) {
        (Some(bounds), Some(neg)) => bounds.is_greater_than_or_equal_to(a, neg),
        _ => false,
    }
}

/// Apply what `x op y` being true says about `x` and `y` to `data`
fn narrow_for_compare(data: &mut BlockData, op: Opcode, x: &Value, y: &Value, relative: bool) {
    match op {
        Opcode::BrLt => {
            narrow_bound(data, x, y, -1, false, relative);
            narrow_bound(data, y, x, 1, true, relative);
        }
        Opcode::BrLe => {
            narrow_bound(data, x, y, 0, false, relative);
            narrow_bound(data, y, x, 0, true, relative);
        }
        Opcode::BrGt => {
            narrow_bound(data, x, y, 1, true, relative);
            narrow_bound(data, y, x, -1, false, relative);
        }
        Opcode::BrGe => {
            narrow_bound(data, x, y, 0, true, relative);
            narrow_bound(data, y, x, 0, false, relative);
        }
        Opcode::BrEq => {
            narrow_bound(data, x, y, 0, true, relative);
            narrow_bound(data, x, y, 0, false, relative);
            narrow_bound(data, y, x, 0, true, relative);
            narrow_bound(data, y, x, 0, false, relative);
        }
        Opcode::BrNeq => {
            exclude(data, x, y, relative);
            exclude(data, y, x, relative);
        }
        _ => {}
    }
}

/// The edge's view of a value. Constants are not held by any sym and never change.
fn current(data: &BlockData, value: &Value) -> Option<Value> {
    data.value_of(value.number())
}

fn bounds_of(value: &Value) -> IntBounds {
    match value.info().int_bounds() {
        Some(b) => b.clone(),
        None => IntBounds::new(
            value
                .info()
                .int_constant_bounds(true)
                .unwrap_or(IntConstantBounds::FULL),
            false,
        ),
    }
}

/// `x >= y + offset` (lower) or `x <= y + offset` (upper) on the edge
fn narrow_bound(data: &mut BlockData, x: &Value, y: &Value, offset: i32, lower: bool, relative: bool) {
    if x.number() == y.number() {
        return;
    }
    let x = match current(data, x) {
        Some(x) => x,
        None => return,
    };
    let y = current(data, y).unwrap_or_else(|| y.clone());
    if !x.info().is_likely_int() || x.info().int_constant_value(true).is_some() {
        return;
    }
    let mut bounds = bounds_of(&x);
    if relative {
        if lower {
            bounds.set_lower_bound(x.number(), &y, offset, true);
        } else {
            bounds.set_upper_bound(x.number(), &y, offset, true);
        }
    } else {
        let base = match y.info().int_constant_bounds(true) {
            Some(b) if lower => b.lower(),
            Some(b) => b.upper(),
            None => return,
        };
        bounds.set_bound_constant_offset(lower, base, offset, y.info().has_int_constant_value());
    }
    if bounds.constant_lower_bound() > bounds.constant_upper_bound() {
        return;
    }
    let info = ValueInfo::int_bounded(x.ty(), bounds, x.info().neg_zero_prevented())
        .with_sym_store(x.info().sym_store());
    data.update_value_info(x.number(), info);
}

/// `x != y` on the edge
fn exclude(data: &mut BlockData, x: &Value, y: &Value, relative: bool) {
    if x.number() == y.number() {
        return;
    }
    let x = match current(data, x) {
        Some(x) => x,
        None => return,
    };
    let y = current(data, y).unwrap_or_else(|| y.clone());
    if !x.info().is_likely_int() || x.info().int_constant_value(true).is_some() {
        return;
    }
    if !relative && y.info().int_constant_value(true).is_none() {
        return;
    }
    let mut bounds = bounds_of(&x);
    if bounds.set_is_not(&y, true) {
        let info = ValueInfo::int_bounded(x.ty(), bounds, x.info().neg_zero_prevented())
            .with_sym_store(x.info().sym_store());
        data.update_value_info(x.number(), info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globopt::config::GlobOptConfig;
    use crate::globopt::value_info::ValueNumber;
    use crate::ir::{BlockId, Func, FuncBuilder, ObjectType, Opnd, ValueType};

    fn optimize(func: &mut Func) {
        crate::backward::analyze(func);
        let mut ctx = OptContext::new(func, GlobOptConfig::default());
        ctx.optimize_blocks().unwrap();
    }

    fn lower_checks_in(func: &Func, blocks: &[BlockId]) -> usize {
        blocks
            .iter()
            .flat_map(|&b| func.block(b).instrs.iter())
            .filter(|i| i.opcode == Opcode::BoundCheck && i.src1 == Some(Opnd::IntConst(0)))
            .count()
    }

    fn v(n: ValueNumber, info: ValueInfo) -> Value {
        Value::new(n, info)
    }

    #[test]
    fn test_proves_le_from_constant_bounds() {
        let a = v(10, ValueInfo::int_range(0, 5, false));
        let b = v(11, ValueInfo::int_range(6, 9, false));
        assert!(proves_le(&a, &b, -1));
        assert!(!proves_le(&b, &a, 0));
    }

    #[test]
    fn test_narrow_less_than_sets_relative_upper_bound() {
        let mut data = BlockData::new();
        let i = v(10, ValueInfo::int_range(0, 100, false));
        let n = v(11, ValueInfo::new(crate::ir::ValueType::INT));
        data.set_value(1, &i, false);
        data.set_value(2, &n, false);
        narrow_for_compare(&mut data, Opcode::BrLt, &i, &n, true);

        let narrowed = data.value(1).unwrap();
        let bounds = narrowed.info().int_bounds().cloned().unwrap();
        assert_eq!(bounds.relative_upper_bounds()[&11].offset(), -1);
        assert!(bounds.is_less_than_or_equal_to(&data.value(2).unwrap(), -1));
        assert_eq!(narrowed.info().sym_store(), Some(1));
    }

    #[test]
    fn test_narrow_against_constant_without_relative_tracking() {
        let mut data = BlockData::new();
        let i = v(10, ValueInfo::new(crate::ir::ValueType::INT));
        let ten = v(11, ValueInfo::int_constant(10));
        data.set_value(1, &i, false);
        data.set_value(2, &ten, false);
        narrow_for_compare(&mut data, Opcode::BrGe, &i, &ten, false);
        let narrowed = data.value(1).unwrap();
        assert_eq!(narrowed.info().int_constant_lower_bound(false), Some(10));
    }

    #[test]
    fn test_compare_with_constant_narrows_fallthrough() {
        // if (k < 0) return 0; return a[k];
        let mut b = FuncBuilder::new("guarded");
        let a = b.param("a", ValueType::likely_array(ObjectType::Int32Array, false));
        let k = b.param("k", ValueType::LIKELY_INT);
        let x = b.var("x");
        let early = b.block();
        let access = b.block();
        b.br_cond(Opcode::BrLt, Opnd::reg(k), Some(Opnd::IntConst(0)), early, access);
        b.switch_to(early);
        b.ret(Opnd::IntConst(0));
        b.switch_to(access);
        b.ld_elem(x, a, k);
        b.ret(Opnd::reg(x));
        let mut func = b.finish().unwrap();
        optimize(&mut func);

        assert_eq!(lower_checks_in(&func, &[access]), 0);
        assert!(func
            .block(func.entry)
            .instrs
            .iter()
            .any(|i| i.opcode == Opcode::BrLtI4));
    }

    #[test]
    fn test_down_counting_loop_drops_lower_check() {
        // for (i = n - 1; i >= 0; i--) s = s + a[i];
        let mut b = FuncBuilder::new("down");
        let a = b.param("a", ValueType::likely_array(ObjectType::Int32Array, false));
        let n = b.param("n", ValueType::LIKELY_INT);
        let i = b.var("i");
        let s = b.var("s");
        let x = b.var("x");
        b.ld_int(s, 0);
        b.binary(Opcode::Sub, i, Opnd::reg(n), Opnd::IntConst(1));
        let header = b.block();
        let body = b.block();
        let exit = b.block();
        b.goto(header);
        b.switch_to(header);
        b.br_cond(Opcode::BrLt, Opnd::reg(i), Some(Opnd::IntConst(0)), exit, body);
        b.switch_to(body);
        b.ld_elem(x, a, i);
        b.binary(Opcode::Add, s, Opnd::reg(s), Opnd::reg(x));
        b.binary(Opcode::Sub, i, Opnd::reg(i), Opnd::IntConst(1));
        b.br(header);
        b.switch_to(exit);
        b.ret(Opnd::reg(s));
        let mut func = b.finish().unwrap();
        optimize(&mut func);

        let blocks = func.loops[0].blocks.clone();
        assert_eq!(lower_checks_in(&func, &blocks), 0);
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(truthiness(&v(3, ValueInfo::int_constant(0))), Some(false));
        assert_eq!(truthiness(&v(3, ValueInfo::int_range(1, 4, false))), Some(true));
        assert_eq!(truthiness(&v(3, ValueInfo::float_constant(f64::NAN))), Some(false));
        assert_eq!(truthiness(&v(3, ValueInfo::new(crate::ir::ValueType::ANY))), None);
    }
}
