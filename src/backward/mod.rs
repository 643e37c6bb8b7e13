//! Backward pass
//!
//! Runs before the forward optimizer to compute what it cannot see while walking
//! blocks in order: the syms live on entry to each block and a summary of every
//! loop body (defined syms, calls, field and array kills). After optimization the
//! same liveness drives the dead-store cleanup.

use crate::ir::{
    property_names, BlockId, Func, ImplicitCallFlags, Instr, InstrFlags, JsArrayKills, Opcode,
    SymId, SymTable,
};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use tracing::{debug, trace};

type LiveSets = HashMap<BlockId, HashSet<SymId>>;

/// Compute upward-exposed uses for every block and the per-loop summaries.
pub fn analyze(func: &mut Func) {
    let live_in = liveness(func, |syms, s| syms.var_equiv(s));
    let blocks: Vec<BlockId> = func.live_blocks().collect();
    for b in blocks {
        func.block_mut(b).upward_exposed_uses = live_in.get(&b).cloned().unwrap_or_default();
    }
    for l in 0..func.loops.len() {
        let summary = LoopSummary::collect(func, l as u32, &live_in);
        let lp = &mut func.loops[l];
        trace!(loop_id = l, defs = summary.defs.len(), has_call = summary.has_call, "loop summary");
        lp.syms_def_in_loop = summary.defs;
        lp.syms_used_before_defined = summary.used_before_defined;
        lp.has_call = summary.has_call;
        lp.has_yield = summary.has_yield;
        lp.fields_killed = summary.fields_killed;
        lp.kills_all_fields = summary.kills_all_fields;
        lp.array_kills = summary.array_kills;
        lp.implicit_call_flags = summary.implicit_call_flags;
    }
}

/// Live-in sets per block, with syms folded through `key` before they are tracked
fn liveness(func: &Func, key: impl Fn(&SymTable, SymId) -> SymId) -> LiveSets {
    let blocks: Vec<BlockId> = func
        .order
        .iter()
        .rev()
        .copied()
        .filter(|&b| !func.block(b).is_dead)
        .collect();
    let mut live_in: LiveSets = HashMap::default();
    let mut changed = true;
    while changed {
        changed = false;
        for &b in &blocks {
            let block = func.block(b);
            let mut live: HashSet<SymId> = block
                .succs
                .iter()
                .filter_map(|s| live_in.get(s))
                .flatten()
                .copied()
                .collect();
            for instr in block.instrs.iter().rev() {
                step_backward(&func.syms, instr, &mut live, &key);
            }
            let entry = live_in.entry(b).or_default();
            if *entry != live {
                *entry = live;
                changed = true;
            }
        }
    }
    live_in
}

fn step_backward(
    syms: &SymTable,
    instr: &Instr,
    live: &mut HashSet<SymId>,
    key: &impl Fn(&SymTable, SymId) -> SymId,
) {
    if let Some(d) = instr.defined_sym() {
        live.remove(&key(syms, d));
    }
    for u in instr.used_syms() {
        if !syms.is_property(u) {
            live.insert(key(syms, u));
        }
    }
}

/// What a loop body does, gathered from its instructions alone
#[derive(Default)]
struct LoopSummary {
    defs: HashSet<SymId>,
    used_before_defined: HashSet<SymId>,
    has_call: bool,
    has_yield: bool,
    fields_killed: HashSet<SymId>,
    kills_all_fields: bool,
    array_kills: JsArrayKills,
    implicit_call_flags: ImplicitCallFlags,
}

impl LoopSummary {
    fn collect(func: &Func, l: u32, live_in: &LiveSets) -> Self {
        let lp = func.loop_(l);
        let syms = &func.syms;
        let mut s = LoopSummary {
            implicit_call_flags: func.block(lp.header).loop_implicit_call_flags,
            ..Default::default()
        };
        for &b in &lp.blocks {
            let block = func.block(b);
            if block.is_dead {
                continue;
            }
            for instr in &block.instrs {
                if let Some(d) = instr.defined_sym() {
                    s.defs.insert(syms.var_equiv(d));
                }
                s.has_call |= instr.opcode.is_call();
                s.has_yield |= instr.opcode == Opcode::Yield;
                s.array_kills |= instr.js_array_kills(syms);
                s.record_field_kills(syms, instr);
            }
        }
        if let Some(header_live) = live_in.get(&lp.header) {
            s.used_before_defined = header_live.intersection(&s.defs).copied().collect();
        }
        s
    }

    fn record_field_kills(&mut self, syms: &SymTable, instr: &Instr) {
        if self.kills_all_fields {
            return;
        }
        if instr.flags.contains(InstrFlags::CALLS_ACCESSOR)
            || instr.opcode.uses_all_fields()
            || instr.helper.map_or(false, |h| h.kills_all_fields())
        {
            self.kills_all_fields = true;
            return;
        }
        match instr.opcode {
            Opcode::StFld | Opcode::DeleteFld => {
                let Some(property_id) = instr
                    .property_sym()
                    .and_then(|p| syms.property(p))
                    .map(|p| p.property_id)
                else {
                    return;
                };
                let name = syms.property_name(property_id);
                if name == property_names::VALUE_OF || name == property_names::TO_STRING {
                    self.kills_all_fields = true;
                    return;
                }
                self.fields_killed.extend(syms.property_equiv_set(property_id));
            }
            Opcode::StElemI | Opcode::DeleteElemI | Opcode::InlineArrayPush | Opcode::InlineArrayPop => {
                self.fields_killed
                    .extend(syms.property_equiv_set_by_name(property_names::LENGTH));
            }
            Opcode::CallDirect if instr.helper.map_or(false, |h| h.changes_array_length()) => {
                self.fields_killed
                    .extend(syms.property_equiv_set_by_name(property_names::LENGTH));
            }
            _ => {}
        }
    }
}

fn is_removable(syms: &SymTable, instr: &Instr) -> bool {
    if instr.opcode == Opcode::Nop {
        return true;
    }
    let Some(dst) = instr.defined_sym() else {
        return false;
    };
    !instr.has_bailout()
        && !instr.opcode.has_side_effects()
        && !instr.opcode.has_implicit_calls()
        && !syms.is_bytecode(syms.var_equiv(dst))
}

/// Remove no-ops and dead definitions of optimizer temporaries. Returns the number
/// of instructions removed.
pub fn dead_store(func: &mut Func) -> usize {
    func.mark_unreachable_blocks();
    let mut removed = 0;
    loop {
        let live_in = liveness(func, |_, s| s);
        let blocks: Vec<BlockId> = func.live_blocks().collect();
        let mut round = 0;
        for b in blocks {
            let mut live: HashSet<SymId> = func
                .block(b)
                .succs
                .iter()
                .filter_map(|s| live_in.get(s))
                .flatten()
                .copied()
                .collect();
            let instrs = std::mem::take(&mut func.block_mut(b).instrs);
            let mut kept = Vec::with_capacity(instrs.len());
            for instr in instrs.into_iter().rev() {
                let dead = match instr.defined_sym() {
                    _ if instr.opcode == Opcode::Nop => true,
                    Some(d) => !live.contains(&d) && is_removable(&func.syms, &instr),
                    None => false,
                };
                if dead {
                    trace!(block = b, instr = instr.id, "dead store");
                    round += 1;
                    continue;
                }
                step_backward(&func.syms, &instr, &mut live, &|_, s| s);
                kept.push(instr);
            }
            kept.reverse();
            func.block_mut(b).instrs = kept;
        }
        if round == 0 {
            break;
        }
        removed += round;
    }
    if removed > 0 {
        debug!(removed, "dead stores removed");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncBuilder, HelperMethod, IrType, Opnd, RegOpnd, ValueType};
    use pretty_assertions::assert_eq;

    /// `i = 0; while (i < n) { <body>; i = i + 1 } return i`
    fn counting_loop(body: impl FnOnce(&mut FuncBuilder, SymId)) -> (Func, SymId, SymId) {
        let mut b = FuncBuilder::new("count");
        let n = b.param("n", ValueType::LIKELY_INT);
        let i = b.var("i");
        b.ld_int(i, 0);
        let header = b.block();
        let body_block = b.block();
        let exit = b.block();
        b.br(header);
        b.switch_to(header);
        b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(n)), exit, body_block);
        b.switch_to(body_block);
        body(&mut b, i);
        let one = b.temp();
        b.ld_int(one, 1);
        b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::reg(one));
        b.br(header);
        b.switch_to(exit);
        b.ret(Opnd::reg(i));
        (b.finish().unwrap(), i, n)
    }

    #[test]
    fn test_loop_header_sees_induction_variable_live() {
        let (mut func, i, n) = counting_loop(|_, _| {});
        analyze(&mut func);
        let header = func.loops[0].header;
        let live = &func.block(header).upward_exposed_uses;
        assert!(live.contains(&i));
        assert!(live.contains(&n));
        assert!(!func.block(func.entry).upward_exposed_uses.contains(&i));
    }

    #[test]
    fn test_loop_summary_records_defs_and_calls() {
        let (mut func, i, n) = counting_loop(|b, _| {
            let f = b.var("f");
            let r = b.temp();
            b.call(Some(r), f, &[]);
        });
        analyze(&mut func);
        let lp = &func.loops[0];
        assert!(lp.syms_def_in_loop.contains(&i));
        assert!(!lp.syms_def_in_loop.contains(&n));
        assert!(lp.syms_used_before_defined.contains(&i));
        assert!(lp.has_call);
        assert!(lp.kills_all_fields);
        assert!(!lp.has_yield);
    }

    #[test]
    fn test_field_store_kills_same_name_only() {
        let mut o_sym = 0;
        let (mut func, _, _) = counting_loop(|b, i| {
            let o = b.var("o");
            o_sym = o;
            b.st_fld(o, "x", Opnd::reg(i));
        });
        let x = func.syms.property_sym(o_sym, "x");
        let y = func.syms.property_sym(o_sym, "y");
        analyze(&mut func);
        let lp = &func.loops[0];
        assert!(lp.is_field_killed(x));
        assert!(!lp.is_field_killed(y));
        assert!(!lp.kills_all_fields);
    }

    #[test]
    fn test_helper_that_resizes_kills_array_lengths() {
        let (mut func, _, _) = counting_loop(|b, _| {
            let a = b.var("a");
            let r = b.temp();
            b.call_helper(Some(r), HelperMethod::ArrayShift, &[a]);
        });
        analyze(&mut func);
        assert!(func.loops[0].array_kills.contains(JsArrayKills::LENGTHS));
    }

    #[test]
    fn test_dead_temp_is_removed_but_bytecode_var_kept() {
        let mut b = FuncBuilder::new("dead");
        let x = b.var("x");
        let t = b.temp();
        let u = b.temp();
        b.ld_int(x, 1);
        b.ld_int(t, 2);
        b.ld_int(u, 3);
        b.ret(Opnd::reg(u));
        let mut func = b.finish().unwrap();
        let nop = {
            let mut nop = Instr::new(func.next_instr_id(), Opcode::Nop);
            nop.make_nop();
            nop
        };
        func.block_mut(func.entry).instrs.insert(0, nop);
        assert_eq!(dead_store(&mut func), 2);
        let defs: Vec<Option<SymId>> =
            func.block(func.entry).instrs.iter().map(|i| i.defined_sym()).collect();
        assert!(defs.contains(&Some(x)));
        assert!(defs.contains(&Some(u)));
        assert!(!defs.contains(&Some(t)));
    }

    #[test]
    fn test_dead_chain_is_removed_in_rounds() {
        let mut b = FuncBuilder::new("chain");
        let t = b.temp();
        let u = b.temp();
        b.ld_int(t, 2);
        b.ld(u, t);
        b.ret(Opnd::IntConst(0));
        let mut func = b.finish().unwrap();
        assert_eq!(dead_store(&mut func), 2);
    }

    #[test]
    fn test_typed_def_of_live_sym_is_kept() {
        let mut b = FuncBuilder::new("typed");
        let t = b.temp();
        b.ld_int(t, 2);
        let mut func = b.finish().unwrap();
        let t_i = func.syms.typed_equiv(t, IrType::Int32);
        let id = func.next_instr_id();
        let mut conv = Instr::new(id, Opcode::FromVar);
        conv.dst = Some(Opnd::Reg(RegOpnd::new(t_i, IrType::Int32)));
        conv.src1 = Some(Opnd::reg(t));
        let mut ret = Instr::new(func.next_instr_id(), Opcode::Ret);
        ret.src1 = Some(Opnd::Reg(RegOpnd::new(t_i, IrType::Int32)));
        let entry = func.entry;
        func.block_mut(entry).instrs.push(conv);
        func.block_mut(entry).instrs.push(ret);
        assert_eq!(dead_store(&mut func), 0);
    }
}
