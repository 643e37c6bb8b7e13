//! Memset and memcopy
//!
//! A counted innermost loop whose body only stores `a[i] = v` (v invariant) or copies
//! `a[i] = b[i]`, with `i` stepping by one from its entry value, is replaced by a
//! single `Memset`/`Memcopy` of `loopCountMinusOne + 1` elements in the landing pad.
//! The loop itself keeps running its induction variable; only the element accesses
//! and the bound checks on them go away.

use super::context::OptContext;
use super::loops::LoopCountOperand;
use crate::ir::{
    BailOutInfo, BailOutKind, BlockId, IndirOpnd, Instr, InstrId, IrType, LoopId, Opcode, Opnd,
    RegOpnd, SymId,
};
use tracing::debug;

/// Array kinds a memop bails out on, carried over from the accesses it replaces
const ARRAY_ACCESS_KINDS: BailOutKind = BailOutKind::CONVENTIONAL_TYPED_ARRAY_ACCESS_ONLY
    .union(BailOutKind::CONVENTIONAL_NATIVE_ARRAY_ACCESS_ONLY)
    .union(BailOutKind::ON_NOT_ARRAY)
    .union(BailOutKind::ON_NOT_NATIVE_ARRAY);

#[derive(Debug, Clone)]
enum MemOpCandidate {
    Set {
        store: InstrId,
        base: RegOpnd,
        value: Opnd,
        bailout: BailOutKind,
    },
    Copy {
        load: InstrId,
        store: InstrId,
        /// Holds the element between the load and the store
        temp: SymId,
        dst: RegOpnd,
        src: RegOpnd,
        bailout: BailOutKind,
    },
}

impl MemOpCandidate {
    fn removed(&self) -> Vec<InstrId> {
        match self {
            MemOpCandidate::Set { store, .. } => vec![*store],
            MemOpCandidate::Copy { load, store, .. } => vec![*load, *store],
        }
    }
}

/// `base[iv]`, the only element form a memop covers
fn iv_element(opnd: &Opnd, iv: SymId, syms: &crate::ir::SymTable) -> Option<RegOpnd> {
    let indir: &IndirOpnd = opnd.as_indir()?;
    let index = indir.index?;
    if indir.offset != 0 || syms.var_equiv(index.sym) != iv || indir.array.is_none() {
        return None;
    }
    let ty = indir.base.value_type;
    if !(ty.is_native_array() || ty.is_typed_array()) {
        return None;
    }
    Some(indir.base)
}

fn is_conversion(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::ToVar | Opcode::FromVar | Opcode::ConvPrim)
}

/// Syms an instruction reads through its operands
fn opnd_uses(instr: &Instr) -> Vec<SymId> {
    let mut syms = Vec::new();
    for opnd in [&instr.src1, &instr.src2].into_iter().flatten() {
        syms.extend(opnd.used_syms());
    }
    if let Some(dst @ Opnd::Indir(_)) = &instr.dst {
        syms.extend(dst.used_syms());
    }
    syms
}

impl<'f> OptContext<'f> {
    /// Replace simple element loops by memops. Runs after the forward pass, while the
    /// landing pad states are still available.
    pub(crate) fn optimize_memops(&mut self) {
        let loops: Vec<LoopId> = self
            .func
            .loops
            .iter()
            .filter(|l| l.children.is_empty() && l.blocks.len() == 2)
            .map(|l| l.id)
            .collect();
        for l in loops {
            if self.func.block(self.func.loop_(l).landing_pad).is_dead {
                continue;
            }
            self.optimize_loop_memops(l);
        }
    }

    fn optimize_loop_memops(&mut self, l: LoopId) {
        if self.loop_states[l as usize].loop_count.is_none() {
            return;
        }
        let iv = match self.memop_induction_variable(l) {
            Some(iv) => iv,
            None => return,
        };
        let (body, candidates) = match self.collect_memop_candidates(l, iv) {
            Some(c) if !c.1.is_empty() => c,
            _ => return,
        };
        let size = match self.memop_size(l) {
            Some(s) => s,
            None => return,
        };
        let start = match self.loop_entry_operand(l, iv) {
            Some(s) => s,
            None => return,
        };

        let top = self.loop_top_offset(l);
        let mut removed = Vec::new();
        let mut temps = Vec::new();
        for candidate in candidates {
            if let MemOpCandidate::Copy { temp, .. } = candidate {
                temps.push(temp);
            }
            let memop = self.memop_instr(&candidate, start, size, top);
            debug!(loop_id = l, instr = memop.id, opcode = ?memop.opcode, "memop");
            self.insert_in_landing_pad(l, memop);
            removed.extend(candidate.removed());
            self.stats.memops += 1;
        }

        let syms = &self.func.syms;
        let reads = |i: &Instr, syms_of: &[SymId]| {
            [&i.src1, &i.src2]
                .into_iter()
                .flatten()
                .filter_map(Opnd::reg_sym)
                .any(|s| syms_of.contains(&syms.var_equiv(s)))
        };
        let dead = |i: &Instr| {
            removed.contains(&i.id)
                || i.opcode == Opcode::BoundCheck && reads(i, &[iv])
                || is_conversion(i.opcode) && reads(i, &temps)
        };
        let keep: Vec<Instr> = self
            .func
            .block(body)
            .instrs
            .iter()
            .filter(|i| !dead(i))
            .cloned()
            .collect();
        self.func.block_mut(body).instrs = keep;
    }

    /// The loop's one induction variable, stepping by exactly one
    fn memop_induction_variable(&self, l: LoopId) -> Option<SymId> {
        let ivs = &self.loop_states[l as usize].induction_variables;
        if ivs.len() != 1 {
            return None;
        }
        let iv = ivs.values().next()?;
        let change = iv.change_bounds();
        if !iv.is_change_determinate() || !change.is_constant() || change.lower() != 1 {
            return None;
        }
        Some(iv.sym())
    }

    /// Memop candidates in the loop body, or None when anything else in the loop
    /// rules the loop out
    fn collect_memop_candidates(&self, l: LoopId, iv: SymId) -> Option<(BlockId, Vec<MemOpCandidate>)> {
        let lp = self.func.loop_(l);
        let header = lp.header;
        let body = lp.blocks.iter().copied().find(|&b| b != header)?;
        let syms = &self.func.syms;
        let invariant = |s: SymId| !lp.syms_def_in_loop.contains(&syms.var_equiv(s));

        if self
            .func
            .block(header)
            .instrs
            .iter()
            .any(|i| i.opcode.has_side_effects() && !i.opcode.is_branch())
        {
            return None;
        }

        let instrs = &self.func.block(body).instrs;
        let is_increment = |i: &Instr| {
            i.defined_sym().map(|d| syms.var_equiv(d)) == Some(iv)
                && matches!(i.opcode, Opcode::Add | Opcode::AddI4)
                && i.src1.as_ref().and_then(Opnd::reg_sym).map(|s| syms.var_equiv(s)) == Some(iv)
                && i.src2.as_ref().and_then(Opnd::int_const) == Some(1)
        };
        let defines_iv = |i: &Instr| {
            !is_conversion(i.opcode)
                && i.defined_sym().map(|d| syms.var_equiv(d)) == Some(iv)
        };
        let increment_at = instrs.iter().position(is_increment)?;
        if instrs.iter().filter(|i| defines_iv(i)).count() != 1 {
            return None;
        }

        let mut candidates = Vec::new();
        let mut loads: Vec<(usize, &Instr, RegOpnd, SymId)> = Vec::new();
        for (at, instr) in instrs.iter().enumerate() {
            match instr.opcode {
                Opcode::LdElemI => {
                    let src = iv_element(instr.src1.as_ref()?, iv, syms)?;
                    let dst = instr.defined_sym()?;
                    loads.push((at, instr, src, syms.var_equiv(dst)));
                }
                Opcode::StElemI => {
                    if at > increment_at {
                        return None;
                    }
                    let base = iv_element(instr.dst.as_ref()?, iv, syms)?;
                    if !invariant(base.sym) {
                        return None;
                    }
                    let stored = instr.src1?;
                    let bailout = instr.bailout_kind() & ARRAY_ACCESS_KINDS;
                    let copied = stored
                        .reg_sym()
                        .map(|s| syms.var_equiv(s))
                        .and_then(|s| loads.iter().position(|(_, _, _, dst)| *dst == s));
                    match copied {
                        Some(k) => {
                            let (_, load, src, temp) = loads.remove(k);
                            if src.value_type.object_type() != base.value_type.object_type()
                                || syms.var_equiv(src.sym) == syms.var_equiv(base.sym)
                                || !invariant(src.sym)
                            {
                                return None;
                            }
                            candidates.push(MemOpCandidate::Copy {
                                load: load.id,
                                store: instr.id,
                                temp,
                                dst: base,
                                src,
                                bailout: bailout | (load.bailout_kind() & ARRAY_ACCESS_KINDS),
                            });
                        }
                        None => {
                            let constant = stored.is_immediate();
                            if !constant && !stored.reg_sym().map_or(false, invariant) {
                                return None;
                            }
                            candidates.push(MemOpCandidate::Set {
                                store: instr.id,
                                base,
                                value: stored,
                                bailout,
                            });
                        }
                    }
                }
                op if op.has_side_effects() && !op.is_branch() && op != Opcode::BoundCheck && op != Opcode::ByteCodeUses => {
                    return None;
                }
                _ => {}
            }
        }
        // A load not feeding a copy stays in the loop and would read stale elements.
        if !loads.is_empty() {
            return None;
        }

        // The loaded value of a copy must not be read anywhere else.
        for c in &candidates {
            if let MemOpCandidate::Copy { store, temp, .. } = c {
                let other_use = self.func.blocks.iter().any(|b| {
                    b.instrs.iter().any(|i| {
                        i.id != *store
                            && !(b.id == body && is_conversion(i.opcode))
                            && opnd_uses(i).iter().any(|&s| syms.var_equiv(s) == *temp)
                    })
                });
                if other_use {
                    return None;
                }
            }
        }
        Some((body, candidates))
    }

    /// `loopCountMinusOne + 1` as an int32 operand in the landing pad
    fn memop_size(&mut self, l: LoopId) -> Option<Opnd> {
        match self.generate_loop_count(l)? {
            LoopCountOperand::Constant(c) => c.checked_add(1).map(Opnd::IntConst),
            LoopCountOperand::Sym(s) => {
                let size = self.func.syms.new_temp(IrType::Int32);
                let top = self.loop_top_offset(l);
                let mut add = self
                    .new_instr(Opcode::AddI4, top)
                    .with_dst(Opnd::typed_reg(size, IrType::Int32))
                    .with_src1(Opnd::typed_reg(s, IrType::Int32))
                    .with_src2(Opnd::IntConst(1));
                add.add_bailout_kind(BailOutKind::ON_MEMOP_ERROR);
                self.insert_in_landing_pad(l, add);
                Some(Opnd::typed_reg(size, IrType::Int32))
            }
        }
    }

    fn memop_instr(&mut self, candidate: &MemOpCandidate, start: LoopCountOperand, size: Opnd, offset: u32) -> Instr {
        let at = |base: RegOpnd| {
            let (index, disp) = match start {
                LoopCountOperand::Constant(c) => (None, c),
                LoopCountOperand::Sym(s) => (Some(RegOpnd::new(s, IrType::Int32)), 0),
            };
            Opnd::Indir(IndirOpnd {
                base,
                index,
                offset: disp,
                array: None,
            })
        };
        let (opcode, dst, src1, bailout) = match candidate {
            MemOpCandidate::Set { base, value, bailout, .. } => (Opcode::Memset, at(*base), *value, *bailout),
            MemOpCandidate::Copy { dst, src, bailout, .. } => (Opcode::Memcopy, at(*dst), at(*src), *bailout),
        };
        let mut instr = self
            .new_instr(opcode, offset)
            .with_dst(dst)
            .with_src1(src1)
            .with_src2(size);
        instr.bailout = Some(BailOutInfo::new(BailOutKind::ON_MEMOP_ERROR | bailout, offset));
        instr
    }
}

#[cfg(test)]
mod tests {
    use crate::globopt::config::GlobOptConfig;
    use crate::globopt::context::OptContext;
    use crate::globopt::stats::OptStats;
    use crate::ir::{Func, FuncBuilder, ObjectType, Opcode, Opnd, SymId, ValueType};

    fn optimize(func: &mut Func) -> OptStats {
        crate::backward::analyze(func);
        let mut ctx = OptContext::new(func, GlobOptConfig::default());
        ctx.optimize_blocks().unwrap();
        ctx.stats
    }

    fn count(func: &Func, opcode: Opcode) -> usize {
        func.blocks
            .iter()
            .filter(|b| !b.is_dead)
            .flat_map(|b| b.instrs.iter())
            .filter(|i| i.opcode == opcode)
            .count()
    }

    /// `for (i = 0; i < n; i++) { <body> }`
    fn element_loop(
        arrays: &[(&str, ObjectType)],
        body: impl FnOnce(&mut FuncBuilder, &[SymId], SymId),
    ) -> Func {
        let mut b = FuncBuilder::new("memop");
        let syms: Vec<SymId> = arrays
            .iter()
            .map(|(name, kind)| b.param(name, ValueType::likely_array(*kind, true)))
            .collect();
        let n = b.param("n", ValueType::LIKELY_INT);
        let i = b.var("i");
        b.ld_int(i, 0);
        let header = b.block();
        let block = b.block();
        let exit = b.block();
        b.goto(header);
        b.switch_to(header);
        b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(n)), exit, block);
        b.switch_to(block);
        body(&mut b, &syms, i);
        b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::IntConst(1));
        b.br(header);
        b.switch_to(exit);
        b.ret(Opnd::reg(i));
        b.finish().unwrap()
    }

    #[test]
    fn test_constant_store_loop_becomes_memset() {
        let mut func = element_loop(&[("a", ObjectType::Int32Array)], |b, arrays, i| {
            b.st_elem(arrays[0], i, Opnd::IntConst(0));
        });
        let stats = optimize(&mut func);

        assert_eq!(stats.memops, 1);
        assert_eq!(count(&func, Opcode::StElemI), 0);
        let lp = func.loops[0].landing_pad;
        let memset = func
            .block(lp)
            .instrs
            .iter()
            .find(|i| i.opcode == Opcode::Memset)
            .cloned()
            .unwrap();
        assert_eq!(memset.src1, Some(Opnd::IntConst(0)));
        assert!(memset.bailout.is_some());
    }

    #[test]
    fn test_element_copy_loop_becomes_memcopy() {
        let arrays = [("a", ObjectType::Int32Array), ("b", ObjectType::Int32Array)];
        let mut func = element_loop(&arrays, |b, arrays, i| {
            let t = b.temp();
            b.ld_elem(t, arrays[1], i);
            b.st_elem(arrays[0], i, Opnd::reg(t));
        });
        let stats = optimize(&mut func);

        assert_eq!(stats.memops, 1);
        assert_eq!(count(&func, Opcode::Memcopy), 1);
        assert_eq!(count(&func, Opcode::LdElemI), 0);
        assert_eq!(count(&func, Opcode::StElemI), 0);
    }

    #[test]
    fn test_copy_between_different_kinds_is_kept() {
        let arrays = [("a", ObjectType::Int32Array), ("b", ObjectType::Int8Array)];
        let mut func = element_loop(&arrays, |b, arrays, i| {
            let t = b.temp();
            b.ld_elem(t, arrays[1], i);
            b.st_elem(arrays[0], i, Opnd::reg(t));
        });
        let stats = optimize(&mut func);
        assert_eq!(stats.memops, 0);
        assert_eq!(count(&func, Opcode::StElemI), 1);
    }

    #[test]
    fn test_store_of_variant_value_is_kept() {
        let mut func = element_loop(&[("a", ObjectType::Int32Array)], |b, arrays, i| {
            b.st_elem(arrays[0], i, Opnd::reg(i));
        });
        let stats = optimize(&mut func);
        assert_eq!(stats.memops, 0);
    }

    #[test]
    fn test_memop_disabled() {
        let mut func = element_loop(&[("a", ObjectType::Int32Array)], |b, arrays, i| {
            b.st_elem(arrays[0], i, Opnd::IntConst(0));
        });
        crate::backward::analyze(&mut func);
        let config = GlobOptConfig {
            do_memop: false,
            ..GlobOptConfig::default()
        };
        let mut ctx = OptContext::new(&mut func, config);
        ctx.optimize_blocks().unwrap();
        assert_eq!(ctx.stats.memops, 0);
        assert_eq!(count(&func, Opcode::StElemI), 1);
    }
}
