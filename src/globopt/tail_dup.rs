//! Tail duplication
//!
//! A short merge block reached only through unconditional branches is copied into
//! each predecessor, so every path branches straight to where the merge block went.
//! The merge block becomes unreachable and is removed.

use crate::ir::{BlockId, Func, Instr, Opcode};
use tracing::debug;

/// Non-branch instructions a duplicated tail may carry
const MAX_DUPLICATED_INSTRS: usize = 1;

fn is_cheap(instr: &Instr) -> bool {
    if instr.has_bailout() {
        return false;
    }
    instr.opcode == Opcode::Ld
        || instr.opcode.can_cse()
            && !matches!(instr.opcode, Opcode::LdLen | Opcode::LdElemI | Opcode::CheckFixedFld)
}

/// Whether `block` is a merge block worth folding into its predecessors
fn is_duplicable(func: &Func, block: BlockId) -> bool {
    let b = func.block(block);
    if block == func.entry || b.is_dead || b.is_loop_header || b.is_landing_pad || b.preds.len() < 2 {
        return false;
    }
    if b.succs.len() > 1 || b.succs.iter().any(|&s| func.is_back_edge(block, s)) {
        return false;
    }
    let (body, last) = match b.instrs.split_last() {
        Some((last, body)) if last.opcode == Opcode::Br || last.opcode == Opcode::Ret => (body, Some(last)),
        Some(_) => (&b.instrs[..], None),
        None => (&b.instrs[..], None),
    };
    if last.is_none() && b.succs.is_empty() {
        return false;
    }
    if body.len() > MAX_DUPLICATED_INSTRS || !body.iter().all(is_cheap) {
        return false;
    }
    b.preds.iter().all(|&p| {
        let pred = func.block(p);
        func.loop_of(p) == func.loop_of(block)
            && pred.succs.len() == 1
            && pred
                .last_instr()
                .map_or(false, |br| br.opcode == Opcode::Br && br.target == Some(block))
    })
}

/// Copy short merge blocks into their predecessors. Returns the number of merge
/// blocks removed.
pub fn tail_dup(func: &mut Func) -> usize {
    let candidates: Vec<BlockId> = func
        .live_blocks()
        .filter(|&b| is_duplicable(func, b))
        .collect();
    let mut duplicated = 0;
    for block in candidates {
        // An earlier duplication may have changed this block's neighbourhood.
        if !is_duplicable(func, block) {
            continue;
        }
        let tail = func.block(block).instrs.clone();
        let succs = func.block(block).succs.clone();
        let preds = func.block(block).preds.clone();
        for pred in preds {
            func.block_mut(pred).instrs.pop();
            for instr in &tail {
                let mut copy = instr.clone();
                copy.id = func.next_instr_id();
                func.block_mut(pred).instrs.push(copy);
            }
            func.remove_edge(pred, block);
            for &s in &succs {
                func.add_edge(pred, s);
            }
        }
        debug!(block, "tail duplicated");
        duplicated += 1;
    }
    if duplicated > 0 {
        func.mark_unreachable_blocks();
    }
    duplicated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncBuilder, Opnd, ValueType};

    /// `if (c) x = 1; else x = 2; y = x; return y`
    fn diamond(merge_len: usize) -> (Func, BlockId) {
        let mut b = FuncBuilder::new("diamond");
        let c = b.param("c", ValueType::BOOLEAN);
        let x = b.var("x");
        let y = b.var("y");
        let then = b.block();
        let els = b.block();
        let merge = b.block();
        b.br_cond(Opcode::BrTrue, Opnd::reg(c), None, then, els);
        b.switch_to(then);
        b.ld_int(x, 1);
        b.br(merge);
        b.switch_to(els);
        b.ld_int(x, 2);
        b.br(merge);
        b.switch_to(merge);
        for _ in 0..merge_len {
            b.ld(y, x);
        }
        b.ret(Opnd::reg(y));
        (b.finish().unwrap(), merge)
    }

    #[test]
    fn test_short_merge_block_is_duplicated() {
        let (mut func, merge) = diamond(1);
        assert_eq!(tail_dup(&mut func), 1);
        assert!(func.block(merge).is_dead);
        for b in func.live_blocks() {
            if b == func.entry {
                continue;
            }
            assert_eq!(func.block(b).last_instr().map(|i| i.opcode), Some(Opcode::Ret));
        }
    }

    #[test]
    fn test_long_merge_block_is_kept() {
        let (mut func, merge) = diamond(2);
        assert_eq!(tail_dup(&mut func), 0);
        assert!(!func.block(merge).is_dead);
    }
}
