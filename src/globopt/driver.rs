//! Forward pass driver
//!
//! Blocks are visited once in flow order. A loop header is reached with the state of
//! its landing pad; before the header is optimized the loop is walked in a prepass to
//! compute its back edge states, then the real pass continues into the loop body.

use super::block_data::BlockData;
use super::context::{OptContext, PassMode};
use crate::error::{Error, Result};
use crate::ir::{BlockId, Opcode};
use tracing::{debug, trace};

impl<'f> OptContext<'f> {
    /// Run the real forward pass over every reachable block
    pub(crate) fn optimize_blocks(&mut self) -> Result<()> {
        let order = self.func.order.clone();
        for block in order {
            if self.func.block(block).is_dead {
                continue;
            }
            if self.func.block(block).is_loop_header {
                if let Some(l) = self.func.loop_of(block) {
                    let lp = self.func.loop_(l).landing_pad;
                    if self.block_data.contains_key(&lp) {
                        debug!(loop_id = l, header = block, "loop prepass");
                        self.prepass_loop(l)?;
                    }
                }
            }
            self.opt_block(block)?;
        }

        if self.config.do_memop {
            self.optimize_memops();
        }

        self.block_data.clear();
        self.data_use_count.clear();
        self.edge_data.clear();
        let removed = self.func.mark_unreachable_blocks();
        if !removed.is_empty() {
            debug!(blocks = ?removed, "removed unreachable blocks");
        }
        Ok(())
    }

    /// Whether any predecessor of `block` has produced a state for it yet
    fn has_incoming_state(&self, block: BlockId) -> bool {
        self.func.block(block).preds.iter().any(|&pred| {
            if self.func.is_back_edge(pred, block) {
                match self.mode {
                    PassMode::Real => self.func.loop_of(block).map_or(false, |l| {
                        self.loop_states[l as usize].back_edge_data.contains_key(&pred)
                    }),
                    PassMode::Prepass { .. } => self.prepass_tails.contains_key(&pred),
                }
            } else {
                self.edge_data.contains_key(&(pred, block)) || self.block_data.contains_key(&pred)
            }
        })
    }

    /// Optimize one block. In the prepass the block's instructions are left untouched.
    pub(crate) fn opt_block(&mut self, block: BlockId) -> Result<()> {
        if block != self.func.entry && !self.has_incoming_state(block) {
            trace!(block, "no incoming state, skipping");
            return Ok(());
        }
        self.current_block = block;
        self.block_bailed_out = false;
        self.data = self.merge_predecessors(block)?;

        if !self.is_prepass() {
            if self.func.block(block).is_loop_header {
                if let Some(l) = self.func.loop_of(block) {
                    if self.func.loop_(l).header == block {
                        self.enter_loop_header(l);
                    }
                }
            }
            if self.config.do_loop_count_based_bound_check_hoist {
                if let Some(l) = self.func.loop_of(block) {
                    if self.func.loop_countable_block(l) == Some(block) {
                        self.determine_loop_count(l);
                    }
                }
            }
        }

        let instrs = if self.is_prepass() {
            self.func.block(block).instrs.clone()
        } else {
            std::mem::take(&mut self.func.block_mut(block).instrs)
        };
        self.out.clear();
        for instr in instrs {
            self.opt_instr(instr)?;
            if self.block_bailed_out {
                break;
            }
        }
        if !self.is_prepass() {
            let out = std::mem::take(&mut self.out);
            self.func.block_mut(block).instrs = out;
        }

        if self.block_bailed_out {
            if !self.is_prepass() {
                let succs = self.func.block(block).succs.clone();
                for succ in succs {
                    self.func.remove_edge(block, succ);
                }
            }
            self.block_data.remove(&block);
            return Ok(());
        }

        let ends_in_ret = self
            .func
            .block(block)
            .last_instr()
            .map_or(false, |i| i.opcode == Opcode::Ret);
        if ends_in_ret && self.data.start_call_count != 0 {
            return Err(Error::internal(format!(
                "{} StartCall(s) outstanding at the return in block {}",
                self.data.start_call_count, block
            )));
        }

        if !self.is_prepass() {
            let tails_of: Vec<_> = self
                .func
                .loops
                .iter()
                .filter(|l| l.tails.contains(&block))
                .map(|l| l.id)
                .collect();
            for l in tails_of {
                self.reconcile_loop_tail(block, l)?;
            }
        }

        let mut data = std::mem::replace(&mut self.data, BlockData::new());
        data.collect_garbage();
        self.store_block_data(block, data);
        Ok(())
    }

    /// Keep `block`'s end state until its last forward successor merges it. Landing
    /// pads keep theirs for the whole pass; hoisting reads them.
    fn store_block_data(&mut self, block: BlockId, data: BlockData) {
        let b = self.func.block(block);
        let uses = b
            .succs
            .iter()
            .filter(|&&s| !self.func.is_back_edge(block, s))
            .count();
        if !b.is_landing_pad && uses > 0 {
            self.data_use_count.insert(block, uses);
        }
        self.block_data.insert(block, data);
    }

    /// `pred`'s end state for one of its successors. The last successor takes it.
    pub(crate) fn consume_block_data(&mut self, pred: BlockId) -> Option<BlockData> {
        if self.data_use_count.get(&pred) == Some(&1) {
            self.data_use_count.remove(&pred);
            return self.block_data.remove(&pred);
        }
        let data = self.block_data.get(&pred).cloned();
        self.release_block_data(pred);
        data
    }

    /// One successor of `pred` no longer needs its end state
    pub(crate) fn release_block_data(&mut self, pred: BlockId) {
        if let Some(uses) = self.data_use_count.get_mut(&pred) {
            *uses = uses.saturating_sub(1);
            if *uses == 0 {
                self.data_use_count.remove(&pred);
                self.block_data.remove(&pred);
            }
        }
    }
}
