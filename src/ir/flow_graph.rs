//! Flow graph and loop tree
//!
//! Blocks are stored by id; `order` is the flow order the optimizer visits them in
//! (reverse postorder from the entry). Loops are natural loops found from back edges
//! to a dominating header. Every loop header gets a dedicated landing pad: a block
//! outside the loop whose only successor is the header, which receives all forward
//! edges into the loop and is the target of hoisted code.

use super::instr::{Instr, InstrId};
use super::sym::{SymId, SymTable};
use crate::error::{Error, Result};
use bitflags::bitflags;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub type BlockId = u32;
pub type LoopId = u32;

bitflags! {
    /// Implicit calls the profile observed inside a loop
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ImplicitCallFlags: u8 {
        const VALUE_OF = 1 << 0;
        const TO_STRING = 1 << 1;
        const ACCESSOR = 1 << 2;
        const EXTERNAL = 1 << 3;
        /// No profile information; anything may happen
        const UNKNOWN = 1 << 4;
    }
}

bitflags! {
    /// Kinds of array invariants an instruction (or a loop) may invalidate
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct JsArrayKills: u8 {
        /// Head segment pointers may be reallocated
        const HEAD_SEGMENTS = 1 << 0;
        const HEAD_SEGMENT_LENGTHS = 1 << 1;
        const LENGTHS = 1 << 2;
        /// Native arrays may be converted to boxed arrays
        const NATIVE_ARRAYS = 1 << 3;
        /// Holes may be created
        const NO_MISSING_VALUES = 1 << 4;
        /// Arrays may become arbitrary objects
        const ALL = 0x1f;
    }
}

/// A basic block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instrs: Vec<Instr>,
    pub preds: Vec<BlockId>,
    /// Successors; for a conditional branch the fallthrough edge comes first
    pub succs: Vec<BlockId>,
    /// Profile facts for a loop headed by this block
    #[serde(default)]
    pub loop_implicit_call_flags: ImplicitCallFlags,
    #[serde(skip)]
    pub loop_id: Option<LoopId>,
    #[serde(skip)]
    pub is_loop_header: bool,
    #[serde(skip)]
    pub is_landing_pad: bool,
    #[serde(skip)]
    pub is_airlock: bool,
    #[serde(skip)]
    pub is_dead: bool,
    /// Syms whose value on entry is read before being redefined (from the backward pass)
    #[serde(skip)]
    pub upward_exposed_uses: HashSet<SymId>,
}

impl BasicBlock {
    /// An empty block with no edges
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn last_instr(&self) -> Option<&Instr> {
        self.instrs.last()
    }

    /// The block's terminating branch, if any
    pub fn branch(&self) -> Option<&Instr> {
        self.instrs.last().filter(|i| i.opcode.is_branch())
    }

    /// Index at which instructions appended to the block's end must be inserted
    pub fn insertion_point(&self) -> usize {
        match self.instrs.last() {
            Some(last) if last.opcode.is_branch() || last.opcode.ends_flow() => {
                self.instrs.len() - 1
            }
            _ => self.instrs.len(),
        }
    }

    /// Append before the block's terminating branch
    pub fn insert_at_end(&mut self, instr: Instr) {
        let at = self.insertion_point();
        self.instrs.insert(at, instr);
    }
}

/// A natural loop
#[derive(Debug, Clone, Default)]
pub struct Loop {
    pub id: LoopId,
    pub parent: Option<LoopId>,
    pub children: Vec<LoopId>,
    pub header: BlockId,
    pub landing_pad: BlockId,
    /// Member blocks in flow order, including blocks of nested loops
    pub blocks: Vec<BlockId>,
    /// Blocks with a back edge to the header
    pub tails: Vec<BlockId>,
    pub depth: u32,
    pub implicit_call_flags: ImplicitCallFlags,

    // Facts from the backward pass
    pub syms_def_in_loop: HashSet<SymId>,
    pub syms_used_before_defined: HashSet<SymId>,
    pub has_call: bool,
    pub has_yield: bool,
    /// Property syms stored to anywhere in the loop
    pub fields_killed: HashSet<SymId>,
    pub kills_all_fields: bool,
    pub array_kills: JsArrayKills,
}

impl Loop {
    /// Whether `block` belongs to this loop or a loop nested in it
    pub fn contains_block(&self, block: BlockId) -> bool {
        self.blocks.binary_search(&block).is_ok() || self.blocks.contains(&block)
    }

    /// Profile data shows no implicit calls, so checks may be hoisted out
    pub fn implicit_calls_allow_opts(&self) -> bool {
        self.implicit_call_flags.is_empty()
    }

    /// Whether any write in the loop may change `prop`
    pub fn is_field_killed(&self, prop: SymId) -> bool {
        self.kills_all_fields || self.fields_killed.contains(&prop)
    }
}

/// A function: symbols, blocks and loop structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Func {
    pub name: String,
    pub syms: SymTable,
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    #[serde(default)]
    pub is_generator: bool,
    #[serde(default)]
    pub has_try: bool,
    #[serde(default)]
    next_instr_id: InstrId,
    #[serde(skip)]
    pub order: Vec<BlockId>,
    #[serde(skip)]
    pub loops: Vec<Loop>,
}

impl Func {
    /// A function with only an empty entry block
    pub fn new(name: impl Into<String>) -> Self {
        let mut func = Func {
            name: name.into(),
            ..Func::default()
        };
        func.entry = func.new_block();
        func
    }

    /// Append an unconnected block
    pub fn new_block(&mut self) -> BlockId {
        let id = self.blocks.len() as BlockId;
        self.blocks.push(BasicBlock::new(id));
        id
    }

    /// A fresh instruction id, unique within the function
    pub fn next_instr_id(&mut self) -> InstrId {
        self.next_instr_id += 1;
        self.next_instr_id
    }

    /// Panics if `id` is out of range. Functions read from JSON are checked by [`Func::validate`].
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id as usize]
    }

    pub fn loop_(&self, id: LoopId) -> &Loop {
        &self.loops[id as usize]
    }

    pub fn loop_mut(&mut self, id: LoopId) -> &mut Loop {
        &mut self.loops[id as usize]
    }

    /// Add an edge to both the successor and predecessor lists
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from as usize].succs.push(to);
        self.blocks[to as usize].preds.push(from);
    }

    /// Remove one edge from both ends. The branch instruction is left alone.
    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) {
        let succs = &mut self.blocks[from as usize].succs;
        if let Some(pos) = succs.iter().position(|&s| s == to) {
            succs.remove(pos);
        }
        let preds = &mut self.blocks[to as usize].preds;
        if let Some(pos) = preds.iter().position(|&p| p == from) {
            preds.remove(pos);
        }
    }

    /// Live blocks in flow order
    pub fn live_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.order
            .iter()
            .copied()
            .filter(move |&b| !self.blocks[b as usize].is_dead)
    }

    /// Innermost loop containing `block`
    pub fn loop_of(&self, block: BlockId) -> Option<LoopId> {
        self.blocks[block as usize].loop_id
    }

    /// Loops containing `block`, innermost first
    pub fn enclosing_loops(&self, block: BlockId) -> Vec<LoopId> {
        let mut loops = Vec::new();
        let mut current = self.loop_of(block);
        while let Some(l) = current {
            loops.push(l);
            current = self.loops[l as usize].parent;
        }
        loops
    }

    /// The header's only successor inside the loop, if it has exactly one
    pub fn loop_countable_block(&self, loop_id: LoopId) -> Option<BlockId> {
        let header = self.loops[loop_id as usize].header;
        let mut inside = self.blocks[header as usize]
            .succs
            .iter()
            .copied()
            .filter(|&s| self.is_block_in_loop(s, loop_id) && s != header);
        let first = inside.next()?;
        if inside.next().is_some() || self.blocks[first as usize].preds.len() != 1 {
            return None;
        }
        Some(first)
    }

    /// Mark blocks no longer reachable from the entry as dead and detach them
    pub fn mark_unreachable_blocks(&mut self) -> Vec<BlockId> {
        let n = self.blocks.len();
        let mut reached = vec![false; n];
        let mut work = vec![self.entry];
        reached[self.entry as usize] = true;
        while let Some(b) = work.pop() {
            for &s in &self.blocks[b as usize].succs {
                if !reached[s as usize] {
                    reached[s as usize] = true;
                    work.push(s);
                }
            }
        }
        let newly_dead: Vec<BlockId> = (0..n as BlockId)
            .filter(|&b| !reached[b as usize] && !self.blocks[b as usize].is_dead)
            .collect();
        for &b in &newly_dead {
            let succs = std::mem::take(&mut self.blocks[b as usize].succs);
            for s in succs {
                let preds = &mut self.blocks[s as usize].preds;
                preds.retain(|&p| p != b);
            }
            self.blocks[b as usize].preds.clear();
            self.blocks[b as usize].is_dead = true;
        }
        for l in self.loops.iter_mut() {
            l.tails.retain(|t| reached[*t as usize]);
        }
        newly_dead
    }

    /// Instructions in reachable blocks
    pub fn instr_count(&self) -> usize {
        self.live_blocks()
            .map(|b| self.block(b).instrs.len())
            .sum()
    }

    /// Whether `inner` is `outer` or nested inside it
    pub fn loop_is_within(&self, inner: LoopId, outer: LoopId) -> bool {
        let mut current = Some(inner);
        while let Some(l) = current {
            if l == outer {
                return true;
            }
            current = self.loops[l as usize].parent;
        }
        false
    }

    /// Whether `block` belongs to `loop_id` (possibly through a nested loop)
    pub fn is_block_in_loop(&self, block: BlockId, loop_id: LoopId) -> bool {
        match self.blocks[block as usize].loop_id {
            Some(l) => self.loop_is_within(l, loop_id),
            None => false,
        }
    }

    /// Whether the edge `pred -> header` is a loop back edge
    pub fn is_back_edge(&self, pred: BlockId, header: BlockId) -> bool {
        let block = &self.blocks[header as usize];
        if !block.is_loop_header {
            return false;
        }
        match block.loop_id {
            Some(l) => self.loops[l as usize].tails.contains(&pred),
            None => false,
        }
    }

    /// Compute flow order, loops and landing pads. Call after the block graph is complete.
    pub fn build_loops(&mut self) -> Result<()> {
        self.compute_order()?;
        let loops = self.find_loops();
        let mut inserted = false;
        for (header, tails) in &loops {
            if self.find_landing_pad(*header, tails).is_none() {
                self.insert_landing_pad(*header, tails);
                inserted = true;
            }
        }
        if inserted {
            self.compute_order()?;
        }
        let loops = self.find_loops();
        self.install_loops(loops)
    }

    fn compute_order(&mut self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(Error::invalid_ir("function has no blocks"));
        }
        let n = self.blocks.len();
        let mut visited = vec![false; n];
        let mut postorder = Vec::with_capacity(n);
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        visited[self.entry as usize] = true;
        while let Some((block, next)) = stack.pop() {
            let succs = &self.blocks[block as usize].succs;
            if next < succs.len() {
                stack.push((block, next + 1));
                // Visit the taken edge first so the fallthrough lands right after the block.
                let succ = succs[succs.len() - 1 - next];
                if !visited[succ as usize] {
                    visited[succ as usize] = true;
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
            }
        }
        postorder.reverse();
        for (id, block) in self.blocks.iter_mut().enumerate() {
            block.is_dead = !visited[id];
            block.loop_id = None;
            block.is_loop_header = false;
        }
        for &b in &postorder {
            for &s in &self.blocks[b as usize].succs.clone() {
                if !visited[s as usize] {
                    return Err(Error::invalid_ir(format!(
                        "block {} has unreachable successor {}",
                        b, s
                    )));
                }
            }
        }
        // Unreachable predecessors never contribute state.
        let dead: HashSet<BlockId> = (0..n as BlockId).filter(|b| !visited[*b as usize]).collect();
        for block in self.blocks.iter_mut() {
            block.preds.retain(|p| !dead.contains(p));
        }
        self.order = postorder;
        Ok(())
    }

    fn dominators(&self) -> HashMap<BlockId, BlockId> {
        let index: HashMap<BlockId, usize> =
            self.order.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        let mut idom: HashMap<BlockId, BlockId> = HashMap::default();
        idom.insert(self.entry, self.entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &b in self.order.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in &self.blocks[b as usize].preds {
                    if !idom.contains_key(&p) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => {
                            let (mut x, mut y) = (p, current);
                            while x != y {
                                while index[&x] > index[&y] {
                                    x = idom[&x];
                                }
                                while index[&y] > index[&x] {
                                    y = idom[&y];
                                }
                            }
                            x
                        }
                    });
                }
                if let Some(d) = new_idom {
                    if idom.get(&b) != Some(&d) {
                        idom.insert(b, d);
                        changed = true;
                    }
                }
            }
        }
        idom
    }

    fn dominates(idom: &HashMap<BlockId, BlockId>, a: BlockId, mut b: BlockId) -> bool {
        loop {
            if a == b {
                return true;
            }
            match idom.get(&b) {
                Some(&d) if d != b => b = d,
                _ => return false,
            }
        }
    }

    /// Loop headers with their back-edge sources, in flow order
    fn find_loops(&self) -> Vec<(BlockId, Vec<BlockId>)> {
        let idom = self.dominators();
        let mut loops: Vec<(BlockId, Vec<BlockId>)> = Vec::new();
        for &b in &self.order {
            let tails: Vec<BlockId> = self.blocks[b as usize]
                .preds
                .iter()
                .copied()
                .filter(|&p| Self::dominates(&idom, b, p))
                .collect();
            if !tails.is_empty() {
                loops.push((b, tails));
            }
        }
        loops
    }

    fn find_landing_pad(&self, header: BlockId, tails: &[BlockId]) -> Option<BlockId> {
        let entries: Vec<BlockId> = self.blocks[header as usize]
            .preds
            .iter()
            .copied()
            .filter(|p| !tails.contains(p))
            .collect();
        match entries.as_slice() {
            [pad] if self.blocks[*pad as usize].is_landing_pad => Some(*pad),
            _ => None,
        }
    }

    fn insert_landing_pad(&mut self, header: BlockId, tails: &[BlockId]) {
        let pad = self.new_block();
        self.blocks[pad as usize].is_landing_pad = true;
        let entries: Vec<BlockId> = self.blocks[header as usize]
            .preds
            .iter()
            .copied()
            .filter(|p| !tails.contains(p))
            .collect();
        for entry in entries {
            self.retarget_edge(entry, header, pad);
        }
        self.blocks[pad as usize].succs.push(header);
        self.blocks[header as usize].preds.insert(0, pad);
    }

    /// Redirect the edge `from -> old` to `from -> new`, leaving `new`'s own edges untouched
    fn retarget_edge(&mut self, from: BlockId, old: BlockId, new: BlockId) {
        let block = &mut self.blocks[from as usize];
        if let Some(s) = block.succs.iter_mut().find(|s| **s == old) {
            *s = new;
        }
        if let Some(last) = block.instrs.last_mut() {
            if last.target == Some(old) {
                last.target = Some(new);
            }
        }
        let preds = &mut self.blocks[old as usize].preds;
        if let Some(pos) = preds.iter().position(|&p| p == from) {
            preds.remove(pos);
        }
        self.blocks[new as usize].preds.push(from);
    }

    fn install_loops(&mut self, found: Vec<(BlockId, Vec<BlockId>)>) -> Result<()> {
        let flags_by_header: HashMap<BlockId, ImplicitCallFlags> = found
            .iter()
            .map(|(h, _)| (*h, self.blocks[*h as usize].loop_implicit_call_flags))
            .collect();
        let index: HashMap<BlockId, usize> =
            self.order.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        let mut loops = Vec::with_capacity(found.len());
        for (id, (header, tails)) in found.into_iter().enumerate() {
            let mut body: HashSet<BlockId> = HashSet::default();
            body.insert(header);
            let mut work: Vec<BlockId> = tails.clone();
            while let Some(b) = work.pop() {
                // Unreachable blocks feeding the loop are not part of it.
                if index.contains_key(&b) && body.insert(b) {
                    work.extend(self.blocks[b as usize].preds.iter().copied());
                }
            }
            let mut blocks: Vec<BlockId> = body.into_iter().collect();
            blocks.sort_by_key(|b| index[b]);
            let landing_pad = self
                .find_landing_pad(header, &tails)
                .ok_or_else(|| Error::invalid_ir(format!("loop at block {} has no landing pad", header)))?;
            loops.push(Loop {
                id: id as LoopId,
                header,
                landing_pad,
                blocks,
                tails,
                implicit_call_flags: flags_by_header.get(&header).copied().unwrap_or_default(),
                ..Loop::default()
            });
        }

        // Parent is the smallest other loop containing the header.
        for i in 0..loops.len() {
            let header = loops[i].header;
            let parent = loops
                .iter()
                .filter(|l| l.id != loops[i].id && l.blocks.contains(&header))
                .min_by_key(|l| l.blocks.len())
                .map(|l| l.id);
            loops[i].parent = parent;
        }
        for i in 0..loops.len() {
            if let Some(p) = loops[i].parent {
                let child = loops[i].id;
                loops[p as usize].children.push(child);
            }
        }
        for i in 0..loops.len() {
            let mut depth = 1;
            let mut current = loops[i].parent;
            while let Some(p) = current {
                depth += 1;
                current = loops[p as usize].parent;
            }
            loops[i].depth = depth;
        }

        // Innermost loop per block.
        let mut by_size: Vec<&Loop> = loops.iter().collect();
        by_size.sort_by_key(|l| std::cmp::Reverse(l.blocks.len()));
        for l in by_size {
            for &b in &l.blocks {
                self.blocks[b as usize].loop_id = Some(l.id);
            }
            self.blocks[l.header as usize].is_loop_header = true;
        }
        self.loops = loops;
        Ok(())
    }

    /// Insert a block on the edge `pred -> succ` and return it
    pub fn split_edge(&mut self, pred: BlockId, succ: BlockId) -> BlockId {
        let back_edge = self.is_back_edge(pred, succ);
        let airlock = self.new_block();
        self.blocks[airlock as usize].is_airlock = true;
        self.retarget_edge(pred, succ, airlock);
        self.blocks[airlock as usize].succs.push(succ);
        if let Some(pos) = self.blocks[succ as usize].preds.iter().position(|&p| p == pred) {
            self.blocks[succ as usize].preds[pos] = airlock;
        } else {
            self.blocks[succ as usize].preds.push(airlock);
        }

        // The airlock lives in the innermost loop containing both ends.
        let mut loop_id = self.blocks[pred as usize].loop_id;
        while let Some(l) = loop_id {
            if self.is_block_in_loop(succ, l) {
                break;
            }
            loop_id = self.loops[l as usize].parent;
        }
        self.blocks[airlock as usize].loop_id = loop_id;
        let mut current = loop_id;
        while let Some(l) = current {
            let lp = &mut self.loops[l as usize];
            lp.blocks.push(airlock);
            if lp.header == succ {
                for t in lp.tails.iter_mut() {
                    if *t == pred {
                        *t = airlock;
                    }
                }
            }
            current = lp.parent;
        }
        // Back-edge airlocks run after the tail; forward ones just before the join.
        let anchor = if back_edge {
            self.order.iter().position(|&b| b == pred).map(|p| p + 1)
        } else {
            self.order.iter().position(|&b| b == succ)
        };
        if let Some(pos) = anchor {
            self.order.insert(pos, airlock);
        } else {
            self.order.push(airlock);
        }
        airlock
    }

    /// Serialize the function, symbol table included
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a function written by [`Func::to_json`], validate it and compute its loops
    pub fn from_json(json: &str) -> Result<Func> {
        let mut func: Func = serde_json::from_str(json)?;
        func.syms.rebuild_indexes();
        let max_id = func
            .blocks
            .iter()
            .flat_map(|b| b.instrs.iter().map(|i| i.id))
            .max()
            .unwrap_or(0);
        func.next_instr_id = func.next_instr_id.max(max_id);
        func.validate()?;
        func.build_loops()?;
        Ok(func)
    }

    /// Check that every block and sym reference in a loaded function resolves and
    /// that edge lists agree in both directions
    pub fn validate(&self) -> Result<()> {
        let n = self.blocks.len();
        if n == 0 {
            return Err(Error::invalid_ir("function has no blocks"));
        }
        if self.entry as usize >= n {
            return Err(Error::invalid_ir(format!("entry block {} does not exist", self.entry)));
        }
        let block_exists = |b: BlockId| (b as usize) < n;
        let sym_count = self.syms.len();
        for (i, block) in self.blocks.iter().enumerate() {
            if block.id as usize != i {
                return Err(Error::invalid_ir(format!(
                    "block at index {} has id {}",
                    i, block.id
                )));
            }
            for &s in &block.succs {
                if !block_exists(s) {
                    return Err(Error::invalid_ir(format!("block {} has unknown successor {}", block.id, s)));
                }
                if !self.blocks[s as usize].preds.contains(&block.id) {
                    return Err(Error::invalid_ir(format!(
                        "edge {} -> {} is missing from the predecessor list",
                        block.id, s
                    )));
                }
            }
            for &p in &block.preds {
                if !block_exists(p) {
                    return Err(Error::invalid_ir(format!("block {} has unknown predecessor {}", block.id, p)));
                }
                if !self.blocks[p as usize].succs.contains(&block.id) {
                    return Err(Error::invalid_ir(format!(
                        "edge {} -> {} is missing from the successor list",
                        p, block.id
                    )));
                }
            }
            // Dead blocks keep their instructions but lose their edges.
            let detached = block.is_dead
                || (block.id != self.entry && block.preds.is_empty() && block.succs.is_empty());
            for instr in &block.instrs {
                if let Some(target) = instr.target {
                    if !block_exists(target) || (!detached && !block.succs.contains(&target)) {
                        return Err(Error::invalid_ir(format!(
                            "instr {} in block {} branches to {}, which is not a successor",
                            instr.id, block.id, target
                        )));
                    }
                }
                let syms = instr
                    .used_syms()
                    .into_iter()
                    .chain(instr.defined_sym())
                    .chain(instr.property_sym());
                for sym in syms {
                    if sym as usize >= sym_count {
                        return Err(Error::invalid_ir(format!(
                            "instr {} in block {} uses unknown sym {}",
                            instr.id, block.id, sym
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Read a function from a JSON file
    pub fn load(path: &Path) -> Result<Func> {
        let text = std::fs::read_to_string(path)?;
        Func::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// entry -> header <-> body, header -> exit
    fn simple_loop() -> Func {
        let mut func = Func::new("loop");
        let header = func.new_block();
        let body = func.new_block();
        let exit = func.new_block();
        func.add_edge(func.entry, header);
        func.add_edge(header, body);
        func.add_edge(header, exit);
        func.add_edge(body, header);
        func
    }

    #[test]
    fn test_build_loops_inserts_landing_pad() {
        let mut func = simple_loop();
        func.build_loops().unwrap();
        assert_eq!(func.loops.len(), 1);
        let lp = &func.loops[0];
        assert_eq!(lp.header, 1);
        assert_eq!(lp.tails, vec![2]);
        let pad = func.block(lp.landing_pad);
        assert!(pad.is_landing_pad);
        assert_eq!(pad.succs, vec![1]);
        assert_eq!(pad.preds, vec![func.entry]);
        assert!(func.block(1).is_loop_header);
        assert_eq!(func.block(2).loop_id, Some(0));
        assert_eq!(func.block(3).loop_id, None);
        assert_eq!(func.block(lp.landing_pad).loop_id, None);
    }

    #[test]
    fn test_flow_order_respects_forward_edges() {
        let mut func = simple_loop();
        func.build_loops().unwrap();
        let pos = |b: BlockId| func.order.iter().position(|&x| x == b).unwrap();
        let pad = func.loops[0].landing_pad;
        assert!(pos(func.entry) < pos(pad));
        assert!(pos(pad) < pos(1));
        assert!(pos(1) < pos(2));
        assert!(pos(1) < pos(3));
    }

    #[test]
    fn test_nested_loops() {
        // entry -> h1 -> h2 <-> b2 ; h2 -> t1 -> h1 ; h1 -> exit
        let mut func = Func::new("nested");
        let h1 = func.new_block();
        let h2 = func.new_block();
        let b2 = func.new_block();
        let t1 = func.new_block();
        let exit = func.new_block();
        func.add_edge(func.entry, h1);
        func.add_edge(h1, h2);
        func.add_edge(h1, exit);
        func.add_edge(h2, b2);
        func.add_edge(h2, t1);
        func.add_edge(b2, h2);
        func.add_edge(t1, h1);
        func.build_loops().unwrap();
        assert_eq!(func.loops.len(), 2);
        let outer = func.loops.iter().find(|l| l.header == h1).unwrap();
        let inner = func.loops.iter().find(|l| l.header == h2).unwrap();
        assert_eq!(inner.parent, Some(outer.id));
        assert_eq!(inner.depth, 2);
        assert!(outer.blocks.contains(&inner.landing_pad));
        assert!(func.is_block_in_loop(b2, outer.id));
        assert_eq!(func.block(b2).loop_id, Some(inner.id));
    }

    #[test]
    fn test_split_edge() {
        let mut func = simple_loop();
        func.build_loops().unwrap();
        let airlock = func.split_edge(2, 1);
        assert!(func.block(airlock).is_airlock);
        assert_eq!(func.block(2).succs, vec![airlock]);
        assert!(func.block(1).preds.contains(&airlock));
        assert!(!func.block(1).preds.contains(&2));
        assert_eq!(func.loops[0].tails, vec![airlock]);
        assert_eq!(func.block(airlock).loop_id, Some(0));
    }

    #[test]
    fn test_json_with_dangling_successor_is_rejected() {
        let mut func = Func::new("dangling");
        func.blocks[0].succs.push(42);
        let json = serde_json::to_string(&func).unwrap();
        assert!(matches!(Func::from_json(&json), Err(Error::InvalidIr(_))));
    }

    #[test]
    fn test_json_with_one_sided_edge_is_rejected() {
        let mut func = Func::new("one-sided");
        let exit = func.new_block();
        func.blocks[0].succs.push(exit);
        let json = serde_json::to_string(&func).unwrap();
        assert!(matches!(Func::from_json(&json), Err(Error::InvalidIr(_))));
    }

    #[test]
    fn test_json_with_bad_entry_is_rejected() {
        let mut func = Func::new("entry");
        func.entry = 7;
        let json = serde_json::to_string(&func).unwrap();
        assert!(matches!(Func::from_json(&json), Err(Error::InvalidIr(_))));
    }

    #[test]
    fn test_json_round_trip_rebuilds_loops() {
        let mut func = simple_loop();
        func.build_loops().unwrap();
        let json = func.to_json().unwrap();
        let restored = Func::from_json(&json).unwrap();
        assert_eq!(restored.loops.len(), 1);
        assert_eq!(restored.blocks.len(), func.blocks.len());
    }
}
