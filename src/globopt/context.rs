//! Optimizer state shared by the forward pass phases
//!
//! [`OptContext`] is threaded through every phase of the forward walk. It owns the
//! dataflow state of the block being optimized (`data`), the instructions already
//! produced for it (`out`), the end-of-block states of visited blocks, and the
//! canonical values of constants.

use super::block_data::{BlockData, SymLiveness};
use super::config::GlobOptConfig;
use super::loops::LoopState;
use super::stats::OptStats;
use super::value_info::{Value, ValueInfo, ValueNumber, FIRST_NEW_VALUE_NUMBER, ZERO_VALUE_NUMBER};
use crate::ir::{
    is_int32_value, BlockId, Func, Instr, InstrFlags, LoopId, Opcode, Opnd, SymId,
    ValueType,
};
use rustc_hash::FxHashMap as HashMap;

/// Which walk of the flow graph is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassMode {
    Real,
    /// Loop prepass rooted at `root`; values are computed but the IR is left alone
    Prepass { root: LoopId },
}

pub(crate) struct OptContext<'f> {
    pub func: &'f mut Func,
    pub config: GlobOptConfig,
    pub stats: OptStats,
    pub mode: PassMode,
    pub current_block: BlockId,
    /// State at the current point of the current block
    pub data: BlockData,
    /// Instructions produced so far for the current block (real pass only)
    pub out: Vec<Instr>,
    /// End-of-block states of visited blocks
    pub block_data: HashMap<BlockId, BlockData>,
    /// Forward successors that have yet to merge each stored end state
    pub data_use_count: HashMap<BlockId, usize>,
    /// States narrowed along one edge by a conditional branch
    pub edge_data: HashMap<(BlockId, BlockId), BlockData>,
    pub loop_states: Vec<LoopState>,
    /// Tail states of the previous prepass iteration
    pub prepass_tails: HashMap<BlockId, BlockData>,
    /// First load of each field seen by the running loop prepass
    pub prepass_field_loads: HashMap<SymId, Instr>,
    /// Syms that existed before optimization started
    pub original_sym_count: usize,
    /// A `BailOut` ended the current block; the rest of it is unreachable
    pub block_bailed_out: bool,
    next_value_number: ValueNumber,
    int_constants: HashMap<i32, ValueNumber>,
    float_constants: HashMap<u64, ValueNumber>,
    addr_constants: HashMap<u64, ValueNumber>,
    constant_values: HashMap<ValueNumber, Value>,
}

impl<'f> OptContext<'f> {
    /// Fresh optimizer state for `func`
    pub fn new(func: &'f mut Func, config: GlobOptConfig) -> Self {
        let loop_states = (0..func.loops.len()).map(|_| LoopState::default()).collect();
        let original_sym_count = func.syms.len();
        let entry = func.entry;
        Self {
            func,
            config,
            stats: OptStats::default(),
            mode: PassMode::Real,
            current_block: entry,
            data: BlockData::new(),
            out: Vec::new(),
            block_data: HashMap::default(),
            data_use_count: HashMap::default(),
            edge_data: HashMap::default(),
            loop_states,
            prepass_tails: HashMap::default(),
            prepass_field_loads: HashMap::default(),
            original_sym_count,
            block_bailed_out: false,
            next_value_number: FIRST_NEW_VALUE_NUMBER,
            int_constants: HashMap::default(),
            float_constants: HashMap::default(),
            addr_constants: HashMap::default(),
            constant_values: HashMap::default(),
        }
    }

    /// Whether a loop prepass is running; the IR is not modified in a prepass
    pub fn is_prepass(&self) -> bool {
        matches!(self.mode, PassMode::Prepass { .. })
    }

    /// Loop whose prepass is running
    pub fn prepass_root(&self) -> Option<LoopId> {
        match self.mode {
            PassMode::Prepass { root } => Some(root),
            PassMode::Real => None,
        }
    }

    /// Innermost loop of the current block
    pub fn current_loop(&self) -> Option<LoopId> {
        self.func.loop_of(self.current_block)
    }

    // ========== Values ==========

    /// A value number never handed out before
    pub fn new_value_number(&mut self) -> ValueNumber {
        let vn = self.next_value_number;
        self.next_value_number += 1;
        vn
    }

    /// A value with a fresh number
    pub fn new_value(&mut self, info: ValueInfo) -> Value {
        let vn = self.new_value_number();
        Value::new(vn, info)
    }

    /// The canonical value of an int constant
    pub fn int_constant_value(&mut self, c: i32) -> Value {
        if let Some(vn) = self.int_constants.get(&c) {
            return self.constant_values[vn].clone();
        }
        let vn = if c == 0 {
            ZERO_VALUE_NUMBER
        } else {
            self.new_value_number()
        };
        let value = Value::new(vn, ValueInfo::int_constant(c));
        self.int_constants.insert(c, vn);
        self.constant_values.insert(vn, value.clone());
        value
    }

    /// The canonical value of a float constant; int-valued floats share the int's value
    pub fn float_constant_value(&mut self, f: f64) -> Value {
        if is_int32_value(f) {
            return self.int_constant_value(f as i32);
        }
        let bits = f.to_bits();
        if let Some(vn) = self.float_constants.get(&bits) {
            return self.constant_values[vn].clone();
        }
        let value = self.new_value(ValueInfo::float_constant(f));
        self.float_constants.insert(bits, value.number());
        self.constant_values.insert(value.number(), value.clone());
        value
    }

    /// The canonical value of a runtime constant address
    pub fn var_constant_value(&mut self, addr: u64, is_function: bool) -> Value {
        if let Some(vn) = self.addr_constants.get(&addr) {
            return self.constant_values[vn].clone();
        }
        let ty = Opnd::Addr { addr, is_function }.value_type();
        let ty = if ty.is_uninitialized() { ValueType::ANY } else { ty };
        let value = self.new_value(ValueInfo::var_constant(addr, is_function, ty));
        self.addr_constants.insert(addr, value.number());
        self.constant_values.insert(value.number(), value.clone());
        value
    }

    /// A value by number, whether bound to a sym or a constant
    pub fn value_of(&self, vn: ValueNumber) -> Option<Value> {
        self.data
            .value_of(vn)
            .or_else(|| self.constant_values.get(&vn).cloned())
    }

    /// Value held by a (possibly typed) stack sym
    pub fn sym_value(&self, sym: SymId) -> Option<Value> {
        self.data.value(self.func.syms.var_equiv(sym))
    }

    /// Value of a sym, created as a fresh generic value if the sym has none yet
    pub fn ensure_sym_value(&mut self, sym: SymId, hint: ValueType) -> Value {
        let var = self.func.syms.var_equiv(sym);
        if let Some(v) = self.data.value(var) {
            return v;
        }
        let ty = if hint.is_uninitialized() {
            ValueType::ANY
        } else {
            hint.to_likely()
        };
        let value = self.new_value(ValueInfo::new(ty));
        self.data.set_value(var, &value, false);
        self.data.value(var).unwrap_or(value)
    }

    /// Value of a source operand. Field operands only have a value while the field is live.
    pub fn opnd_value(&mut self, opnd: &Opnd) -> Option<Value> {
        match opnd {
            Opnd::IntConst(c) => Some(self.int_constant_value(*c)),
            Opnd::FloatConst(f) => Some(self.float_constant_value(*f)),
            Opnd::Addr { addr, is_function } => Some(self.var_constant_value(*addr, *is_function)),
            Opnd::Reg(r) => Some(self.ensure_sym_value(r.sym, r.value_type)),
            Opnd::Prop(p) => {
                if self.data.live_fields.contains(&p.sym) {
                    self.data.value(p.sym)
                } else {
                    None
                }
            }
            Opnd::Indir(_) => None,
        }
    }

    /// Bind the destination sym of a definition. Bytecode syms take over the sym store
    /// from compiler temporaries.
    pub fn set_sym_value(&mut self, sym: SymId, value: &Value) {
        let var = self.func.syms.var_equiv(sym);
        let store_is_bytecode = value
            .info()
            .sym_store()
            .map_or(false, |s| s != var && self.func.syms.is_bytecode(s));
        let prefer = self.func.syms.is_bytecode(var) && !store_is_bytecode;
        self.data.set_value(var, value, prefer);
    }

    /// Replace the info of a value everywhere in the current state
    pub fn update_value_info(&mut self, value: &Value, info: ValueInfo) -> Value {
        let info = info.with_sym_store(value.info().sym_store());
        self.data.update_value_info(value.number(), info.clone());
        value.with_info(info)
    }

    // ========== Liveness ==========

    /// Liveness of `sym`'s var equivalent in the current state
    pub fn liveness(&self, sym: SymId) -> SymLiveness {
        self.data.liveness(self.func.syms.var_equiv(sym))
    }

    // ========== Instructions ==========

    /// A new optimizer-created instruction resuming at `byte_code_offset` on bailout
    pub fn new_instr(&mut self, opcode: Opcode, byte_code_offset: u32) -> Instr {
        let id = self.func.next_instr_id();
        Instr::new(id, opcode)
            .with_byte_code_offset(byte_code_offset)
            .with_flags(InstrFlags::IS_JIT_OPTIMIZED)
    }

    /// Append an instruction to the current block's output, snapshotting the current
    /// state into its bailout. Dropped in the prepass.
    pub fn emit(&mut self, mut instr: Instr) {
        if self.is_prepass() {
            return;
        }
        self.fill_bailout(&mut instr);
        self.out.push(instr);
    }

    /// Snapshot the current state into an instruction's bailout, if it has one
    pub fn fill_bailout(&mut self, instr: &mut Instr) {
        if self.is_prepass() {
            return;
        }
        if let Some(bailout) = instr.bailout.as_mut() {
            super::bailout::capture_state(&self.func.syms, &self.data, bailout);
            self.stats.bailouts_added += 1;
        }
    }

    /// Append an instruction whose bailout, if any, is already captured
    pub fn push_instr(&mut self, instr: Instr) {
        if !self.is_prepass() {
            self.out.push(instr);
        }
    }

    /// Find an already-emitted instruction by id, in the current output or in a
    /// finished block
    pub fn find_instr_mut(&mut self, block: BlockId, id: u32) -> Option<&mut Instr> {
        if block == self.current_block {
            if let Some(instr) = self.out.iter_mut().find(|i| i.id == id) {
                return Some(instr);
            }
        }
        self.func
            .block_mut(block)
            .instrs
            .iter_mut()
            .find(|i| i.id == id)
    }

    // ========== Loops ==========

    /// Whether `sym` holds the same value here as on entry to `loop_id`
    pub fn is_invariant(&self, sym: SymId, loop_id: LoopId) -> bool {
        let var = self.func.syms.var_equiv(sym);
        let l = self.func.loop_(loop_id);
        if l.syms_def_in_loop.contains(&var) {
            return false;
        }
        let here = match self.data.value_number(var) {
            Some(vn) => vn,
            None => return false,
        };
        self.block_data
            .get(&l.landing_pad)
            .and_then(|d| d.value_number(var))
            == Some(here)
    }

    /// Whether an operand is a constant or a sym invariant in `loop_id`
    pub fn is_opnd_invariant(&self, opnd: &Opnd, loop_id: LoopId) -> bool {
        match opnd {
            Opnd::IntConst(_) | Opnd::FloatConst(_) | Opnd::Addr { .. } => true,
            Opnd::Reg(r) => self.is_invariant(r.sym, loop_id),
            _ => false,
        }
    }

    /// The outermost loop around the current block, walking outward from the
    /// innermost, for which `ok` holds on every loop passed. None in the prepass.
    pub fn outermost_loop_where(&self, ok: impl Fn(&Self, LoopId) -> bool) -> Option<LoopId> {
        if self.is_prepass() {
            return None;
        }
        let mut found = None;
        for l in self.func.enclosing_loops(self.current_block) {
            if !ok(self, l) {
                break;
            }
            found = Some(l);
        }
        found
    }

    /// A sym holding value `vn` on entry to `loop_id` that the loop never redefines
    pub fn invariant_sym_for_value(&self, vn: ValueNumber, loop_id: LoopId) -> Option<SymId> {
        let l = self.func.loop_(loop_id);
        let lp_data = self.block_data.get(&l.landing_pad)?;
        lp_data
            .syms_with_value(vn)
            .into_iter()
            .filter(|s| !self.func.syms.is_property(*s))
            .find(|s| !l.syms_def_in_loop.contains(s) && self.data.value_number(*s) == Some(vn))
    }

    /// Byte code offset a landing pad bails out to: the top of the loop
    pub fn loop_top_offset(&self, loop_id: LoopId) -> u32 {
        let header = self.func.loop_(loop_id).header;
        self.func
            .block(header)
            .instrs
            .first()
            .map(|i| i.byte_code_offset)
            .unwrap_or(0)
    }

    /// Insert an instruction at the end of a loop's landing pad, snapshotting the
    /// landing pad's state into its bailout
    pub fn insert_in_landing_pad(&mut self, loop_id: LoopId, mut instr: Instr) {
        let lp = self.func.loop_(loop_id).landing_pad;
        if let Some(bailout) = instr.bailout.as_mut() {
            if let Some(data) = self.block_data.get(&lp) {
                super::bailout::capture_state(&self.func.syms, data, bailout);
            }
            self.stats.bailouts_added += 1;
        }
        self.func.block_mut(lp).insert_at_end(instr);
    }

    /// Apply a change made by code hoisted into `loop_id`'s landing pad to every state
    /// between the landing pad and the current point
    pub fn propagate_hoisted(&mut self, loop_id: LoopId, change: impl Fn(&mut BlockData)) {
        let l = self.func.loop_(loop_id);
        let lp = l.landing_pad;
        let blocks = l.blocks.clone();
        if let Some(d) = self.block_data.get_mut(&lp) {
            change(d);
        }
        for &b in &blocks {
            if b == self.current_block {
                continue;
            }
            if let Some(d) = self.block_data.get_mut(&b) {
                change(d);
            }
        }
        for ((from, _), d) in self.edge_data.iter_mut() {
            if blocks.contains(from) {
                change(d);
            }
        }
        change(&mut self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FuncBuilder;

    fn func() -> Func {
        let mut b = FuncBuilder::new("ctx");
        let x = b.param("x", ValueType::LIKELY_INT);
        b.ret(Opnd::reg(x));
        b.finish().unwrap()
    }

    #[test]
    fn test_constants_are_canonical() {
        let mut f = func();
        let mut ctx = OptContext::new(&mut f, GlobOptConfig::default());
        let zero = ctx.int_constant_value(0);
        assert_eq!(zero.number(), ZERO_VALUE_NUMBER);
        let a = ctx.int_constant_value(7);
        let b = ctx.float_constant_value(7.0);
        assert_eq!(a.number(), b.number());
        let h = ctx.float_constant_value(0.5);
        assert_eq!(ctx.float_constant_value(0.5).number(), h.number());
        assert_eq!(ctx.value_of(h.number()).unwrap().info().float_constant_value(), Some(0.5));
    }

    #[test]
    fn test_ensure_sym_value_is_likely() {
        let mut f = func();
        let mut ctx = OptContext::new(&mut f, GlobOptConfig::default());
        let v = ctx.ensure_sym_value(0, ValueType::INT);
        assert_eq!(v.ty(), ValueType::LIKELY_INT);
        assert_eq!(ctx.ensure_sym_value(0, ValueType::ANY).number(), v.number());
        assert_eq!(v.info().sym_store(), Some(0));
        assert_eq!(ctx.sym_value(0).unwrap().info().sym_store(), Some(0));
    }

    #[test]
    fn test_prepass_emits_nothing() {
        let mut f = func();
        let mut ctx = OptContext::new(&mut f, GlobOptConfig::default());
        ctx.mode = PassMode::Prepass { root: 0 };
        let instr = ctx.new_instr(Opcode::Nop, 0);
        ctx.emit(instr);
        assert!(ctx.out.is_empty());
        ctx.mode = PassMode::Real;
        let instr = ctx.new_instr(Opcode::Nop, 0);
        ctx.emit(instr);
        assert_eq!(ctx.out.len(), 1);
        assert!(ctx.out[0].flags.contains(InstrFlags::IS_JIT_OPTIMIZED));
    }
}
