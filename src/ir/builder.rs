//! Programmatic construction of IR functions
//!
//! Used by tests, benchmarks and the CLI demos. The builder keeps a current block,
//! assigns instruction ids in emission order and records flow edges as branches are
//! emitted. Conditional branches list the fallthrough successor first.

use super::flow_graph::{BlockId, Func, ImplicitCallFlags};
use super::instr::{Instr, InstrFlags, InstrId};
use super::opcode::{HelperMethod, Opcode};
use super::opnd::{IndirOpnd, Opnd, PropOpnd, RegOpnd};
use super::sym::{property_names, SymId};
use super::value_type::ValueType;
use crate::error::Result;

/// Builds a [`Func`] block by block
#[derive(Debug)]
pub struct FuncBuilder {
    func: Func,
    current: BlockId,
    param_count: usize,
}

impl FuncBuilder {
    /// Start a function; instructions go to the entry block until [`FuncBuilder::switch_to`]
    pub fn new(name: impl Into<String>) -> Self {
        let func = Func::new(name);
        let current = func.entry;
        Self {
            func,
            current,
            param_count: 0,
        }
    }

    /// Declare a parameter. Its `ArgIn` goes to the top of the entry block with the
    /// profiled type attached.
    pub fn param(&mut self, name: &str, profiled: ValueType) -> SymId {
        let sym = self.func.syms.new_var(name, true);
        let id = self.func.next_instr_id();
        let instr = Instr::new(id, Opcode::ArgIn)
            .with_dst(Opnd::reg(sym))
            .with_src1(Opnd::IntConst(self.param_count as i32))
            .with_profiled_type(profiled);
        let entry = self.func.entry;
        self.func
            .block_mut(entry)
            .instrs
            .insert(self.param_count, instr);
        self.param_count += 1;
        sym
    }

    /// A bytecode-visible local
    pub fn var(&mut self, name: &str) -> SymId {
        self.func.syms.new_var(name, true)
    }

    /// A compiler temporary holding a var value
    pub fn temp(&mut self) -> SymId {
        let id = self.func.syms.len();
        self.func.syms.new_var(format!("t{}", id), false)
    }

    /// The function's entry block
    pub fn entry(&self) -> BlockId {
        self.func.entry
    }

    /// A new block. Edges come from the branches emitted into it.
    pub fn block(&mut self) -> BlockId {
        self.func.new_block()
    }

    /// Emit into `block` from now on
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// The block being emitted into
    pub fn current(&self) -> BlockId {
        self.current
    }

    pub fn func(&self) -> &Func {
        &self.func
    }

    pub fn func_mut(&mut self) -> &mut Func {
        &mut self.func
    }

    /// A fresh instruction with the next id
    pub fn instr(&mut self, opcode: Opcode) -> Instr {
        let id = self.func.next_instr_id();
        Instr::new(id, opcode)
    }

    /// Append an instruction to the current block
    pub fn emit(&mut self, instr: Instr) -> InstrId {
        let id = instr.id;
        let current = self.current;
        self.func.block_mut(current).instrs.push(instr);
        id
    }

    /// The last instruction of the current block
    pub fn last_instr_mut(&mut self) -> Option<&mut Instr> {
        let current = self.current;
        self.func.block_mut(current).instrs.last_mut()
    }

    /// `dst = src`
    pub fn ld(&mut self, dst: SymId, src: SymId) -> InstrId {
        let instr = self
            .instr(Opcode::Ld)
            .with_dst(Opnd::reg(dst))
            .with_src1(Opnd::reg(src));
        self.emit(instr)
    }

    /// `dst = value`
    pub fn ld_int(&mut self, dst: SymId, value: i32) -> InstrId {
        let instr = self
            .instr(Opcode::Ld)
            .with_dst(Opnd::reg(dst))
            .with_src1(Opnd::IntConst(value));
        self.emit(instr)
    }

    /// `dst = value`
    pub fn ld_float(&mut self, dst: SymId, value: f64) -> InstrId {
        let instr = self
            .instr(Opcode::Ld)
            .with_dst(Opnd::reg(dst))
            .with_src1(Opnd::FloatConst(value));
        self.emit(instr)
    }

    /// `dst = src1 <opcode> src2`
    pub fn binary(&mut self, opcode: Opcode, dst: SymId, src1: Opnd, src2: Opnd) -> InstrId {
        let instr = self
            .instr(opcode)
            .with_dst(Opnd::reg(dst))
            .with_src1(src1)
            .with_src2(src2);
        self.emit(instr)
    }

    /// `dst = <opcode> src`
    pub fn unary(&mut self, opcode: Opcode, dst: SymId, src: Opnd) -> InstrId {
        let instr = self
            .instr(opcode)
            .with_dst(Opnd::reg(dst))
            .with_src1(src);
        self.emit(instr)
    }

    fn prop(&mut self, object: SymId, name: &str) -> PropOpnd {
        let sym = self.func.syms.property_sym(object, name);
        let mut prop = PropOpnd::new(sym);
        prop.needs_tag_check = true;
        prop
    }

    /// `dst = object.name`, interning the property
    pub fn ld_fld(&mut self, dst: SymId, object: SymId, name: &str) -> InstrId {
        let prop = self.prop(object, name);
        let instr = self
            .instr(Opcode::LdFld)
            .with_dst(Opnd::reg(dst))
            .with_src1(Opnd::Prop(prop));
        self.emit(instr)
    }

    /// `LdFld` with a monomorphic inline cache expecting `type_id`
    pub fn ld_fld_typed(&mut self, dst: SymId, object: SymId, name: &str, type_id: u32) -> InstrId {
        let mut prop = self.prop(object, name);
        prop.expected_type = Some(type_id);
        let instr = self
            .instr(Opcode::LdFld)
            .with_dst(Opnd::reg(dst))
            .with_src1(Opnd::Prop(prop));
        self.emit(instr)
    }

    /// `object.name = src`
    pub fn st_fld(&mut self, object: SymId, name: &str, src: Opnd) -> InstrId {
        let prop = self.prop(object, name);
        let instr = self
            .instr(Opcode::StFld)
            .with_dst(Opnd::Prop(prop))
            .with_src1(src);
        self.emit(instr)
    }

    /// `dst = array.length`
    pub fn ld_len(&mut self, dst: SymId, array: SymId) -> InstrId {
        let instr = self
            .instr(Opcode::LdLen)
            .with_dst(Opnd::reg(dst))
            .with_src1(Opnd::reg(array));
        self.emit(instr)
    }

    fn element(array: SymId, index: SymId) -> Opnd {
        Opnd::Indir(IndirOpnd {
            base: RegOpnd::var(array),
            index: Some(RegOpnd::var(index)),
            offset: 0,
            array: None,
        })
    }

    /// `dst = array[index]`
    pub fn ld_elem(&mut self, dst: SymId, array: SymId, index: SymId) -> InstrId {
        let instr = self
            .instr(Opcode::LdElemI)
            .with_dst(Opnd::reg(dst))
            .with_src1(Self::element(array, index));
        self.emit(instr)
    }

    /// `array[index] = src`
    pub fn st_elem(&mut self, array: SymId, index: SymId, src: Opnd) -> InstrId {
        let instr = self
            .instr(Opcode::StElemI)
            .with_dst(Self::element(array, index))
            .with_src1(src);
        self.emit(instr)
    }

    /// `StartCall`, one `ArgOut` per argument, then `CallI`
    pub fn call(&mut self, dst: Option<SymId>, callee: SymId, args: &[SymId]) -> InstrId {
        let start = self
            .instr(Opcode::StartCall)
            .with_src1(Opnd::IntConst(args.len() as i32));
        self.emit(start);
        for &arg in args {
            let out = self.instr(Opcode::ArgOut).with_src1(Opnd::reg(arg));
            self.emit(out);
        }
        let mut call = self
            .instr(Opcode::CallI)
            .with_src1(Opnd::reg(callee))
            .with_src2(Opnd::IntConst(args.len() as i32));
        if let Some(dst) = dst {
            call = call.with_dst(Opnd::reg(dst));
        }
        self.emit(call)
    }

    /// Direct call of a runtime helper on `args[0]`
    pub fn call_helper(&mut self, dst: Option<SymId>, helper: HelperMethod, args: &[SymId]) -> InstrId {
        let mut call = self.instr(Opcode::CallDirect);
        call.helper = Some(helper);
        if let Some(&first) = args.first() {
            call = call.with_src1(Opnd::reg(first));
        }
        if let Some(&second) = args.get(1) {
            call = call.with_src2(Opnd::reg(second));
        }
        if let Some(dst) = dst {
            call = call.with_dst(Opnd::reg(dst));
        }
        self.emit(call)
    }

    /// Unconditional branch to `target`
    pub fn br(&mut self, target: BlockId) -> InstrId {
        let instr = self.instr(Opcode::Br).with_target(target);
        let id = self.emit(instr);
        let current = self.current;
        self.func.add_edge(current, target);
        id
    }

    /// Conditional branch: jumps to `taken` when the condition holds, else falls through
    pub fn br_cond(
        &mut self,
        opcode: Opcode,
        src1: Opnd,
        src2: Option<Opnd>,
        taken: BlockId,
        fallthrough: BlockId,
    ) -> InstrId {
        let mut instr = self.instr(opcode).with_src1(src1).with_target(taken);
        if let Some(src2) = src2 {
            instr = instr.with_src2(src2);
        }
        let id = self.emit(instr);
        let current = self.current;
        self.func.add_edge(current, fallthrough);
        if taken != fallthrough {
            self.func.add_edge(current, taken);
        }
        id
    }

    /// Fall through into `next` without a branch instruction
    pub fn goto(&mut self, next: BlockId) {
        let current = self.current;
        self.func.add_edge(current, next);
    }

    /// Return `src` from the function
    pub fn ret(&mut self, src: Opnd) -> InstrId {
        let instr = self.instr(Opcode::Ret).with_src1(src);
        self.emit(instr)
    }

    /// Add flags to the most recently emitted instruction
    pub fn flag_last(&mut self, flags: InstrFlags) {
        if let Some(instr) = self.last_instr_mut() {
            instr.flags |= flags;
        }
    }

    /// Set the profiled result type of the most recently emitted instruction
    pub fn profile_last(&mut self, value_type: ValueType) {
        if let Some(instr) = self.last_instr_mut() {
            instr.profiled_type = value_type;
        }
    }

    /// Record the implicit calls profiling saw in the loop headed by `header`
    pub fn set_loop_implicit_calls(&mut self, header: BlockId, flags: ImplicitCallFlags) {
        self.func.block_mut(header).loop_implicit_call_flags = flags;
    }

    /// Intern `length` so property syms for it exist before optimization
    pub fn length_sym(&mut self, object: SymId) -> SymId {
        self.func.syms.property_sym(object, property_names::LENGTH)
    }

    /// Finish the function and compute its loop structure
    pub fn finish(mut self) -> Result<Func> {
        self.func.build_loops()?;
        Ok(self.func)
    }
}
