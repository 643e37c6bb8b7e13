//! IR instructions

use super::bailout::{BailOutInfo, BailOutKind};
use super::flow_graph::{BlockId, JsArrayKills};
use super::opcode::{HelperMethod, Opcode};
use super::opnd::Opnd;
use super::sym::{property_names, SymId, SymTable};
use super::value_type::ValueType;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Instruction id, unique within a function
pub type InstrId = u32;

bitflags! {
    /// Per-instruction facts supplied by the builder, the profile, or the backward pass
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct InstrFlags: u16 {
        /// Int32 overflow of the result is not observable (fixed-width region, or result truncated)
        const IGNORE_INT_OVERFLOW = 1 << 0;
        /// A consumer of the result distinguishes -0 from +0
        const SHOULD_CHECK_NEGATIVE_ZERO = 1 << 1;
        /// The result is only ever consumed as an int32
        const DST_ALWAYS_CONVERTED_TO_INT32 = 1 << 2;
        /// The result is only ever consumed as a number
        const DST_ALWAYS_CONVERTED_TO_NUMBER = 1 << 3;
        /// A property access that runs a getter or setter
        const CALLS_ACCESSOR = 1 << 4;
        /// The destination is a compiler temporary with a single use
        const DST_IS_TEMP = 1 << 5;
        /// Created by the optimizer
        const IS_JIT_OPTIMIZED = 1 << 6;
        /// A float conversion that must bail out when the source is not a number
        const REQUIRES_BAIL_ON_NOT_NUMBER = 1 << 7;
        /// Profile data shows this division produced int results
        const DIV_LIKELY_INT = 1 << 8;
        /// Profile data recorded no implicit calls at this site
        const NO_IMPLICIT_CALLS = 1 << 9;
        /// Profile data shows this element store wrote past the head segment
        const STORES_OUTSIDE_HEAD_SEGMENT = 1 << 10;
        /// Profile data shows this element store grew the array
        const STORES_OUTSIDE_ARRAY_BOUNDS = 1 << 11;
    }
}

/// An IR instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub id: InstrId,
    pub opcode: Opcode,
    #[serde(default)]
    pub dst: Option<Opnd>,
    #[serde(default)]
    pub src1: Option<Opnd>,
    #[serde(default)]
    pub src2: Option<Opnd>,
    /// Taken target of a branch
    #[serde(default)]
    pub target: Option<BlockId>,
    #[serde(default)]
    pub helper: Option<HelperMethod>,
    #[serde(default)]
    pub bailout: Option<BailOutInfo>,
    #[serde(default)]
    pub flags: InstrFlags,
    /// Profile-derived type of the destination
    #[serde(default)]
    pub profiled_type: ValueType,
    #[serde(default)]
    pub byte_code_offset: u32,
    /// Constant offset of a `BoundCheck` (`src1 <= src2 + offset`)
    #[serde(default)]
    pub bound_offset: i32,
    /// Syms kept alive by `ByteCodeUses` / `NoImplicitCallUses`
    #[serde(default)]
    pub uses: Vec<SymId>,
}

impl Instr {
    /// A bare instruction. Arithmetic is assumed to care about -0 until the front end says otherwise.
    pub fn new(id: InstrId, opcode: Opcode) -> Self {
        Self {
            id,
            opcode,
            dst: None,
            src1: None,
            src2: None,
            target: None,
            helper: None,
            bailout: None,
            flags: InstrFlags::SHOULD_CHECK_NEGATIVE_ZERO,
            profiled_type: ValueType::UNINITIALIZED,
            byte_code_offset: id,
            bound_offset: 0,
            uses: Vec::new(),
        }
    }

    pub fn with_dst(mut self, dst: Opnd) -> Self {
        self.dst = Some(dst);
        self
    }

    pub fn with_src1(mut self, src: Opnd) -> Self {
        self.src1 = Some(src);
        self
    }

    pub fn with_src2(mut self, src: Opnd) -> Self {
        self.src2 = Some(src);
        self
    }

    pub fn with_target(mut self, target: BlockId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_flags(mut self, flags: InstrFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_profiled_type(mut self, value_type: ValueType) -> Self {
        self.profiled_type = value_type;
        self
    }

    pub fn with_byte_code_offset(mut self, offset: u32) -> Self {
        self.byte_code_offset = offset;
        self
    }

    /// Whether the instruction carries bailout info
    pub fn has_bailout(&self) -> bool {
        self.bailout.is_some()
    }

    /// Conditions under which the instruction bails out; empty without bailout info
    pub fn bailout_kind(&self) -> BailOutKind {
        self.bailout
            .as_ref()
            .map(|b| b.kind)
            .unwrap_or(BailOutKind::empty())
    }

    /// Attach or extend a bailout; the state snapshot is filled in later
    pub fn add_bailout_kind(&mut self, kind: BailOutKind) {
        match &mut self.bailout {
            Some(info) => {
                info.kind |= kind;
                info.is_post_op = BailOutKind::POST_OP.contains(info.kind);
            }
            None => self.bailout = Some(BailOutInfo::new(kind, self.byte_code_offset)),
        }
    }

    /// The result must distinguish -0 from 0
    pub fn should_check_for_negative_zero(&self) -> bool {
        self.flags.contains(InstrFlags::SHOULD_CHECK_NEGATIVE_ZERO)
    }

    /// The front end knows the result is truncated to int32, so overflow does not matter
    pub fn ignore_int_overflow(&self) -> bool {
        self.flags.contains(InstrFlags::IGNORE_INT_OVERFLOW)
    }

    /// Stack syms the instruction reads, including syms addressing its destination
    pub fn used_syms(&self) -> Vec<SymId> {
        let mut syms = Vec::new();
        if let Some(src) = &self.src1 {
            syms.extend(src.used_syms());
        }
        if let Some(src) = &self.src2 {
            syms.extend(src.used_syms());
        }
        if let Some(dst @ Opnd::Indir(_)) = &self.dst {
            syms.extend(dst.used_syms());
        }
        syms.extend(self.uses.iter().copied());
        if let Some(bailout) = &self.bailout {
            syms.extend(bailout.captured_syms.iter().map(|c| c.source));
            syms.extend(bailout.arg_out_syms.iter().copied());
        }
        syms
    }

    /// Stack sym the instruction defines
    pub fn defined_sym(&self) -> Option<SymId> {
        match &self.dst {
            Some(Opnd::Reg(r)) => Some(r.sym),
            _ => None,
        }
    }

    /// Property sym the instruction reads or writes
    pub fn property_sym(&self) -> Option<SymId> {
        [&self.dst, &self.src1]
            .into_iter()
            .flatten()
            .find_map(|o| o.as_prop().map(|p| p.sym))
    }

    /// Array invariants this instruction may invalidate, judged from the instruction
    /// alone
    pub fn js_array_kills(&self, syms: &SymTable) -> JsArrayKills {
        const RESIZE: JsArrayKills = JsArrayKills::HEAD_SEGMENTS
            .union(JsArrayKills::HEAD_SEGMENT_LENGTHS)
            .union(JsArrayKills::LENGTHS);
        match self.opcode {
            Opcode::StElemI => {
                let outside = InstrFlags::STORES_OUTSIDE_HEAD_SEGMENT
                    | InstrFlags::STORES_OUTSIDE_ARRAY_BOUNDS;
                if self.flags.intersects(outside) {
                    RESIZE | JsArrayKills::NO_MISSING_VALUES
                } else {
                    JsArrayKills::empty()
                }
            }
            Opcode::DeleteElemI => {
                JsArrayKills::HEAD_SEGMENT_LENGTHS | JsArrayKills::NO_MISSING_VALUES
            }
            Opcode::InlineArrayPush => RESIZE,
            Opcode::InlineArrayPop => {
                JsArrayKills::HEAD_SEGMENT_LENGTHS | JsArrayKills::LENGTHS
            }
            Opcode::StFld | Opcode::DeleteFld => {
                let is_length = self
                    .property_sym()
                    .and_then(|p| syms.property(p))
                    .map_or(false, |p| syms.property_name(p.property_id) == property_names::LENGTH);
                if is_length {
                    JsArrayKills::HEAD_SEGMENT_LENGTHS | JsArrayKills::LENGTHS
                } else {
                    JsArrayKills::empty()
                }
            }
            Opcode::CallDirect => match self.helper {
                Some(h) if h.mutates_array() => RESIZE | JsArrayKills::NO_MISSING_VALUES,
                _ => JsArrayKills::empty(),
            },
            op if op.is_call() || op.uses_all_fields() => JsArrayKills::ALL,
            _ if self.flags.contains(InstrFlags::CALLS_ACCESSOR) => JsArrayKills::ALL,
            _ => JsArrayKills::empty(),
        }
    }

    /// Number of source operands
    pub fn src_count(&self) -> usize {
        self.src1.is_some() as usize + self.src2.is_some() as usize
    }

    /// Turn the instruction into a `Nop`, keeping its id
    pub fn make_nop(&mut self) {
        self.opcode = Opcode::Nop;
        self.dst = None;
        self.src1 = None;
        self.src2 = None;
        self.target = None;
        self.bailout = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opnd::{IndirOpnd, RegOpnd};

    #[test]
    fn test_used_syms_includes_store_address() {
        let instr = Instr::new(1, Opcode::StElemI)
            .with_dst(Opnd::Indir(IndirOpnd {
                base: RegOpnd::var(3),
                index: Some(RegOpnd::var(4)),
                offset: 0,
                array: None,
            }))
            .with_src1(Opnd::reg(5));
        assert_eq!(instr.used_syms(), vec![5, 3, 4]);
        assert_eq!(instr.defined_sym(), None);
    }

    #[test]
    fn test_add_bailout_kind_merges() {
        let mut instr = Instr::new(7, Opcode::AddI4);
        instr.add_bailout_kind(BailOutKind::ON_OVERFLOW);
        assert!(instr.bailout.as_ref().unwrap().is_post_op);
        instr.add_bailout_kind(BailOutKind::INT_ONLY);
        assert_eq!(
            instr.bailout_kind(),
            BailOutKind::ON_OVERFLOW | BailOutKind::INT_ONLY
        );
        assert!(!instr.bailout.as_ref().unwrap().is_post_op);
        assert_eq!(instr.bailout.as_ref().unwrap().byte_code_offset, 7);
    }

    #[test]
    fn test_array_kills() {
        let syms = SymTable::new();
        let push = Instr::new(1, Opcode::InlineArrayPush).with_src1(Opnd::reg(1));
        assert!(push.js_array_kills(&syms).contains(JsArrayKills::HEAD_SEGMENTS));
        let store = Instr::new(2, Opcode::StElemI).with_dst(Opnd::Indir(IndirOpnd {
            base: RegOpnd::var(1),
            index: Some(RegOpnd::var(2)),
            offset: 0,
            array: None,
        }));
        assert!(store.js_array_kills(&syms).is_empty());
        let grow = store.with_flags(InstrFlags::STORES_OUTSIDE_ARRAY_BOUNDS);
        assert!(grow.js_array_kills(&syms).contains(JsArrayKills::LENGTHS));
        let call = Instr::new(3, Opcode::CallI);
        assert_eq!(call.js_array_kills(&syms), JsArrayKills::ALL);
    }

    #[test]
    fn test_make_nop() {
        let mut instr = Instr::new(2, Opcode::Add)
            .with_dst(Opnd::reg(1))
            .with_src1(Opnd::reg(2));
        instr.make_nop();
        assert_eq!(instr.opcode, Opcode::Nop);
        assert!(instr.dst.is_none());
    }
}
