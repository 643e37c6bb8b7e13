//! Human-readable IR listings

use super::flow_graph::Func;
use super::instr::Instr;
use super::opnd::{IndirOpnd, Opnd};
use super::sym::SymTable;
use std::fmt;

/// An instruction printed with sym names resolved
pub struct InstrDisplay<'a> {
    pub instr: &'a Instr,
    pub syms: &'a SymTable,
}

impl<'a> InstrDisplay<'a> {
    /// Pair an instruction with the table naming its syms
    pub fn new(instr: &'a Instr, syms: &'a SymTable) -> Self {
        Self { instr, syms }
    }

    fn opnd(&self, f: &mut fmt::Formatter<'_>, opnd: &Opnd) -> fmt::Result {
        match opnd {
            Opnd::Reg(r) => write!(f, "{}", self.syms.name(r.sym)),
            Opnd::IntConst(v) => write!(f, "{}", v),
            Opnd::FloatConst(v) => write!(f, "{:?}f", v),
            Opnd::Addr { addr, is_function } => {
                write!(f, "#{:#x}{}", addr, if *is_function { "fn" } else { "" })
            }
            Opnd::Prop(p) => write!(f, "{}", self.syms.name(p.sym)),
            Opnd::Indir(i) => self.indir(f, i),
        }
    }

    fn indir(&self, f: &mut fmt::Formatter<'_>, indir: &IndirOpnd) -> fmt::Result {
        write!(f, "[{}", self.syms.name(indir.base.sym))?;
        if let Some(index) = indir.index {
            write!(f, " + {}", self.syms.name(index.sym))?;
        }
        if indir.offset != 0 {
            write!(f, " + {}", indir.offset)?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for InstrDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let instr = self.instr;
        write!(f, "{:>4}: ", instr.id)?;
        if let Some(dst) = &instr.dst {
            self.opnd(f, dst)?;
            write!(f, " = ")?;
        }
        write!(f, "{}", instr.opcode)?;
        if let Some(helper) = instr.helper {
            write!(f, "<{:?}>", helper)?;
        }
        let srcs: Vec<&Opnd> = [&instr.src1, &instr.src2].into_iter().flatten().collect();
        for (i, src) in srcs.iter().enumerate() {
            write!(f, "{}", if i == 0 { " " } else { ", " })?;
            self.opnd(f, src)?;
        }
        if instr.bound_offset != 0 {
            write!(f, " {:+}", instr.bound_offset)?;
        }
        if !instr.uses.is_empty() {
            let names: Vec<String> = instr.uses.iter().map(|&s| self.syms.name(s)).collect();
            write!(f, " ({})", names.join(", "))?;
        }
        if let Some(target) = instr.target {
            write!(f, " => B{}", target)?;
        }
        if let Some(bailout) = &instr.bailout {
            write!(f, "  [bailout {}", bailout.kind)?;
            if bailout.is_shared {
                write!(f, " shared")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {}", self.name)?;
        for block_id in self.live_blocks() {
            let block = self.block(block_id);
            write!(f, "B{}", block_id)?;
            let preds: Vec<String> = block.preds.iter().map(|p| format!("B{}", p)).collect();
            let succs: Vec<String> = block.succs.iter().map(|s| format!("B{}", s)).collect();
            write!(f, " preds [{}] succs [{}]", preds.join(", "), succs.join(", "))?;
            if block.is_loop_header {
                write!(f, " loop header")?;
            }
            if block.is_landing_pad {
                write!(f, " landing pad")?;
            }
            if block.is_airlock {
                write!(f, " airlock")?;
            }
            writeln!(f)?;
            for instr in &block.instrs {
                writeln!(f, "{}", InstrDisplay::new(instr, &self.syms))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncBuilder, Opcode, ValueType};

    #[test]
    fn test_listing() {
        let mut b = FuncBuilder::new("add");
        let x = b.param("x", ValueType::LIKELY_INT);
        let y = b.var("y");
        b.binary(Opcode::Add, y, Opnd::reg(x), Opnd::IntConst(1));
        b.ret(Opnd::reg(y));
        let func = b.finish().unwrap();
        let text = func.to_string();
        assert!(text.starts_with("function add\nB0"));
        assert!(text.contains("y = Add x, 1"));
        assert!(text.contains("Ret y"));
    }
}
