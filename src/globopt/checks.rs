//! Tag, shape and trap checks
//!
//! A property access on a value that might be a tagged int needs a tag check. When the
//! base is likely an object, one `BailOnNotObject` proves it for every later access
//! (hoisted to the outermost landing pad the base is invariant in). Shape checks made
//! by monomorphic inline caches are recorded on the object's type sym so a repeated
//! access with the same expected shape skips its check.

use super::context::OptContext;
use super::instr_opt::SrcValues;
use super::value_info::{JsTypeInfo, Value, ValueInfo};
use crate::ir::{BailOutInfo, BailOutKind, Instr, LoopId, Opcode, Opnd, PropOpnd, SymId};
use tracing::{debug, trace};

impl<'f> OptContext<'f> {
    pub(crate) fn opt_checks(&mut self, instr: &mut Instr, srcs: &SrcValues) {
        match instr.opcode {
            Opcode::TrapIfZero | Opcode::TrapIfMinIntOverNegOne => self.opt_trap(instr, srcs),
            _ => {
                if let Some(prop) = prop_opnd_mut(instr) {
                    let mut p = *prop;
                    self.opt_tag_check(&mut p, srcs, instr.byte_code_offset);
                    self.opt_type_check(&mut p, instr);
                    if let Some(prop) = prop_opnd_mut(instr) {
                        *prop = p;
                    }
                }
            }
        }
    }

    fn opt_tag_check(&mut self, prop: &mut PropOpnd, srcs: &SrcValues, offset: u32) {
        if !prop.needs_tag_check || !self.config.do_tag_checks {
            return;
        }
        let object = match self.func.syms.property(prop.sym) {
            Some(p) => p.object,
            None => return,
        };
        let base = match &srcs.base {
            Some(v) => v.clone(),
            None => return,
        };
        let ty = base.ty();
        if !ty.can_be_tagged_value() {
            prop.needs_tag_check = false;
            if !self.is_prepass() {
                self.stats.tag_checks_removed += 1;
            }
            return;
        }
        if !ty.is_likely_object() {
            return;
        }

        let narrowed = ty.to_definite_object();
        let hoist_to = self.outermost_loop_where(|ctx, l| {
            ctx.is_invariant(object, l) && ctx.func.loop_(l).implicit_calls_allow_opts()
        });
        match hoist_to {
            Some(l) => self.hoist_object_check(l, object, &base),
            None => {
                let check = self.bail_on_not_object(object, offset);
                trace!(object, "BailOnNotObject");
                self.emit(check);
                let mut info = base.info().clone();
                info.set_type(narrowed);
                self.update_value_info(&base, info);
            }
        }
        prop.needs_tag_check = false;
    }

    /// Check in `l`'s landing pad that an invariant base is an object, and narrow its
    /// value from there on
    pub(crate) fn hoist_object_check(&mut self, l: LoopId, object: SymId, base: &Value) {
        let top = self.loop_top_offset(l);
        let check = self.bail_on_not_object(object, top);
        debug!(loop_id = l, object, "hoisted BailOnNotObject");
        self.insert_in_landing_pad(l, check);
        let vn = base.number();
        let narrowed = base.ty().to_definite_object();
        self.propagate_hoisted(l, move |d| {
            if let Some(v) = d.value_of(vn) {
                let mut info = v.info().clone();
                info.set_type(narrowed);
                d.update_value_info(vn, info);
            }
        });
    }

    fn bail_on_not_object(&mut self, object: SymId, offset: u32) -> Instr {
        let mut check = self
            .new_instr(Opcode::BailOnNotObject, offset)
            .with_src1(Opnd::reg(object));
        check.bailout = Some(BailOutInfo::new(BailOutKind::ON_NOT_OBJECT, offset));
        check
    }

    /// Skip the shape check of an access whose object is already known to have the
    /// expected type; otherwise guard it and remember the type afterwards
    fn opt_type_check(&mut self, prop: &mut PropOpnd, instr: &mut Instr) {
        let expected = match prop.expected_type {
            Some(t) if !prop.is_type_checked => t,
            _ => return,
        };
        let object = match self.func.syms.property(prop.sym) {
            Some(p) => p.object,
            None => return,
        };
        let type_sym = self.func.syms.object_type_sym(object);
        let known = self
            .data
            .value(type_sym)
            .and_then(|v| v.info().js_type_info().cloned());
        let matches = known.map_or(false, |t| {
            t.type_id == Some(expected)
                || t.type_set.as_deref().map_or(false, |set| set == [expected])
        });
        if matches {
            trace!(object, expected, "shape already checked");
            prop.is_type_checked = true;
            if !self.is_prepass() {
                self.stats.type_checks_removed += 1;
            }
            return;
        }
        instr.add_bailout_kind(BailOutKind::FAILED_TYPE_CHECK);
        let value = self.new_value(ValueInfo::js_type(JsTypeInfo {
            type_id: Some(expected),
            type_set: None,
            is_shared: false,
        }));
        self.data.set_value(type_sym, &value, true);
    }

    /// A trap that provably never fires becomes a copy of its first source
    fn opt_trap(&mut self, instr: &mut Instr, srcs: &SrcValues) {
        let bounds = |v: &Option<Value>| v.as_ref().and_then(|v| v.info().int_constant_bounds(false));
        let never_fires = match instr.opcode {
            Opcode::TrapIfZero => bounds(&srcs.src1).map_or(false, |b| !b.contains(0)),
            _ => {
                bounds(&srcs.src1).map_or(false, |b| !b.contains(i32::MIN))
                    || bounds(&srcs.src2).map_or(false, |b| !b.contains(-1))
            }
        };
        if !never_fires {
            return;
        }
        trace!(instr = instr.id, opcode = ?instr.opcode, "trap never fires");
        if instr.dst.is_some() {
            instr.opcode = Opcode::Ld;
            instr.src2 = None;
            instr.bailout = None;
        } else {
            instr.make_nop();
        }
        if !self.is_prepass() {
            self.stats.const_folds += 1;
        }
    }
}

fn prop_opnd_mut(instr: &mut Instr) -> Option<&mut PropOpnd> {
    if let Some(Opnd::Prop(p)) = instr.src1.as_mut() {
        return Some(p);
    }
    match instr.dst.as_mut() {
        Some(Opnd::Prop(p)) => Some(p),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::globopt::config::GlobOptConfig;
    use crate::globopt::context::OptContext;
    use crate::globopt::stats::OptStats;
    use crate::ir::{BailOutKind, Func, FuncBuilder, Opcode, Opnd, ValueType};

    fn optimize(func: &mut Func) -> OptStats {
        crate::backward::analyze(func);
        let mut ctx = OptContext::new(func, GlobOptConfig::default());
        ctx.optimize_blocks().unwrap();
        ctx.stats
    }

    fn count(func: &Func, opcode: Opcode) -> usize {
        func.blocks
            .iter()
            .flat_map(|b| b.instrs.iter())
            .filter(|i| i.opcode == opcode)
            .count()
    }

    #[test]
    fn test_one_object_check_covers_later_accesses() {
        let mut b = FuncBuilder::new("tag");
        let o = b.param("o", ValueType::OBJECT);
        let x = b.var("x");
        let y = b.var("y");
        b.ld_fld(x, o, "x");
        b.ld_fld(y, o, "y");
        b.ret(Opnd::reg(y));
        let mut func = b.finish().unwrap();
        let stats = optimize(&mut func);

        assert_eq!(count(&func, Opcode::BailOnNotObject), 1);
        assert_eq!(stats.tag_checks_removed, 1);
        let loads: Vec<_> = func
            .block(func.entry)
            .instrs
            .iter()
            .filter(|i| i.opcode == Opcode::LdFld)
            .collect();
        assert!(loads
            .iter()
            .all(|i| !i.src1.and_then(|s| s.as_prop().copied()).unwrap().needs_tag_check));
    }

    #[test]
    fn test_unknown_base_keeps_tag_check() {
        let mut b = FuncBuilder::new("tag");
        let o = b.param("o", ValueType::UNINITIALIZED);
        let x = b.var("x");
        b.ld_fld(x, o, "x");
        b.ret(Opnd::reg(x));
        let mut func = b.finish().unwrap();
        optimize(&mut func);
        assert_eq!(count(&func, Opcode::BailOnNotObject), 0);
        let load = func
            .block(func.entry)
            .instrs
            .iter()
            .find(|i| i.opcode == Opcode::LdFld)
            .cloned()
            .unwrap();
        assert!(load.src1.unwrap().as_prop().unwrap().needs_tag_check);
    }

    #[test]
    fn test_repeated_shape_check_is_removed() {
        let mut b = FuncBuilder::new("shape");
        let o = b.param("o", ValueType::OBJECT);
        let x = b.var("x");
        let y = b.var("y");
        b.ld_fld_typed(x, o, "x", 7);
        b.ld_fld_typed(y, o, "y", 7);
        b.ret(Opnd::reg(y));
        let mut func = b.finish().unwrap();
        let stats = optimize(&mut func);

        assert_eq!(stats.type_checks_removed, 1);
        let loads: Vec<_> = func
            .block(func.entry)
            .instrs
            .iter()
            .filter(|i| i.opcode == Opcode::LdFld)
            .cloned()
            .collect();
        assert!(loads[0].bailout_kind().contains(BailOutKind::FAILED_TYPE_CHECK));
        assert!(!loads[1].bailout_kind().contains(BailOutKind::FAILED_TYPE_CHECK));
    }

    #[test]
    fn test_trap_on_nonzero_constant_becomes_copy() {
        let mut b = FuncBuilder::new("trap");
        let d = b.var("d");
        let t = b.var("t");
        b.ld_int(d, 4);
        b.unary(Opcode::TrapIfZero, t, Opnd::reg(d));
        b.ret(Opnd::reg(t));
        let mut func = b.finish().unwrap();
        optimize(&mut func);
        assert_eq!(count(&func, Opcode::TrapIfZero), 0);
    }

    #[test]
    fn test_trap_on_zero_is_kept() {
        let mut b = FuncBuilder::new("trap");
        let d = b.var("d");
        let t = b.var("t");
        b.ld_int(d, 0);
        b.unary(Opcode::TrapIfZero, t, Opnd::reg(d));
        b.ret(Opnd::reg(t));
        let mut func = b.finish().unwrap();
        optimize(&mut func);
        assert_eq!(count(&func, Opcode::TrapIfZero), 1);
    }
}
