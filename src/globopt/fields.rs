//! Field copy-prop, field hoisting, field PRE and field kills
//!
//! A property sym has a value only while it is live: from a load or store of the
//! field up to the first instruction that may change it. A store kills every property
//! with the same name on any object, since objects may alias.
//!
//! A field written inside a loop cannot be hoisted, but when its value is held by the
//! same sym on every back edge a load into that sym is placed in the landing pad. The
//! field is then live on all edges into the header and the body's load becomes a copy.

use super::block_data::SymLiveness;
use super::context::OptContext;
use super::instr_opt::SrcValues;
use super::value_info::ValueInfo;
use crate::ir::{
    property_names, Instr, InstrFlags, IrType, LoopId, Opcode, Opnd, SymId, ValueType,
};
use tracing::{debug, trace};

impl<'f> OptContext<'f> {
    /// Replace a load of a live field by a copy of the sym holding its value, or hoist a
    /// loop-invariant field load into the landing pad. Returns true when the
    /// instruction's sources changed.
    pub(crate) fn opt_field_load(&mut self, instr: &mut Instr, srcs: &SrcValues) -> bool {
        if instr.opcode != Opcode::LdFld || instr.flags.contains(InstrFlags::CALLS_ACCESSOR) {
            return false;
        }
        let prop = match instr.src1 {
            Some(Opnd::Prop(p)) => p,
            _ => return false,
        };
        if !matches!(instr.dst, Some(Opnd::Reg(_))) {
            return false;
        }
        if self.is_prepass() {
            self.prepass_field_loads.entry(prop.sym).or_insert_with(|| instr.clone());
        }
        if self.config.do_field_copy_prop {
            if let Some(store) = srcs.src1.as_ref().and_then(|v| self.field_copy_source(v.number())) {
                trace!(prop = prop.sym, store, "field copy prop");
                self.rewrite_as_copy(instr, store, srcs.src1.as_ref().map(|v| v.ty()));
                if !self.is_prepass() {
                    self.stats.field_copy_props += 1;
                }
                return true;
            }
        }
        if self.config.do_field_hoisting {
            return self.hoist_field_load(instr, prop.sym);
        }
        false
    }

    /// A var sym currently holding value `vn`
    fn field_copy_source(&self, vn: u32) -> Option<SymId> {
        let value = self.value_of(vn)?;
        let store = value.info().sym_store()?;
        let syms = &self.func.syms;
        if syms.is_property(store)
            || syms.is_object_type_sym(store)
            || self.data.value_number(store) != Some(vn)
            || !self.data.is_live_as(store, IrType::Var)
        {
            return None;
        }
        Some(store)
    }

    fn rewrite_as_copy(&mut self, instr: &mut Instr, store: SymId, ty: Option<ValueType>) {
        let mut src = Opnd::reg(store);
        if let Some(ty) = ty {
            src.set_value_type(ty);
        }
        instr.opcode = Opcode::Ld;
        instr.src1 = Some(src);
        instr.src2 = None;
        instr.bailout = None;
    }

    /// Whether the object owning `prop` is an object on entry to `l` and the field is
    /// never written inside it
    fn is_field_hoistable(&self, prop: SymId, object: SymId, l: LoopId) -> bool {
        let lp = self.func.loop_(l);
        if !lp.implicit_calls_allow_opts() || lp.is_field_killed(prop) || !self.is_invariant(object, l) {
            return false;
        }
        self.block_data
            .get(&lp.landing_pad)
            .and_then(|d| d.value(object))
            .map_or(false, |v| {
                v.ty().is_object() || (self.config.do_tag_checks && v.ty().is_likely_object())
            })
    }

    fn hoist_field_load(&mut self, instr: &mut Instr, prop: SymId) -> bool {
        let object = match self.func.syms.property(prop) {
            Some(p) => p.object,
            None => return false,
        };
        let l = match self.outermost_loop_where(|ctx, l| ctx.is_field_hoistable(prop, object, l)) {
            Some(l) => l,
            None => return false,
        };

        if let Some(base) = self.data.value(object) {
            if !base.ty().is_object() {
                self.hoist_object_check(l, object, &base);
            }
        }
        let temp = self.func.syms.new_temp(IrType::Var);
        let mut src = match instr.src1 {
            Some(Opnd::Prop(p)) => p,
            _ => return false,
        };
        src.needs_tag_check = false;
        let offset = self.loop_top_offset(l);
        let mut load = self
            .new_instr(Opcode::LdFld, offset)
            .with_dst(Opnd::reg(temp))
            .with_src1(Opnd::Prop(src))
            .with_profiled_type(instr.profiled_type);
        load.bailout = instr.bailout.clone();
        self.insert_in_landing_pad(l, load);

        let ty = if instr.profiled_type.is_uninitialized() {
            ValueType::ANY
        } else {
            instr.profiled_type.to_likely()
        };
        let value = self.new_value(ValueInfo::new(ty).with_sym_store(Some(temp)));
        self.propagate_hoisted(l, |d| {
            d.set_value(temp, &value, true);
            d.set_field_value(prop, &value);
        });
        debug!(loop_id = l, prop, temp, "hoisted field load");
        self.rewrite_as_copy(instr, temp, Some(ty));
        self.stats.fields_hoisted += 1;
        true
    }

    // ========== PRE ==========

    /// Once the prepass of `loop_id` has converged, load every field that is written in
    /// the loop and held by one sym on all back edges into that sym in the landing pad
    pub(crate) fn preload_fields(&mut self, loop_id: LoopId) {
        let loads = std::mem::take(&mut self.prepass_field_loads);
        if !self.config.do_field_pre || !self.config.do_field_copy_prop {
            return;
        }
        let mut props: Vec<SymId> = loads.keys().copied().collect();
        props.sort_unstable();

        let mut candidates: Vec<(SymId, SymId)> = Vec::new();
        for prop in props {
            match self.preload_store(prop, loop_id) {
                Some(store) if !candidates.iter().any(|&(_, s)| s == store) => {
                    candidates.push((prop, store))
                }
                _ => {}
            }
        }

        let l = self.func.loop_(loop_id);
        let (lp, header) = (l.landing_pad, l.header);
        let offset = self.loop_top_offset(loop_id);
        for (prop, store) in candidates {
            let load = match loads.get(&prop) {
                Some(load) => load,
                None => continue,
            };
            let mut src = match load.src1 {
                Some(Opnd::Prop(p)) => p,
                _ => continue,
            };
            src.needs_tag_check = false;
            let mut preload = self
                .new_instr(Opcode::LdFld, offset)
                .with_dst(Opnd::reg(store))
                .with_src1(Opnd::Prop(src))
                .with_profiled_type(load.profiled_type);
            preload.bailout = load.bailout.clone();
            self.insert_in_landing_pad(loop_id, preload);

            let ty = if load.profiled_type.is_uninitialized() {
                ValueType::ANY
            } else {
                load.profiled_type.to_likely()
            };
            let value = self.new_value(ValueInfo::new(ty).with_sym_store(Some(store)));
            if let Some(d) = self.block_data.get_mut(&lp) {
                d.set_value(store, &value, true);
                d.set_liveness(store, SymLiveness::VAR);
                d.set_field_value(prop, &value);
            }
            // The header now reads the store on entry.
            self.func.block_mut(header).upward_exposed_uses.insert(store);
            debug!(loop_id, prop, store, "preloaded field");
            self.stats.fields_preloaded += 1;
        }
    }

    /// The sym that holds `prop` on every back edge of `loop_id`, if loading the field
    /// into it in the landing pad is safe
    fn preload_store(&self, prop: SymId, loop_id: LoopId) -> Option<SymId> {
        let l = self.func.loop_(loop_id);
        if !l.implicit_calls_allow_opts() {
            return None;
        }
        // Fields never written in the loop are hoisted instead.
        if !l.is_field_killed(prop) && self.config.do_field_hoisting {
            return None;
        }
        let syms = &self.func.syms;
        let object = syms.property(prop)?.object;
        if l.syms_def_in_loop.contains(&syms.var_equiv(object)) {
            return None;
        }
        let lp_data = self.block_data.get(&l.landing_pad)?;
        if lp_data.live_fields.contains(&prop) || !lp_data.value(object)?.ty().is_object() {
            return None;
        }

        let back_edges = &self.loop_states[loop_id as usize].back_edge_data;
        let mut store = None;
        for tail in &l.tails {
            let d = back_edges.get(tail)?;
            if !d.live_fields.contains(&prop) {
                return None;
            }
            let vn = d.value_number(prop)?;
            let s = d.value_of(vn)?.info().sym_store()?;
            if d.value_number(s) != Some(vn) || store.map_or(false, |prev| prev != s) {
                return None;
            }
            store = Some(s);
        }
        let store = store?;
        if syms.is_property(store)
            || syms.is_object_type_sym(store)
            || syms.var_equiv(store) != store
            || self.func.block(l.header).upward_exposed_uses.contains(&store)
        {
            return None;
        }
        Some(store)
    }

    // ========== Kills ==========

    /// Kill the fields and object types an instruction may change
    pub(crate) fn process_field_kills(&mut self, instr: &Instr, srcs: &SrcValues) {
        let kills_all = instr.flags.contains(InstrFlags::CALLS_ACCESSOR)
            || instr.opcode.uses_all_fields()
            || instr.helper.map_or(false, |h| h.kills_all_fields());
        if kills_all {
            self.kill_all_fields();
            return;
        }
        match instr.opcode {
            Opcode::StFld | Opcode::DeleteFld => {
                let prop = match instr.property_sym() {
                    Some(p) => p,
                    None => return,
                };
                let (object, property_id) = match self.func.syms.property(prop) {
                    Some(p) => (p.object, p.property_id),
                    None => return,
                };
                let name = self.func.syms.property_name(property_id);
                if name == property_names::VALUE_OF || name == property_names::TO_STRING {
                    self.kill_all_fields();
                    return;
                }
                for p in self.func.syms.property_equiv_set(property_id) {
                    self.data.kill_field(p);
                    self.record_loop_field_kill(Some(p));
                }
                let type_checked = instr.opcode == Opcode::StFld
                    && instr.dst.as_ref().and_then(Opnd::as_prop).map_or(false, |p| p.is_type_checked);
                if !type_checked {
                    if let Some(type_sym) = self.func.syms.find_object_type_sym(object) {
                        self.data.remove_value(type_sym);
                    }
                }
            }
            Opcode::StElemI | Opcode::DeleteElemI => {
                let indir = match instr.dst.as_ref().or(instr.src1.as_ref()).and_then(Opnd::as_indir) {
                    Some(i) => *i,
                    None => return,
                };
                let int_index = match indir.index {
                    None => true,
                    Some(index) => {
                        index.ty == IrType::Int32
                            || srcs.index.as_ref().map_or(false, |v| v.ty().is_int())
                    }
                };
                if int_index {
                    self.kill_length_fields();
                } else {
                    self.kill_all_fields();
                }
            }
            Opcode::InlineArrayPush | Opcode::InlineArrayPop => self.kill_length_fields(),
            Opcode::CallDirect if instr.helper.map_or(false, |h| h.changes_array_length()) => {
                self.kill_length_fields()
            }
            _ => {}
        }
    }

    fn kill_length_fields(&mut self) {
        for p in self.func.syms.property_equiv_set_by_name(property_names::LENGTH) {
            self.data.kill_field(p);
            self.record_loop_field_kill(Some(p));
        }
    }

    pub(crate) fn kill_all_fields(&mut self) {
        let live: Vec<SymId> = self.data.live_fields.iter().copied().collect();
        for p in live {
            self.data.kill_field(p);
        }
        let type_syms: Vec<SymId> = self
            .data
            .sym_to_value
            .keys()
            .copied()
            .filter(|&s| self.func.syms.is_object_type_sym(s))
            .collect();
        for s in type_syms {
            self.data.remove_value(s);
        }
        self.record_loop_field_kill(None);
    }

    /// In the prepass, remember on every enclosing loop that a field (or every field,
    /// for `None`) is written inside it
    fn record_loop_field_kill(&mut self, prop: Option<SymId>) {
        if !self.is_prepass() {
            return;
        }
        for l in self.func.enclosing_loops(self.current_block) {
            let lp = self.func.loop_mut(l);
            match prop {
                Some(p) => {
                    lp.fields_killed.insert(p);
                }
                None => lp.kills_all_fields = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::globopt::config::GlobOptConfig;
    use crate::globopt::context::OptContext;
    use crate::globopt::stats::OptStats;
    use crate::ir::{BlockId, Func, FuncBuilder, Opcode, Opnd, SymId, ValueType};

    fn optimize(func: &mut Func) -> OptStats {
        crate::backward::analyze(func);
        let mut ctx = OptContext::new(func, GlobOptConfig::default());
        ctx.optimize_blocks().unwrap();
        ctx.stats
    }

    fn field_loads(func: &Func) -> usize {
        func.blocks
            .iter()
            .flat_map(|b| b.instrs.iter())
            .filter(|i| i.opcode == Opcode::LdFld)
            .count()
    }

    #[test]
    fn test_second_load_of_live_field_is_copy() {
        let mut b = FuncBuilder::new("k");
        let o = b.param("o", ValueType::OBJECT);
        let x1 = b.var("x1");
        let x2 = b.var("x2");
        let r = b.var("r");
        b.ld_fld(x1, o, "x");
        b.ld_fld(x2, o, "x");
        b.binary(Opcode::Add, r, Opnd::reg(x1), Opnd::reg(x2));
        b.ret(Opnd::reg(r));
        let mut func = b.finish().unwrap();
        let stats = optimize(&mut func);
        assert_eq!(field_loads(&func), 1);
        assert_eq!(stats.field_copy_props, 1);
    }

    #[test]
    fn test_store_to_same_name_kills_field() {
        let mut b = FuncBuilder::new("kill");
        let o = b.param("o", ValueType::OBJECT);
        let p = b.param("p", ValueType::OBJECT);
        let x1 = b.var("x1");
        let x2 = b.var("x2");
        b.ld_fld(x1, o, "x");
        b.st_fld(p, "x", Opnd::IntConst(1));
        b.ld_fld(x2, o, "x");
        b.ret(Opnd::reg(x2));
        let mut func = b.finish().unwrap();
        let stats = optimize(&mut func);
        assert_eq!(field_loads(&func), 2);
        assert_eq!(stats.field_copy_props, 0);
    }

    #[test]
    fn test_call_kills_all_fields() {
        let mut b = FuncBuilder::new("call");
        let o = b.param("o", ValueType::OBJECT);
        let f = b.param("f", ValueType::UNINITIALIZED);
        let x1 = b.var("x1");
        let x2 = b.var("x2");
        b.ld_fld(x1, o, "x");
        b.call(None, f, &[]);
        b.ld_fld(x2, o, "x");
        b.ret(Opnd::reg(x2));
        let mut func = b.finish().unwrap();
        optimize(&mut func);
        assert_eq!(field_loads(&func), 2);
    }

    #[test]
    fn test_invariant_field_load_is_hoisted() {
        let mut b = FuncBuilder::new("hoist");
        let o = b.param("o", ValueType::OBJECT);
        let n = b.param("n", ValueType::LIKELY_INT);
        let i = b.var("i");
        let x = b.var("x");
        b.ld_int(i, 0);
        let header = b.block();
        let body = b.block();
        let exit = b.block();
        b.goto(header);
        b.switch_to(header);
        b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(n)), exit, body);
        b.switch_to(body);
        b.ld_fld(x, o, "x");
        b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::IntConst(1));
        b.br(header);
        b.switch_to(exit);
        b.ret(Opnd::reg(i));
        let mut func = b.finish().unwrap();
        let stats = optimize(&mut func);

        assert_eq!(stats.fields_hoisted, 1);
        let lp = func.loops[0].landing_pad;
        assert!(func.block(lp).instrs.iter().any(|i| i.opcode == Opcode::LdFld));
        assert!(!func.block(body).instrs.iter().any(|i| i.opcode == Opcode::LdFld));
    }

    #[test]
    fn test_field_stored_in_loop_is_not_hoisted() {
        let mut b = FuncBuilder::new("nohoist");
        let o = b.param("o", ValueType::OBJECT);
        let n = b.param("n", ValueType::LIKELY_INT);
        let i = b.var("i");
        let x = b.var("x");
        b.ld_int(i, 0);
        let header = b.block();
        let body = b.block();
        let exit = b.block();
        b.goto(header);
        b.switch_to(header);
        b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(n)), exit, body);
        b.switch_to(body);
        b.ld_fld(x, o, "x");
        b.st_fld(o, "x", Opnd::reg(i));
        b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::IntConst(1));
        b.br(header);
        b.switch_to(exit);
        b.ret(Opnd::reg(i));
        let mut func = b.finish().unwrap();
        let stats = optimize(&mut func);
        assert_eq!(stats.fields_hoisted, 0);
        assert!(func.block(body).instrs.iter().any(|i| i.opcode == Opcode::LdFld));
    }

    /// `while (i < n) { x = o.f; y = x + 1; o.f = y; i++ }`
    fn read_modify_write_loop() -> (Func, SymId, BlockId) {
        let mut b = FuncBuilder::new("pre");
        let o = b.param("o", ValueType::OBJECT);
        let n = b.param("n", ValueType::LIKELY_INT);
        let i = b.var("i");
        let x = b.var("x");
        let y = b.var("y");
        b.ld_int(i, 0);
        let header = b.block();
        let body = b.block();
        let exit = b.block();
        b.goto(header);
        b.switch_to(header);
        b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(n)), exit, body);
        b.switch_to(body);
        b.ld_fld(x, o, "f");
        b.binary(Opcode::Add, y, Opnd::reg(x), Opnd::IntConst(1));
        b.st_fld(o, "f", Opnd::reg(y));
        b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::IntConst(1));
        b.br(header);
        b.switch_to(exit);
        b.ret(Opnd::reg(i));
        (b.finish().unwrap(), y, body)
    }

    #[test]
    fn test_field_live_on_back_edge_is_preloaded() {
        let (mut func, y, body) = read_modify_write_loop();
        let stats = optimize(&mut func);

        assert_eq!(stats.fields_preloaded, 1);
        assert_eq!(stats.fields_hoisted, 0);
        let lp = func.loops[0].landing_pad;
        let preload = func
            .block(lp)
            .instrs
            .iter()
            .find(|i| i.opcode == Opcode::LdFld)
            .cloned()
            .unwrap();
        assert_eq!(preload.dst.as_ref().and_then(Opnd::reg_sym), Some(y));
        let body_instrs = &func.block(body).instrs;
        assert!(!body_instrs.iter().any(|i| i.opcode == Opcode::LdFld));
        assert!(body_instrs.iter().any(|i| i.opcode == Opcode::StFld));
        assert_eq!(field_loads(&func), 1);
    }

    #[test]
    fn test_field_pre_can_be_switched_off() {
        let (mut func, _, body) = read_modify_write_loop();
        crate::backward::analyze(&mut func);
        let config = GlobOptConfig {
            do_field_pre: false,
            ..GlobOptConfig::default()
        };
        let mut ctx = OptContext::new(&mut func, config);
        ctx.optimize_blocks().unwrap();
        assert_eq!(ctx.stats.fields_preloaded, 0);
        assert!(func.block(body).instrs.iter().any(|i| i.opcode == Opcode::LdFld));
    }

    #[test]
    fn test_store_live_into_loop_is_not_clobbered() {
        // `y` is read at the header, so loading the field into it early would change it.
        let mut b = FuncBuilder::new("live");
        let o = b.param("o", ValueType::OBJECT);
        let n = b.param("n", ValueType::LIKELY_INT);
        let y = b.var("y");
        let x = b.var("x");
        b.ld_int(y, 0);
        let header = b.block();
        let body = b.block();
        let exit = b.block();
        b.goto(header);
        b.switch_to(header);
        b.br_cond(Opcode::BrGe, Opnd::reg(y), Some(Opnd::reg(n)), exit, body);
        b.switch_to(body);
        b.ld_fld(x, o, "f");
        b.binary(Opcode::Add, y, Opnd::reg(x), Opnd::IntConst(1));
        b.st_fld(o, "f", Opnd::reg(y));
        b.br(header);
        b.switch_to(exit);
        b.ret(Opnd::reg(y));
        let mut func = b.finish().unwrap();
        let stats = optimize(&mut func);

        assert_eq!(stats.fields_preloaded, 0);
        assert!(func.block(body).instrs.iter().any(|i| i.opcode == Opcode::LdFld));
    }
}
