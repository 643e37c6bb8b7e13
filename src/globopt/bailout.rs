//! Bailout state capture
//!
//! Every bailout records where each interpreter-visible sym's value lives at the
//! bailout point, so the runtime can rebuild the interpreter frame. Constants are
//! captured by value; other syms by the representation they are currently live in.

use super::block_data::BlockData;
use super::value_info::ValueInfoKind;
use crate::ir::{BailOutInfo, CapturedConstant, CapturedSym, IrType, Sym, SymTable};

/// Snapshot `data` into `info`
pub(crate) fn capture_state(syms: &SymTable, data: &BlockData, info: &mut BailOutInfo) {
    info.captured_syms.clear();
    info.captured_constants.clear();

    let mut bytecode: Vec<_> = syms
        .iter()
        .filter_map(|s| match s {
            Sym::Stack(s) if s.ty == IrType::Var && s.is_bytecode => Some(s.id),
            _ => None,
        })
        .filter(|&s| !syms.is_object_type_sym(s))
        .collect();
    bytecode.sort_unstable();

    for sym in bytecode {
        let value = match data.value(sym) {
            Some(v) => v,
            None => continue,
        };
        let constant = match value.info().kind() {
            ValueInfoKind::IntConstant(c) => Some(CapturedConstant::Int(*c)),
            ValueInfoKind::FloatConstant(f) => Some(CapturedConstant::Float(*f)),
            ValueInfoKind::VarConstant { addr, .. } => Some(CapturedConstant::Var(*addr)),
            _ => None,
        };
        if let Some(constant) = constant {
            info.captured_constants.push((sym, constant));
            continue;
        }

        let liveness = data.liveness(sym);
        let live_repr = [IrType::Var, IrType::Int32, IrType::Float64, IrType::Simd128F4, IrType::Simd128I4]
            .into_iter()
            .find(|&ty| liveness.is_live_as(ty));
        if let Some(repr) = live_repr {
            let source = syms.find_typed_equiv(sym, repr).unwrap_or(sym);
            info.captured_syms.push(CapturedSym { sym, source, repr });
            continue;
        }

        // Dead in every representation here: restore from a copy holding the same value.
        if let Some(store) = value.info().sym_store() {
            if store != sym && data.is_live_as(store, IrType::Var) {
                info.captured_syms.push(CapturedSym {
                    sym,
                    source: store,
                    repr: IrType::Var,
                });
            }
        }
    }

    info.start_call_count = data.start_call_count;
    info.arg_out_syms = data.arg_out_syms.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globopt::block_data::SymLiveness;
    use crate::globopt::value_info::{Value, ValueInfo};
    use crate::ir::{BailOutKind, ValueType};

    #[test]
    fn test_capture_prefers_constants_then_live_repr() {
        let mut syms = SymTable::new();
        let a = syms.new_var("a", true);
        let b = syms.new_var("b", true);
        let t = syms.new_var("t", false);
        let b_i32 = syms.typed_equiv(b, IrType::Int32);

        let mut data = BlockData::new();
        data.set_value(a, &Value::new(5, ValueInfo::int_constant(3)), false);
        data.set_value(b, &Value::new(6, ValueInfo::new(ValueType::INT)), false);
        data.set_liveness(b, SymLiveness::only(IrType::Int32));
        data.set_value(t, &Value::new(7, ValueInfo::new(ValueType::ANY)), false);
        data.start_call_count = 1;

        let mut info = BailOutInfo::new(BailOutKind::INT_ONLY, 4);
        capture_state(&syms, &data, &mut info);
        assert_eq!(info.captured_constants, vec![(a, CapturedConstant::Int(3))]);
        assert_eq!(
            info.captured_syms,
            vec![CapturedSym {
                sym: b,
                source: b_i32,
                repr: IrType::Int32
            }]
        );
        assert_eq!(info.start_call_count, 1);
        assert!(!info.captures(t));
    }

    #[test]
    fn test_dead_sym_restored_from_copy() {
        let mut syms = SymTable::new();
        let x = syms.new_var("x", true);
        let y = syms.new_var("y", true);
        let mut data = BlockData::new();
        let v = Value::new(9, ValueInfo::new(ValueType::ANY));
        data.set_value(y, &v, false);
        data.set_value(x, &data.value(y).unwrap(), false);
        data.set_liveness(x, SymLiveness::NONE);

        let mut info = BailOutInfo::new(BailOutKind::ON_OVERFLOW, 0);
        capture_state(&syms, &data, &mut info);
        assert!(info.captured_syms.contains(&CapturedSym {
            sym: x,
            source: y,
            repr: IrType::Var
        }));
    }
}
