//! End-to-end tests of the optimizer on the built-in scenarios

mod common;
use common::{count, count_in, optimized, optimized_with};
use globopt::ir::{BailOutKind, BlockId, FuncBuilder, InstrFlags, Opcode, Opnd, ValueType};
use globopt::GlobOptConfig;

mod loops {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sum_hoists_array_check_and_segment() {
        let (func, stats) = optimized("sum");
        let lp = func.loops[0].landing_pad;
        let body = func.loops[0].blocks.clone();

        assert_eq!(stats.array_checks_hoisted, 1);
        assert_eq!(count_in(&func, &[lp], Opcode::BailOnNotArray), 1);
        assert_eq!(count_in(&func, &body, Opcode::BailOnNotArray), 0);
        assert_eq!(count_in(&func, &[lp], Opcode::LdArrHeadSegment), 1);
        assert_eq!(count_in(&func, &body, Opcode::LdArrHeadSegment), 0);
        assert_eq!(count_in(&func, &body, Opcode::LdLen), 0);
    }

    #[test]
    fn test_sum_hoists_loop_count_based_upper_check() {
        let (func, _) = optimized("sum");
        let lp = func.loops[0].landing_pad;
        let body = func.loops[0].blocks.clone();

        let hoisted = func.block(lp).instrs.iter().any(|i| {
            i.opcode == Opcode::BoundCheck
                && i
                    .bailout_kind()
                    .contains(BailOutKind::ON_FAILED_HOISTED_LOOP_COUNT_BASED_BOUND_CHECK)
        });
        assert!(hoisted);
        assert_eq!(count_in(&func, &body, Opcode::BoundCheck), 0);
    }

    #[test]
    fn test_sum_specializes_loop_arithmetic() {
        let (func, stats) = optimized("sum");
        let body = func.loops[0].blocks.clone();
        assert!(stats.int_specialized >= 2);
        assert!(count_in(&func, &body, Opcode::AddI4) >= 1);
    }

    #[test]
    fn test_fill_becomes_memset() {
        let (func, stats) = optimized("fill");
        let lp = func.loops[0].landing_pad;
        assert_eq!(stats.memops, 1);
        assert_eq!(count(&func, Opcode::StElemI), 0);
        assert_eq!(count_in(&func, &[lp], Opcode::Memset), 1);
    }

    #[test]
    fn test_fill_without_memop_keeps_store() {
        let config = GlobOptConfig {
            do_memop: false,
            ..GlobOptConfig::default()
        };
        let (func, stats) = optimized_with("fill", &config);
        assert_eq!(stats.memops, 0);
        assert_eq!(count(&func, Opcode::StElemI), 1);
    }

    #[test]
    fn test_field_counter_preloads_field_into_landing_pad() {
        let (func, stats) = optimized("field-counter");
        let lp = func.loops[0].landing_pad;
        let body = func.loops[0].blocks.clone();
        assert_eq!(stats.fields_preloaded, 1);
        assert_eq!(count_in(&func, &[lp], Opcode::LdFld), 1);
        assert_eq!(count_in(&func, &body, Opcode::LdFld), 0);
        assert_eq!(count_in(&func, &body, Opcode::StFld), 1);
    }

    #[test]
    fn test_call_in_loop_keeps_array_check_in_body() {
        let (func, stats) = optimized("call-in-loop");
        let lp = func.loops[0].landing_pad;
        let body = func.loops[0].blocks.clone();
        assert_eq!(stats.array_checks_hoisted, 0);
        assert_eq!(count_in(&func, &[lp], Opcode::BailOnNotArray), 0);
        assert_eq!(count_in(&func, &body, Opcode::BailOnNotArray), 1);
    }
}

mod straight_line {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_sub_specialized() {
        let (func, stats) = optimized("add-sub");
        assert!(stats.int_specialized >= 2);
        assert_eq!(count(&func, Opcode::Add), 0);
        assert_eq!(count(&func, Opcode::Sub), 0);
    }

    #[test]
    fn test_sub_back_needs_no_overflow_guard() {
        let (func, _) = optimized("add-sub");
        let sub = func
            .live_blocks()
            .flat_map(|b| func.block(b).instrs.iter())
            .find(|i| i.opcode == Opcode::SubI4)
            .unwrap();
        assert!(!sub.has_bailout());

        let add = func
            .live_blocks()
            .flat_map(|b| func.block(b).instrs.iter())
            .find(|i| i.opcode == Opcode::AddI4)
            .unwrap();
        assert!(add.bailout_kind().contains(BailOutKind::ON_OVERFLOW));
    }

    #[test]
    fn test_second_field_load_is_copy() {
        let (func, stats) = optimized("field-twice");
        assert_eq!(count(&func, Opcode::LdFld), 1);
        assert_eq!(stats.field_copy_props, 1);
    }

    #[test]
    fn test_disabled_config_leaves_types_alone() {
        let (func, stats) = optimized_with("add-sub", &GlobOptConfig::disabled());
        assert_eq!(stats.int_specialized, 0);
        assert_eq!(count(&func, Opcode::AddI4), 0);
    }
}

mod merges {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_segment_syms_agree_after_merge() {
        let (func, stats) = optimized("segment-merge");
        let merge: BlockId = func
            .live_blocks()
            .find(|&b| func.block(b).last_instr().map(|i| i.opcode) == Some(Opcode::Ret))
            .unwrap();

        assert!(stats.compensations >= 1);
        assert_eq!(count_in(&func, &[merge], Opcode::LdArrHeadSegment), 0);
        assert_eq!(count(&func, Opcode::LdArrHeadSegment), 2);
    }
}

mod negative_zero {
    use super::*;
    use pretty_assertions::assert_eq;

    /// `x <op> -2` on a likely-int `x`, with `flags` on the arithmetic
    fn guard_kinds(op: Opcode, flags: InstrFlags) -> (Opcode, BailOutKind) {
        let mut b = FuncBuilder::new("neg");
        let x = b.param("x", ValueType::LIKELY_INT);
        let y = b.var("y");
        b.binary(op, y, Opnd::reg(x), Opnd::IntConst(-2));
        b.flag_last(flags);
        b.ret(Opnd::reg(y));
        let mut func = b.finish().unwrap();
        globopt::optimize(&mut func, &GlobOptConfig::default()).unwrap();

        let instr = func
            .block(func.entry)
            .instrs
            .iter()
            .find(|i| i.opcode.to_var_opcode() == op)
            .unwrap();
        (instr.opcode, instr.bailout_kind())
    }

    #[test]
    fn test_mul_by_negative_guards_negative_zero() {
        let (opcode, kinds) = guard_kinds(Opcode::Mul, InstrFlags::empty());
        assert_eq!(opcode, Opcode::MulI4);
        assert!(kinds.contains(BailOutKind::ON_NEGATIVE_ZERO));
    }

    #[test]
    fn test_div_by_negative_guards_negative_zero() {
        let (opcode, kinds) = guard_kinds(Opcode::Div, InstrFlags::DIV_LIKELY_INT);
        assert_eq!(opcode, Opcode::DivI4);
        assert!(kinds.contains(BailOutKind::ON_NEGATIVE_ZERO));
        assert!(kinds.contains(BailOutKind::ON_DIV_RESULT_NOT_INT));
    }
}
