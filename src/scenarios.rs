//! Canned functions for the `demo` command, the integration tests and the benches
//!
//! Each scenario builds the IR a front end would produce for a small JavaScript
//! function, with profile data already attached to its parameters.

use crate::error::Result;
use crate::ir::{Func, FuncBuilder, ImplicitCallFlags, ObjectType, Opcode, Opnd, ValueType};

/// A named IR function
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    /// The JavaScript the IR was written after
    pub source: &'static str,
    build: fn() -> Result<Func>,
}

impl Scenario {
    /// Build a fresh copy of the scenario's IR
    pub fn build(&self) -> Result<Func> {
        (self.build)()
    }
}

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "sum",
        source: "function f(a,b){ var s=0; for(var i=0;i<a.length;i++){ s += a[i]*b; } return s; }",
        build: sum_scaled,
    },
    Scenario {
        name: "add-sub",
        source: "function g(n){ var x = n + 1; var y = x - 1; return y; }",
        build: add_sub,
    },
    Scenario {
        name: "fill",
        source: "function h(a){ for(var i=0, n=a.length;i<n;i++){ a[i]=0; } }",
        build: fill,
    },
    Scenario {
        name: "field-twice",
        source: "function k(o){ return o.x + o.x; }",
        build: field_twice,
    },
    Scenario {
        name: "field-counter",
        source: "function p(o,n){ for(var i=0;i<n;i++){ o.count = o.count + 1; } return i; }",
        build: field_counter,
    },
    Scenario {
        name: "call-in-loop",
        source: "function c(a,n,f){ var x; for(var i=0;i<n;i++){ x = a[i]; f(); } return x; }",
        build: call_in_loop,
    },
    Scenario {
        name: "segment-merge",
        source: "function m(a,c,k){ var x; if(c){ x = a[k]; } else { x = a[k]; } return x + a[k]; }",
        build: segment_merge,
    },
];

/// Look a scenario up by name
pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

fn packed_ints() -> ValueType {
    ValueType::likely_array(ObjectType::NativeIntArray, true)
}

fn sum_scaled() -> Result<Func> {
    let mut b = FuncBuilder::new("f");
    let a = b.param("a", packed_ints());
    let scale = b.param("b", ValueType::LIKELY_INT);
    let s = b.var("s");
    let i = b.var("i");
    let len = b.temp();
    let e = b.temp();
    let m = b.temp();
    b.ld_int(s, 0);
    b.ld_int(i, 0);
    let header = b.block();
    let body = b.block();
    let exit = b.block();
    b.goto(header);

    b.switch_to(header);
    b.ld_len(len, a);
    b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(len)), exit, body);

    b.switch_to(body);
    b.ld_elem(e, a, i);
    b.binary(Opcode::Mul, m, Opnd::reg(e), Opnd::reg(scale));
    b.binary(Opcode::Add, s, Opnd::reg(s), Opnd::reg(m));
    b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::IntConst(1));
    b.br(header);

    b.switch_to(exit);
    b.ret(Opnd::reg(s));
    b.finish()
}

fn add_sub() -> Result<Func> {
    let mut b = FuncBuilder::new("g");
    let n = b.param("n", ValueType::LIKELY_INT);
    let x = b.var("x");
    let y = b.var("y");
    b.binary(Opcode::Add, x, Opnd::reg(n), Opnd::IntConst(1));
    b.binary(Opcode::Sub, y, Opnd::reg(x), Opnd::IntConst(1));
    b.ret(Opnd::reg(y));
    b.finish()
}

fn fill() -> Result<Func> {
    let mut b = FuncBuilder::new("h");
    let a = b.param("a", packed_ints());
    let i = b.var("i");
    let n = b.var("n");
    b.ld_int(i, 0);
    b.ld_len(n, a);
    let header = b.block();
    let body = b.block();
    let exit = b.block();
    b.goto(header);

    b.switch_to(header);
    b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(n)), exit, body);

    b.switch_to(body);
    b.st_elem(a, i, Opnd::IntConst(0));
    b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::IntConst(1));
    b.br(header);

    b.switch_to(exit);
    b.ret(Opnd::reg(i));
    b.finish()
}

fn field_twice() -> Result<Func> {
    let mut b = FuncBuilder::new("k");
    let o = b.param("o", ValueType::OBJECT);
    let x1 = b.temp();
    let x2 = b.temp();
    let r = b.temp();
    b.ld_fld(x1, o, "x");
    b.ld_fld(x2, o, "x");
    b.binary(Opcode::Add, r, Opnd::reg(x1), Opnd::reg(x2));
    b.ret(Opnd::reg(r));
    b.finish()
}

fn field_counter() -> Result<Func> {
    let mut b = FuncBuilder::new("p");
    let o = b.param("o", ValueType::OBJECT);
    let n = b.param("n", ValueType::LIKELY_INT);
    let i = b.var("i");
    let c = b.temp();
    let c1 = b.temp();
    b.ld_int(i, 0);
    let header = b.block();
    let body = b.block();
    let exit = b.block();
    b.goto(header);

    b.switch_to(header);
    b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(n)), exit, body);

    b.switch_to(body);
    b.ld_fld(c, o, "count");
    b.binary(Opcode::Add, c1, Opnd::reg(c), Opnd::IntConst(1));
    b.st_fld(o, "count", Opnd::reg(c1));
    b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::IntConst(1));
    b.br(header);

    b.switch_to(exit);
    b.ret(Opnd::reg(i));
    b.finish()
}

fn call_in_loop() -> Result<Func> {
    let mut b = FuncBuilder::new("c");
    let a = b.param("a", packed_ints());
    let n = b.param("n", ValueType::LIKELY_INT);
    let f = b.param("f", ValueType::UNINITIALIZED);
    let i = b.var("i");
    let x = b.var("x");
    b.ld_int(x, 0);
    b.ld_int(i, 0);
    let header = b.block();
    let body = b.block();
    let exit = b.block();
    b.goto(header);

    b.switch_to(header);
    b.br_cond(Opcode::BrGe, Opnd::reg(i), Some(Opnd::reg(n)), exit, body);
    b.set_loop_implicit_calls(header, ImplicitCallFlags::UNKNOWN);

    b.switch_to(body);
    b.ld_elem(x, a, i);
    b.call(None, f, &[]);
    b.binary(Opcode::Add, i, Opnd::reg(i), Opnd::IntConst(1));
    b.br(header);

    b.switch_to(exit);
    b.ret(Opnd::reg(x));
    b.finish()
}

fn segment_merge() -> Result<Func> {
    let mut b = FuncBuilder::new("m");
    let a = b.param("a", packed_ints());
    let c = b.param("c", ValueType::BOOLEAN);
    let k = b.param("k", ValueType::LIKELY_INT);
    let x = b.var("x");
    let y = b.temp();
    let r = b.temp();
    let then = b.block();
    let els = b.block();
    let merge = b.block();
    b.br_cond(Opcode::BrTrue, Opnd::reg(c), None, then, els);

    b.switch_to(then);
    b.ld_elem(x, a, k);
    b.br(merge);

    b.switch_to(els);
    b.ld_elem(x, a, k);
    b.br(merge);

    b.switch_to(merge);
    b.ld_elem(y, a, k);
    b.binary(Opcode::Add, r, Opnd::reg(x), Opnd::reg(y));
    b.ret(Opnd::reg(r));
    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_scenario_builds() {
        for scenario in SCENARIOS {
            let func = scenario.build().unwrap();
            assert!(!func.blocks.is_empty(), "{}", scenario.name);
        }
    }

    #[test]
    fn test_find_by_name() {
        assert_eq!(find("fill").map(|s| s.name), Some("fill"));
        assert!(find("nope").is_none());
    }
}
