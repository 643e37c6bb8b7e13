//! Performance benchmarks for the global optimizer
//!
//! Run with: cargo bench
//!
//! These benchmarks measure:
//! - The whole pipeline on each built-in scenario
//! - The backward analysis alone
//! - Range arithmetic, which type specialization calls for every int operation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use globopt::globopt::int_bounds::IntConstantBounds;
use globopt::globopt::range::binary_range;
use globopt::ir::Opcode;
use globopt::{backward, scenarios, GlobOptConfig};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Benchmark: full pipeline per scenario
fn bench_scenarios(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize");
    let config = GlobOptConfig::default();
    for scenario in scenarios::SCENARIOS {
        let func = scenario.build().unwrap();
        group.throughput(Throughput::Elements(func.instr_count() as u64));
        group.bench_with_input(BenchmarkId::new("scenario", scenario.name), &func, |b, func| {
            b.iter(|| {
                let mut func = func.clone();
                black_box(globopt::optimize(&mut func, &config).unwrap())
            })
        });
    }
    group.finish();
}

/// Benchmark: same pipeline with every phase switched off
fn bench_disabled(c: &mut Criterion) {
    let config = GlobOptConfig::disabled();
    let func = scenarios::find("sum").unwrap().build().unwrap();
    c.bench_function("optimize_disabled_sum", |b| {
        b.iter(|| {
            let mut func = func.clone();
            black_box(globopt::optimize(&mut func, &config).unwrap())
        })
    });
}

/// Benchmark: liveness and loop summaries
fn bench_backward(c: &mut Criterion) {
    let func = scenarios::find("sum").unwrap().build().unwrap();
    c.bench_function("backward_analyze", |b| {
        b.iter(|| {
            let mut func = func.clone();
            backward::analyze(&mut func);
            black_box(func)
        })
    });
}

/// Benchmark: range arithmetic on random bounds
fn bench_range(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let inputs: Vec<(IntConstantBounds, IntConstantBounds)> = (0..1024)
        .map(|_| {
            let (a, b): (i32, i32) = (rng.gen(), rng.gen());
            let (x, y): (i32, i32) = (rng.gen_range(-64..64), rng.gen_range(-64..64));
            (
                IntConstantBounds::new(a.min(b), a.max(b)),
                IntConstantBounds::new(x.min(y), x.max(y)),
            )
        })
        .collect();
    let mut group = c.benchmark_group("range");
    group.throughput(Throughput::Elements(inputs.len() as u64));
    for op in [Opcode::Add, Opcode::Mul, Opcode::Div, Opcode::Shr] {
        group.bench_with_input(BenchmarkId::new("binary", format!("{:?}", op)), &inputs, |b, inputs| {
            b.iter(|| {
                for (l, r) in inputs {
                    black_box(binary_range(op, *l, *r));
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scenarios, bench_disabled, bench_backward, bench_range);
criterion_main!(benches);
