//! Benchmarks for the code generation pipeline.
//!
//! - Straight-line arithmetic (forest folding, no locals)
//! - A counting loop (phi coalescing, back edge)
//! - A wide switch feeding one phi (edge splitting, copy scheduling)
//! - Parallel copy sequentialization of a long rotation
//! - A module of many methods, sequential and on the rayon pool

extern crate cilgen;

use std::hint::black_box;

use cilgen::{
    codegen::ParallelCopy,
    compile_method, compile_module,
    ir::{BinaryOp, CompareOp, MethodBody, SsaType, Value},
    CodegenConfig,
};
use criterion::{criterion_group, criterion_main, Criterion};

/// `((a + b) * (a - b)) ^ ...` folded `depth` times
fn arithmetic(depth: usize) -> MethodBody {
    let mut body = MethodBody::new("Mix", vec![SsaType::I32, SsaType::I32], SsaType::I32);
    let entry = body.entry();
    let mut b = body.builder(entry);
    let mut acc = Value::Arg(0);
    for _ in 0..depth {
        let sum = b.binary(BinaryOp::Add, acc, Value::Arg(1), SsaType::I32);
        let diff = b.binary(BinaryOp::Sub, acc, Value::Arg(1), SsaType::I32);
        let prod = b.binary(BinaryOp::Mul, sum.into(), diff.into(), SsaType::I32);
        acc = b.binary(BinaryOp::Xor, prod.into(), acc, SsaType::I32).into();
    }
    b.ret(Some(acc));
    body
}

/// `for (i = 0; i < n; i++) acc += i`
fn counting_loop() -> MethodBody {
    let mut body = MethodBody::new("Sum", vec![SsaType::I32], SsaType::I32);
    let entry = body.entry();
    let header = body.create_block();
    let latch = body.create_block();
    let exit = body.create_block();

    body.builder(entry).jump(header);
    let mut b = body.builder(header);
    let i = b.phi(SsaType::I32, &[(entry, Value::i4(0))]);
    let acc = b.phi(SsaType::I32, &[(entry, Value::i4(0))]);
    let cond = b.compare(CompareOp::Lt, i.into(), Value::Arg(0));
    b.branch(cond.into(), latch, exit);
    let mut b = body.builder(latch);
    let next_i = b.binary(BinaryOp::Add, i.into(), Value::i4(1), SsaType::I32);
    let next_acc = b.binary(BinaryOp::Add, acc.into(), i.into(), SsaType::I32);
    b.jump(header);
    // Both predecessors are known, the phi arguments cannot fail to attach
    let _ = body.add_phi_arg(i, latch, next_i.into());
    let _ = body.add_phi_arg(acc, latch, next_acc.into());
    body.builder(exit).ret(Some(acc.into()));
    body
}

/// `switch (x) { case k: r = k * 3; }` with `cases` arms merging into one phi
fn wide_switch(cases: usize) -> MethodBody {
    let mut body = MethodBody::new("Table", vec![SsaType::I32], SsaType::I32);
    let entry = body.entry();
    let join = body.create_block();
    let arms: Vec<_> = (0..cases).map(|_| body.create_block()).collect();

    body.builder(entry).switch(Value::Arg(0), arms.clone(), join);
    let mut incoming = vec![(entry, Value::i4(-1))];
    for (k, &arm) in arms.iter().enumerate() {
        let mut b = body.builder(arm);
        let v = b.binary(BinaryOp::Mul, Value::Arg(0), Value::i4(3 * k as i32), SsaType::I32);
        b.jump(join);
        incoming.push((arm, v.into()));
    }
    let mut b = body.builder(join);
    let r = b.phi(SsaType::I32, &incoming);
    b.ret(Some(r.into()));
    body
}

fn bench_compile_arithmetic(c: &mut Criterion) {
    let body = arithmetic(64);
    let config = CodegenConfig::default();
    c.bench_function("compile_arithmetic_64", |b| {
        b.iter(|| {
            let mut body = body.clone();
            black_box(compile_method(black_box(&mut body), &config).unwrap())
        });
    });
}

fn bench_compile_loop(c: &mut Criterion) {
    let body = counting_loop();
    let config = CodegenConfig::default();
    c.bench_function("compile_loop", |b| {
        b.iter(|| {
            let mut body = body.clone();
            black_box(compile_method(black_box(&mut body), &config).unwrap())
        });
    });
}

fn bench_compile_switch(c: &mut Criterion) {
    let body = wide_switch(200);
    let config = CodegenConfig::default();
    c.bench_function("compile_switch_200", |b| {
        b.iter(|| {
            let mut body = body.clone();
            black_box(compile_method(black_box(&mut body), &config).unwrap())
        });
    });
}

fn bench_sequentialize_rotation(c: &mut Criterion) {
    let mut copies = ParallelCopy::new();
    for r in 0..256u32 {
        copies.add(r, (r + 1) % 256);
    }
    c.bench_function("sequentialize_rotation_256", |b| {
        b.iter(|| {
            let mut emitted = 0usize;
            let temps = copies
                .sequentialize(
                    || Ok(u32::MAX),
                    |_, _| {
                        emitted += 1;
                        Ok(())
                    },
                )
                .unwrap();
            black_box((temps, emitted))
        });
    });
}

fn bench_compile_module(c: &mut Criterion) {
    let methods: Vec<MethodBody> = (0..256)
        .map(|i| match i % 3 {
            0 => arithmetic(16),
            1 => counting_loop(),
            _ => wide_switch(16),
        })
        .collect();

    for parallel in [false, true] {
        let config = CodegenConfig {
            parallel,
            ..CodegenConfig::default()
        };
        let name = if parallel {
            "compile_module_parallel"
        } else {
            "compile_module_sequential"
        };
        c.bench_function(name, |b| {
            b.iter(|| black_box(compile_module(methods.clone(), &config)));
        });
    }
}

criterion_group!(
    benches,
    bench_compile_arithmetic,
    bench_compile_loop,
    bench_compile_switch,
    bench_sequentialize_rotation,
    bench_compile_module,
);
criterion_main!(benches);
