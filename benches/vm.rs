//! Benchmarks for compilation, the binary container and VM execution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dialectvm::ast::{Call, Expr, Program, Stmt};
use dialectvm::bytecode::serializer::{deserialize, serialize_to_vec};
use dialectvm::vm::{Vm, VmConfig};
use std::io;

/// Recursive fibonacci called with `n`.
fn fib_program(n: i64) -> Program {
    let fib = |arg: Expr| Expr::call("fib", vec![arg]);
    let n_minus = |k: i64| Expr::infix(Expr::identifier("n"), "-", Expr::int(k));
    Program::new(vec![
        Stmt::function(
            "fib",
            &["n"],
            vec![
                Stmt::if_else(
                    Expr::infix(Expr::identifier("n"), "<", Expr::int(2)),
                    vec![Stmt::give_back(Expr::identifier("n"))],
                    None,
                ),
                Stmt::give_back(Expr::infix(fib(n_minus(1)), "+", fib(n_minus(2)))),
            ],
        ),
        Stmt::call(Call::new("fib", vec![Expr::int(n)])),
    ])
}

/// A long straight-line program of arithmetic and global traffic.
fn straight_line_program(statements: usize) -> Program {
    let mut body = vec![Stmt::set("acc", Expr::int(0))];
    for i in 0..statements as i64 {
        body.push(Stmt::set(
            "acc",
            Expr::infix(
                Expr::identifier("acc"),
                "+",
                Expr::infix(Expr::int(i), "%", Expr::int(7)),
            ),
        ));
    }
    body.push(Stmt::give_back(Expr::identifier("acc")));
    Program::new(body)
}

fn quiet_vm() -> Vm {
    Vm::with_output(VmConfig::default(), Box::new(io::sink()))
}

fn compile_benchmark(c: &mut Criterion) {
    let program = straight_line_program(1000);
    c.bench_function("compile_1000_statements", |b| {
        b.iter(|| dialectvm::compile(black_box(&program), "bench").expect("compile error"))
    });
}

fn serialize_benchmark(c: &mut Criterion) {
    let module = dialectvm::compile(&straight_line_program(1000), "bench").expect("compile error");
    let bytes = serialize_to_vec(&module).expect("serialize error");

    let mut group = c.benchmark_group("container");
    group.bench_function("serialize", |b| {
        b.iter(|| serialize_to_vec(black_box(&module)).expect("serialize error"))
    });
    group.bench_function("deserialize", |b| {
        b.iter(|| deserialize(black_box(&bytes)).expect("deserialize error"))
    });
    group.finish();
}

fn run_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("vm_fib_recursive");
    for n in [10, 15, 20] {
        let module = dialectvm::compile(&fib_program(n), "fib").expect("compile error");
        group.bench_with_input(BenchmarkId::from_parameter(n), &module, |b, module| {
            let mut vm = quiet_vm();
            b.iter(|| vm.run(black_box(module)).expect("vm runtime error"))
        });
    }
    group.finish();

    let module = dialectvm::compile(&straight_line_program(1000), "line").expect("compile error");
    c.bench_function("vm_straight_line_1000", |b| {
        let mut vm = quiet_vm();
        b.iter(|| vm.run(black_box(&module)).expect("vm runtime error"))
    });
}

criterion_group!(benches, compile_benchmark, serialize_benchmark, run_benchmark);
criterion_main!(benches);
