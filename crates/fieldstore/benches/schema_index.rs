// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Schema Index Benchmark
//!
//! Key -> offset lookups and schema construction for growing variable counts.

#![allow(clippy::uninlined_format_args)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fieldstore::{SchemaBuilder, Variable};

fn variables(count: usize) -> Vec<Variable<f64>> {
    (0..count)
        .map(|i| Variable::<f64>::new(format!("FIELD_{}", i)))
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("schema_build");
    for count in [8usize, 32, 128] {
        let vars = variables(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &vars, |b, vars| {
            b.iter(|| {
                let mut builder = SchemaBuilder::new();
                for v in vars {
                    builder.add(v).expect("add");
                }
                black_box(builder.build())
            });
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("schema_lookup");
    for count in [8usize, 32, 128] {
        let vars = variables(count);
        let mut builder = SchemaBuilder::new();
        for v in &vars {
            builder.add(v).expect("add");
        }
        let schema = builder.build();
        let absent = Variable::<f64>::new("NOT_IN_SCHEMA");

        group.bench_with_input(BenchmarkId::new("hit", count), &vars, |b, vars| {
            b.iter(|| {
                for v in vars {
                    black_box(schema.index(black_box(v.key())));
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("miss", count), &absent, |b, absent| {
            b.iter(|| black_box(schema.has(black_box(absent))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_lookup);
criterion_main!(benches);
