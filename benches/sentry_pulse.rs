//! Benchmarks for case execution: sequential sentry chains and flat
//! fan-out completion.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use caseweave::engine::state::TransitionEvent;
use caseweave::engine::CaseEngine;
use caseweave::model::{ActivityBuilder, CaseDefinition, CaseModelBuilder, SentryDeclaration};

/// Chain of `n` tasks, each gated on its predecessor completing.
fn chain_model(n: usize) -> Arc<CaseDefinition> {
    let mut root = ActivityBuilder::stage("casePlanModel");
    for i in 0..n {
        root = root.child(format!("t{i}"));
        if i > 0 {
            root = root.sentry(
                SentryDeclaration::new(format!("after{}", i - 1))
                    .with_on_part(format!("t{}", i - 1), TransitionEvent::Complete),
            );
        }
    }
    let mut builder = CaseModelBuilder::new("chain").plan_model(root);
    for i in 0..n {
        let mut task = ActivityBuilder::task(format!("t{i}"));
        if i > 0 {
            task = task.entry_criterion(format!("after{}", i - 1));
        }
        builder = builder.activity(task);
    }
    Arc::new(builder.build().expect("valid model"))
}

/// Flat stage of `n` independent tasks.
fn flat_model(n: usize) -> Arc<CaseDefinition> {
    let mut root = ActivityBuilder::stage("casePlanModel");
    for i in 0..n {
        root = root.child(format!("t{i}"));
    }
    let mut builder = CaseModelBuilder::new("flat").plan_model(root);
    for i in 0..n {
        builder = builder.activity(ActivityBuilder::task(format!("t{i}")));
    }
    Arc::new(builder.build().expect("valid model"))
}

fn run_chain(definition: &Arc<CaseDefinition>, n: usize) {
    let mut engine = CaseEngine::builder(Arc::clone(definition)).build().unwrap();
    engine.create_case_instance().unwrap();
    for i in 0..n {
        let task = engine.find_by_activity(&format!("t{i}")).unwrap();
        engine.complete(task).unwrap();
    }
}

fn bench_sentry_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("sentry_chain");
    for n in [4usize, 16, 64] {
        let definition = chain_model(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| run_chain(&definition, n));
        });
    }
    group.finish();
}

fn bench_flat_completion(c: &mut Criterion) {
    let mut group = c.benchmark_group("flat_completion");
    for n in [4usize, 16, 64] {
        let definition = flat_model(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| run_chain(&definition, n));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sentry_chain, bench_flat_completion);
criterion_main!(benches);
